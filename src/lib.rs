//! FAST Feed - market data codec and order book synchronization
//!
//! Decodes and encodes FAST streams (presence maps plus per-field
//! transmission operators) and rebuilds order books from redundant
//! increment feeds arbitrated against snapshot feeds:
//! - Stop-bit integer, string, decimal and byte-vector primitives
//! - Copy / increment / delta / constant operators with per-field dictionaries
//! - Resumable decoding across short reads
//! - Session transport with a compacting receive buffer
//! - Cross-feed sequence arbitration and gap mode
//! - Book join (snapshot + replay of buffered increments) and recovery

pub mod protocol;
pub mod pmap;
pub mod field;
pub mod codec;
pub mod sequence;
pub mod template;
pub mod message;
pub mod decoder;
pub mod session;
pub mod feed;
pub mod book;
pub mod layout;
pub mod gap_detector;
pub mod book_set;
pub mod config;
pub mod stats;

pub use protocol::{MessageType, Reader};
pub use pmap::PresenceMap;
pub use field::{Decimal, Field, FieldState, FieldType, Operator, Presence, Value};
pub use sequence::{Row, Sequence};
pub use template::{Template, TemplateError, TemplateSet};
pub use message::Message;
pub use decoder::{DecodeError, Decoder, EncodeError, Encoder};
pub use session::{Session, SessionError};
pub use feed::{Feed, FeedError, Transport};
pub use book::{Book, BookDepth, BookError, BookSnapshot, Entry, EntryType, PriceLevel, Side, UpdateAction};
pub use layout::{LayoutError, MessageLayout};
pub use gap_detector::{GapDetector, SeqVerdict};
pub use book_set::{BookSet, SyncError, Tick};
pub use config::{load_config, Config, ConfigError};
pub use stats::{FeedStats, LatencyStats};
