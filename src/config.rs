//! Runtime configuration
//!
//! Feeds, books and the sync policy are read from YAML:
//!
//! ```yaml
//! feeds:
//!   - name: inc-a
//!     kind: increment
//!     transport: { type: multicast, group: 239.195.1.1, port: 16001, source: 91.203.253.225 }
//!     preamble_bytes: 4
//!   - name: snap-a
//!     kind: snapshot
//!     transport: { type: file, path: snapshot.fast }
//! books:
//!   - symbol: GAZP
//!     security_id: 1001
//!     tick: { mantissa: 1, exponent: -2 }
//! sync:
//!   auto_recover: true
//! ```

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::book::MAX_BOOK_DEPTH;
use crate::book_set::{MAX_BOOKS, MAX_FEEDS};
use crate::field::Decimal;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    #[error("config validation failed: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub feeds: Vec<FeedConfig>,
    pub books: Vec<BookConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Config {
    pub fn feeds_of(&self, kind: FeedKind) -> impl Iterator<Item = &FeedConfig> {
        self.feeds.iter().filter(move |f| f.kind == kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Increment,
    Snapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Multicast {
        group: Ipv4Addr,
        port: u16,
        #[serde(default = "default_interface")]
        interface: Ipv4Addr,
        /// Only accept datagrams from this sender
        #[serde(default)]
        source: Option<Ipv4Addr>,
    },
    Tcp {
        address: SocketAddr,
    },
    File {
        path: PathBuf,
    },
}

fn default_interface() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub kind: FeedKind,
    pub transport: TransportConfig,
    #[serde(default)]
    pub blocking: bool,
    /// Bytes stripped from the front of every datagram
    #[serde(default)]
    pub preamble_bytes: usize,
    #[serde(default = "default_true")]
    pub reset_on_reset_message: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookConfig {
    pub symbol: String,
    pub security_id: u64,
    #[serde(default = "default_depth")]
    pub depth: usize,
    pub tick: Decimal,
    #[serde(default)]
    pub trading_session: Option<String>,
}

const fn default_depth() -> usize {
    20
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Recover as soon as every increment feed is past a missing sequence
    #[serde(default = "default_true")]
    pub auto_recover: bool,
    /// Give up a join after this many polls. Unbounded when unset.
    #[serde(default)]
    pub max_join_polls: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            auto_recover: true,
            max_join_polls: None,
        }
    }
}

const fn default_true() -> bool {
    true
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    load_config_from_str(&contents)
}

pub fn load_config_from_str(yaml: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml_bw::from_str(yaml)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    for kind in [FeedKind::Increment, FeedKind::Snapshot] {
        let count = config.feeds_of(kind).count();
        if count == 0 {
            return Err(ConfigError::ValidationError(format!(
                "at least one {kind:?} feed is required"
            )));
        }
        if count > MAX_FEEDS {
            return Err(ConfigError::ValidationError(format!(
                "{count} {kind:?} feeds exceed the limit of {MAX_FEEDS}"
            )));
        }
    }

    let mut names = HashSet::new();
    for feed in &config.feeds {
        if !names.insert(feed.name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate feed name '{}'",
                feed.name
            )));
        }
        if feed.preamble_bytes > 0 && !matches!(feed.transport, TransportConfig::Multicast { .. }) {
            return Err(ConfigError::ValidationError(format!(
                "feed '{}': preamble_bytes only applies to multicast transports",
                feed.name
            )));
        }
    }

    if config.books.is_empty() {
        return Err(ConfigError::ValidationError("no books configured".to_string()));
    }
    if config.books.len() > MAX_BOOKS {
        return Err(ConfigError::ValidationError(format!(
            "{} books exceed the limit of {MAX_BOOKS}",
            config.books.len()
        )));
    }

    let mut ids = HashSet::new();
    let mut symbols = HashSet::new();
    for book in &config.books {
        if !ids.insert(book.security_id) || !symbols.insert(book.symbol.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate book '{}' ({})",
                book.symbol, book.security_id
            )));
        }
        if book.depth == 0 || book.depth > MAX_BOOK_DEPTH {
            return Err(ConfigError::ValidationError(format!(
                "book '{}': depth must be within 1..={MAX_BOOK_DEPTH}",
                book.symbol
            )));
        }
        if book.tick.mantissa <= 0 || !book.tick.has_valid_exponent() {
            return Err(ConfigError::ValidationError(format!(
                "book '{}': invalid tick {}",
                book.symbol, book.tick
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
feeds:
  - name: inc-a
    kind: increment
    transport: { type: multicast, group: 239.195.1.1, port: 16001, source: 91.203.253.225 }
    preamble_bytes: 4
  - name: snap-a
    kind: snapshot
    transport: { type: file, path: snapshot.fast }
books:
  - symbol: GAZP
    security_id: 1001
    tick: { mantissa: 1, exponent: -2 }
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = load_config_from_str(YAML).unwrap();
        assert_eq!(config.feeds.len(), 2);
        assert!(config.sync.auto_recover);
        assert_eq!(config.sync.max_join_polls, None);
        assert_eq!(config.books[0].depth, 20);
        assert!(config.feeds[0].reset_on_reset_message);
        assert!(matches!(
            config.feeds[0].transport,
            TransportConfig::Multicast { interface, source: Some(_), .. } if interface == Ipv4Addr::UNSPECIFIED
        ));
    }

    #[test]
    fn test_snapshot_feed_required() {
        let yaml = YAML.replace("kind: snapshot", "kind: increment");
        assert!(matches!(
            load_config_from_str(&yaml),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_preamble_rejected_on_file() {
        let yaml = YAML.replace(
            "transport: { type: file, path: snapshot.fast }",
            "transport: { type: file, path: snapshot.fast }\n    preamble_bytes: 4",
        );
        assert!(matches!(
            load_config_from_str(&yaml),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.yaml");
        std::fs::write(&path, YAML).unwrap();
        assert_eq!(load_config(&path).unwrap().books[0].symbol, "GAZP");

        assert!(matches!(
            load_config(dir.path().join("missing.yaml")),
            Err(ConfigError::ReadError { .. })
        ));
    }
}
