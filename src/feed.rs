//! Feeds and their transports
//!
//! A feed is a named transport bound to one session. Files replay a captured
//! stream, TCP carries snapshot requests on some venues, and multicast
//! datagrams may be prefixed with a fixed-size preamble (a little-endian
//! packet sequence number on MICEX-style feeds) that is stripped before the
//! payload reaches the session buffer.

use std::fs::File;
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, TcpStream, UdpSocket};
use std::ops::Range;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{FeedConfig, FeedKind, TransportConfig};
use crate::message::Message;
use crate::protocol::DATAGRAM_MAX_SIZE;
use crate::session::{Session, SessionError};
use crate::template::TemplateSet;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("feed {feed}: failed to open transport: {source}")]
    Open {
        feed: String,
        source: io::Error,
    },

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Split a datagram into its packet number (for preambles of at least four
/// bytes) and payload. `None` when the datagram is shorter than the preamble.
pub fn strip_preamble(datagram: &[u8], preamble: usize) -> Option<(Option<u32>, &[u8])> {
    if datagram.len() < preamble {
        return None;
    }

    let packet = (preamble >= 4).then(|| LittleEndian::read_u32(&datagram[..4]));
    Some((packet, &datagram[preamble..]))
}

/// Multicast group member that exposes datagram payloads as a byte stream.
///
/// A read never spans two datagrams, so a reader with room for
/// `DATAGRAM_MAX_SIZE` bytes gets exactly one payload per read.
#[derive(Debug)]
pub struct MulticastSource {
    socket: UdpSocket,
    source: Option<Ipv4Addr>,
    preamble: usize,
    datagram: Vec<u8>,
    pending: Range<usize>,
    last_packet: Option<u32>,
}

impl MulticastSource {
    pub fn join(
        group: Ipv4Addr,
        port: u16,
        interface: Ipv4Addr,
        source: Option<Ipv4Addr>,
        preamble: usize,
        blocking: bool,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
        socket.join_multicast_v4(&group, &interface)?;
        socket.set_nonblocking(!blocking)?;

        Ok(MulticastSource {
            socket,
            source,
            preamble,
            datagram: vec![0; DATAGRAM_MAX_SIZE],
            pending: 0..0,
            last_packet: None,
        })
    }

    /// Packet number from the most recent preamble
    pub fn last_packet(&self) -> Option<u32> {
        self.last_packet
    }
}

impl Read for MulticastSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.pending.is_empty() {
            let (len, from) = self.socket.recv_from(&mut self.datagram)?;

            if let Some(source) = self.source {
                if from.ip() != IpAddr::V4(source) {
                    continue;
                }
            }

            let Some((packet, payload)) = strip_preamble(&self.datagram[..len], self.preamble) else {
                debug!(len, preamble = self.preamble, "dropping short datagram");
                continue;
            };

            if packet.is_some() {
                self.last_packet = packet;
            }
            self.pending = (len - payload.len())..len;
        }

        let n = buf.len().min(self.pending.len());
        let start = self.pending.start;
        buf[..n].copy_from_slice(&self.datagram[start..start + n]);
        self.pending.start += n;
        Ok(n)
    }
}

#[derive(Debug)]
pub enum Transport {
    File(File),
    Tcp(TcpStream),
    Multicast(MulticastSource),
}

impl Transport {
    pub fn open(config: &FeedConfig) -> io::Result<Self> {
        match &config.transport {
            TransportConfig::File { path } => Ok(Transport::File(File::open(path)?)),
            TransportConfig::Tcp { address } => {
                let stream = TcpStream::connect(address)?;
                stream.set_nodelay(true)?;
                stream.set_nonblocking(!config.blocking)?;
                Ok(Transport::Tcp(stream))
            }
            TransportConfig::Multicast {
                group,
                port,
                interface,
                source,
            } => Ok(Transport::Multicast(MulticastSource::join(
                *group,
                *port,
                *interface,
                *source,
                config.preamble_bytes,
                config.blocking,
            )?)),
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::File(file) => file.read(buf),
            Transport::Tcp(stream) => stream.read(buf),
            Transport::Multicast(source) => source.read(buf),
        }
    }
}

#[derive(Debug)]
pub struct Feed {
    config: FeedConfig,
    templates: Arc<TemplateSet>,
    session: Option<Session<Transport>>,
}

impl Feed {
    pub fn new(config: FeedConfig, templates: Arc<TemplateSet>) -> Self {
        Feed {
            config,
            templates,
            session: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn kind(&self) -> FeedKind {
        self.config.kind
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Open the transport and start a fresh session. No-op when already open.
    pub fn open(&mut self) -> Result<(), FeedError> {
        if self.session.is_some() {
            return Ok(());
        }

        let transport = Transport::open(&self.config).map_err(|source| FeedError::Open {
            feed: self.config.name.clone(),
            source,
        })?;

        let session = Session::new(transport, &self.templates)
            .blocking(self.config.blocking)
            .reset_on_reset_message(self.config.reset_on_reset_message)
            .datagrams(matches!(self.config.transport, TransportConfig::Multicast { .. }));
        self.session = Some(session);

        info!(feed = %self.config.name, kind = ?self.config.kind, "feed opened");
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.stats().log_summary(&self.config.name);
            info!(feed = %self.config.name, "feed closed");
        }
    }

    pub fn reopen(&mut self) -> Result<(), FeedError> {
        self.close();
        self.open()
    }

    /// Next decoded message, `None` when closed or nothing is ready
    pub fn recv(&mut self) -> Result<Option<&Message>, FeedError> {
        match self.session.as_mut() {
            Some(session) => Ok(session.recv()?),
            None => Ok(None),
        }
    }

    pub fn is_eof(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_eof)
    }

    pub fn session(&self) -> Option<&Session<Transport>> {
        self.session.as_ref()
    }

    pub fn last_packet(&self) -> Option<u32> {
        match self.session.as_ref()?.get_ref() {
            Transport::Multicast(source) => source.last_packet(),
            Transport::File(_) | Transport::Tcp(_) => None,
        }
    }
}
