//! Session transport
//!
//! A session owns one receive buffer on a single stream and two slots per
//! template, one for each direction, so sent values never leak into the
//! receive dictionaries. Decoding is first tried against buffered bytes; only when
//! that comes up short does the session read more, compacting the buffer
//! beforehand if less than one maximum-size message fits behind the unread
//! data.

use std::io::{self, Read};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, warn};

use crate::decoder::{DecodeError, Decoder, EncodeError, Encoder};
use crate::message::Message;
use crate::protocol::{DATAGRAM_MAX_SIZE, MESSAGE_MAX_SIZE, RECV_BUFFER_SIZE};
use crate::stats::FeedStats;
use crate::template::TemplateSet;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),
}

#[derive(Debug)]
struct RxBuffer {
    data: Vec<u8>,
    start: usize,
    end: usize,
}

impl RxBuffer {
    fn new(capacity: usize) -> Self {
        RxBuffer {
            data: vec![0; capacity.max(MESSAGE_MAX_SIZE)],
            start: 0,
            end: 0,
        }
    }

    fn unread(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    fn consume(&mut self, n: usize) {
        self.start = (self.start + n).min(self.end);
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    fn fill<R: Read>(&mut self, src: &mut R) -> io::Result<usize> {
        if self.data.len() - self.end < MESSAGE_MAX_SIZE {
            self.data.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;

            if self.data.len() - self.end < MESSAGE_MAX_SIZE {
                let len = self.data.len() * 2;
                self.data.resize(len, 0);
            }
        }

        let n = src.read(&mut self.data[self.end..])?;
        self.end += n;
        Ok(n)
    }
}

#[derive(Debug)]
pub struct Session<S> {
    stream: S,
    rx: RxBuffer,
    messages: Vec<Message>,
    outgoing: Vec<Message>,
    decoder: Decoder,
    encoder: Encoder,
    blocking: bool,
    reset_messages: bool,
    datagrams: bool,
    eof: bool,
    stats: FeedStats,
}

impl<S> Session<S> {
    pub fn new(stream: S, templates: &TemplateSet) -> Self {
        Session {
            stream,
            rx: RxBuffer::new(RECV_BUFFER_SIZE),
            messages: templates.messages(),
            outgoing: templates.messages(),
            decoder: Decoder::new(templates),
            encoder: Encoder::new(),
            blocking: false,
            reset_messages: true,
            datagrams: false,
            eof: false,
            stats: FeedStats::new(),
        }
    }

    /// Retry reads that would block instead of returning to the caller
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Whether templates flagged as reset reset the dictionaries
    pub fn reset_on_reset_message(mut self, enabled: bool) -> Self {
        self.reset_messages = enabled;
        self
    }

    /// Treat every read as one whole datagram.
    ///
    /// The buffer is refilled only once drained, so a garbled message drops
    /// the rest of its datagram and decoding picks up at the next one. A
    /// message cut short by the end of a datagram counts as garbled.
    pub fn datagrams(mut self, enabled: bool) -> Self {
        self.datagrams = enabled;
        if enabled {
            self.rx = RxBuffer::new(DATAGRAM_MAX_SIZE);
        }
        self
    }

    /// Last message received for a template
    pub fn message(&self, template_id: u32) -> Option<&Message> {
        self.decoder.slot(template_id).and_then(|slot| self.messages.get(slot))
    }

    /// Outgoing slot for a template; fill it in, then call `encode`
    pub fn outgoing_mut(&mut self, template_id: u32) -> Option<&mut Message> {
        let slot = self.decoder.slot(template_id)?;
        self.outgoing.get_mut(slot)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn stats(&self) -> &FeedStats {
        &self.stats
    }

    /// Bytes buffered but not yet decoded
    pub fn buffered(&self) -> usize {
        self.rx.unread().len()
    }

    /// The last read hit end of stream
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Reset both directions: every slot to its initial state, sequence rows
    /// included, and the template id history.
    pub fn reset(&mut self) {
        self.reset_incoming();
        self.reset_outgoing();
    }

    fn reset_incoming(&mut self) {
        debug!("resetting receive dictionaries");
        self.messages.iter_mut().for_each(Message::reset);
        self.decoder.reset();
    }

    fn reset_outgoing(&mut self) {
        debug!("resetting send dictionaries");
        self.outgoing.iter_mut().for_each(Message::reset);
        self.encoder.reset();
    }

    /// Append the current contents of a template's outgoing slot to `out`.
    pub fn encode(&mut self, template_id: u32, out: &mut Vec<u8>) -> Result<(), SessionError> {
        let slot = self
            .decoder
            .slot(template_id)
            .ok_or(EncodeError::UnknownTemplate(template_id))?;

        let message = &mut self.outgoing[slot];
        self.encoder.encode(message, out)?;

        if message.is_reset() && self.reset_messages {
            self.reset_outgoing();
        }
        Ok(())
    }
}

impl<S: Read> Session<S> {
    /// Decode the next message.
    ///
    /// Returns `Ok(None)` when no complete message is available: the stream
    /// would block (non-blocking mode) or reached end of file. Garbled
    /// messages are skipped and counted.
    pub fn recv(&mut self) -> Result<Option<&Message>, SessionError> {
        let slot = loop {
            let started = Instant::now();
            let result = self.decoder.decode(&mut self.messages, self.rx.unread());
            let consumed = self.decoder.consumed();
            self.rx.consume(consumed);

            match result {
                Ok(slot) => {
                    self.stats.record_decode_latency(started.elapsed().as_nanos() as u64);
                    self.stats.record_message();
                    break slot;
                }
                Err(DecodeError::Partial) if self.datagrams && self.truncated() => {
                    self.decoder.abandon();
                    let skipped = self.drop_datagram();
                    self.stats.record_garbled();
                    warn!(skipped, "dropping truncated datagram");
                }
                Err(DecodeError::Partial) => {
                    self.stats.record_partial();
                    if self.fill()? == 0 {
                        return Ok(None);
                    }
                }
                Err(err) => {
                    let skipped = if self.datagrams {
                        consumed + self.drop_datagram()
                    } else {
                        consumed
                    };
                    self.stats.record_garbled();
                    warn!(error = %err, skipped, "dropping garbled message");
                }
            }
        };

        if self.messages[slot].is_reset() && self.reset_messages {
            self.reset_incoming();
        }

        Ok(self.messages.get(slot))
    }

    /// A message started in the current datagram but did not finish there
    fn truncated(&self) -> bool {
        self.decoder.in_progress() || !self.rx.unread().is_empty()
    }

    fn drop_datagram(&mut self) -> usize {
        let rest = self.rx.unread().len();
        self.rx.consume(rest);
        rest
    }

    fn fill(&mut self) -> Result<usize, SessionError> {
        loop {
            match self.rx.fill(&mut self.stream) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(0);
                }
                Ok(n) => {
                    self.eof = false;
                    self.stats.record_read(n);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if self.blocking {
                        continue;
                    }
                    return Ok(0);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
