//! Multi-feed order book synchronization
//!
//! A `BookSet` owns the redundant increment feeds, the snapshot feeds and a
//! fixed set of books. Increments are arbitrated across feeds by `MsgSeqNum`
//! and applied to active books when each row's `RptSeq` advances that book by
//! exactly one.
//!
//! A book becomes active by joining: increments are buffered (and applied to
//! the other active books) while the snapshot feeds are read. Once a snapshot
//! for the book arrives whose `LastMsgSeqNumProcessed` reaches the buffered
//! stream, it replaces the book's levels and the buffered increments past it
//! are replayed. A sequence gap no feed can fill triggers recovery: every book
//! is deactivated and every subscribed book joins again.

use std::sync::Arc;
use std::time::Instant;

use arrayvec::ArrayVec;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::book::{Book, BookError};
use crate::config::{validate_config, Config, ConfigError, FeedKind, SyncConfig};
use crate::feed::{Feed, FeedError};
use crate::gap_detector::{GapDetector, SeqVerdict};
use crate::layout::{build_layouts, LayoutError, Layouts, MessageLayout};
use crate::message::Message;
use crate::protocol::MessageType;
use crate::stats::FeedStats;
use crate::template::TemplateSet;

pub const MAX_FEEDS: usize = 4;
pub const MAX_BOOKS: usize = 64;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no book with security id {0}")]
    UnknownBook(u64),

    #[error("join of {symbol} gave up after {polls} polls")]
    JoinExhausted { symbol: String, polls: u64 },
}

/// Outcome of one `BookSet::update`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// No increment was accepted
    Idle,
    /// Increments accepted this cycle
    Applied(usize),
    /// Every increment feed is past a missing sequence number
    Stalled,
    /// Books (bit per book index) lost their `RptSeq` continuity
    Desynced { books: u64 },
    /// Books were rejoined after a stall or a desync
    Recovered,
}

fn bit(idx: usize) -> u64 {
    1u64 << idx
}

#[derive(Debug, Default)]
struct Books {
    list: Vec<Book>,
    by_id: FxHashMap<u64, usize>,
    by_symbol: FxHashMap<Vec<u8>, usize>,
    touched: u64,
}

impl Books {
    fn find(&self, security_id: Option<u64>, symbol: Option<&[u8]>) -> Option<usize> {
        match security_id {
            Some(id) => self.by_id.get(&id).copied(),
            None => symbol.and_then(|s| self.by_symbol.get(s).copied()),
        }
    }
}

/// Messages accepted from the increment feeds in one pass
struct Poll<'a> {
    messages: ArrayVec<(&'a Message, &'a MessageLayout), MAX_FEEDS>,
    stalled: bool,
}

fn is_session_level(kind: MessageType) -> bool {
    matches!(
        kind,
        MessageType::Heartbeat | MessageType::SequenceReset | MessageType::SessionStatus
    )
}

/// Read at most one message from every increment feed that is not ahead of
/// the accepted stream.
fn poll_increments<'a>(
    feeds: &'a mut [Feed],
    gaps: &mut GapDetector,
    layouts: &'a Layouts,
    stats: &mut FeedStats,
) -> Result<Poll<'a>, SyncError> {
    let mut messages = ArrayVec::new();

    for (i, feed) in feeds.iter_mut().enumerate() {
        if !gaps.should_poll(i) {
            continue;
        }

        let Some(msg) = feed.recv()? else {
            continue;
        };
        if msg.is_reset() {
            continue;
        }
        let Some(layout) = layouts.get(&msg.template_id()) else {
            continue;
        };
        let Some(seq) = layout.seq_num(msg) else {
            warn!(feed = i, template = msg.template_id(), "increment without MsgSeqNum");
            continue;
        };

        match gaps.observe(i, seq) {
            SeqVerdict::First | SeqVerdict::Next => {}
            SeqVerdict::Gap { missing } => {
                warn!(feed = i, seq, missing, "sequence gap, entering gap mode");
                stats.record_gap(missing);
                continue;
            }
            SeqVerdict::Duplicate | SeqVerdict::Ahead => continue,
        }

        match layout.message_type(msg) {
            Some(MessageType::IncrementalRefresh) => messages.push((msg, layout)),
            Some(kind) if is_session_level(kind) => {}
            kind => warn!(feed = i, seq, ?kind, "unexpected message on increment feed"),
        }
    }

    Ok(Poll {
        messages,
        stalled: gaps.stalled(),
    })
}

/// Next snapshot refresh from any snapshot feed. File feeds that ran dry are
/// rewound so the snapshot cycle repeats.
fn poll_snapshot<'a>(
    feeds: &'a mut [Feed],
    layouts: &'a Layouts,
) -> Result<Option<(&'a Message, &'a MessageLayout)>, SyncError> {
    for (i, feed) in feeds.iter_mut().enumerate() {
        if feed.is_eof() {
            feed.reopen()?;
        } else {
            feed.open()?;
        }

        let Some(msg) = feed.recv()? else {
            continue;
        };
        if msg.is_reset() {
            continue;
        }
        let Some(layout) = layouts.get(&msg.template_id()) else {
            continue;
        };

        match layout.message_type(msg) {
            Some(MessageType::SnapshotRefresh) => return Ok(Some((msg, layout))),
            Some(kind) if is_session_level(kind) => {}
            kind => warn!(feed = i, ?kind, "unexpected message on snapshot feed"),
        }
    }

    Ok(None)
}

/// Which books an incremental refresh is applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplyMode {
    /// Every active book. Rows already covered by its snapshot are skipped.
    Steady,
    /// Only the book being joined; every row must advance it by one
    Replay(usize),
}

/// Apply the rows of one incremental refresh. Returns the books that lost
/// continuity or failed to apply.
fn apply_increment(books: &mut Books, msg: &Message, layout: &MessageLayout, mode: ApplyMode) -> u64 {
    let Some(entries) = layout.entries(msg) else {
        warn!(template = msg.template_id(), "incremental refresh without entries");
        return 0;
    };

    let row_layout = &layout.row;
    let mut failed = 0;

    for row in entries.rows() {
        let Some(idx) = books.find(row_layout.security_id(&row), row_layout.symbol(&row)) else {
            continue;
        };
        if matches!(mode, ApplyMode::Replay(only) if only != idx) {
            continue;
        }

        let book = &mut books.list[idx];
        if !book.is_active() {
            continue;
        }
        if let Some(session) = row_layout.trading_session(&row) {
            if !book.accepts_session(session) {
                continue;
            }
        }

        let Some(rptseq) = row_layout.rptseq(&row) else {
            warn!(symbol = book.symbol(), "increment row without RptSeq");
            book.set_active(false);
            failed |= bit(idx);
            continue;
        };

        // already reflected in the snapshot
        if mode == ApplyMode::Steady && rptseq <= book.rptseq() {
            continue;
        }
        if rptseq != book.rptseq() + 1 {
            warn!(
                symbol = book.symbol(),
                expected = book.rptseq() + 1,
                rptseq,
                "rptseq mismatch"
            );
            book.set_active(false);
            failed |= bit(idx);
            continue;
        }

        book.set_rptseq(rptseq);
        books.touched |= bit(idx);

        let result = row_layout.entry(&row, false).and_then(|entry| book.apply(&entry));
        if let Err(err) = result {
            warn!(symbol = book.symbol(), rptseq, error = %err, "failed to apply increment");
            book.set_active(false);
            failed |= bit(idx);
        }
    }

    failed
}

/// Replace the levels of book `target` with a snapshot refresh addressed to
/// it. Returns false when the snapshot is for another book.
fn apply_snapshot(books: &mut Books, msg: &Message, layout: &MessageLayout, target: usize) -> Result<bool, BookError> {
    if books.find(layout.security_id(msg), layout.symbol(msg)) != Some(target) {
        return Ok(false);
    }

    let book = &mut books.list[target];
    if book.is_active() {
        return Ok(false);
    }

    let entries = layout.entries(msg).ok_or(BookError::MissingField("MDEntries"))?;
    let session = entries
        .row(0)
        .and_then(|row| layout.row.trading_session(&row))
        .or_else(|| layout.trading_session(msg));
    if let Some(session) = session {
        if !book.accepts_session(session) {
            return Ok(false);
        }
    }

    let rptseq = layout.rptseq(msg).ok_or(BookError::MissingField("RptSeq"))?;
    book.clear();
    book.set_rptseq(rptseq);

    for row in entries.rows() {
        let result = layout.row.entry(&row, true).and_then(|entry| book.apply(&entry));
        if let Err(err) = result {
            book.clear();
            return Err(err);
        }
        // the empty-book marker ends the snapshot
        if book.is_empty() {
            break;
        }
    }

    book.set_active(true);
    books.touched |= bit(target);
    Ok(true)
}

#[derive(Debug)]
pub struct BookSet {
    increments: ArrayVec<Feed, MAX_FEEDS>,
    snapshots: ArrayVec<Feed, MAX_FEEDS>,
    books: Books,
    layouts: Layouts,
    gaps: GapDetector,
    desynced: u64,
    policy: SyncConfig,
    stats: FeedStats,
}

impl BookSet {
    pub fn new(config: &Config, templates: Arc<TemplateSet>) -> Result<Self, SyncError> {
        validate_config(config)?;
        let layouts = build_layouts(&templates)?;

        let feeds = |kind| -> ArrayVec<Feed, MAX_FEEDS> {
            config
                .feeds_of(kind)
                .take(MAX_FEEDS)
                .map(|f| Feed::new(f.clone(), Arc::clone(&templates)))
                .collect()
        };
        let increments = feeds(FeedKind::Increment);
        let snapshots = feeds(FeedKind::Snapshot);

        let mut books = Books::default();
        for (idx, book) in config.books.iter().take(MAX_BOOKS).enumerate() {
            books.by_id.insert(book.security_id, idx);
            books.by_symbol.insert(book.symbol.as_bytes().to_vec(), idx);
            books.list.push(Book::from_config(book));
        }

        Ok(BookSet {
            gaps: GapDetector::new(increments.len()),
            increments,
            snapshots,
            books,
            layouts,
            desynced: 0,
            policy: config.sync.clone(),
            stats: FeedStats::new(),
        })
    }

    /// Open every increment feed
    pub fn open(&mut self) -> Result<(), SyncError> {
        for feed in self.increments.iter_mut() {
            feed.open()?;
        }
        self.gaps.reset();
        Ok(())
    }

    /// Close every feed and log their statistics
    pub fn close(&mut self) {
        self.increments.iter_mut().for_each(Feed::close);
        self.snapshots.iter_mut().for_each(Feed::close);
        self.stats.log_summary("book-set");
    }

    pub fn books(&self) -> &[Book] {
        &self.books.list
    }

    pub fn book(&self, security_id: u64) -> Option<&Book> {
        self.books.by_id.get(&security_id).map(|&idx| &self.books.list[idx])
    }

    pub fn book_by_symbol(&self, symbol: &str) -> Option<&Book> {
        self.books
            .by_symbol
            .get(symbol.as_bytes())
            .map(|&idx| &self.books.list[idx])
    }

    /// Books changed since the start of the last update
    pub fn touched(&self) -> impl Iterator<Item = &Book> {
        let mask = self.books.touched;
        self.books
            .list
            .iter()
            .enumerate()
            .filter(move |(idx, _)| mask & bit(*idx) != 0)
            .map(|(_, book)| book)
    }

    pub fn increments(&self) -> &[Feed] {
        &self.increments
    }

    pub fn snapshots(&self) -> &[Feed] {
        &self.snapshots
    }

    pub fn gaps(&self) -> &GapDetector {
        &self.gaps
    }

    pub fn stats(&self) -> &FeedStats {
        &self.stats
    }

    fn index_of(&self, security_id: u64) -> Result<usize, SyncError> {
        self.books
            .by_id
            .get(&security_id)
            .copied()
            .ok_or(SyncError::UnknownBook(security_id))
    }

    /// Join a book and keep it synchronized from now on
    pub fn subscribe(&mut self, security_id: u64) -> Result<(), SyncError> {
        let idx = self.index_of(security_id)?;
        self.join(idx)?;
        self.books.list[idx].set_subscribed(true);
        Ok(())
    }

    /// Stop maintaining a book; it stays inactive until subscribed again
    pub fn unsubscribe(&mut self, security_id: u64) -> Result<(), SyncError> {
        let idx = self.index_of(security_id)?;
        let book = &mut self.books.list[idx];
        book.set_subscribed(false);
        book.set_active(false);
        self.desynced &= !bit(idx);
        Ok(())
    }

    /// Poll every increment feed once and apply what was accepted
    pub fn update(&mut self) -> Result<Tick, SyncError> {
        self.books.touched = 0;

        let (applied, stalled) = {
            let poll = poll_increments(&mut self.increments, &mut self.gaps, &self.layouts, &mut self.stats)?;
            let applied = poll.messages.len();
            for (msg, layout) in poll.messages {
                let started = Instant::now();
                self.desynced |= apply_increment(&mut self.books, msg, layout, ApplyMode::Steady);
                self.stats.record_book_update_latency(started.elapsed().as_nanos() as u64);
            }
            (applied, poll.stalled)
        };

        if stalled {
            warn!(
                last = ?self.gaps.last_sequence(),
                "every increment feed is past a missing sequence"
            );
            if !self.policy.auto_recover {
                return Ok(Tick::Stalled);
            }
            self.recover()?;
            return Ok(Tick::Recovered);
        }

        let desynced = self.desynced & self.subscribed_mask();
        if desynced != 0 {
            if !self.policy.auto_recover {
                return Ok(Tick::Desynced { books: desynced });
            }
            self.rejoin()?;
            return Ok(Tick::Recovered);
        }

        if applied == 0 {
            Ok(Tick::Idle)
        } else {
            Ok(Tick::Applied(applied))
        }
    }

    fn subscribed_mask(&self) -> u64 {
        self.books
            .list
            .iter()
            .enumerate()
            .filter(|(_, book)| book.is_subscribed())
            .fold(0, |mask, (idx, _)| mask | bit(idx))
    }

    /// Join every subscribed book that is not active
    fn rejoin(&mut self) -> Result<(), SyncError> {
        while let Some(idx) = self
            .books
            .list
            .iter()
            .position(|book| book.is_subscribed() && !book.is_active())
        {
            self.join(idx)?;
        }
        self.desynced = 0;
        Ok(())
    }

    /// Start over: forget the accepted sequence, deactivate every book and
    /// join each subscribed one again.
    pub fn recover(&mut self) -> Result<(), SyncError> {
        info!("recovering subscribed books");
        self.stats.record_recovery();

        self.gaps.reset();
        self.books.list.iter_mut().for_each(|book| book.set_active(false));
        self.rejoin()
    }

    /// Bring book `idx` in sync, retrying until it succeeds or the
    /// configured poll budget runs out.
    pub fn join(&mut self, idx: usize) -> Result<(), SyncError> {
        let symbol = self.books.list[idx].symbol().to_string();
        info!(symbol = %symbol, "joining book");

        let mut polls = 0;
        loop {
            let joined = self.join_once(idx, &mut polls);
            self.snapshots.iter_mut().for_each(Feed::close);

            if joined? {
                self.stats.record_join();
                self.desynced &= !bit(idx);
                info!(symbol = %symbol, rptseq = self.books.list[idx].rptseq(), polls, "book joined");
                return Ok(());
            }

            warn!(symbol = %symbol, polls, "join failed, retrying");
            self.stats.record_join_retry();
            self.gaps.reset();
        }
    }

    fn join_once(&mut self, idx: usize, polls: &mut u64) -> Result<bool, SyncError> {
        self.books.list[idx].set_active(false);
        for feed in self.increments.iter_mut() {
            feed.open()?;
        }

        let mut buffer: Vec<Message> = Vec::new();
        let mut first_seq = None;

        let last_processed = loop {
            if let Some(max) = self.policy.max_join_polls {
                if *polls >= max {
                    return Err(SyncError::JoinExhausted {
                        symbol: self.books.list[idx].symbol().to_string(),
                        polls: *polls,
                    });
                }
            }
            *polls += 1;

            let poll = poll_increments(&mut self.increments, &mut self.gaps, &self.layouts, &mut self.stats)?;
            if poll.stalled {
                return Ok(false);
            }
            for (msg, layout) in poll.messages {
                self.desynced |= apply_increment(&mut self.books, msg, layout, ApplyMode::Steady);
                if first_seq.is_none() {
                    first_seq = layout.seq_num(msg);
                }
                buffer.push(msg.clone());
            }

            let Some((msg, layout)) = poll_snapshot(&mut self.snapshots, &self.layouts)? else {
                continue;
            };
            let Some(last) = layout.last_processed(msg) else {
                warn!(template = msg.template_id(), "snapshot without LastMsgSeqNumProcessed");
                continue;
            };

            // the snapshot must reach the buffered stream
            match first_seq {
                Some(first) if last.saturating_add(1) >= first => {}
                _ => continue,
            }

            match apply_snapshot(&mut self.books, msg, layout, idx) {
                Ok(true) => break last,
                Ok(false) => {}
                Err(err) => {
                    warn!(symbol = self.books.list[idx].symbol(), error = %err, "failed to apply snapshot");
                    return Ok(false);
                }
            }
        };

        debug!(
            symbol = self.books.list[idx].symbol(),
            last_processed,
            buffered = buffer.len(),
            "snapshot applied, replaying"
        );

        let mut replayed = 0;
        for msg in &buffer {
            let Some(layout) = self.layouts.get(&msg.template_id()) else {
                continue;
            };
            if layout.seq_num(msg).is_some_and(|seq| seq <= last_processed) {
                continue;
            }

            if apply_increment(&mut self.books, msg, layout, ApplyMode::Replay(idx)) & bit(idx) != 0 {
                return Ok(false);
            }
            replayed += 1;
        }
        self.stats.record_replayed(replayed);

        Ok(self.books.list[idx].is_active())
    }
}
