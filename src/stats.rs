//! Feed statistics
//!
//! Sessions count messages, bytes read, garbled messages and partial reads;
//! the book set counts gaps, joins, recoveries and replayed increments. Both
//! keep a sliding window of latencies in nanoseconds.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::info;

const WINDOW_SIZE: usize = 10000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    pub p50_ns: u64,
    pub p99_ns: u64,
}

fn push_window(window: &mut VecDeque<u64>, nanos: u64) {
    if window.len() >= WINDOW_SIZE {
        window.pop_front();
    }
    window.push_back(nanos);
}

fn window_stats(window: &VecDeque<u64>) -> Option<LatencyStats> {
    if window.is_empty() {
        return None;
    }

    let mut sorted: Vec<u64> = window.iter().copied().collect();
    sorted.sort_unstable();

    let n = sorted.len();
    Some(LatencyStats {
        min_ns: sorted[0],
        max_ns: sorted[n - 1],
        mean_ns: sorted.iter().sum::<u64>() as f64 / n as f64,
        p50_ns: sorted[n / 2],
        p99_ns: sorted[(n * 99) / 100],
    })
}

#[derive(Debug, Clone)]
pub struct FeedStats {
    start_time: Option<Instant>,
    total_messages: u64,
    total_bytes: u64,
    garbled: u64,
    partial_reads: u64,

    decode_latencies: VecDeque<u64>,
    book_update_latencies: VecDeque<u64>,

    total_gaps: u64,
    gap_events: u64,
    joins: u64,
    join_retries: u64,
    recoveries: u64,
    replayed: u64,
}

impl FeedStats {
    pub fn new() -> Self {
        FeedStats {
            start_time: None,
            total_messages: 0,
            total_bytes: 0,
            garbled: 0,
            partial_reads: 0,
            decode_latencies: VecDeque::with_capacity(WINDOW_SIZE),
            book_update_latencies: VecDeque::with_capacity(WINDOW_SIZE),
            total_gaps: 0,
            gap_events: 0,
            joins: 0,
            join_retries: 0,
            recoveries: 0,
            replayed: 0,
        }
    }

    fn touch(&mut self) {
        if self.start_time.is_none() {
            self.start_time = Some(Instant::now());
        }
    }

    /// Record a decoded message
    pub fn record_message(&mut self) {
        self.touch();
        self.total_messages += 1;
    }

    /// Record bytes read from the transport
    pub fn record_read(&mut self, bytes: usize) {
        self.touch();
        self.total_bytes += bytes as u64;
    }

    pub fn record_garbled(&mut self) {
        self.garbled += 1;
    }

    /// Record a decode attempt that ran out of buffered bytes
    pub fn record_partial(&mut self) {
        self.partial_reads += 1;
    }

    pub fn record_decode_latency(&mut self, nanos: u64) {
        push_window(&mut self.decode_latencies, nanos);
    }

    pub fn record_book_update_latency(&mut self, nanos: u64) {
        push_window(&mut self.book_update_latencies, nanos);
    }

    /// Record a gap event covering `gap_size` missing sequence numbers
    pub fn record_gap(&mut self, gap_size: u64) {
        self.total_gaps = self.total_gaps.saturating_add(gap_size);
        self.gap_events += 1;
    }

    pub fn record_join(&mut self) {
        self.joins += 1;
    }

    pub fn record_join_retry(&mut self) {
        self.join_retries += 1;
    }

    pub fn record_recovery(&mut self) {
        self.recoveries += 1;
    }

    pub fn record_replayed(&mut self, count: usize) {
        self.replayed += count as u64;
    }

    pub fn messages_per_sec(&self) -> f64 {
        self.rate(self.total_messages)
    }

    pub fn bytes_per_sec(&self) -> f64 {
        self.rate(self.total_bytes)
    }

    fn rate(&self, count: u64) -> f64 {
        match self.start_time {
            None => 0.0,
            Some(start) => {
                let elapsed = start.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    count as f64 / elapsed
                } else {
                    0.0
                }
            }
        }
    }

    pub fn decode_latency_stats(&self) -> Option<LatencyStats> {
        window_stats(&self.decode_latencies)
    }

    pub fn book_update_latency_stats(&self) -> Option<LatencyStats> {
        window_stats(&self.book_update_latencies)
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.start_time.map(|st| st.elapsed())
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn garbled(&self) -> u64 {
        self.garbled
    }

    pub fn partial_reads(&self) -> u64 {
        self.partial_reads
    }

    pub fn total_gaps(&self) -> u64 {
        self.total_gaps
    }

    pub fn gap_events(&self) -> u64 {
        self.gap_events
    }

    pub fn joins(&self) -> u64 {
        self.joins
    }

    pub fn join_retries(&self) -> u64 {
        self.join_retries
    }

    pub fn recoveries(&self) -> u64 {
        self.recoveries
    }

    pub fn replayed(&self) -> u64 {
        self.replayed
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Emit all counters through `tracing`
    pub fn log_summary(&self, name: &str) {
        info!(
            feed = %name,
            messages = self.total_messages,
            bytes = self.total_bytes,
            garbled = self.garbled,
            partial_reads = self.partial_reads,
            msgs_per_sec = self.messages_per_sec(),
            bytes_per_sec = self.bytes_per_sec(),
            "feed statistics"
        );

        if let Some(stats) = self.decode_latency_stats() {
            info!(
                feed = %name,
                min_ns = stats.min_ns,
                max_ns = stats.max_ns,
                mean_ns = stats.mean_ns,
                p50_ns = stats.p50_ns,
                p99_ns = stats.p99_ns,
                "decode latency"
            );
        }

        if let Some(stats) = self.book_update_latency_stats() {
            info!(
                feed = %name,
                min_ns = stats.min_ns,
                max_ns = stats.max_ns,
                mean_ns = stats.mean_ns,
                p50_ns = stats.p50_ns,
                p99_ns = stats.p99_ns,
                "book update latency"
            );
        }

        if self.gap_events > 0 || self.joins > 0 {
            info!(
                feed = %name,
                gaps = self.total_gaps,
                gap_events = self.gap_events,
                joins = self.joins,
                join_retries = self.join_retries,
                recoveries = self.recoveries,
                replayed = self.replayed,
                "sync statistics"
            );
        }
    }
}

impl Default for FeedStats {
    fn default() -> Self {
        Self::new()
    }
}
