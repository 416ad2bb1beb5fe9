//! Cross-feed sequence arbitration
//!
//! Redundant increment feeds carry the same `MsgSeqNum` stream. The detector
//! keeps the last sequence number accepted from any feed and the last one
//! seen on each feed. Only the next expected value is accepted; duplicates
//! from slower feeds are dropped. A feed that jumps ahead puts the set in gap
//! mode and is not read again until the others have caught up to it. Once
//! every feed is past the missing value the gap cannot be filled any more.

/// Outcome of observing one sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqVerdict {
    /// First message since the last reset; accepted
    First,
    /// Exactly the expected value; accepted
    Next,
    /// Already accepted from another feed
    Duplicate,
    /// Ahead of the expected value; opened a gap of `missing` messages
    Gap { missing: u64 },
    /// Ahead of the expected value while already in gap mode
    Ahead,
}

impl SeqVerdict {
    pub fn is_accepted(self) -> bool {
        matches!(self, SeqVerdict::First | SeqVerdict::Next)
    }
}

#[derive(Debug, Clone)]
pub struct GapDetector {
    last_sequence: Option<u64>,
    received: Vec<Option<u64>>,
    gap_mode: bool,
    gaps: Vec<(u64, u64)>, // (start, end) ranges, inclusive
    total_gap_count: u64,
}

impl GapDetector {
    pub fn new(feeds: usize) -> Self {
        GapDetector {
            last_sequence: None,
            received: vec![None; feeds],
            gap_mode: false,
            gaps: Vec::new(),
            total_gap_count: 0,
        }
    }

    /// Whether `feed` may be read: it is not ahead of the accepted stream
    pub fn should_poll(&self, feed: usize) -> bool {
        match (self.received.get(feed).copied().flatten(), self.last_sequence) {
            (Some(received), Some(last)) => received <= last,
            _ => true,
        }
    }

    /// Record `seq_num` arriving on `feed` and decide whether to accept it
    pub fn observe(&mut self, feed: usize, seq_num: u64) -> SeqVerdict {
        if let Some(slot) = self.received.get_mut(feed) {
            *slot = Some(seq_num);
        }

        match self.last_sequence {
            None => {
                self.last_sequence = Some(seq_num);
                SeqVerdict::First
            }
            Some(last) if seq_num == last.wrapping_add(1) => {
                self.last_sequence = Some(seq_num);
                self.gap_mode = false;
                SeqVerdict::Next
            }
            Some(last) if seq_num > last => {
                if self.gap_mode {
                    return SeqVerdict::Ahead;
                }

                let expected = last + 1;
                let missing = seq_num - expected;
                self.gaps.push((expected, seq_num - 1));
                self.total_gap_count = self.total_gap_count.saturating_add(missing);
                self.gap_mode = true;
                SeqVerdict::Gap { missing }
            }
            Some(_) => SeqVerdict::Duplicate,
        }
    }

    /// In gap mode with every feed past the missing value
    pub fn stalled(&self) -> bool {
        let Some(last) = self.last_sequence else {
            return false;
        };

        self.gap_mode && self.received.iter().all(|r| r.is_some_and(|r| r > last))
    }

    pub fn in_gap_mode(&self) -> bool {
        self.gap_mode
    }

    /// Last accepted sequence number
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Get all detected gaps as (start, end) tuples (inclusive)
    pub fn gaps(&self) -> &[(u64, u64)] {
        &self.gaps
    }

    /// Get total number of missing sequence numbers
    pub fn total_gaps(&self) -> u64 {
        self.total_gap_count
    }

    /// Get count of gap ranges detected
    pub fn gap_count(&self) -> usize {
        self.gaps.len()
    }

    /// Check if a specific sequence number is in a gap
    pub fn is_in_gap(&self, seq_num: u64) -> bool {
        self.gaps.iter().any(|&(start, end)| seq_num >= start && seq_num <= end)
    }

    /// Forget the accepted stream so the next message starts a new one.
    /// Recorded gaps are kept.
    pub fn reset(&mut self) {
        self.last_sequence = None;
        self.received.iter_mut().for_each(|r| *r = None);
        self.gap_mode = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_gaps() {
        let mut detector = GapDetector::new(1);
        assert_eq!(detector.observe(0, 1), SeqVerdict::First);
        for i in 2..100 {
            assert_eq!(detector.observe(0, i), SeqVerdict::Next);
        }
        assert_eq!(detector.total_gaps(), 0);
        assert!(detector.gaps().is_empty());
    }

    #[test]
    fn test_single_feed_gap_stalls() {
        let mut detector = GapDetector::new(1);
        detector.observe(0, 1);
        detector.observe(0, 2);
        assert_eq!(detector.observe(0, 5), SeqVerdict::Gap { missing: 2 });

        assert!(detector.in_gap_mode());
        assert!(!detector.should_poll(0));
        assert!(detector.stalled());
        assert_eq!(detector.last_sequence(), Some(2));
        assert_eq!(detector.gaps()[0], (3, 4));
    }

    #[test]
    fn test_redundant_feed_fills_gap() {
        let mut detector = GapDetector::new(2);
        detector.observe(0, 1);
        assert_eq!(detector.observe(1, 1), SeqVerdict::Duplicate);

        // feed 0 lost 2
        assert_eq!(detector.observe(0, 3), SeqVerdict::Gap { missing: 1 });
        assert!(!detector.stalled());
        assert!(!detector.should_poll(0));

        assert_eq!(detector.observe(1, 2), SeqVerdict::Next);
        assert!(!detector.in_gap_mode());
        assert!(!detector.should_poll(0));

        assert_eq!(detector.observe(1, 3), SeqVerdict::Next);
        assert!(detector.should_poll(0));
        assert!(detector.is_in_gap(2));
    }

    #[test]
    fn test_ahead_while_in_gap_mode() {
        let mut detector = GapDetector::new(2);
        detector.observe(0, 10);
        assert!(!detector.observe(0, 12).is_accepted());
        assert_eq!(detector.observe(1, 13), SeqVerdict::Ahead);
        assert!(detector.stalled());
        assert_eq!(detector.gap_count(), 1);
    }

    #[test]
    fn test_reset() {
        let mut detector = GapDetector::new(1);
        detector.observe(0, 1);
        detector.observe(0, 5);
        assert_eq!(detector.total_gaps(), 3);

        detector.reset();
        assert!(!detector.in_gap_mode());
        assert!(detector.should_poll(0));
        assert_eq!(detector.observe(0, 40), SeqVerdict::First);
        assert_eq!(detector.total_gaps(), 3);
    }
}
