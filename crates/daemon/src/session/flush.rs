//! Output buffering and flush policy.
//!
//! Terminal programs emit a firehose of small writes. The [`OutputBuffer`]
//! coalesces them into right-sized batches: a flush happens when the buffer
//! is non-empty and at least the flush interval has elapsed since the last
//! flush, or when the buffered size reaches the maximum. Callers check the
//! policy every polling cycle, so a slow trickle of output is still flushed
//! within one interval.

use std::mem;
use std::time::{Duration, Instant};

/// Buffer of pending terminal output plus the flush bookkeeping.
///
/// Time is passed in explicitly so the policy stays deterministic under test.
#[derive(Debug)]
pub struct OutputBuffer {
    pending: Vec<u8>,
    last_flush: Instant,
    interval: Duration,
    max_size: usize,
}

impl OutputBuffer {
    /// Create an empty buffer with the given flush thresholds.
    pub fn new(interval: Duration, max_size: usize, now: Instant) -> Self {
        Self {
            pending: Vec::new(),
            last_flush: now,
            interval,
            max_size,
        }
    }

    /// Append a chunk of output, preserving arrival order.
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Total buffered bytes.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether the flush policy fires at `now`.
    pub fn should_flush(&self, now: Instant) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        now.duration_since(self.last_flush) >= self.interval || self.pending.len() >= self.max_size
    }

    /// Take the buffered bytes, clearing the buffer and stamping the flush
    /// time. Used both for policy-driven flushes and for the unconditional
    /// final flush on process exit.
    pub fn take(&mut self, now: Instant) -> Vec<u8> {
        self.last_flush = now;
        mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(16);
    const MAX_SIZE: usize = 16 * 1024;

    #[test]
    fn test_empty_buffer_never_flushes() {
        let start = Instant::now();
        let buffer = OutputBuffer::new(INTERVAL, MAX_SIZE, start);
        assert!(!buffer.should_flush(start + Duration::from_secs(10)));
    }

    #[test]
    fn test_no_flush_before_interval() {
        let start = Instant::now();
        let mut buffer = OutputBuffer::new(INTERVAL, MAX_SIZE, start);
        buffer.push(b"prompt$ ");
        assert!(!buffer.should_flush(start + Duration::from_millis(5)));
    }

    #[test]
    fn test_flush_after_interval_elapsed() {
        let start = Instant::now();
        let mut buffer = OutputBuffer::new(INTERVAL, MAX_SIZE, start);
        buffer.push(b"prompt$ ");
        assert!(buffer.should_flush(start + INTERVAL));
        assert!(buffer.should_flush(start + Duration::from_millis(100)));
    }

    #[test]
    fn test_size_threshold_forces_flush_immediately() {
        let start = Instant::now();
        let mut buffer = OutputBuffer::new(INTERVAL, 8, start);
        buffer.push(b"12345678");
        // No time has passed, but the size threshold fires
        assert!(buffer.should_flush(start));
    }

    #[test]
    fn test_take_concatenates_in_order_and_clears() {
        let start = Instant::now();
        let mut buffer = OutputBuffer::new(INTERVAL, MAX_SIZE, start);
        buffer.push(b"c1");
        buffer.push(b"c2");
        buffer.push(b"c3");

        let taken = buffer.take(start + INTERVAL);
        assert_eq!(taken, b"c1c2c3");
        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_take_resets_the_interval_clock() {
        let start = Instant::now();
        let mut buffer = OutputBuffer::new(INTERVAL, MAX_SIZE, start);
        buffer.push(b"first");

        let flushed_at = start + INTERVAL;
        let _ = buffer.take(flushed_at);

        buffer.push(b"second");
        assert!(!buffer.should_flush(flushed_at + Duration::from_millis(5)));
        assert!(buffer.should_flush(flushed_at + INTERVAL));
    }

    #[test]
    fn test_trickle_flushes_within_one_interval() {
        let start = Instant::now();
        let mut buffer = OutputBuffer::new(INTERVAL, MAX_SIZE, start);

        // A single tiny chunk, far below the size threshold
        buffer.push(b".");
        assert!(!buffer.should_flush(start + Duration::from_millis(15)));
        assert!(buffer.should_flush(start + Duration::from_millis(16)));
    }

    #[test]
    fn test_lossy_decode_of_invalid_utf8() {
        // Decoding happens at emission; invalid sequences are replaced,
        // never rejected.
        let start = Instant::now();
        let mut buffer = OutputBuffer::new(INTERVAL, MAX_SIZE, start);
        buffer.push(b"ok \xff\xfe bytes");

        let taken = buffer.take(start + INTERVAL);
        let decoded = String::from_utf8_lossy(&taken);
        assert!(decoded.contains("ok"));
        assert!(decoded.contains('\u{fffd}'));
    }
}
