//! Message codec: framing, sealing, compression and map reassembly.
//!
//! # Pipeline
//!
//! ```text
//! outbound: JSON ──► gzip (≥ threshold) ──► HMAC | AEAD ──► header + CRC ──► Channel
//! inbound:  Channel ──► FrameCodec (magic, length cap, CRC)
//!                   ──► FrameSealer::open (mode check, verify/decrypt, gunzip)
//!                   ──► Frame ──► JSON | MapChunk ──► MapAssembler
//! ```
//!
//! Every stage is deterministic and bounds-checked. A malformed frame is
//! dropped and counted by [`DecodeFailureTracker`]; too many failures in a
//! short window, or any oversized frame, make the session reconnect.

pub mod chunk;
pub mod compress;
pub mod crypto;
pub mod frame;
pub mod seal;

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub use chunk::{MapAssembler, MapChunk};
pub use frame::{FrameCodec, FrameHeader, FrameKind, RawFrame, SecurityMode};
pub use seal::{Frame, FrameSealer, SealOptions};

/// Sliding-window counter of decode failures.
///
/// One bad frame is noise; a burst means the stream or the keys are wrong
/// and only a fresh session will recover.
#[derive(Debug)]
pub struct DecodeFailureTracker {
    recent: VecDeque<Instant>,
    window: Duration,
    threshold: usize,
}

impl DecodeFailureTracker {
    /// Reset after more than `threshold` failures within `window`
    pub fn new(window: Duration, threshold: usize) -> Self {
        Self {
            recent: VecDeque::new(),
            window,
            threshold,
        }
    }

    /// Record a failure; returns true when the session should be reset
    pub fn record_and_should_reset(&mut self) -> bool {
        self.record_at(Instant::now())
    }

    fn record_at(&mut self, now: Instant) -> bool {
        self.recent.push_back(now);
        while let Some(front) = self.recent.front() {
            if now.duration_since(*front) > self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        self.recent.len() > self.threshold
    }

    /// Failures currently inside the window
    pub fn count(&self) -> usize {
        self.recent.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_threshold() {
        let mut tracker = DecodeFailureTracker::new(Duration::from_secs(10), 3);
        let now = Instant::now();
        assert!(!tracker.record_at(now));
        assert!(!tracker.record_at(now));
        assert!(!tracker.record_at(now));
        assert!(tracker.record_at(now));
    }

    #[test]
    fn test_tracker_window_slides() {
        let mut tracker = DecodeFailureTracker::new(Duration::from_secs(10), 2);
        let start = Instant::now();
        assert!(!tracker.record_at(start));
        assert!(!tracker.record_at(start));
        // Old failures fall out of the window
        assert!(!tracker.record_at(start + Duration::from_secs(11)));
        assert_eq!(tracker.count(), 1);
    }
}
