//! Silence timeout and maximum segment duration.
//!
//! The guard is evaluated on a periodic tick rather than per frame, so a
//! stalled audio source still gets its open segment closed.

use crate::config::DetectionConfig;
use std::time::{Duration, Instant};

/// Decision of one guard evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    /// Keep the segment open.
    Continue,
    /// Silence timed out after a long enough utterance.
    EndOfSpeech,
    /// Silence timed out but the voiced part was too short to deliver.
    TooShort,
    /// The segment hit the hard duration cap.
    MaxDuration,
}

/// Timing of the open segment.
#[derive(Debug, Clone, Copy)]
pub struct SegmentGuard {
    started_at: Instant,
    last_voiced_at: Instant,
    frame_duration: Duration,
}

impl SegmentGuard {
    /// Arm the guard for a segment whose first voiced frame arrived at `at`.
    pub fn arm(at: Instant, frame_duration: Duration) -> Self {
        Self {
            started_at: at,
            last_voiced_at: at,
            frame_duration,
        }
    }

    /// Record a voiced frame.
    pub fn voiced(&mut self, at: Instant) {
        if at > self.last_voiced_at {
            self.last_voiced_at = at;
        }
    }

    /// When the segment started.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Time between the segment start and the end of its last voiced frame.
    pub fn voiced_span(&self) -> Duration {
        self.last_voiced_at.saturating_duration_since(self.started_at) + self.frame_duration
    }

    /// Silence since the last voiced frame.
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_voiced_at)
    }

    /// Check the open segment against the configured limits at `now`.
    pub fn evaluate(&self, now: Instant, config: &DetectionConfig) -> GuardVerdict {
        if now.saturating_duration_since(self.started_at) >= config.max_speech_duration() {
            return GuardVerdict::MaxDuration;
        }
        if self.silence(now) >= config.silence_timeout() {
            if self.voiced_span() >= config.min_speech_duration() {
                return GuardVerdict::EndOfSpeech;
            }
            return GuardVerdict::TooShort;
        }
        GuardVerdict::Continue
    }
}
