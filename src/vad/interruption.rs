//! Barge-in detection while the assistant is speaking.
//!
//! Runs on the same smoothed level as speech detection but against the
//! higher interrupt threshold and with its own short debounce, so it fires
//! faster than a speech segment would open. After firing, a cooldown keeps
//! the sudden disappearance of the assistant's voice from reading as a
//! second interruption.

use std::time::{Duration, Instant};

/// Consecutive-frame counter with a post-fire cooldown.
#[derive(Debug, Clone)]
pub struct InterruptionDetector {
    confirm_frames: u32,
    cooldown: Duration,
    loud_run: u32,
    last_fired: Option<Instant>,
}

impl InterruptionDetector {
    /// Create a detector needing `confirm_frames` loud frames in a row.
    pub fn new(confirm_frames: u32, cooldown: Duration) -> Self {
        Self {
            confirm_frames: confirm_frames.max(1),
            cooldown,
            loud_run: 0,
            last_fired: None,
        }
    }

    /// Whether a previous interruption's cooldown still covers `now`.
    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.last_fired
            .is_some_and(|t| now.saturating_duration_since(t) < self.cooldown)
    }

    /// Feed one smoothed level. Returns `true` when an interruption fires.
    pub fn observe(&mut self, level: f32, interrupt_threshold: f32, at: Instant) -> bool {
        if !(level > interrupt_threshold) {
            self.loud_run = 0;
            return false;
        }
        self.loud_run = self.loud_run.saturating_add(1);
        if self.loud_run < self.confirm_frames || self.in_cooldown(at) {
            return false;
        }
        self.loud_run = 0;
        self.last_fired = Some(at);
        true
    }

    /// Clear the loud-frame run, keeping any active cooldown.
    pub fn clear_run(&mut self) {
        self.loud_run = 0;
    }

    /// Forget the run and the cooldown.
    pub fn reset(&mut self) {
        self.loud_run = 0;
        self.last_fired = None;
    }
}
