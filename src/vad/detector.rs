//! Frame-debounced speech detector with start/continue hysteresis.
//!
//! Entering speech needs `min_speech_frames` consecutive frames above the
//! start threshold. Once active, the lower continue threshold classifies
//! frames, so micro-pauses between syllables do not register as silence.
//! The detector never leaves the active state on its own: the segment guard
//! decides when an utterance is over and the engine calls [`SpeechDetector::release`].

use crate::vad::thresholds::ThresholdSet;

/// Detector sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// No speech candidate.
    Silence,
    /// Some consecutive speech frames seen, not yet enough to confirm.
    Pending,
    /// Speech confirmed; a segment is open.
    Active,
}

/// What a single frame meant to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Quiet frame outside speech.
    Silent,
    /// Loud frame counted toward the start debounce.
    Candidate,
    /// This frame completed the debounce; speech has started.
    SpeechConfirmed,
    /// In speech, above the continue threshold.
    Voiced,
    /// In speech, below the continue threshold.
    Unvoiced,
}

/// Debounce counters and sub-state for one stream.
#[derive(Debug, Clone)]
pub struct SpeechDetector {
    min_speech_frames: u32,
    state: DetectorState,
    speech_run: u32,
    silent_run: u32,
}

impl SpeechDetector {
    /// Create a detector that confirms speech after `min_speech_frames`.
    pub fn new(min_speech_frames: u32) -> Self {
        Self {
            min_speech_frames: min_speech_frames.max(1),
            state: DetectorState::Silence,
            speech_run: 0,
            silent_run: 0,
        }
    }

    /// Current sub-state.
    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Whether a segment is open.
    pub fn is_active(&self) -> bool {
        self.state == DetectorState::Active
    }

    /// Consecutive non-speech frames, in any sub-state.
    pub fn silent_run(&self) -> u32 {
        self.silent_run
    }

    /// Consecutive speech frames toward (or since) confirmation.
    pub fn speech_run(&self) -> u32 {
        self.speech_run
    }

    /// Classify one smoothed level.
    pub fn observe(&mut self, level: f32, thresholds: &ThresholdSet) -> Observation {
        match self.state {
            DetectorState::Silence | DetectorState::Pending => {
                if level > thresholds.start {
                    self.silent_run = 0;
                    self.speech_run = self.speech_run.saturating_add(1);
                    if self.speech_run >= self.min_speech_frames {
                        self.state = DetectorState::Active;
                        Observation::SpeechConfirmed
                    } else {
                        self.state = DetectorState::Pending;
                        Observation::Candidate
                    }
                } else {
                    self.speech_run = 0;
                    self.silent_run = self.silent_run.saturating_add(1);
                    self.state = DetectorState::Silence;
                    Observation::Silent
                }
            }
            DetectorState::Active => {
                if level > thresholds.continue_ {
                    self.silent_run = 0;
                    self.speech_run = self.speech_run.saturating_add(1);
                    Observation::Voiced
                } else {
                    self.silent_run = self.silent_run.saturating_add(1);
                    Observation::Unvoiced
                }
            }
        }
    }

    /// Leave the active state after the segment was closed.
    ///
    /// The silence run is kept so the adaptive floor's confidence gate sees
    /// the trailing silence of the utterance.
    pub fn release(&mut self) {
        self.state = DetectorState::Silence;
        self.speech_run = 0;
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        self.state = DetectorState::Silence;
        self.speech_run = 0;
        self.silent_run = 0;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    const THRESHOLDS: ThresholdSet = ThresholdSet {
        start: 0.03,
        continue_: 0.02,
        interrupt: 0.05,
    };

    #[test]
    fn confirms_after_min_speech_frames() {
        let mut det = SpeechDetector::new(3);
        assert_eq!(det.observe(0.1, &THRESHOLDS), Observation::Candidate);
        assert_eq!(det.state(), DetectorState::Pending);
        assert_eq!(det.observe(0.1, &THRESHOLDS), Observation::Candidate);
        assert_eq!(det.observe(0.1, &THRESHOLDS), Observation::SpeechConfirmed);
        assert!(det.is_active());
        assert_eq!(det.observe(0.1, &THRESHOLDS), Observation::Voiced);
    }

    #[test]
    fn quiet_frame_resets_the_debounce() {
        let mut det = SpeechDetector::new(3);
        det.observe(0.1, &THRESHOLDS);
        det.observe(0.1, &THRESHOLDS);
        assert_eq!(det.observe(0.0, &THRESHOLDS), Observation::Silent);
        assert_eq!(det.speech_run(), 0);
        det.observe(0.1, &THRESHOLDS);
        assert_eq!(det.observe(0.1, &THRESHOLDS), Observation::Candidate);
        assert_eq!(det.observe(0.1, &THRESHOLDS), Observation::SpeechConfirmed);
    }

    #[test]
    fn level_between_thresholds_does_not_start_speech() {
        let mut det = SpeechDetector::new(2);
        for _ in 0..50 {
            assert_eq!(det.observe(0.025, &THRESHOLDS), Observation::Silent);
        }
        assert!(!det.is_active());
        assert_eq!(det.silent_run(), 50);
    }

    #[test]
    fn level_exactly_at_start_threshold_is_not_speech() {
        let mut det = SpeechDetector::new(1);
        assert_eq!(det.observe(0.03, &THRESHOLDS), Observation::Silent);
    }

    #[test]
    fn active_uses_lower_continue_threshold() {
        let mut det = SpeechDetector::new(1);
        assert_eq!(det.observe(0.1, &THRESHOLDS), Observation::SpeechConfirmed);
        // Below start but above continue: still speech.
        assert_eq!(det.observe(0.025, &THRESHOLDS), Observation::Voiced);
        assert_eq!(det.silent_run(), 0);
        assert_eq!(det.observe(0.015, &THRESHOLDS), Observation::Unvoiced);
        assert_eq!(det.observe(0.015, &THRESHOLDS), Observation::Unvoiced);
        assert_eq!(det.silent_run(), 2);
        assert!(det.is_active(), "quiet frames never end a segment by themselves");
        assert_eq!(det.observe(0.025, &THRESHOLDS), Observation::Voiced);
        assert_eq!(det.silent_run(), 0);
    }

    #[test]
    fn release_returns_to_silence() {
        let mut det = SpeechDetector::new(1);
        det.observe(0.1, &THRESHOLDS);
        det.observe(0.0, &THRESHOLDS);
        det.release();
        assert_eq!(det.state(), DetectorState::Silence);
        assert_eq!(det.silent_run(), 1);
        assert_eq!(det.observe(0.025, &THRESHOLDS), Observation::Silent);
    }

    #[test]
    fn reset_clears_counters() {
        let mut det = SpeechDetector::new(4);
        det.observe(0.1, &THRESHOLDS);
        det.observe(0.1, &THRESHOLDS);
        det.reset();
        assert_eq!(det.speech_run(), 0);
        assert_eq!(det.silent_run(), 0);
        assert_eq!(det.state(), DetectorState::Silence);
    }
}
