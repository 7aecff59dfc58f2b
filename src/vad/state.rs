//! Pipeline lifecycle state and its transition table.

use crate::vad::calibration::CalibrationMode;
use serde::Serialize;
use std::fmt;

/// What the pipeline is doing with incoming frames.
///
/// Exactly one state owns frame buffering at a time. Whether the assistant
/// is speaking is tracked separately, since it can overlap any of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Not recording.
    Idle,
    /// Collecting levels for a noise floor estimate.
    Calibrating(CalibrationMode),
    /// Recording, no segment open.
    Listening,
    /// A speech segment is open and buffering frames.
    SpeechActive,
    /// A segment was cut at the duration cap; waits for the level to drop.
    ForcedEnd,
}

/// Inputs that move the pipeline between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Recording started.
    Start,
    /// A calibration session was requested.
    Calibrate(CalibrationMode),
    /// The calibration session finished, was skipped, or was cancelled.
    CalibrationDone,
    /// The detector confirmed speech.
    SpeechConfirmed,
    /// The open segment ended normally or was discarded.
    SegmentClosed,
    /// The open segment hit the duration cap.
    SegmentForced,
    /// The level fell back below the start threshold after a forced end.
    Released,
    /// Recording stopped.
    Stop,
}

impl PipelineState {
    /// The state reached from `self` on `trigger`, or `None` if the
    /// combination is not a legal transition.
    pub fn on(self, trigger: Trigger) -> Option<Self> {
        use PipelineState::{Calibrating, ForcedEnd, Idle, Listening, SpeechActive};
        match (self, trigger) {
            (_, Trigger::Stop) => Some(Idle),
            (Idle, Trigger::Start) => Some(Calibrating(CalibrationMode::Automatic)),
            (Calibrating(_) | Listening | SpeechActive | ForcedEnd, Trigger::Calibrate(mode)) => {
                Some(Calibrating(mode))
            }
            (Calibrating(_), Trigger::CalibrationDone) => Some(Listening),
            (Listening, Trigger::SpeechConfirmed) => Some(SpeechActive),
            (SpeechActive, Trigger::SegmentClosed) => Some(Listening),
            (SpeechActive, Trigger::SegmentForced) => Some(ForcedEnd),
            (ForcedEnd, Trigger::Released) => Some(Listening),
            _ => None,
        }
    }

    /// Whether audio frames are being consumed.
    pub fn is_recording(self) -> bool {
        self != Self::Idle
    }

    /// Compact numeric code, for lock-free status publication.
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Calibrating(CalibrationMode::Automatic) => 1,
            Self::Calibrating(CalibrationMode::Manual) => 2,
            Self::Listening => 3,
            Self::SpeechActive => 4,
            Self::ForcedEnd => 5,
        }
    }

    /// Inverse of [`code`](Self::code); unknown codes map to `Idle`.
    pub(crate) fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Calibrating(CalibrationMode::Automatic),
            2 => Self::Calibrating(CalibrationMode::Manual),
            3 => Self::Listening,
            4 => Self::SpeechActive,
            5 => Self::ForcedEnd,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Calibrating(CalibrationMode::Automatic) => f.write_str("calibrating(auto)"),
            Self::Calibrating(CalibrationMode::Manual) => f.write_str("calibrating(manual)"),
            Self::Listening => f.write_str("listening"),
            Self::SpeechActive => f.write_str("speech_active"),
            Self::ForcedEnd => f.write_str("forced_end"),
        }
    }
}
