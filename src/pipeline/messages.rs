//! Message types passed into and out of the VAD worker.

use crate::audio::frame::AudioFrame;
use crate::vad::calibration::CalibrationProfile;
use crate::vad::state::PipelineState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Why a segment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Silence timed out after the utterance.
    Silence,
    /// The segment hit the maximum duration.
    MaxDuration,
}

/// Why an open segment was dropped without a speech-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// The voiced part was shorter than the minimum speech duration.
    TooShort,
    /// A calibration session took over the stream.
    Calibration,
}

/// A complete utterance, ready for STT.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// Frames in capture order, from the confirming frame to the last
    /// frame before the segment closed.
    pub frames: Vec<AudioFrame>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// When the speech segment started.
    pub started_at: Instant,
    /// When the segment was closed.
    pub ended_at: Instant,
    /// Why the segment was closed.
    pub end_reason: EndReason,
}

impl SpeechSegment {
    /// Concatenated samples of all frames.
    pub fn samples(&self) -> Vec<f32> {
        let total = self.frames.iter().map(AudioFrame::len).sum();
        let mut out = Vec::with_capacity(total);
        for frame in &self.frames {
            out.extend_from_slice(frame.samples());
        }
        out
    }

    /// Audio duration of the buffered frames.
    pub fn duration(&self) -> Duration {
        self.frames.iter().map(AudioFrame::duration).sum()
    }

    /// Number of buffered frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// Events emitted by the VAD engine to its consumer.
#[derive(Debug, Clone)]
pub enum VadEvent {
    /// Speech confirmed; fired once per segment with the confirming frame.
    SpeechStart {
        /// Capture time of the confirming frame.
        at: Instant,
        /// Smoothed level of the confirming frame.
        level: f32,
    },
    /// A frame appended to the open segment, for streaming transcription.
    AudioBuffer(AudioFrame),
    /// The segment is complete. Ownership of the frames moves to the consumer.
    SpeechEnd(SpeechSegment),
    /// The open segment was dropped without a speech-end.
    SpeechDiscarded {
        /// Why it was dropped.
        reason: DiscardReason,
        /// Frames that were buffered.
        frames: usize,
    },
    /// The user spoke over the assistant.
    Interruption {
        /// Capture time of the confirming frame.
        at: Instant,
        /// Smoothed level of the confirming frame.
        level: f32,
    },
    /// The pipeline state changed.
    StateChanged {
        /// Previous state.
        from: PipelineState,
        /// New state.
        to: PipelineState,
    },
    /// A calibration session produced a new profile.
    CalibrationFinished(CalibrationProfile),
    /// A calibration session collected nothing; the previous profile stays.
    CalibrationSkipped,
    /// A calibration session was cancelled; the previous profile stays.
    CalibrationCancelled,
}

impl VadEvent {
    /// Short machine-readable event name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SpeechStart { .. } => "speech_start",
            Self::AudioBuffer(_) => "audio_buffer",
            Self::SpeechEnd(_) => "speech_end",
            Self::SpeechDiscarded { .. } => "speech_discarded",
            Self::Interruption { .. } => "interruption",
            Self::StateChanged { .. } => "state_changed",
            Self::CalibrationFinished(_) => "calibration_finished",
            Self::CalibrationSkipped => "calibration_skipped",
            Self::CalibrationCancelled => "calibration_cancelled",
        }
    }

    /// Serializable summary without audio payloads, stamped with wall-clock time.
    pub fn record(&self) -> EventRecord {
        let mut record = EventRecord {
            event: self.kind(),
            timestamp: Utc::now(),
            ..EventRecord::default()
        };
        match self {
            Self::SpeechStart { level, .. } | Self::Interruption { level, .. } => {
                record.level = Some(*level);
            }
            Self::AudioBuffer(frame) => {
                record.samples = Some(frame.len());
            }
            Self::SpeechEnd(segment) => {
                let millis = segment.duration().as_millis();
                record.duration_ms = Some(u64::try_from(millis).unwrap_or(u64::MAX));
                record.frames = Some(segment.frame_count());
                record.reason = Some(match segment.end_reason {
                    EndReason::Silence => "silence",
                    EndReason::MaxDuration => "max_duration",
                });
            }
            Self::SpeechDiscarded { reason, frames } => {
                record.frames = Some(*frames);
                record.reason = Some(match reason {
                    DiscardReason::TooShort => "too_short",
                    DiscardReason::Calibration => "calibration",
                });
            }
            Self::StateChanged { from, to } => {
                record.from = Some(from.to_string());
                record.to = Some(to.to_string());
            }
            Self::CalibrationFinished(profile) => {
                record.noise_floor = Some(profile.noise_floor);
                record.user_voice_level = profile.user_voice_level;
            }
            Self::CalibrationSkipped | Self::CalibrationCancelled => {}
        }
        record
    }
}

/// Flat, JSON-friendly view of a [`VadEvent`].
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    /// Event name, see [`VadEvent::kind`].
    pub event: &'static str,
    /// Wall-clock time the record was made.
    pub timestamp: DateTime<Utc>,
    /// Smoothed level for speech-start and interruption events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<f32>,
    /// Sample count of an audio buffer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<usize>,
    /// Frame count of a finished or discarded segment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames: Option<usize>,
    /// Length of a finished segment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Why a segment ended or was discarded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    /// Previous state of a state change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// New state of a state change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Calibrated noise floor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_floor: Option<f32>,
    /// Typical voice level, when a manual calibration heard one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_voice_level: Option<f32>,
}

impl Default for EventRecord {
    fn default() -> Self {
        Self {
            event: "",
            timestamp: Utc::now(),
            level: None,
            samples: None,
            frames: None,
            duration_ms: None,
            reason: None,
            from: None,
            to: None,
            noise_floor: None,
            user_voice_level: None,
        }
    }
}

/// Control requests from the pipeline handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Begin a user-prompted calibration session.
    StartManualCalibration,
    /// Abandon the running calibration session.
    CancelCalibration,
    /// Report whether the assistant is currently playing synthesized speech.
    SetSpeaking(bool),
    /// Forget the calibrated profile and recalibrate automatically.
    ResetCalibration,
}

/// Everything the single-writer worker consumes.
#[derive(Debug, Clone)]
pub enum PipelineMessage {
    /// A captured frame.
    Frame(AudioFrame),
    /// Periodic silence/duration guard check.
    GuardTick(Instant),
    /// A control request issued at the given instant.
    Control(ControlCommand, Instant),
}
