//! The single-writer VAD engine.
//!
//! [`VadEngine`] owns every piece of mutable detection state: the
//! calibration profile, the lifecycle state, the level history, debounce
//! counters and the open segment. Frames, guard ticks and control requests
//! all arrive as [`PipelineMessage`]s through [`VadEngine::handle`], so one
//! owner serializes every mutation.

use crate::audio::frame::AudioFrame;
use crate::config::VadConfig;
use crate::error::Result;
use crate::pipeline::messages::{
    ControlCommand, DiscardReason, EndReason, PipelineMessage, SpeechSegment, VadEvent,
};
use crate::vad::adaptive::NoiseFloorAdapter;
use crate::vad::calibration::{
    CalibrationMode, CalibrationOutcome, CalibrationProfile, CalibrationSession,
};
use crate::vad::detector::{Observation, SpeechDetector};
use crate::vad::guard::{GuardVerdict, SegmentGuard};
use crate::vad::interruption::InterruptionDetector;
use crate::vad::meter::{LevelMeter, LevelReading};
use crate::vad::state::{PipelineState, Trigger};
use crate::vad::thresholds::ThresholdSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Upper bound on frames pre-allocated for a new segment.
const MAX_SEGMENT_PREALLOC: usize = 1_024;

/// The segment currently being buffered.
struct OpenSegment {
    frames: Vec<AudioFrame>,
    sample_rate: u32,
    guard: SegmentGuard,
}

/// Adaptive voice activity detector and segmenter.
pub struct VadEngine {
    config: VadConfig,
    frame_duration: Duration,
    state: PipelineState,
    assistant_speaking: bool,
    echo_tail_until: Option<Instant>,
    meter: LevelMeter,
    last_level: LevelReading,
    baseline: CalibrationProfile,
    profile: CalibrationProfile,
    calibration: Option<CalibrationSession>,
    detector: SpeechDetector,
    interruption: InterruptionDetector,
    adapter: NoiseFloorAdapter,
    segment: Option<OpenSegment>,
}

impl VadEngine {
    /// Create an idle engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn new(config: &VadConfig) -> Result<Self> {
        config.validate()?;
        let baseline = CalibrationProfile::from_defaults(&config.calibration, &config.thresholds);
        Ok(Self {
            config: config.clone(),
            frame_duration: config.frame_duration(),
            state: PipelineState::Idle,
            assistant_speaking: false,
            echo_tail_until: None,
            meter: LevelMeter::new(config.meter.history_len, config.meter.display_gain),
            last_level: LevelReading::default(),
            baseline,
            profile: baseline,
            calibration: None,
            detector: SpeechDetector::new(config.detection.min_speech_frames),
            interruption: InterruptionDetector::new(
                config.interruption.confirm_frames,
                config.interruption.cooldown(),
            ),
            adapter: NoiseFloorAdapter::new(
                &config.adaptation,
                config.detection.min_silence_frames,
            ),
            segment: None,
        })
    }

    /// Use `profile` as the starting point of every recording instead of
    /// the configured defaults.
    #[must_use]
    pub fn with_baseline(mut self, mut profile: CalibrationProfile) -> Self {
        profile.clamp_floor(&self.config.thresholds);
        self.baseline = profile;
        self.profile = profile;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Current noise floor estimate.
    pub fn profile(&self) -> &CalibrationProfile {
        &self.profile
    }

    /// Thresholds derived from the current noise floor.
    pub fn thresholds(&self) -> ThresholdSet {
        ThresholdSet::derive(self.profile.noise_floor, &self.config.thresholds)
    }

    /// Level of the most recent frame.
    pub fn last_level(&self) -> LevelReading {
        self.last_level
    }

    /// Whether the consumer reported assistant playback.
    pub fn is_assistant_speaking(&self) -> bool {
        self.assistant_speaking
    }

    /// Progress of the running calibration, if any.
    pub fn calibration_progress(&self, now: Instant) -> Option<f32> {
        self.calibration.as_ref().map(|s| s.progress(now))
    }

    /// Dispatch one message, appending resulting events to `out`.
    pub fn handle(&mut self, message: PipelineMessage, out: &mut Vec<VadEvent>) {
        match message {
            PipelineMessage::Frame(frame) => self.process_frame(frame, out),
            PipelineMessage::GuardTick(now) => self.tick(now, out),
            PipelineMessage::Control(command, at) => match command {
                ControlCommand::StartManualCalibration => self.start_manual_calibration(at, out),
                ControlCommand::CancelCalibration => self.cancel_calibration(out),
                ControlCommand::SetSpeaking(speaking) => self.set_speaking_mode(speaking, at),
                ControlCommand::ResetCalibration => self.reset_calibration(at, out),
            },
        }
    }

    /// Begin a recording: restore the baseline profile and calibrate automatically.
    pub fn start(&mut self, now: Instant, out: &mut Vec<VadEvent>) {
        if self.state != PipelineState::Idle {
            warn!(state = %self.state, "start requested while already recording");
            return;
        }
        self.clear_counters();
        self.profile = self.baseline;
        if self.transition(Trigger::Start, out) {
            self.calibration = Some(self.new_session(CalibrationMode::Automatic, now));
            info!(
                noise_floor = self.profile.noise_floor,
                "recording started, calibrating automatically"
            );
        }
    }

    /// Stop recording. Any open segment is dropped without a speech-end.
    pub fn stop(&mut self) {
        if let Some(segment) = self.segment.take() {
            debug!(frames = segment.frames.len(), "discarding open segment on stop");
        }
        self.calibration = None;
        self.assistant_speaking = false;
        self.echo_tail_until = None;
        self.clear_counters();
        if let Some(next) = self.state.on(Trigger::Stop) {
            self.state = next;
        }
        info!("recording stopped");
    }

    /// Process one captured frame.
    pub fn process_frame(&mut self, frame: AudioFrame, out: &mut Vec<VadEvent>) {
        let reading = self.meter.measure(frame.samples());
        self.last_level = reading;
        trace!(rms = reading.rms, smoothed = reading.smoothed, state = %self.state, "frame");

        match self.state {
            PipelineState::Idle => {}
            PipelineState::Calibrating(_) => {
                self.calibrate_frame(reading.smoothed, frame.captured_at, out);
            }
            PipelineState::Listening | PipelineState::SpeechActive | PipelineState::ForcedEnd => {
                self.detect_frame(frame, reading.smoothed, out);
            }
        }
    }

    /// Periodic guard check: closes timed-out or overlong segments and
    /// finishes calibrations whose window elapsed without frames.
    pub fn tick(&mut self, now: Instant, out: &mut Vec<VadEvent>) {
        match self.state {
            PipelineState::Calibrating(_) => {
                if self
                    .calibration
                    .as_ref()
                    .is_none_or(|s| s.progress(now) >= 1.0)
                {
                    self.finish_calibration(out);
                }
            }
            PipelineState::SpeechActive => {
                let Some(segment) = self.segment.as_ref() else {
                    warn!("speech active without an open segment");
                    self.detector.release();
                    self.transition(Trigger::SegmentClosed, out);
                    return;
                };
                match segment.guard.evaluate(now, &self.config.detection) {
                    GuardVerdict::Continue => {}
                    GuardVerdict::EndOfSpeech => self.close_segment(now, EndReason::Silence, out),
                    GuardVerdict::MaxDuration => {
                        self.close_segment(now, EndReason::MaxDuration, out);
                    }
                    GuardVerdict::TooShort => {
                        self.discard_segment(DiscardReason::TooShort, out);
                        self.transition(Trigger::SegmentClosed, out);
                    }
                }
            }
            PipelineState::Idle | PipelineState::Listening | PipelineState::ForcedEnd => {}
        }
    }

    /// Start a user-prompted calibration, discarding any open segment.
    pub fn start_manual_calibration(&mut self, now: Instant, out: &mut Vec<VadEvent>) {
        if self.state == PipelineState::Idle {
            warn!("manual calibration requested while not recording");
            return;
        }
        self.discard_segment(DiscardReason::Calibration, out);
        self.detector.reset();
        if self.transition(Trigger::Calibrate(CalibrationMode::Manual), out) {
            self.calibration = Some(self.new_session(CalibrationMode::Manual, now));
            info!("manual calibration started, speak normally");
        }
    }

    /// Abandon the running calibration, keeping the previous profile.
    pub fn cancel_calibration(&mut self, out: &mut Vec<VadEvent>) {
        if !matches!(self.state, PipelineState::Calibrating(_)) {
            debug!(state = %self.state, "no calibration to cancel");
            return;
        }
        self.calibration = None;
        self.detector.reset();
        out.push(VadEvent::CalibrationCancelled);
        self.transition(Trigger::CalibrationDone, out);
        info!("calibration cancelled");
    }

    /// Forget all calibration and, when recording, recalibrate automatically.
    pub fn reset_calibration(&mut self, now: Instant, out: &mut Vec<VadEvent>) {
        self.baseline =
            CalibrationProfile::from_defaults(&self.config.calibration, &self.config.thresholds);
        self.profile = self.baseline;
        if self.state == PipelineState::Idle {
            return;
        }
        self.discard_segment(DiscardReason::Calibration, out);
        self.detector.reset();
        if self.transition(Trigger::Calibrate(CalibrationMode::Automatic), out) {
            self.calibration = Some(self.new_session(CalibrationMode::Automatic, now));
            info!("calibration reset");
        }
    }

    /// Report whether the assistant is playing synthesized speech.
    ///
    /// While it is, interruptions are detected and no new segment opens.
    /// When it stops, new segments stay suppressed for the echo tail.
    pub fn set_speaking_mode(&mut self, speaking: bool, now: Instant) {
        if speaking == self.assistant_speaking {
            return;
        }
        self.assistant_speaking = speaking;
        self.interruption.clear_run();
        self.echo_tail_until = if speaking {
            None
        } else {
            Some(now + self.config.interruption.echo_tail())
        };
        debug!(speaking, "assistant speaking mode changed");
    }

    fn calibrate_frame(&mut self, level: f32, at: Instant, out: &mut Vec<VadEvent>) {
        let voice_threshold = self.thresholds().start;
        let complete = match self.calibration.as_mut() {
            Some(session) => session.observe(level, voice_threshold, at),
            None => true,
        };
        if complete {
            self.finish_calibration(out);
        }
    }

    fn finish_calibration(&mut self, out: &mut Vec<VadEvent>) {
        if let Some(session) = self.calibration.take() {
            let mode = session.mode();
            let samples = session.sample_count();
            match session.finish(&self.profile, &self.config.calibration, &self.config.thresholds) {
                CalibrationOutcome::Calibrated(profile) => {
                    info!(
                        ?mode,
                        samples,
                        noise_floor = profile.noise_floor,
                        user_voice_level = ?profile.user_voice_level,
                        "calibration complete"
                    );
                    self.profile = profile;
                    if mode == CalibrationMode::Manual {
                        self.baseline = profile;
                    }
                    out.push(VadEvent::CalibrationFinished(profile));
                }
                CalibrationOutcome::Skipped => {
                    info!(?mode, "calibration collected no samples, keeping previous profile");
                    out.push(VadEvent::CalibrationSkipped);
                }
            }
        }
        self.detector.reset();
        self.transition(Trigger::CalibrationDone, out);
    }

    fn detect_frame(&mut self, frame: AudioFrame, level: f32, out: &mut Vec<VadEvent>) {
        let now = frame.captured_at;
        let thresholds = self.thresholds();

        if self.assistant_speaking
            && self.config.interruption.enabled
            && self.interruption.observe(level, thresholds.interrupt, now)
        {
            info!(level, threshold = thresholds.interrupt, "user interruption detected");
            out.push(VadEvent::Interruption { at: now, level });
        }

        match self.state {
            PipelineState::SpeechActive => {
                let observation = self.detector.observe(level, &thresholds);
                if let Some(segment) = self.segment.as_mut() {
                    if observation == Observation::Voiced {
                        segment.guard.voiced(now);
                    }
                    segment.frames.push(frame.clone());
                }
                out.push(VadEvent::AudioBuffer(frame));
            }
            PipelineState::ForcedEnd => {
                if level <= thresholds.start {
                    self.transition(Trigger::Released, out);
                }
            }
            PipelineState::Listening => {
                if self.segments_suppressed(now) {
                    self.detector.reset();
                    return;
                }
                match self.detector.observe(level, &thresholds) {
                    Observation::SpeechConfirmed => self.open_segment(frame, level, out),
                    Observation::Silent => {
                        let silent_run = self.detector.silent_run();
                        if self.adapter.observe(
                            &mut self.profile,
                            level,
                            &thresholds,
                            silent_run,
                            &self.config.thresholds,
                        ) {
                            trace!(noise_floor = self.profile.noise_floor, "noise floor adapted");
                        }
                    }
                    Observation::Candidate | Observation::Voiced | Observation::Unvoiced => {}
                }
            }
            PipelineState::Idle | PipelineState::Calibrating(_) => {}
        }
    }

    fn open_segment(&mut self, frame: AudioFrame, level: f32, out: &mut Vec<VadEvent>) {
        if !self.transition(Trigger::SpeechConfirmed, out) {
            self.detector.reset();
            return;
        }
        let at = frame.captured_at;
        let capacity = if self.frame_duration.is_zero() {
            MAX_SEGMENT_PREALLOC
        } else {
            let frames = self.config.detection.max_speech_duration().as_nanos()
                / self.frame_duration.as_nanos();
            usize::try_from(frames).unwrap_or(MAX_SEGMENT_PREALLOC).min(MAX_SEGMENT_PREALLOC)
        };
        let mut frames = Vec::with_capacity(capacity);
        frames.push(frame.clone());
        self.segment = Some(OpenSegment {
            frames,
            sample_rate: frame.sample_rate,
            guard: SegmentGuard::arm(at, self.frame_duration),
        });
        info!(level, noise_floor = self.profile.noise_floor, "speech started");
        out.push(VadEvent::SpeechStart { at, level });
        out.push(VadEvent::AudioBuffer(frame));
    }

    fn close_segment(&mut self, now: Instant, reason: EndReason, out: &mut Vec<VadEvent>) {
        let Some(open) = self.segment.take() else {
            return;
        };
        let segment = SpeechSegment {
            started_at: open.guard.started_at(),
            ended_at: now,
            sample_rate: open.sample_rate,
            end_reason: reason,
            frames: open.frames,
        };
        info!(
            frames = segment.frame_count(),
            duration_ms = segment.duration().as_millis() as u64,
            ?reason,
            "speech ended"
        );
        out.push(VadEvent::SpeechEnd(segment));

        match reason {
            EndReason::Silence => {
                self.detector.release();
                self.transition(Trigger::SegmentClosed, out);
            }
            EndReason::MaxDuration => {
                warn!("segment hit the maximum duration, forcing end");
                self.detector.reset();
                self.transition(Trigger::SegmentForced, out);
            }
        }
    }

    fn discard_segment(&mut self, reason: DiscardReason, out: &mut Vec<VadEvent>) {
        let Some(open) = self.segment.take() else {
            return;
        };
        debug!(?reason, frames = open.frames.len(), "discarding open segment");
        self.detector.release();
        out.push(VadEvent::SpeechDiscarded {
            reason,
            frames: open.frames.len(),
        });
    }

    fn segments_suppressed(&self, now: Instant) -> bool {
        self.assistant_speaking || self.echo_tail_until.is_some_and(|t| now < t)
    }

    fn new_session(&self, mode: CalibrationMode, now: Instant) -> CalibrationSession {
        let ms = match mode {
            CalibrationMode::Automatic => self.config.calibration.auto_duration_ms,
            CalibrationMode::Manual => self.config.calibration.manual_duration_ms,
        };
        let duration = Duration::from_millis(u64::from(ms));
        let expected = if self.frame_duration.is_zero() {
            0
        } else {
            let frames = duration.as_nanos() / self.frame_duration.as_nanos();
            usize::try_from(frames).unwrap_or(usize::MAX).saturating_add(1)
        };
        CalibrationSession::new(mode, duration, expected, now)
    }

    fn transition(&mut self, trigger: Trigger, out: &mut Vec<VadEvent>) -> bool {
        let Some(next) = self.state.on(trigger) else {
            warn!(state = %self.state, ?trigger, "ignoring illegal transition");
            return false;
        };
        if next != self.state {
            debug!(from = %self.state, to = %next, "state change");
            out.push(VadEvent::StateChanged {
                from: self.state,
                to: next,
            });
            self.state = next;
        }
        true
    }

    fn clear_counters(&mut self) {
        self.meter.reset();
        self.last_level = LevelReading::default();
        self.detector.reset();
        self.interruption.reset();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    const FRAME: Duration = Duration::from_millis(10);
    const NOISE: f32 = 0.004;
    const VOICE: f32 = 0.05;

    fn test_config() -> VadConfig {
        let mut config = VadConfig::default();
        config.audio.frame_size = 160;
        config.meter.history_len = 1;
        config.calibration.auto_duration_ms = 100;
        config.calibration.manual_duration_ms = 200;
        config
    }

    struct Harness {
        engine: VadEngine,
        now: Instant,
        events: Vec<VadEvent>,
    }

    impl Harness {
        fn new(config: VadConfig) -> Self {
            let engine = VadEngine::new(&config).unwrap();
            Self {
                engine,
                now: Instant::now(),
                events: Vec::new(),
            }
        }

        /// Started and calibrated against a steady noise floor.
        fn listening() -> Self {
            let mut h = Self::new(test_config());
            h.start();
            h.feed(NOISE, 11);
            assert_eq!(h.engine.state(), PipelineState::Listening);
            h.events.clear();
            h
        }

        fn start(&mut self) {
            self.engine.start(self.now, &mut self.events);
        }

        /// Feed `n` frames at `level`, ticking the guard after each one.
        fn feed(&mut self, level: f32, n: usize) {
            for _ in 0..n {
                let frame = AudioFrame::new(vec![level; 160], 16_000, self.now);
                self.engine.process_frame(frame, &mut self.events);
                self.engine.tick(self.now, &mut self.events);
                self.now += FRAME;
            }
        }

        fn count(&self, kind: &str) -> usize {
            self.events.iter().filter(|e| e.kind() == kind).count()
        }

        fn segments(&self) -> Vec<&SpeechSegment> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    VadEvent::SpeechEnd(segment) => Some(segment),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = test_config();
        config.detection.min_speech_frames = 0;
        assert!(VadEngine::new(&config).is_err());
    }

    #[test]
    fn automatic_calibration_sets_floor_from_quiet_frames() {
        let mut h = Harness::new(test_config());
        h.start();
        assert_eq!(
            h.engine.state(),
            PipelineState::Calibrating(CalibrationMode::Automatic)
        );
        h.feed(NOISE, 11);
        assert_eq!(h.engine.state(), PipelineState::Listening);
        assert_eq!(h.count("calibration_finished"), 1);
        assert!((h.engine.profile().noise_floor - NOISE).abs() < 1e-6);
        assert!(h.engine.profile().is_calibrated);
        assert!((h.engine.thresholds().start - 0.012).abs() < 1e-6);
    }

    #[test]
    fn calibration_without_frames_is_skipped() {
        let mut h = Harness::new(test_config());
        h.start();
        let before = *h.engine.profile();
        h.engine
            .tick(h.now + Duration::from_millis(150), &mut h.events);
        assert_eq!(h.count("calibration_skipped"), 1);
        assert_eq!(h.engine.state(), PipelineState::Listening);
        assert_eq!(*h.engine.profile(), before);
    }

    #[test]
    fn silence_never_starts_speech() {
        let mut h = Harness::listening();
        h.feed(NOISE, 500);
        assert_eq!(h.count("speech_start"), 0);
        assert_eq!(h.engine.state(), PipelineState::Listening);
    }

    #[test]
    fn short_blip_does_not_confirm_speech() {
        let mut h = Harness::listening();
        h.feed(VOICE, 2);
        h.feed(NOISE, 100);
        assert_eq!(h.count("speech_start"), 0);
        assert_eq!(h.count("speech_discarded"), 0);
    }

    #[test]
    fn sustained_tone_yields_one_segment() {
        let mut h = Harness::listening();
        let tone_start = h.now;
        h.feed(VOICE, 100);
        assert_eq!(h.count("speech_start"), 1);
        assert_eq!(h.engine.state(), PipelineState::SpeechActive);

        h.feed(NOISE, 100);
        assert_eq!(h.count("speech_start"), 1);
        assert_eq!(h.count("speech_end"), 1);
        assert_eq!(h.engine.state(), PipelineState::Listening);

        let segment = h.segments()[0];
        assert_eq!(segment.end_reason, EndReason::Silence);
        assert_eq!(segment.started_at, tone_start + FRAME * 2);
        // 98 voiced frames followed by the trailing silence up to the timeout.
        assert!(segment.frame_count() >= 98 + 79);
        assert_eq!(
            h.count("audio_buffer"),
            segment.frame_count(),
            "every buffered frame is also streamed"
        );
    }

    #[test]
    fn continue_threshold_bridges_soft_speech() {
        let mut h = Harness::listening();
        h.feed(VOICE, 30);
        // Between continue (0.008) and start (0.012).
        h.feed(0.01, 150);
        assert_eq!(h.count("speech_end"), 0);
        assert_eq!(h.engine.state(), PipelineState::SpeechActive);

        h.feed(NOISE, 100);
        assert_eq!(h.count("speech_end"), 1);
        assert_eq!(h.count("speech_start"), 1);
    }

    #[test]
    fn too_short_segment_is_discarded() {
        let mut h = Harness::listening();
        h.feed(VOICE, 3);
        assert_eq!(h.count("speech_start"), 1);
        h.feed(NOISE, 100);
        assert_eq!(h.count("speech_end"), 0);
        assert!(h.events.iter().any(|e| matches!(
            e,
            VadEvent::SpeechDiscarded {
                reason: DiscardReason::TooShort,
                ..
            }
        )));
        assert_eq!(h.engine.state(), PipelineState::Listening);
    }

    #[test]
    fn max_duration_forces_end_until_level_drops() {
        let mut config = test_config();
        config.detection.max_speech_duration_ms = 1_000;
        let mut h = Harness::new(config);
        h.start();
        h.feed(NOISE, 11);
        h.events.clear();

        h.feed(VOICE, 150);
        assert_eq!(h.count("speech_end"), 1);
        assert_eq!(h.segments()[0].end_reason, EndReason::MaxDuration);
        assert_eq!(h.engine.state(), PipelineState::ForcedEnd);

        h.feed(VOICE, 50);
        assert_eq!(h.count("speech_start"), 1, "no restart while still loud");

        h.feed(NOISE, 1);
        assert_eq!(h.engine.state(), PipelineState::Listening);
        h.feed(VOICE, 3);
        assert_eq!(h.count("speech_start"), 2);
    }

    #[test]
    fn stop_mid_segment_emits_no_speech_end() {
        let mut h = Harness::listening();
        h.feed(VOICE, 50);
        h.engine.stop();
        h.feed(NOISE, 200);
        assert_eq!(h.count("speech_end"), 0);
        assert_eq!(h.engine.state(), PipelineState::Idle);
    }

    #[test]
    fn interruption_needs_two_loud_frames_then_cools_down() {
        let mut h = Harness::listening();
        h.engine.set_speaking_mode(true, h.now);
        h.feed(VOICE, 1);
        assert_eq!(h.count("interruption"), 0);
        h.feed(VOICE, 1);
        assert_eq!(h.count("interruption"), 1);

        h.feed(VOICE, 100);
        assert_eq!(h.count("interruption"), 1, "cooldown suppresses repeats");
        assert_eq!(h.count("speech_start"), 0, "no segment while assistant speaks");

        h.feed(VOICE, 60);
        assert_eq!(h.count("interruption"), 2);
    }

    #[test]
    fn nan_frames_do_not_interrupt() {
        let mut config = test_config();
        config.meter.history_len = 8;
        let mut h = Harness::new(config);
        h.start();
        h.feed(NOISE, 11);
        assert_eq!(h.engine.state(), PipelineState::Listening);
        h.engine.set_speaking_mode(true, h.now);

        h.feed(f32::NAN, 8);
        assert_eq!(h.count("interruption"), 0);
        assert!(h.engine.last_level().smoothed.is_finite());
    }

    #[test]
    fn no_interruption_when_assistant_silent() {
        let mut h = Harness::listening();
        h.feed(VOICE, 50);
        assert_eq!(h.count("interruption"), 0);
    }

    #[test]
    fn echo_tail_delays_new_segments() {
        let mut h = Harness::listening();
        h.engine.set_speaking_mode(true, h.now);
        h.engine.set_speaking_mode(false, h.now);
        assert!(!h.engine.is_assistant_speaking());
        h.feed(VOICE, 25);
        assert_eq!(h.count("speech_start"), 0);
        h.feed(VOICE, 10);
        assert_eq!(h.count("speech_start"), 1);
    }

    #[test]
    fn noise_floor_follows_quieter_room() {
        let mut h = Harness::listening();
        h.feed(0.002, 300);
        let floor = h.engine.profile().noise_floor;
        assert!(floor < NOISE, "floor {floor} should drop");
        assert!(floor >= test_config().thresholds.min_noise_floor());
    }

    #[test]
    fn noise_floor_frozen_while_assistant_speaks() {
        let mut h = Harness::listening();
        h.engine.set_speaking_mode(true, h.now);
        h.feed(0.002, 300);
        assert!((h.engine.profile().noise_floor - NOISE).abs() < 1e-6);
    }

    #[test]
    fn manual_calibration_discards_open_segment() {
        let mut h = Harness::listening();
        h.feed(VOICE, 10);
        h.engine.start_manual_calibration(h.now, &mut h.events);
        assert!(h.events.iter().any(|e| matches!(
            e,
            VadEvent::SpeechDiscarded {
                reason: DiscardReason::Calibration,
                ..
            }
        )));
        assert_eq!(
            h.engine.state(),
            PipelineState::Calibrating(CalibrationMode::Manual)
        );

        h.feed(NOISE, 10);
        h.feed(VOICE, 11);
        assert_eq!(h.count("calibration_finished"), 1);
        assert_eq!(h.count("speech_end"), 0);
        assert_eq!(h.engine.state(), PipelineState::Listening);
        let voice = h.engine.profile().user_voice_level.unwrap();
        assert!((voice - VOICE).abs() < 1e-6);
    }

    #[test]
    fn cancelled_calibration_keeps_previous_profile() {
        let mut h = Harness::listening();
        let before = *h.engine.profile();
        h.engine.start_manual_calibration(h.now, &mut h.events);
        h.feed(0.2, 5);
        assert!(h.engine.calibration_progress(h.now).is_some());
        h.engine.cancel_calibration(&mut h.events);
        assert_eq!(h.count("calibration_cancelled"), 1);
        assert_eq!(*h.engine.profile(), before);
        assert_eq!(h.engine.state(), PipelineState::Listening);
        assert!(h.engine.calibration_progress(h.now).is_none());
    }

    #[test]
    fn reset_calibration_restores_defaults_and_recalibrates() {
        let mut h = Harness::listening();
        h.feed(0.002, 300);
        h.engine.reset_calibration(h.now, &mut h.events);
        assert!(!h.engine.profile().is_calibrated);
        assert_eq!(
            h.engine.state(),
            PipelineState::Calibrating(CalibrationMode::Automatic)
        );
        h.feed(NOISE, 11);
        assert!((h.engine.profile().noise_floor - NOISE).abs() < 1e-6);
    }

    #[test]
    fn control_messages_dispatch() {
        let mut h = Harness::listening();
        let mut out = Vec::new();
        h.engine.handle(
            PipelineMessage::Control(ControlCommand::SetSpeaking(true), h.now),
            &mut out,
        );
        assert!(h.engine.is_assistant_speaking());
        h.engine.handle(
            PipelineMessage::Control(ControlCommand::StartManualCalibration, h.now),
            &mut out,
        );
        h.engine.handle(
            PipelineMessage::Control(ControlCommand::CancelCalibration, h.now),
            &mut out,
        );
        assert!(out.iter().any(|e| e.kind() == "calibration_cancelled"));
        assert_eq!(h.engine.state(), PipelineState::Listening);
    }

    #[test]
    fn state_changes_are_reported_in_order() {
        let mut h = Harness::new(test_config());
        h.start();
        h.feed(NOISE, 11);
        h.feed(VOICE, 3);
        let changes: Vec<(PipelineState, PipelineState)> = h
            .events
            .iter()
            .filter_map(|e| match e {
                VadEvent::StateChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            changes,
            vec![
                (
                    PipelineState::Idle,
                    PipelineState::Calibrating(CalibrationMode::Automatic)
                ),
                (
                    PipelineState::Calibrating(CalibrationMode::Automatic),
                    PipelineState::Listening
                ),
                (PipelineState::Listening, PipelineState::SpeechActive),
            ]
        );
    }

    #[test]
    fn baseline_profile_survives_restart() {
        let config = test_config();
        let profile = CalibrationProfile {
            noise_floor: 0.01,
            user_voice_level: Some(0.1),
            is_calibrated: true,
        };
        let mut engine = VadEngine::new(&config).unwrap().with_baseline(profile);
        let mut out = Vec::new();
        let now = Instant::now();
        engine.start(now, &mut out);
        assert_eq!(*engine.profile(), profile);
        engine.stop();
        engine.start(now, &mut out);
        assert_eq!(*engine.profile(), profile);
    }
}
