//! Noise floor calibration.
//!
//! A session collects smoothed levels for a fixed window and then takes a
//! low percentile as the noise floor. A percentile survives a cough or a
//! click during the window and is not fooled by the single quietest frame.
//! Manual sessions also bucket loud frames as evidence of the user's voice.

use crate::config::{CalibrationConfig, ThresholdConfig};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Ambient noise estimate plus an optional voice reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    /// Estimated ambient RMS level.
    pub noise_floor: f32,
    /// Typical RMS of the user's voice, from manual calibration.
    ///
    /// Diagnostic only; thresholds never read it.
    pub user_voice_level: Option<f32>,
    /// Whether any calibration has completed for this profile.
    pub is_calibrated: bool,
}

impl CalibrationProfile {
    /// Uncalibrated profile seeded from configuration defaults.
    pub fn from_defaults(calibration: &CalibrationConfig, thresholds: &ThresholdConfig) -> Self {
        let mut profile = Self {
            noise_floor: calibration.default_noise_floor,
            user_voice_level: None,
            is_calibrated: false,
        };
        profile.clamp_floor(thresholds);
        profile
    }

    /// Restore the invariant `noise_floor >= absolute_min / start_multiplier`.
    pub fn clamp_floor(&mut self, thresholds: &ThresholdConfig) {
        let min = thresholds.min_noise_floor();
        if !(self.noise_floor >= min) {
            self.noise_floor = min;
        }
    }
}

/// Which kind of calibration is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationMode {
    /// Short, passive window at the start of every recording.
    Automatic,
    /// Longer window while the user is prompted to speak.
    Manual,
}

/// Result of finishing a calibration session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationOutcome {
    /// A new profile was computed.
    Calibrated(CalibrationProfile),
    /// No samples were collected; the previous profile stays in effect.
    Skipped,
}

/// One in-progress calibration window.
#[derive(Debug, Clone)]
pub struct CalibrationSession {
    mode: CalibrationMode,
    duration: Duration,
    started_at: Instant,
    first_sample_at: Option<Instant>,
    noise_samples: Vec<f32>,
    voice_samples: Vec<f32>,
}

impl CalibrationSession {
    /// Start a session at `now` lasting `duration`.
    ///
    /// `expected_frames` pre-sizes the sample buckets so collection does not
    /// reallocate on the audio path.
    pub fn new(
        mode: CalibrationMode,
        duration: Duration,
        expected_frames: usize,
        now: Instant,
    ) -> Self {
        let voice_capacity = match mode {
            CalibrationMode::Automatic => 0,
            CalibrationMode::Manual => expected_frames,
        };
        Self {
            mode,
            duration,
            started_at: now,
            first_sample_at: None,
            noise_samples: Vec::with_capacity(expected_frames),
            voice_samples: Vec::with_capacity(voice_capacity),
        }
    }

    /// Session mode.
    pub fn mode(&self) -> CalibrationMode {
        self.mode
    }

    /// Number of levels collected so far.
    pub fn sample_count(&self) -> usize {
        self.noise_samples.len()
    }

    /// Record one smoothed level. Returns `true` once the window is complete.
    ///
    /// The window is timed from the first collected frame so a slow audio
    /// start does not eat into it.
    pub fn observe(&mut self, level: f32, voice_threshold: f32, at: Instant) -> bool {
        let first = *self.first_sample_at.get_or_insert(at);
        if level.is_finite() {
            self.noise_samples.push(level);
            if self.mode == CalibrationMode::Manual && level > voice_threshold {
                self.voice_samples.push(level);
            }
        }
        at.saturating_duration_since(first) >= self.duration
    }

    /// Elapsed fraction of the window, in `[0, 1]`.
    pub fn progress(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let origin = self.first_sample_at.unwrap_or(self.started_at);
        let elapsed = now.saturating_duration_since(origin);
        (elapsed.as_secs_f32() / self.duration.as_secs_f32()).clamp(0.0, 1.0)
    }

    /// Compute the new profile from the collected samples.
    pub fn finish(
        mut self,
        previous: &CalibrationProfile,
        calibration: &CalibrationConfig,
        thresholds: &ThresholdConfig,
    ) -> CalibrationOutcome {
        let Some(noise_floor) = percentile(&mut self.noise_samples, calibration.noise_percentile)
        else {
            return CalibrationOutcome::Skipped;
        };
        let user_voice_level = percentile(&mut self.voice_samples, calibration.voice_percentile)
            .or(previous.user_voice_level);

        let mut profile = CalibrationProfile {
            noise_floor,
            user_voice_level,
            is_calibrated: true,
        };
        profile.clamp_floor(thresholds);
        CalibrationOutcome::Calibrated(profile)
    }
}

/// Value at rank `floor(p * len)` of the sorted input; `None` when empty.
///
/// Sorts `values` in place.
pub fn percentile(values: &mut [f32], p: f32) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(f32::total_cmp);
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
    let rank = ((values.len() as f32 * p).floor() as usize).min(values.len() - 1);
    Some(values[rank])
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    const FRAME: Duration = Duration::from_millis(30);

    fn defaults() -> (CalibrationConfig, ThresholdConfig) {
        (CalibrationConfig::default(), ThresholdConfig::default())
    }

    fn run_session(
        mode: CalibrationMode,
        levels: &[f32],
        voice_threshold: f32,
    ) -> CalibrationSession {
        let start = Instant::now();
        let mut session =
            CalibrationSession::new(mode, Duration::from_secs(10), levels.len(), start);
        for (i, &level) in levels.iter().enumerate() {
            session.observe(level, voice_threshold, start + FRAME * i as u32);
        }
        session
    }

    #[test]
    fn percentile_picks_floor_rank() {
        let mut values = vec![0.8, 0.1, 0.4, 0.2, 0.6, 0.3, 0.5, 0.7];
        assert_eq!(percentile(&mut values, 0.25), Some(0.3));
        assert_eq!(percentile(&mut values, 0.75), Some(0.7));
        assert_eq!(percentile(&mut values, 0.0), Some(0.1));
        assert_eq!(percentile(&mut values, 1.0), Some(0.8));
    }

    #[test]
    fn percentile_of_empty_is_none() {
        assert_eq!(percentile(&mut [], 0.25), None);
    }

    #[test]
    fn automatic_calibration_takes_25th_percentile() {
        let (cal, thr) = defaults();
        let levels: Vec<f32> = (1..=20).map(|i| i as f32 * 0.001).collect();
        let session = run_session(CalibrationMode::Automatic, &levels, 0.01);
        let previous = CalibrationProfile::from_defaults(&cal, &thr);

        let CalibrationOutcome::Calibrated(profile) = session.finish(&previous, &cal, &thr) else {
            panic!("expected calibration");
        };
        // sorted[floor(20 * 0.25)] = sorted[5] = 0.006
        assert!((profile.noise_floor - 0.006).abs() < 1e-6);
        assert!(profile.is_calibrated);
        assert_eq!(profile.user_voice_level, None);
    }

    #[test]
    fn percentile_ignores_transient_spike() {
        let (cal, thr) = defaults();
        let mut levels = vec![0.004; 16];
        levels[3] = 0.4;
        levels[9] = 0.0;
        let session = run_session(CalibrationMode::Automatic, &levels, 0.01);
        let previous = CalibrationProfile::from_defaults(&cal, &thr);
        let CalibrationOutcome::Calibrated(profile) = session.finish(&previous, &cal, &thr) else {
            panic!("expected calibration");
        };
        assert!((profile.noise_floor - 0.004).abs() < 1e-6);
    }

    #[test]
    fn silent_room_is_clamped_to_absolute_floor() {
        let (cal, thr) = defaults();
        let session = run_session(CalibrationMode::Automatic, &[0.0; 12], 0.01);
        let previous = CalibrationProfile::from_defaults(&cal, &thr);
        let CalibrationOutcome::Calibrated(profile) = session.finish(&previous, &cal, &thr) else {
            panic!("expected calibration");
        };
        assert!((profile.noise_floor - thr.min_noise_floor()).abs() < 1e-9);
    }

    #[test]
    fn manual_calibration_buckets_voice_levels() {
        let (cal, thr) = defaults();
        let mut levels = vec![0.004; 8];
        levels.extend([0.05, 0.06, 0.07, 0.08]);
        let session = run_session(CalibrationMode::Manual, &levels, 0.02);
        let previous = CalibrationProfile::from_defaults(&cal, &thr);
        let CalibrationOutcome::Calibrated(profile) = session.finish(&previous, &cal, &thr) else {
            panic!("expected calibration");
        };
        assert!((profile.noise_floor - 0.004).abs() < 1e-6);
        // voice bucket sorted[floor(4 * 0.75)] = sorted[3] = 0.08
        assert_eq!(profile.user_voice_level, Some(0.08));
    }

    #[test]
    fn empty_session_is_skipped() {
        let (cal, thr) = defaults();
        let session = CalibrationSession::new(
            CalibrationMode::Manual,
            Duration::from_secs(3),
            100,
            Instant::now(),
        );
        let previous = CalibrationProfile::from_defaults(&cal, &thr);
        assert_eq!(session.finish(&previous, &cal, &thr), CalibrationOutcome::Skipped);
    }

    #[test]
    fn observe_reports_completion_after_duration() {
        let start = Instant::now();
        let mut session = CalibrationSession::new(
            CalibrationMode::Automatic,
            Duration::from_millis(90),
            4,
            start,
        );
        assert!(!session.observe(0.01, 0.02, start));
        assert!(!session.observe(0.01, 0.02, start + FRAME));
        assert!(!session.observe(0.01, 0.02, start + FRAME * 2));
        assert!(session.observe(0.01, 0.02, start + FRAME * 3));
        assert_eq!(session.sample_count(), 4);
    }

    #[test]
    fn progress_is_a_clamped_fraction() {
        let start = Instant::now();
        let mut session = CalibrationSession::new(
            CalibrationMode::Manual,
            Duration::from_secs(2),
            4,
            start,
        );
        assert_eq!(session.progress(start), 0.0);
        session.observe(0.01, 0.02, start);
        assert!((session.progress(start + Duration::from_secs(1)) - 0.5).abs() < 1e-6);
        assert_eq!(session.progress(start + Duration::from_secs(5)), 1.0);
    }

    #[test]
    fn non_finite_levels_are_ignored() {
        let start = Instant::now();
        let mut session = CalibrationSession::new(
            CalibrationMode::Automatic,
            Duration::from_secs(1),
            4,
            start,
        );
        session.observe(f32::NAN, 0.02, start);
        session.observe(f32::INFINITY, 0.02, start);
        assert_eq!(session.sample_count(), 0);
    }

    #[test]
    fn profile_clamp_repairs_nan_floor() {
        let thr = ThresholdConfig::default();
        let mut profile = CalibrationProfile {
            noise_floor: f32::NAN,
            user_voice_level: None,
            is_calibrated: false,
        };
        profile.clamp_floor(&thr);
        assert_eq!(profile.noise_floor, thr.min_noise_floor());
    }
}
