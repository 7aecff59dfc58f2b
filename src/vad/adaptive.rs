//! Slow noise floor tracking during confident silence.

use crate::config::{AdaptationConfig, ThresholdConfig};
use crate::vad::calibration::CalibrationProfile;
use crate::vad::thresholds::ThresholdSet;

/// Exponential smoother for the noise floor.
///
/// Only moves the floor after a long run of quiet frames and only toward
/// levels clearly below the start threshold, so a single quiet instant or
/// ongoing speech cannot drag it around.
#[derive(Debug, Clone)]
pub struct NoiseFloorAdapter {
    config: AdaptationConfig,
    min_silent_run: f32,
}

impl NoiseFloorAdapter {
    /// Create an adapter gated on `min_silence_frames` from detection config.
    pub fn new(config: &AdaptationConfig, min_silence_frames: u32) -> Self {
        Self {
            config: config.clone(),
            min_silent_run: config.confidence_factor * min_silence_frames as f32,
        }
    }

    /// Fold `level` into `profile` if the silence gate allows it.
    ///
    /// The caller must only invoke this while no segment is open and the
    /// assistant is not speaking. Returns `true` when the floor moved.
    pub fn observe(
        &self,
        profile: &mut CalibrationProfile,
        level: f32,
        thresholds: &ThresholdSet,
        silent_run: u32,
        threshold_config: &ThresholdConfig,
    ) -> bool {
        if !self.config.enabled || !level.is_finite() {
            return false;
        }
        if (silent_run as f32) <= self.min_silent_run {
            return false;
        }
        if level >= self.config.quiet_ratio * thresholds.start {
            return false;
        }
        let alpha = self.config.rate;
        profile.noise_floor = profile.noise_floor * (1.0 - alpha) + level * alpha;
        profile.clamp_floor(threshold_config);
        true
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn profile(noise_floor: f32) -> CalibrationProfile {
        CalibrationProfile {
            noise_floor,
            user_voice_level: None,
            is_calibrated: true,
        }
    }

    #[test]
    fn requires_confident_silence() {
        let thr = ThresholdConfig::default();
        let adapter = NoiseFloorAdapter::new(&AdaptationConfig::default(), 10);
        let mut p = profile(0.01);
        let set = ThresholdSet::derive(p.noise_floor, &thr);
        assert!(!adapter.observe(&mut p, 0.002, &set, 20, &thr));
        assert!(adapter.observe(&mut p, 0.002, &set, 21, &thr));
    }

    #[test]
    fn smooths_toward_quiet_level() {
        let thr = ThresholdConfig::default();
        let adapter = NoiseFloorAdapter::new(&AdaptationConfig::default(), 10);
        let mut p = profile(0.01);
        let set = ThresholdSet::derive(p.noise_floor, &thr);
        assert!(adapter.observe(&mut p, 0.005, &set, 100, &thr));
        assert!((p.noise_floor - (0.01 * 0.98 + 0.005 * 0.02)).abs() < 1e-7);
    }

    #[test]
    fn ignores_levels_near_start_threshold() {
        let thr = ThresholdConfig::default();
        let adapter = NoiseFloorAdapter::new(&AdaptationConfig::default(), 10);
        let mut p = profile(0.01);
        let set = ThresholdSet::derive(p.noise_floor, &thr);
        // 60% of start (0.03) is 0.018
        assert!(!adapter.observe(&mut p, 0.02, &set, 100, &thr));
        assert_eq!(p.noise_floor, 0.01);
    }

    #[test]
    fn never_drops_below_absolute_floor() {
        let thr = ThresholdConfig::default();
        let config = AdaptationConfig {
            rate: 1.0,
            ..AdaptationConfig::default()
        };
        let adapter = NoiseFloorAdapter::new(&config, 10);
        let mut p = profile(0.002);
        let set = ThresholdSet::derive(p.noise_floor, &thr);
        assert!(adapter.observe(&mut p, 0.0, &set, 100, &thr));
        assert_eq!(p.noise_floor, thr.min_noise_floor());
    }

    #[test]
    fn disabled_adapter_is_inert() {
        let thr = ThresholdConfig::default();
        let config = AdaptationConfig {
            enabled: false,
            ..AdaptationConfig::default()
        };
        let adapter = NoiseFloorAdapter::new(&config, 10);
        let mut p = profile(0.01);
        let set = ThresholdSet::derive(p.noise_floor, &thr);
        assert!(!adapter.observe(&mut p, 0.001, &set, 1_000, &thr));
    }

    #[test]
    fn louder_room_raises_floor_over_time() {
        let thr = ThresholdConfig::default();
        let adapter = NoiseFloorAdapter::new(&AdaptationConfig::default(), 10);
        let mut p = profile(0.004);
        for _ in 0..500 {
            let set = ThresholdSet::derive(p.noise_floor, &thr);
            adapter.observe(&mut p, 0.006, &set, 100, &thr);
        }
        assert!((p.noise_floor - 0.006).abs() < 1e-4);
    }
}
