//! Operating thresholds derived from the noise floor.

use crate::config::ThresholdConfig;

/// Fraction of `absolute_min` the continue threshold may drop to.
const CONTINUE_MIN_RATIO: f32 = 0.8;

/// The three levels the detector compares smoothed loudness against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdSet {
    /// Level a quiet stream must exceed to start speech.
    pub start: f32,
    /// Lower level that keeps an already active segment going.
    pub continue_: f32,
    /// Level required to interrupt assistant playback.
    pub interrupt: f32,
}

impl ThresholdSet {
    /// Derive thresholds from `noise_floor`.
    ///
    /// Never panics: NaN or negative floors count as silence and infinite
    /// floors saturate at `absolute_max`.
    pub fn derive(noise_floor: f32, config: &ThresholdConfig) -> Self {
        let floor = if noise_floor.is_nan() {
            0.0
        } else {
            noise_floor.max(0.0)
        };
        let max = config.absolute_max;
        let min = config.absolute_min;
        Self {
            start: bounded(floor * config.start_multiplier, min, max),
            continue_: bounded(floor * config.continue_multiplier, min * CONTINUE_MIN_RATIO, max),
            interrupt: bounded(floor * config.interrupt_multiplier, min, max),
        }
    }
}

/// `clamp` that tolerates NaN input and inverted bounds.
fn bounded(value: f32, min: f32, max: f32) -> f32 {
    let value = if value.is_nan() { min } else { value };
    value.max(min).min(max)
}
