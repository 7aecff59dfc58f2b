//! Per-frame loudness: RMS plus a short moving average.

use std::collections::VecDeque;

/// Loudness derived from one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LevelReading {
    /// RMS of this frame alone.
    pub rms: f32,
    /// Mean RMS over the rolling history, used for all decisions.
    pub smoothed: f32,
    /// `smoothed * gain`, clamped to `[0, 1]`, for UI meters.
    pub normalized: f32,
}

/// Rolling RMS meter.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    history: VecDeque<f32>,
    capacity: usize,
    gain: f32,
}

impl LevelMeter {
    /// Create a meter averaging the last `history_len` frames.
    pub fn new(history_len: usize, gain: f32) -> Self {
        let capacity = history_len.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            gain,
        }
    }

    /// Measure one frame and fold it into the history.
    ///
    /// A frame whose RMS is not finite counts as silence.
    pub fn measure(&mut self, samples: &[f32]) -> LevelReading {
        let rms = compute_rms_energy(samples);
        let rms = if rms.is_finite() { rms } else { 0.0 };
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(rms);

        let smoothed = self.smoothed();
        LevelReading {
            rms,
            smoothed,
            normalized: (smoothed * self.gain).clamp(0.0, 1.0),
        }
    }

    /// Current smoothed level, 0 when no frame has been measured.
    pub fn smoothed(&self) -> f32 {
        if self.history.is_empty() {
            return 0.0;
        }
        self.history.iter().sum::<f32>() / self.history.len() as f32
    }

    /// Number of frames currently held in the history.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Forget all history.
    pub fn reset(&mut self) {
        self.history.clear();
    }
}

/// Compute RMS energy of audio samples.
pub fn compute_rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
