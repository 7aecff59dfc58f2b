//! Configuration types for the voice activity pipeline.
//!
//! Every multiplier, bound and timing used by the detector is a tunable
//! here.

use crate::error::{Result, VadError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for the voice activity pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Audio capture settings.
    pub audio: AudioConfig,
    /// Level meter smoothing and display scaling.
    pub meter: MeterConfig,
    /// Threshold multipliers and absolute bounds.
    pub thresholds: ThresholdConfig,
    /// Frame debouncing and segment timing.
    pub detection: DetectionConfig,
    /// Noise floor calibration.
    pub calibration: CalibrationConfig,
    /// Slow noise floor tracking during silence.
    pub adaptation: AdaptationConfig,
    /// Barge-in detection while the assistant is speaking.
    pub interruption: InterruptionConfig,
}

/// Audio capture configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Pipeline sample rate in Hz. Capture is resampled to this rate.
    pub sample_rate: u32,
    /// Samples per analysis frame (480 = 30ms at 16kHz).
    pub frame_size: usize,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Frames buffered between the audio callback and the worker before
    /// new frames are dropped.
    pub channel_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_size: 480,
            input_device: None,
            channel_capacity: 64,
        }
    }
}

/// Level meter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Number of RMS values averaged into the smoothed level.
    pub history_len: usize,
    /// Gain applied to the smoothed level for the `[0, 1]` display value.
    pub display_gain: f32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            history_len: 8,
            display_gain: 20.0,
        }
    }
}

/// Threshold derivation: `threshold = noise_floor * multiplier`, clamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Multiplier for entering speech.
    pub start_multiplier: f32,
    /// Multiplier for staying in speech. Must be below `start_multiplier`.
    pub continue_multiplier: f32,
    /// Multiplier for interrupting assistant playback. Must be above
    /// `start_multiplier`.
    pub interrupt_multiplier: f32,
    /// Lower bound for every threshold (the continue threshold may go down
    /// to 80% of this).
    pub absolute_min: f32,
    /// Upper bound for every threshold.
    pub absolute_max: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            start_multiplier: 3.0,
            continue_multiplier: 2.0,
            interrupt_multiplier: 5.0,
            absolute_min: 0.005,
            absolute_max: 0.3,
        }
    }
}

impl ThresholdConfig {
    /// Lowest noise floor allowed, so derived thresholds never collapse.
    pub fn min_noise_floor(&self) -> f32 {
        if self.start_multiplier > 0.0 {
            self.absolute_min / self.start_multiplier
        } else {
            self.absolute_min
        }
    }
}

/// Speech detection timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Consecutive frames above the start threshold needed to open a segment.
    pub min_speech_frames: u32,
    /// Consecutive quiet frames that count as a confident silence run.
    pub min_silence_frames: u32,
    /// Continuous silence (ms) that closes an open segment.
    pub silence_timeout_ms: u32,
    /// Minimum voiced span (ms) for a segment to be delivered.
    pub min_speech_duration_ms: u32,
    /// Hard cap (ms) on a single segment.
    pub max_speech_duration_ms: u32,
    /// Period (ms) of the silence/duration guard check.
    pub guard_interval_ms: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_speech_frames: 3,
            min_silence_frames: 10,
            silence_timeout_ms: 800,
            min_speech_duration_ms: 250,
            max_speech_duration_ms: 30_000,
            guard_interval_ms: 50,
        }
    }
}

impl DetectionConfig {
    /// Silence timeout as a [`Duration`].
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.silence_timeout_ms))
    }

    /// Minimum speech duration as a [`Duration`].
    pub fn min_speech_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.min_speech_duration_ms))
    }

    /// Maximum speech duration as a [`Duration`].
    pub fn max_speech_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.max_speech_duration_ms))
    }

    /// Guard tick period as a [`Duration`].
    pub fn guard_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.guard_interval_ms))
    }
}

/// Noise floor calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Passive calibration window at the start of every recording (ms).
    pub auto_duration_ms: u32,
    /// User-prompted calibration window (ms).
    pub manual_duration_ms: u32,
    /// Percentile of collected levels taken as the noise floor.
    pub noise_percentile: f32,
    /// Percentile of voice-level samples taken as the user voice level.
    pub voice_percentile: f32,
    /// Noise floor used before any calibration has completed.
    pub default_noise_floor: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            auto_duration_ms: 500,
            manual_duration_ms: 3_000,
            noise_percentile: 0.25,
            voice_percentile: 0.75,
            default_noise_floor: 0.004,
        }
    }
}

/// Adaptive noise floor tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationConfig {
    /// Whether the noise floor follows the room during silence.
    pub enabled: bool,
    /// Exponential smoothing factor applied per qualifying frame.
    pub rate: f32,
    /// Silence run must exceed `confidence_factor * min_silence_frames`.
    pub confidence_factor: f32,
    /// Level must be below `quiet_ratio * start_threshold`.
    pub quiet_ratio: f32,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate: 0.02,
            confidence_factor: 2.0,
            quiet_ratio: 0.6,
        }
    }
}

/// Interruption (barge-in) detection while the assistant is speaking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptionConfig {
    /// Whether interruptions are reported at all.
    pub enabled: bool,
    /// Consecutive frames above the interrupt threshold before firing.
    pub confirm_frames: u32,
    /// Window after an interruption during which no further one fires (ms).
    pub cooldown_ms: u32,
    /// After assistant playback stops, keep new segments suppressed for this
    /// long (ms) so residual echo does not open one.
    pub echo_tail_ms: u32,
}

impl Default for InterruptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confirm_frames: 2,
            cooldown_ms: 1_500,
            echo_tail_ms: 300,
        }
    }
}

impl InterruptionConfig {
    /// Cooldown as a [`Duration`].
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(u64::from(self.cooldown_ms))
    }

    /// Echo tail as a [`Duration`].
    pub fn echo_tail(&self) -> Duration {
        Duration::from_millis(u64::from(self.echo_tail_ms))
    }
}

impl VadConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| VadError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| VadError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/voxgate/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("voxgate").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("voxgate")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/voxgate-config/config.toml")
        }
    }

    /// Duration of one analysis frame at the configured rate.
    pub fn frame_duration(&self) -> Duration {
        if self.audio.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(
            self.audio.frame_size as u64 * 1_000_000_000 / u64::from(self.audio.sample_rate),
        )
    }

    /// Check that the configuration is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns [`VadError::Config`] describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        if self.audio.sample_rate == 0 || self.audio.frame_size == 0 {
            return Err(VadError::Config(
                "audio.sample_rate and audio.frame_size must be non-zero".into(),
            ));
        }
        if self.audio.channel_capacity == 0 {
            return Err(VadError::Config("audio.channel_capacity must be non-zero".into()));
        }
        if self.meter.history_len == 0 {
            return Err(VadError::Config("meter.history_len must be non-zero".into()));
        }
        if !(t.continue_multiplier > 0.0
            && t.start_multiplier > t.continue_multiplier
            && t.interrupt_multiplier > t.start_multiplier)
        {
            return Err(VadError::Config(format!(
                "multipliers must satisfy 0 < continue ({}) < start ({}) < interrupt ({})",
                t.continue_multiplier, t.start_multiplier, t.interrupt_multiplier
            )));
        }
        if !(t.absolute_min > 0.0 && t.absolute_min <= t.absolute_max) {
            return Err(VadError::Config(format!(
                "threshold bounds must satisfy 0 < absolute_min ({}) <= absolute_max ({})",
                t.absolute_min, t.absolute_max
            )));
        }
        let d = &self.detection;
        if d.min_speech_frames == 0 || d.guard_interval_ms == 0 {
            return Err(VadError::Config(
                "detection.min_speech_frames and detection.guard_interval_ms must be non-zero"
                    .into(),
            ));
        }
        if d.max_speech_duration_ms <= d.min_speech_duration_ms {
            return Err(VadError::Config(
                "detection.max_speech_duration_ms must exceed min_speech_duration_ms".into(),
            ));
        }
        let c = &self.calibration;
        if !(0.0..=1.0).contains(&c.noise_percentile) || !(0.0..=1.0).contains(&c.voice_percentile)
        {
            return Err(VadError::Config("calibration percentiles must be within [0, 1]".into()));
        }
        if c.auto_duration_ms == 0 || c.manual_duration_ms == 0 {
            return Err(VadError::Config("calibration durations must be non-zero".into()));
        }
        if !(c.default_noise_floor.is_finite() && c.default_noise_floor >= 0.0) {
            return Err(VadError::Config(
                "calibration.default_noise_floor must be finite and non-negative".into(),
            ));
        }
        let a = &self.adaptation;
        if !(a.rate > 0.0 && a.rate <= 1.0) {
            return Err(VadError::Config("adaptation.rate must be within (0, 1]".into()));
        }
        if self.interruption.confirm_frames == 0 {
            return Err(VadError::Config("interruption.confirm_frames must be non-zero".into()));
        }
        Ok(())
    }
}
