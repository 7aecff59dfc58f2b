//! Fixed-size PCM frames handed from the audio source to the pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// One frame of mono f32 audio.
///
/// Samples are shared, so cloning a frame into the open segment and into an
/// `AudioBuffer` event does not copy audio.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    samples: Arc<[f32]>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Timestamp when this frame was captured.
    pub captured_at: Instant,
}

impl AudioFrame {
    /// Wrap mono samples captured at `captured_at`.
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32, captured_at: Instant) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            captured_at,
        }
    }

    /// Decode 16-bit little-endian mono PCM. A trailing odd byte is ignored.
    pub fn from_pcm16_le(bytes: &[u8], sample_rate: u32, captured_at: Instant) -> Self {
        let samples: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32_768.0)
            .collect();
        Self::new(samples, sample_rate, captured_at)
    }

    /// The frame's samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of samples in the frame.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration of the frame.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = self.samples.len() as u64 * 1_000_000_000 / u64::from(self.sample_rate);
        Duration::from_nanos(nanos)
    }
}
