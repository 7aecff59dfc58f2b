//! Offline analysis of recorded audio.
//!
//! Runs the same [`VadEngine`] as the live pipeline over a sample buffer,
//! with timestamps derived from sample positions instead of a wall clock,
//! so results are reproducible.

use crate::audio::frame::AudioFrame;
use crate::config::VadConfig;
use crate::error::{Result, VadError};
use crate::pipeline::messages::{SpeechSegment, VadEvent};
use crate::vad::engine::VadEngine;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

/// Detect speech in mono `samples` recorded at `sample_rate`.
///
/// Frames use the configured `frame_size`; guard ticks fire every
/// `guard_interval_ms` of audio time. After the last frame a final tick one
/// silence timeout later closes any segment still open.
///
/// # Errors
///
/// Returns [`VadError::InvalidAudioFormat`] for a zero sample rate, or a
/// config error if `config` is invalid.
pub fn analyze_samples(
    samples: &[f32],
    sample_rate: u32,
    config: &VadConfig,
) -> Result<Vec<VadEvent>> {
    if sample_rate == 0 {
        return Err(VadError::InvalidAudioFormat {
            sample_rate,
            channels: 1,
        });
    }
    let mut config = config.clone();
    config.audio.sample_rate = sample_rate;
    let mut engine = VadEngine::new(&config)?;

    let origin = Instant::now();
    let position = |offset: usize| {
        origin + Duration::from_nanos(offset as u64 * 1_000_000_000 / u64::from(sample_rate))
    };
    let guard_interval = config.detection.guard_interval();

    let mut events = Vec::new();
    engine.start(origin, &mut events);

    let mut next_tick = origin + guard_interval;
    let mut offset = 0;
    for chunk in samples.chunks(config.audio.frame_size) {
        let captured_at = position(offset);
        engine.process_frame(AudioFrame::new(chunk, sample_rate, captured_at), &mut events);
        offset += chunk.len();
        let frame_end = position(offset);
        while next_tick <= frame_end {
            engine.tick(next_tick, &mut events);
            next_tick += guard_interval;
        }
    }
    engine.tick(
        position(offset) + config.detection.silence_timeout(),
        &mut events,
    );

    let segments = events
        .iter()
        .filter(|e| matches!(e, VadEvent::SpeechEnd(_)))
        .count();
    info!(
        samples = samples.len(),
        segments,
        noise_floor = engine.profile().noise_floor,
        "offline analysis complete"
    );
    Ok(events)
}

/// Load a WAV file as mono f32 samples, returning them with the sample rate.
///
/// Multi-channel files are mixed down by averaging; integer samples are
/// scaled into `[-1, 1]`.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or decoded.
pub fn read_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(VadError::InvalidAudioFormat {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        });
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<std::result::Result<Vec<f32>, hound::Error>>()?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, hound::Error>>()?,
    };

    let mono = if spec.channels > 1 {
        let ch = spec.channels as usize;
        samples
            .chunks(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect()
    } else {
        samples
    };
    Ok((mono, spec.sample_rate))
}

/// Write a segment as 16-bit mono PCM.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_wav(path: &Path, segment: &SpeechSegment) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: segment.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for frame in &segment.frames {
        for &s in frame.samples() {
            let v = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
            writer.write_sample(v)?;
        }
    }
    writer.finalize()?;
    Ok(())
}
