//! Microphone audio capture using cpal.
//!
//! Captures audio at the device's native sample rate and channel count,
//! mixes down to mono, downsamples to the configured rate and cuts the
//! stream into fixed-size [`AudioFrame`]s for the VAD worker.

use crate::audio::frame::AudioFrame;
use crate::config::AudioConfig;
use crate::error::{Result, VadError};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Native format reported by an audio source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    /// Native sample rate in Hz.
    pub sample_rate: u32,
    /// Native channel count.
    pub channels: u16,
}

impl SourceFormat {
    /// Reject formats no frame can be built from.
    ///
    /// # Errors
    ///
    /// Returns [`VadError::InvalidAudioFormat`] on a zero rate or channel count.
    pub fn validate(self) -> Result<Self> {
        if self.sample_rate == 0 || self.channels == 0 {
            return Err(VadError::InvalidAudioFormat {
                sample_rate: self.sample_rate,
                channels: self.channels,
            });
        }
        Ok(self)
    }
}

/// Non-blocking handle through which a source delivers frames.
///
/// Sending never blocks the audio thread: when the worker falls behind,
/// frames are dropped and counted.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<AudioFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameSink {
    /// Wrap a bounded frame channel, counting drops into `dropped`.
    pub fn new(tx: mpsc::Sender<AudioFrame>, dropped: Arc<AtomicU64>) -> Self {
        Self { tx, dropped }
    }

    /// Deliver one frame. Returns `false` once the receiver is gone.
    pub fn send(&self, frame: AudioFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("frame channel full, dropping frame");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Whether the receiving worker has shut down.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Something that produces audio frames.
///
/// `start` must report failure synchronously: a permission or device
/// problem is returned from `start`, never discovered later by the worker.
pub trait AudioSource: Send + 'static {
    /// Native format of the underlying device.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be queried.
    fn format(&self) -> Result<SourceFormat>;

    /// Begin delivering frames into `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`VadError::PermissionDenied`] if microphone access is
    /// refused, or [`VadError::EngineUnavailable`] if capture cannot start.
    fn start(&mut self, sink: FrameSink) -> Result<()>;

    /// Stop delivering frames. Returns once no further frame will be sent.
    fn stop(&mut self);
}

/// Audio capture from the system microphone via cpal.
///
/// cpal streams are not `Send`, so each capture runs on a dedicated thread
/// that owns the stream until [`AudioSource::stop`].
pub struct CpalSource {
    config: AudioConfig,
    worker: Option<CaptureThread>,
}

struct CaptureThread {
    stop_tx: crossbeam_channel::Sender<()>,
    handle: JoinHandle<()>,
}

impl CpalSource {
    /// Create a source for the configured (or default) input device.
    ///
    /// The device is opened lazily on [`AudioSource::start`].
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            config: config.clone(),
            worker: None,
        }
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| backend_error("cannot enumerate devices", e))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

impl AudioSource for CpalSource {
    fn format(&self) -> Result<SourceFormat> {
        let device = select_device(&self.config)?;
        let default_config = device
            .default_input_config()
            .map_err(|e| backend_error("no default input config", e))?;
        Ok(SourceFormat {
            sample_rate: default_config.sample_rate(),
            channels: default_config.channels(),
        })
    }

    fn start(&mut self, sink: FrameSink) -> Result<()> {
        if self.worker.is_some() {
            warn!("capture already running");
            return Ok(());
        }

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let config = self.config.clone();

        let handle = std::thread::Builder::new()
            .name("voxgate-capture".into())
            .spawn(move || {
                let stream = match open_stream(&config, sink) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Hold the stream alive until stopped or the source is dropped
                let _ = stop_rx.recv();
                drop(stream);
                info!("audio capture stopped");
            })
            .map_err(|e| VadError::EngineUnavailable(format!("cannot spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(CaptureThread { stop_tx, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(VadError::EngineUnavailable(
                    "capture thread exited during start".into(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if worker.handle.join().is_err() {
                error!("capture thread panicked");
            }
        }
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn select_device(config: &AudioConfig) -> Result<cpal::Device> {
    let host = cpal::default_host();
    if let Some(ref name) = config.input_device {
        host.input_devices()
            .map_err(|e| backend_error("cannot enumerate devices", e))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| VadError::EngineUnavailable(format!("input device '{name}' not found")))
    } else {
        host.default_input_device()
            .ok_or_else(|| VadError::EngineUnavailable("no default input device".into()))
    }
}

fn open_stream(config: &AudioConfig, sink: FrameSink) -> Result<cpal::Stream> {
    let device = select_device(config)?;
    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using input device: {device_name}");

    let default_config = device
        .default_input_config()
        .map_err(|e| backend_error("no default input config", e))?;
    let format = SourceFormat {
        sample_rate: default_config.sample_rate(),
        channels: default_config.channels(),
    }
    .validate()?;

    let stream_config = StreamConfig {
        channels: format.channels,
        sample_rate: format.sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };
    info!(
        "native input config: {}Hz, {} channels",
        format.sample_rate, format.channels
    );

    let target_rate = config.sample_rate;
    let mut assembler = FrameAssembler::new(config.frame_size, target_rate);
    let mut receiver_gone = false;

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let now = Instant::now();
                let mono = if format.channels > 1 {
                    to_mono(data, format.channels)
                } else {
                    data.to_vec()
                };
                let samples = downsample(&mono, format.sample_rate, target_rate);
                assembler.push(&samples, now, |frame| {
                    if !sink.send(frame) && !receiver_gone {
                        receiver_gone = true;
                        warn!("frame receiver closed, discarding captured audio");
                    }
                });
            },
            move |err| {
                error!("audio input stream error: {err}");
            },
            None,
        )
        .map_err(|e| backend_error("failed to build input stream", e))?;

    stream
        .play()
        .map_err(|e| backend_error("failed to start input stream", e))?;

    info!(
        "audio capture started: native {}Hz -> target {}Hz",
        format.sample_rate, target_rate
    );
    Ok(stream)
}

/// Map a cpal backend failure onto the public error kinds.
///
/// Backends report missing microphone permission only through their
/// message text.
fn backend_error(context: &str, err: impl std::fmt::Display) -> VadError {
    let message = format!("{context}: {err}");
    let lower = message.to_lowercase();
    if ["permission", "denied", "not authorized"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        VadError::PermissionDenied(message)
    } else {
        VadError::EngineUnavailable(message)
    }
}

/// Cuts a continuous sample stream into frames of a fixed size.
struct FrameAssembler {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameAssembler {
    fn new(frame_size: usize, sample_rate: u32) -> Self {
        Self {
            frame_size: frame_size.max(1),
            sample_rate,
            pending: Vec::with_capacity(frame_size.max(1) * 2),
        }
    }

    /// Append samples that ended at `at`, emitting every complete frame.
    ///
    /// Each frame is stamped with the time its last sample was captured.
    fn push(&mut self, samples: &[f32], at: Instant, mut emit: impl FnMut(AudioFrame)) {
        self.pending.extend_from_slice(samples);
        let mut offset = 0;
        while self.pending.len() - offset >= self.frame_size {
            let end = offset + self.frame_size;
            let trailing = self.samples_to_duration(self.pending.len() - end);
            let stamp = at.checked_sub(trailing).unwrap_or(at);
            emit(AudioFrame::new(
                self.pending[offset..end].to_vec(),
                self.sample_rate,
                stamp,
            ));
            offset = end;
        }
        self.pending.drain(..offset);
    }

    fn samples_to_duration(&self, samples: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(samples as u64 * 1_000_000_000 / u64::from(self.sample_rate))
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation resampler from `src_rate` to `dst_rate`.
///
/// Speech energy sits below 8kHz, so no anti-alias filter is applied.
fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() || dst_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            f64::from(samples[idx]) * (1.0 - frac) + f64::from(samples[idx + 1]) * frac
        } else {
            f64::from(samples[idx.min(samples.len() - 1)])
        };

        output.push(sample as f32);
    }

    output
}
