//! Control surface and single-writer worker for the VAD pipeline.
//!
//! [`VadPipeline`] owns at most one recording session. A session is an
//! audio source feeding a bounded frame channel, plus one tokio task that
//! funnels frames, control commands and guard ticks into a [`VadEngine`]:
//!
//! ```text
//! AudioSource ──frames──┐
//! control calls ────────┼──▶ worker (VadEngine) ──events──▶ consumer
//! guard interval ───────┘          │
//!                                  └──▶ PipelineStatus (atomics)
//! ```

use crate::audio::capture::{AudioSource, FrameSink};
use crate::audio::frame::AudioFrame;
use crate::config::VadConfig;
use crate::error::{Result, VadError};
use crate::pipeline::messages::{ControlCommand, PipelineMessage, VadEvent};
use crate::pipeline::status::{PipelineStatus, StatusSnapshot};
use crate::vad::calibration::CalibrationProfile;
use crate::vad::engine::VadEngine;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One running recording.
struct Session {
    cancel: CancellationToken,
    /// Cleared on stop. The worker holds this lock while it publishes status
    /// and forwards events, so nothing from the session escapes once
    /// teardown has taken it.
    live: Arc<Mutex<bool>>,
    control_tx: mpsc::UnboundedSender<(ControlCommand, Instant)>,
    handle: JoinHandle<()>,
}

/// Real-time VAD pipeline over an [`AudioSource`].
///
/// Control methods never block on audio. Events arrive on the receiver
/// returned from [`VadPipeline::new`].
pub struct VadPipeline<S: AudioSource> {
    config: VadConfig,
    source: S,
    baseline: Option<CalibrationProfile>,
    status: Arc<PipelineStatus>,
    event_tx: mpsc::UnboundedSender<VadEvent>,
    session: Option<Session>,
}

impl<S: AudioSource> VadPipeline<S> {
    /// Create an idle pipeline.
    ///
    /// The event channel is unbounded and carries a
    /// [`VadEvent::AudioBuffer`] for every frame of active speech, so the
    /// receiver must be drained continuously while recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn new(
        config: VadConfig,
        source: S,
    ) -> Result<(Self, mpsc::UnboundedReceiver<VadEvent>)> {
        config.validate()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let status = Arc::new(PipelineStatus::new(config.calibration.default_noise_floor));
        let pipeline = Self {
            config,
            source,
            baseline: None,
            status,
            event_tx,
            session: None,
        };
        Ok((pipeline, event_rx))
    }

    /// Start every recording from `profile` instead of the configured defaults.
    #[must_use]
    pub fn with_baseline_profile(mut self, profile: CalibrationProfile) -> Self {
        self.baseline = Some(profile);
        self
    }

    /// Start capturing and detecting speech.
    ///
    /// Recording begins with a short automatic calibration. Calling this
    /// while already recording does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`VadError::PermissionDenied`], [`VadError::EngineUnavailable`]
    /// or [`VadError::InvalidAudioFormat`] when capture cannot start. The
    /// pipeline stays idle and the call can be retried.
    pub fn start_recording(&mut self) -> Result<()> {
        if self.is_recording() {
            debug!("already recording");
            return Ok(());
        }
        // A worker that exited on its own leaves a finished session behind.
        self.teardown();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| VadError::EngineUnavailable(format!("no tokio runtime: {e}")))?;

        let format = self.source.format()?.validate()?;
        debug!(
            "source format: {}Hz, {} channels",
            format.sample_rate, format.channels
        );

        let mut engine = VadEngine::new(&self.config)?;
        if let Some(profile) = self.baseline {
            engine = engine.with_baseline(profile);
        }

        let (frame_tx, frame_rx) = mpsc::channel(self.config.audio.channel_capacity);
        self.source
            .start(FrameSink::new(frame_tx, self.status.dropped_counter()))?;

        let now = clock_now();
        let mut initial = Vec::new();
        engine.start(now, &mut initial);
        self.status.publish(&engine, now);
        for event in initial {
            let _ = self.event_tx.send(event);
        }

        let cancel = CancellationToken::new();
        let live = Arc::new(Mutex::new(true));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            engine,
            frames: frame_rx,
            control: control_rx,
            events: self.event_tx.clone(),
            status: Arc::clone(&self.status),
            guard_interval: self.config.detection.guard_interval(),
            cancel: cancel.clone(),
            live: Arc::clone(&live),
        };
        let handle = runtime.spawn(worker.run());

        self.session = Some(Session {
            cancel,
            live,
            control_tx,
            handle,
        });
        info!("recording started");
        Ok(())
    }

    /// Stop capturing. An open segment is dropped without a speech-end.
    ///
    /// Returns once the audio source has stopped; no event is delivered
    /// for audio captured after this call.
    pub fn stop_recording(&mut self) {
        if self.session.is_none() {
            return;
        }
        self.teardown();
        info!("recording stopped");
    }

    /// Run a manual calibration, starting recording first if needed.
    ///
    /// # Errors
    ///
    /// Returns the [`start_recording`](Self::start_recording) error if
    /// recording had to be started and failed.
    pub fn start_manual_calibration(&mut self) -> Result<()> {
        if !self.is_recording() {
            self.start_recording()?;
        }
        self.send_control(ControlCommand::StartManualCalibration)
    }

    /// Abandon a running calibration, keeping the previous profile.
    ///
    /// # Errors
    ///
    /// Returns [`VadError::Channel`] if the worker has stopped.
    pub fn cancel_calibration(&self) -> Result<()> {
        self.send_control(ControlCommand::CancelCalibration)
    }

    /// Report whether the assistant is playing synthesized speech.
    ///
    /// # Errors
    ///
    /// Returns [`VadError::Channel`] if the worker has stopped.
    pub fn set_speaking_mode(&self, speaking: bool) -> Result<()> {
        self.send_control(ControlCommand::SetSpeaking(speaking))
    }

    /// Forget the calibrated profile and the baseline.
    ///
    /// While recording, an automatic calibration runs immediately.
    ///
    /// # Errors
    ///
    /// Returns [`VadError::Channel`] if the worker has stopped.
    pub fn reset_calibration(&mut self) -> Result<()> {
        self.baseline = None;
        self.send_control(ControlCommand::ResetCalibration)
    }

    /// Latest published status.
    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Shared status handle for readers on other threads.
    pub fn status_handle(&self) -> Arc<PipelineStatus> {
        Arc::clone(&self.status)
    }

    /// Whether a recording session is running.
    pub fn is_recording(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    fn send_control(&self, command: ControlCommand) -> Result<()> {
        let Some(session) = self.session.as_ref() else {
            debug!(?command, "not recording, ignoring control command");
            return Ok(());
        };
        session
            .control_tx
            .send((command, clock_now()))
            .map_err(|_| VadError::Channel("VAD worker has stopped".into()))
    }

    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            *session.live.lock().unwrap_or_else(|e| e.into_inner()) = false;
            session.cancel.cancel();
            self.source.stop();
            drop(session.control_tx);
        }
        self.status.reset();
    }
}

impl<S: AudioSource> Drop for VadPipeline<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// The single writer: everything that mutates detection state runs here.
struct Worker {
    engine: VadEngine,
    frames: mpsc::Receiver<AudioFrame>,
    control: mpsc::UnboundedReceiver<(ControlCommand, Instant)>,
    events: mpsc::UnboundedSender<VadEvent>,
    status: Arc<PipelineStatus>,
    guard_interval: Duration,
    cancel: CancellationToken,
    live: Arc<Mutex<bool>>,
}

impl Worker {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.guard_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut out = Vec::new();

        loop {
            let message = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                command = self.control.recv() => match command {
                    Some((command, at)) => PipelineMessage::Control(command, at),
                    None => break,
                },
                frame = self.frames.recv() => match frame {
                    Some(frame) => PipelineMessage::Frame(frame),
                    None => {
                        warn!("audio source closed, stopping VAD worker");
                        break;
                    }
                },
                tick = ticker.tick() => PipelineMessage::GuardTick(tick.into_std()),
            };

            self.engine.handle(message, &mut out);
            let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
            if !*live {
                break;
            }
            self.status.publish(&self.engine, clock_now());
            for event in out.drain(..) {
                if self.events.send(event).is_err() {
                    debug!("event receiver dropped");
                }
            }
        }

        self.engine.stop();
        let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        if *live {
            self.status.reset();
        }
        debug!("VAD worker exited");
    }
}

/// Current time on tokio's clock, which tests can pause and advance.
fn clock_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn worker(
        live: bool,
    ) -> (
        Worker,
        mpsc::UnboundedSender<(ControlCommand, Instant)>,
        mpsc::UnboundedReceiver<VadEvent>,
        mpsc::Sender<AudioFrame>,
    ) {
        let config = VadConfig::default();
        let mut engine = VadEngine::new(&config).unwrap();
        engine.start(clock_now(), &mut Vec::new());
        let (frame_tx, frames) = mpsc::channel(8);
        let (control_tx, control) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            engine,
            frames,
            control,
            events,
            status: Arc::new(PipelineStatus::new(config.calibration.default_noise_floor)),
            guard_interval: config.detection.guard_interval(),
            cancel: CancellationToken::new(),
            live: Arc::new(Mutex::new(live)),
        };
        (worker, control_tx, event_rx, frame_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn live_worker_forwards_events() {
        let (worker, control_tx, mut events, _frames) = worker(true);
        control_tx
            .send((ControlCommand::StartManualCalibration, clock_now()))
            .unwrap();
        drop(control_tx);
        worker.run().await;
        assert!(matches!(
            events.try_recv(),
            Ok(VadEvent::StateChanged { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_session_forwards_nothing_before_cancellation_is_seen() {
        let (worker, control_tx, mut events, _frames) = worker(false);
        let status = Arc::clone(&worker.status);
        control_tx
            .send((ControlCommand::StartManualCalibration, clock_now()))
            .unwrap();
        worker.run().await;
        assert!(events.try_recv().is_err());
        assert_eq!(status.snapshot().state, crate::vad::PipelineState::Idle);
    }
}
