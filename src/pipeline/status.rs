//! Lock-free status shared between the worker and UI readers.

use crate::vad::engine::VadEngine;
use crate::vad::state::PipelineState;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

/// Sentinel stored when no calibration is running.
const NO_PROGRESS: u32 = u32::MAX;

/// Latest engine status, written by the worker after every message.
///
/// Readers never block the worker; each field is individually consistent.
#[derive(Debug)]
pub struct PipelineStatus {
    state: AtomicU8,
    rms: AtomicU32,
    level: AtomicU32,
    progress: AtomicU32,
    noise_floor: AtomicU32,
    calibrated: AtomicBool,
    speaking: AtomicBool,
    dropped: Arc<AtomicU64>,
}

/// Point-in-time copy of [`PipelineStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Lifecycle state.
    pub state: PipelineState,
    /// RMS of the most recent frame.
    pub rms: f32,
    /// Smoothed level scaled into `[0, 1]` for meters.
    pub level: f32,
    /// Progress of the running calibration.
    pub calibration_progress: Option<f32>,
    /// Current noise floor estimate.
    pub noise_floor: f32,
    /// Whether any calibration has completed.
    pub is_calibrated: bool,
    /// Whether the assistant is reported as speaking.
    pub assistant_speaking: bool,
    /// Frames dropped because the worker fell behind.
    pub dropped_frames: u64,
}

impl PipelineStatus {
    /// Idle status with the given noise floor.
    pub fn new(noise_floor: f32) -> Self {
        Self {
            state: AtomicU8::new(PipelineState::Idle.code()),
            rms: AtomicU32::new(0),
            level: AtomicU32::new(0),
            progress: AtomicU32::new(NO_PROGRESS),
            noise_floor: AtomicU32::new(noise_floor.to_bits()),
            calibrated: AtomicBool::new(false),
            speaking: AtomicBool::new(false),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter shared with the frame sink.
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    /// Copy the engine's observable state.
    pub fn publish(&self, engine: &VadEngine, now: Instant) {
        let reading = engine.last_level();
        let profile = engine.profile();
        self.state.store(engine.state().code(), Ordering::Relaxed);
        self.rms.store(reading.rms.to_bits(), Ordering::Relaxed);
        self.level.store(reading.normalized.to_bits(), Ordering::Relaxed);
        self.progress.store(
            engine
                .calibration_progress(now)
                .map_or(NO_PROGRESS, f32::to_bits),
            Ordering::Relaxed,
        );
        self.noise_floor
            .store(profile.noise_floor.to_bits(), Ordering::Relaxed);
        self.calibrated.store(profile.is_calibrated, Ordering::Relaxed);
        self.speaking
            .store(engine.is_assistant_speaking(), Ordering::Relaxed);
    }

    /// Return to idle, keeping the noise floor and drop counter.
    pub fn reset(&self) {
        self.state
            .store(PipelineState::Idle.code(), Ordering::Relaxed);
        self.rms.store(0, Ordering::Relaxed);
        self.level.store(0, Ordering::Relaxed);
        self.progress.store(NO_PROGRESS, Ordering::Relaxed);
        self.speaking.store(false, Ordering::Relaxed);
    }

    /// Read the current status.
    pub fn snapshot(&self) -> StatusSnapshot {
        let progress = self.progress.load(Ordering::Relaxed);
        StatusSnapshot {
            state: PipelineState::from_code(self.state.load(Ordering::Relaxed)),
            rms: f32::from_bits(self.rms.load(Ordering::Relaxed)),
            level: f32::from_bits(self.level.load(Ordering::Relaxed)),
            calibration_progress: (progress != NO_PROGRESS).then(|| f32::from_bits(progress)),
            noise_floor: f32::from_bits(self.noise_floor.load(Ordering::Relaxed)),
            is_calibrated: self.calibrated.load(Ordering::Relaxed),
            assistant_speaking: self.speaking.load(Ordering::Relaxed),
            dropped_frames: self.dropped.load(Ordering::Relaxed),
        }
    }
}
