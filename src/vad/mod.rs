//! Adaptive voice activity detection.
//!
//! Detection runs on RMS loudness against thresholds derived from a
//! calibrated noise floor:
//!
//! - [`meter`] measures and smooths per-frame loudness.
//! - [`calibration`] estimates the noise floor from a short window.
//! - [`thresholds`] derives start, continue and interrupt levels.
//! - [`detector`] debounces speech onset with start/continue hysteresis.
//! - [`guard`] ends segments on silence timeout or maximum duration.
//! - [`interruption`] detects the user talking over the assistant.
//! - [`adaptive`] follows slow changes in ambient noise.
//! - [`engine`] composes all of the above behind one owner.

pub mod adaptive;
pub mod calibration;
pub mod detector;
pub mod engine;
pub mod guard;
pub mod interruption;
pub mod meter;
pub mod state;
pub mod thresholds;

pub use calibration::{CalibrationMode, CalibrationProfile};
pub use engine::VadEngine;
pub use meter::LevelReading;
pub use state::PipelineState;
pub use thresholds::ThresholdSet;
