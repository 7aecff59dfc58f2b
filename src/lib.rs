//! voxgate: adaptive voice activity detection and speech segmentation.
//!
//! Sits between a microphone and downstream speech recognition, turning a
//! continuous frame stream into complete utterances:
//! Microphone → Level Meter → Detector → Segments → STT
//!
//! # Architecture
//!
//! - **Audio capture**: Records from the microphone via `cpal`
//! - **Calibration**: Estimates the ambient noise floor at startup and on demand
//! - **Detection**: Threshold hysteresis with frame debounce, relative to the floor
//! - **Guard**: Ends utterances on silence timeout or a hard duration cap
//! - **Interruption**: Detects the user talking over assistant playback
//! - **Pipeline**: A single worker task owns all state; control calls and
//!   guard ticks reach it as messages
//!
//! ```no_run
//! use voxgate::{CpalSource, VadConfig, VadEvent, VadPipeline};
//!
//! # async fn demo() -> voxgate::Result<()> {
//! let config = VadConfig::default();
//! let source = CpalSource::new(&config.audio);
//! let (mut pipeline, mut events) = VadPipeline::new(config, source)?;
//! pipeline.start_recording()?;
//! while let Some(event) = events.recv().await {
//!     if let VadEvent::SpeechEnd(segment) = event {
//!         println!("utterance of {:?}", segment.duration());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod offline;
pub mod pipeline;
pub mod vad;

pub use audio::{AudioFrame, AudioSource, CpalSource, FrameSink, SourceFormat};
pub use config::VadConfig;
pub use error::{Result, VadError};
pub use pipeline::{EventRecord, SpeechSegment, StatusSnapshot, VadEvent, VadPipeline};
pub use vad::{CalibrationMode, CalibrationProfile, PipelineState, VadEngine};
