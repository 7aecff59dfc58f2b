//! Audio frames and microphone capture via cpal.

pub mod capture;
pub mod frame;

pub use capture::{AudioSource, CpalSource, FrameSink, SourceFormat};
pub use frame::AudioFrame;
