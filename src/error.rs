//! Error types for the voxgate pipeline.

/// Top-level error type for voice activity detection and capture.
#[derive(Debug, thiserror::Error)]
pub enum VadError {
    /// Microphone access has not been granted by the operating system.
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// The underlying audio engine or device failed to start or prepare.
    #[error("audio engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The audio source reported an unusable stream format.
    #[error("invalid audio format: {sample_rate}Hz, {channels} channels")]
    InvalidAudioFormat {
        /// Reported sample rate in Hz.
        sample_rate: u32,
        /// Reported channel count.
        channels: u16,
    },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WAV encode/decode error.
    #[error("WAV error: {0}")]
    Wav(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

impl From<hound::Error> for VadError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => Self::Io(io),
            other => Self::Wav(other.to_string()),
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, VadError>;
