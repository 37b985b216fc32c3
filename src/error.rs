//! Error types shared by the recorder, player and stream collaborators.

use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JPEG decode error: {0}")]
    Jpeg(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Truncated payload: block needs {needed} bytes, {available} available")]
    TruncatedPayload { needed: u64, available: usize },

    #[error("Resolution mismatch: expected {expected:?}, got {actual:?}")]
    ResolutionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Invalid stream log: {0}")]
    InvalidLog(String),

    #[error("Encoder thread panicked")]
    EncoderPanicked,
}

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Codec-level failures that skip a single frame without ending the session
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            Error::Image(_) | Error::Jpeg(_) | Error::TruncatedPayload { .. }
        )
    }
}
