//! Error types for frame decoding.

use thiserror::Error;

/// Errors that can occur when decoding a raw telemetry frame.
///
/// A decoding failure costs exactly one frame: the caller logs it,
/// drops it, and keeps processing subsequent frames.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The frame is not valid UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Result type alias for decode operations.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
