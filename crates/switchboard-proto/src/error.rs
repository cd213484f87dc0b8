//! Error types for the switchboard-proto crate.

use thiserror::Error;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Failed to encode a frame.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failed to decode a frame.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Binary frame was not valid UTF-8.
    #[error("binary frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Frame decoded but is missing something the protocol requires.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}
