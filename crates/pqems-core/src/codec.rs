//! Strategy contracts for the compression and error-correction stages of the
//! file pipeline. Implementations are black boxes to the rest of the system.

use thiserror::Error;

/// Errors produced by a codec stage.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The codec does not implement the requested mode; callers may fall back.
    #[error("{codec} does not support this operation")]
    Unsupported { codec: &'static str },
    /// Input could not be decoded.
    #[error("{codec} rejected corrupt input: {reason}")]
    Corrupt { codec: &'static str, reason: String },
    /// Underlying stream failure.
    #[error("{codec} i/o failure: {reason}")]
    Io { codec: &'static str, reason: String },
}

/// Reversible compression of byte payloads.
pub trait Compressor: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// Redundant encoding able to repair limited corruption on decode.
pub trait ErrorCorrector: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}
