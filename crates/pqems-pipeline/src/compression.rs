use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use pqems_core::codec::{CodecError, Compressor};
use tracing::warn;

/// Deterministic zlib codec; the baseline every other compressor falls back to.
#[derive(Debug, Clone, Copy)]
pub struct ZlibCompressor {
    level: Compression,
}

impl ZlibCompressor {
    /// Level 0 (store) through 9 (best).
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Compressor for ZlibCompressor {
    fn name(&self) -> &'static str {
        "zlib"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
        encoder.write_all(data).map_err(io_err)?;
        encoder.finish().map_err(io_err)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Corrupt {
                codec: "zlib",
                reason: e.to_string(),
            })?;
        Ok(out)
    }
}

/// Tries `primary` first and switches to zlib whenever it reports
/// [`CodecError::Unsupported`]. Other errors propagate.
pub struct FallbackCompressor<P: Compressor> {
    primary: P,
    baseline: ZlibCompressor,
}

impl<P: Compressor> FallbackCompressor<P> {
    pub fn new(primary: P) -> Self {
        Self {
            primary,
            baseline: ZlibCompressor::default(),
        }
    }
}

impl<P: Compressor> Compressor for FallbackCompressor<P> {
    fn name(&self) -> &'static str {
        self.primary.name()
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self.primary.compress(data) {
            Err(CodecError::Unsupported { codec }) => {
                warn!(codec, fallback = self.baseline.name(), "compressor unsupported, falling back");
                self.baseline.compress(data)
            }
            other => other,
        }
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self.primary.decompress(data) {
            Err(CodecError::Unsupported { codec }) => {
                warn!(codec, fallback = self.baseline.name(), "decompressor unsupported, falling back");
                self.baseline.decompress(data)
            }
            other => other,
        }
    }
}

fn io_err(err: std::io::Error) -> CodecError {
    CodecError::Io {
        codec: "zlib",
        reason: err.to_string(),
    }
}
