//! Encrypted file pipeline: compress, add redundancy, encrypt, persist; and
//! the reverse on read. Compression and error correction are pluggable
//! strategies from `pqems_core::codec`; the classical implementations live
//! here.

pub mod compression;
pub mod error_correction;
pub mod pipeline;

pub use compression::{FallbackCompressor, ZlibCompressor};
pub use error_correction::TripleRedundancy;
pub use pipeline::{PipelineError, SecureFilePipeline};
