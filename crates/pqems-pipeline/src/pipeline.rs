use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use pqems_core::codec::{CodecError, Compressor, ErrorCorrector};
use pqems_crypto::{CipherError, KemCipher};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::task;
use tracing::{debug, info, instrument};

use crate::{compression::ZlibCompressor, error_correction::TripleRedundancy};

/// Failure of one pipeline stage. The remaining stages never ran.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("compressing {}: {source}", .path.display())]
    CompressionFailed { path: PathBuf, source: CodecError },
    #[error("adding error correction for {}: {source}", .path.display())]
    EncodingFailed { path: PathBuf, source: CodecError },
    #[error("encrypting {}: {source}", .path.display())]
    EncryptionFailed { path: PathBuf, source: CipherError },
    #[error("writing {}: {source}", .path.display())]
    PersistFailed { path: PathBuf, source: io::Error },
    #[error("reading {}: {source}", .path.display())]
    LoadFailed { path: PathBuf, source: io::Error },
    #[error("decrypting {}: {source}", .path.display())]
    DecryptionFailed { path: PathBuf, source: CipherError },
    #[error("correcting {}: {source}", .path.display())]
    DecodingFailed { path: PathBuf, source: CodecError },
    #[error("decompressing {}: {source}", .path.display())]
    DecompressionFailed { path: PathBuf, source: CodecError },
}

/// Writes data to disk compressed, error-protected and encrypted, and reads
/// it back. A failed write never leaves a partial file at the destination.
#[derive(Clone)]
pub struct SecureFilePipeline {
    cipher: KemCipher,
    compressor: Arc<dyn Compressor>,
    corrector: Arc<dyn ErrorCorrector>,
}

impl SecureFilePipeline {
    /// Pipeline with zlib compression and triple-redundancy coding.
    pub fn new(cipher: KemCipher) -> Self {
        Self::with_codecs(
            cipher,
            Arc::new(ZlibCompressor::default()),
            Arc::new(TripleRedundancy),
        )
    }

    pub fn with_codecs(
        cipher: KemCipher,
        compressor: Arc<dyn Compressor>,
        corrector: Arc<dyn ErrorCorrector>,
    ) -> Self {
        Self {
            cipher,
            compressor,
            corrector,
        }
    }

    pub fn cipher(&self) -> &KemCipher {
        &self.cipher
    }

    #[instrument(skip_all, fields(path = %path.display(), len = data.len()))]
    pub async fn write(&self, path: &Path, data: &[u8]) -> Result<(), PipelineError> {
        let compressor = Arc::clone(&self.compressor);
        let input = data.to_vec();
        let compressed = run_codec(compressor.name(), move || compressor.compress(&input))
            .await
            .map_err(|source| PipelineError::CompressionFailed {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(compressed = compressed.len(), "compressed");

        let corrector = Arc::clone(&self.corrector);
        let encoded = run_codec(corrector.name(), move || corrector.encode(&compressed))
            .await
            .map_err(|source| PipelineError::EncodingFailed {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(encoded = encoded.len(), "error correction added");

        let sealed = self
            .cipher
            .encrypt_bytes(&encoded)
            .await
            .map_err(|source| PipelineError::EncryptionFailed {
                path: path.to_path_buf(),
                source,
            })?;

        let target = path.to_path_buf();
        let written = sealed.len();
        run_io(move || persist_atomic(&target, &sealed))
            .await
            .map_err(|source| PipelineError::PersistFailed {
                path: path.to_path_buf(),
                source,
            })?;
        info!(written, "encrypted file written");
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, PipelineError> {
        let source_path = path.to_path_buf();
        let sealed = run_io(move || fs::read(&source_path))
            .await
            .map_err(|source| PipelineError::LoadFailed {
                path: path.to_path_buf(),
                source,
            })?;

        let encoded = self
            .cipher
            .decrypt_bytes(&sealed)
            .await
            .map_err(|source| PipelineError::DecryptionFailed {
                path: path.to_path_buf(),
                source,
            })?;

        let corrector = Arc::clone(&self.corrector);
        let compressed = run_codec(corrector.name(), move || corrector.decode(&encoded))
            .await
            .map_err(|source| PipelineError::DecodingFailed {
                path: path.to_path_buf(),
                source,
            })?;

        let compressor = Arc::clone(&self.compressor);
        let data = run_codec(compressor.name(), move || compressor.decompress(&compressed))
            .await
            .map_err(|source| PipelineError::DecompressionFailed {
                path: path.to_path_buf(),
                source,
            })?;
        info!(len = data.len(), "encrypted file read");
        Ok(data)
    }
}

async fn run_codec<F>(codec: &'static str, work: F) -> Result<Vec<u8>, CodecError>
where
    F: FnOnce() -> Result<Vec<u8>, CodecError> + Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|e| CodecError::Io {
            codec,
            reason: e.to_string(),
        })?
}

async fn run_io<T, F>(work: F) -> io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    task::spawn_blocking(work).await.map_err(io::Error::other)?
}

fn persist_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pqems_core::storage::InMemorySecretStore;
    use pqems_crypto::{KemAlgorithm, KeyLifecycleManager};
    use rand::RngCore;
    use tempfile::tempdir;

    use super::*;

    async fn pipeline() -> SecureFilePipeline {
        let keys = Arc::new(KeyLifecycleManager::new(
            Arc::new(InMemorySecretStore::default()),
            KemAlgorithm::Kyber1024,
        ));
        keys.generate_and_store().await.expect("generate");
        SecureFilePipeline::new(KemCipher::new(keys))
    }

    struct Broken;

    impl Compressor for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn compress(&self, _data: &[u8]) -> Result<Vec<u8>, CodecError> {
            Err(CodecError::Corrupt {
                codec: "broken",
                reason: "refuses to compress".into(),
            })
        }

        fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
            Ok(data.to_vec())
        }
    }

    #[tokio::test]
    async fn round_trips_empty_tiny_and_large_inputs() {
        let dir = tempdir().expect("tempdir");
        let pipeline = pipeline().await;

        let mut large = vec![0u8; 10 * 1024 * 1024];
        rand::thread_rng().fill_bytes(&mut large);

        for (name, data) in [("empty", Vec::new()), ("one", vec![0x42]), ("large", large)] {
            let path = dir.path().join(name);
            pipeline.write(&path, &data).await.expect("write");
            assert!(path.exists());
            assert_eq!(pipeline.read(&path).await.expect("read"), data, "{name}");
        }
    }

    #[tokio::test]
    async fn written_file_is_not_plaintext() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("secret.bin");
        let pipeline = pipeline().await;

        pipeline
            .write(&path, b"plain text that must not leak")
            .await
            .expect("write");
        let raw = fs::read(&path).expect("raw");
        assert!(raw.starts_with(b"PQEM"));
        assert!(!raw
            .windows(b"must not leak".len())
            .any(|w| w == b"must not leak"));
    }

    #[tokio::test]
    async fn creates_missing_parent_directories() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested/deeper/file.enc");
        let pipeline = pipeline().await;

        pipeline.write(&path, b"nested").await.expect("write");
        assert_eq!(pipeline.read(&path).await.expect("read"), b"nested");
    }

    #[tokio::test]
    async fn failed_encryption_leaves_no_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("never.enc");
        let keys = Arc::new(KeyLifecycleManager::new(
            Arc::new(InMemorySecretStore::default()),
            KemAlgorithm::Kyber512,
        ));
        let pipeline = SecureFilePipeline::new(KemCipher::new(keys));

        let err = pipeline.write(&path, b"data").await.expect_err("no keys");
        assert!(matches!(
            err,
            PipelineError::EncryptionFailed {
                source: CipherError::PublicKeyUnavailable { .. },
                ..
            }
        ));
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).expect("list").count(), 0);
    }

    #[tokio::test]
    async fn failed_compression_keeps_previous_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("kept.enc");
        let good = pipeline().await;
        good.write(&path, b"original").await.expect("write");

        let broken = SecureFilePipeline::with_codecs(
            good.cipher().clone(),
            Arc::new(Broken),
            Arc::new(TripleRedundancy),
        );
        let err = broken.write(&path, b"replacement").await.expect_err("broken");
        assert!(matches!(err, PipelineError::CompressionFailed { .. }));
        assert_eq!(good.read(&path).await.expect("read"), b"original");
    }

    #[tokio::test]
    async fn tampered_file_fails_decryption() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tampered.enc");
        let pipeline = pipeline().await;
        pipeline.write(&path, b"integrity matters").await.expect("write");

        let mut raw = fs::read(&path).expect("raw");
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        fs::write(&path, raw).expect("tamper");

        let err = pipeline.read(&path).await.expect_err("tampered");
        assert!(matches!(
            err,
            PipelineError::DecryptionFailed {
                source: CipherError::AuthenticationFailed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_file_is_a_load_failure() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("absent.enc");
        let err = pipeline().await.read(&path).await.expect_err("missing");
        assert!(matches!(err, PipelineError::LoadFailed { .. }));
        assert!(err.to_string().contains("absent.enc"));
    }
}
