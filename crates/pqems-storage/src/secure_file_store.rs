use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use pqems_core::storage::{BackendKind, SecretStore, StorageError, StoredKeyRecord};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::instrument;

use crate::key_provider::{KeyError, KeyMaterial, KeyProvider};

/// AES-GCM encrypted file-backed store implementing the `SecretStore` contract.
/// Records live under `<root>/<backend kind>/`, and the key-encryption key is
/// held by a `KeyProvider` (OS keyring or TPM in production).
pub struct EncryptedFileStore<P: KeyProvider> {
    root: PathBuf,
    kind: BackendKind,
    key_provider: P,
}

impl<P: KeyProvider> EncryptedFileStore<P> {
    pub fn new(root: impl Into<PathBuf>, kind: BackendKind, key_provider: P) -> Self {
        Self {
            root: root.into().join(kind.as_str()),
            kind,
            key_provider,
        }
    }

    /// Directory holding this backend's records.
    pub fn namespace(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(sanitize_name(name))
    }

    /// Cipher for records already on disk. A missing key means the anchor
    /// lost it and the records can no longer be opened.
    async fn existing_cipher(&self) -> Result<Aes256Gcm, StorageError> {
        match self.key_provider.get().await.map_err(key_provider_err)? {
            Some(material) => build_cipher(&material),
            None => Err(missing_key(self.kind)),
        }
    }

    /// Cipher for writing. A new key is only minted while the namespace is empty.
    async fn writable_cipher(&self) -> Result<Aes256Gcm, StorageError> {
        if let Some(material) = self.key_provider.get().await.map_err(key_provider_err)? {
            return build_cipher(&material);
        }
        if self.has_records()? {
            return Err(missing_key(self.kind));
        }
        let material = self
            .key_provider
            .get_or_create()
            .await
            .map_err(key_provider_err)?;
        build_cipher(&material)
    }

    fn has_records(&self) -> Result<bool, StorageError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(storage_err(err)),
        };
        for entry in entries {
            let entry = entry.map_err(storage_err)?;
            // Leftover temp files start with a dot; record names never do.
            let is_record = entry.file_type().map_err(storage_err)?.is_file()
                && !entry.file_name().to_string_lossy().starts_with('.');
            if is_record {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Decrypt the record stored under `name`.
    pub async fn load_record(&self, name: &str) -> Result<StoredKeyRecord, StorageError> {
        let blob = read_blob(&self.path_for(name), name)?;
        // A record written by another trust anchor is invisible here.
        if blob.backend != self.kind {
            return Err(StorageError::not_found(name));
        }

        let cipher = self.existing_cipher().await?;
        let nonce_bytes = URL_SAFE_NO_PAD
            .decode(blob.nonce)
            .map_err(|e| corrupt(name, format!("nonce decode failed: {e}")))?;
        if nonce_bytes.len() != 12 {
            return Err(corrupt(name, "bad nonce length".to_string()));
        }
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = URL_SAFE_NO_PAD
            .decode(blob.ciphertext)
            .map_err(|e| corrupt(name, format!("ciphertext decode failed: {e}")))?;

        let aad = associated_data(self.kind, name);
        let payload = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| corrupt(name, "record failed authentication".to_string()))?;

        Ok(StoredKeyRecord {
            name: name.to_string(),
            payload,
            backend_kind: self.kind,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredBlob {
    backend: BackendKind,
    nonce: String,
    ciphertext: String,
}

#[async_trait]
impl<P: KeyProvider> SecretStore for EncryptedFileStore<P> {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    #[instrument(skip_all, fields(name = %name, backend = %self.kind))]
    async fn store(&self, name: &str, payload: &[u8]) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).map_err(storage_err)?;

        let cipher = self.writable_cipher().await?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let aad = associated_data(self.kind, name);
        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: payload,
                    aad: &aad,
                },
            )
            .map_err(|e| StorageError::Storage {
                reason: format!("encrypt failed: {e}"),
            })?;

        let blob = StoredBlob {
            backend: self.kind,
            nonce: URL_SAFE_NO_PAD.encode(nonce.as_slice()),
            ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
        };

        write_blob(&self.path_for(name), &blob)
    }

    #[instrument(skip_all, fields(name = %name, backend = %self.kind))]
    async fn load(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.load_record(name).await.map(|record| record.payload)
    }

    #[instrument(skip_all, fields(name = %name, backend = %self.kind))]
    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(name)) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(name))
            }
            Err(err) => Err(storage_err(err)),
        }
    }
}

fn write_blob(path: &Path, blob: &StoredBlob) -> Result<(), StorageError> {
    let parent = path.parent().ok_or_else(|| StorageError::Storage {
        reason: "invalid storage path".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(storage_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    let json = serde_json::to_vec(blob).map_err(storage_err)?;
    tmp.write_all(&json).map_err(storage_err)?;
    tmp.as_file().sync_all().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

fn read_blob(path: &Path, name: &str) -> Result<StoredBlob, StorageError> {
    let mut file = File::open(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::not_found(name)
        } else {
            storage_err(err)
        }
    })?;

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(storage_err)?;
    serde_json::from_slice(&buf).map_err(|e| corrupt(name, e.to_string()))
}

fn build_cipher(material: &KeyMaterial) -> Result<Aes256Gcm, StorageError> {
    Aes256Gcm::new_from_slice(&material.bytes).map_err(|e| StorageError::Storage {
        reason: format!("cipher init failed: {e}"),
    })
}

fn associated_data(kind: BackendKind, name: &str) -> Vec<u8> {
    format!("pqems/{}/{}", kind.as_str(), name).into_bytes()
}

fn sanitize_name(name: &str) -> String {
    URL_SAFE_NO_PAD.encode(name)
}

fn key_provider_err(err: KeyError) -> StorageError {
    match err {
        KeyError::Unavailable(reason) => StorageError::BackendUnavailable { reason },
        other => StorageError::Storage {
            reason: format!("key provider: {other}"),
        },
    }
}

fn missing_key(kind: BackendKind) -> StorageError {
    StorageError::BackendUnavailable {
        reason: format!("key-encryption key for {kind} is missing"),
    }
}

fn corrupt(name: &str, reason: String) -> StorageError {
    StorageError::Storage {
        reason: format!("record {name} is corrupt: {reason}"),
    }
}

fn storage_err<E: ToString>(err: E) -> StorageError {
    StorageError::Storage {
        reason: err.to_string(),
    }
}
