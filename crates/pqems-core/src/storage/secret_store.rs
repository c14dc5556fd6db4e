use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Trust anchor family a record was stored through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Hardware security module (TPM 2.0 NV storage).
    Hardware,
    /// Windows credential protection (Credential Manager).
    OsCredentialApi,
    /// Linux/BSD kernel keyring or Secret Service.
    OsSecretService,
    /// Apple Keychain.
    OsVault,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Hardware,
        BackendKind::OsCredentialApi,
        BackendKind::OsSecretService,
        BackendKind::OsVault,
    ];

    /// Stable identifier used for namespaces and keyring accounts.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Hardware => "hardware",
            BackendKind::OsCredentialApi => "os_credential_api",
            BackendKind::OsSecretService => "os_secret_service",
            BackendKind::OsVault => "os_vault",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named blob as held by one backend.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredKeyRecord {
    pub name: String,
    pub payload: Vec<u8>,
    pub backend_kind: BackendKind,
}

impl fmt::Debug for StoredKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Payloads are key material; only their size is printable.
        f.debug_struct("StoredKeyRecord")
            .field("name", &self.name)
            .field("payload_len", &self.payload.len())
            .field("backend_kind", &self.backend_kind)
            .finish()
    }
}

/// Errors produced by secret storage implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    /// No backend can serve this host. Fatal.
    #[error("no secure storage backend available for platform: {os}")]
    UnsupportedPlatform { os: String },
    /// Trust anchor or OS service could not be reached. Safe to retry.
    #[error("storage backend unavailable: {reason}")]
    BackendUnavailable { reason: String },
    /// Requested record does not exist in this backend.
    #[error("key not found: {name}")]
    KeyNotFound { name: String },
    /// Underlying storage failure (I/O, corrupt record).
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

impl StorageError {
    pub fn not_found(name: impl Into<String>) -> Self {
        StorageError::KeyNotFound { name: name.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::KeyNotFound { .. })
    }
}

/// Durable, confidentiality-preserving storage of opaque blobs keyed by name.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Trust anchor family backing this store; fixed for its lifetime.
    fn kind(&self) -> BackendKind;

    /// Persist a payload under a name, atomically replacing any existing record.
    async fn store(&self, name: &str, payload: &[u8]) -> Result<(), StorageError>;

    /// Retrieve the payload stored under a name.
    async fn load(&self, name: &str) -> Result<Vec<u8>, StorageError>;

    /// Remove a record. Fails with `KeyNotFound` when absent.
    async fn delete(&self, name: &str) -> Result<(), StorageError>;
}

/// In-memory secret store standing in for a backend of a given kind in tests
/// and smoke runs. Payloads are masked, not encrypted.
#[derive(Debug, Clone)]
pub struct InMemorySecretStore {
    kind: BackendKind,
    inner: Arc<Mutex<HashMap<String, StoredKeyRecord>>>,
}

impl InMemorySecretStore {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of records currently held.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredKeyRecord>>, StorageError> {
        self.inner.lock().map_err(|err| StorageError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

impl Default for InMemorySecretStore {
    fn default() -> Self {
        Self::new(BackendKind::OsSecretService)
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn store(&self, name: &str, payload: &[u8]) -> Result<(), StorageError> {
        let record = StoredKeyRecord {
            name: name.to_string(),
            payload: mask(payload),
            backend_kind: self.kind,
        };
        self.lock()?.insert(name.to_string(), record);
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let map = self.lock()?;
        map.get(name)
            .map(|record| unmask(&record.payload))
            .ok_or_else(|| StorageError::not_found(name))
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        self.lock()?
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(name))
    }
}

const MASK_BYTE: u8 = 0xA5;

fn mask(input: &[u8]) -> Vec<u8> {
    input.iter().map(|b| b ^ MASK_BYTE).collect()
}

fn unmask(input: &[u8]) -> Vec<u8> {
    mask(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_masks_and_unmasks() {
        let store = InMemorySecretStore::new(BackendKind::OsVault);
        let secret = b"kem-private-bytes";

        store.store("kem_private_key", secret).await.expect("store");
        let loaded = store.load("kem_private_key").await.expect("load");
        assert_eq!(loaded, secret);

        let inner = store.inner.lock().expect("lock");
        let held = inner.get("kem_private_key").expect("record");
        assert_ne!(held.payload, secret.to_vec());
        assert_eq!(held.backend_kind, BackendKind::OsVault);
    }

    #[tokio::test]
    async fn store_overwrites_existing_record() {
        let store = InMemorySecretStore::default();
        store.store("k", b"first").await.expect("store");
        store.store("k", b"second").await.expect("overwrite");

        assert_eq!(store.load("k").await.expect("load"), b"second");
        assert_eq!(store.len().expect("len"), 1);
    }

    #[tokio::test]
    async fn missing_records_report_key_not_found() {
        let store = InMemorySecretStore::default();
        let err = store.load("never-stored").await.expect_err("missing");
        assert_eq!(err, StorageError::not_found("never-stored"));

        store.store("k", b"v").await.expect("store");
        store.delete("k").await.expect("delete");
        let err = store.delete("k").await.expect_err("second delete");
        assert!(err.is_not_found());
        assert!(store.is_empty().expect("is_empty"));
    }

    #[test]
    fn backend_kind_display_matches_identifier() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.to_string(), kind.as_str());
        }
        assert_eq!(BackendKind::OsCredentialApi.as_str(), "os_credential_api");
    }
}
