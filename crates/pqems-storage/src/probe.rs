//! Capability detection and one-time backend selection.
//!
//! Probe order is fixed: a hardware trust anchor that answers a random-bytes
//! request wins; otherwise the host OS decides. The chosen backend is opened
//! once and shared for the rest of the process.

use std::{path::PathBuf, sync::Arc};

use pqems_core::storage::{BackendKind, SecretStore, StorageError};
use tracing::{debug, info};

use crate::{
    key_provider::KeyringProvider,
    secure_file_store::EncryptedFileStore,
    trust_anchor::{Tpm2Tools, TpmKeyProvider, TrustAnchor, DEFAULT_NV_INDEX},
};

const PROBE_BYTES: usize = 8;

/// Where and how backends keep their records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    /// Root directory for encrypted records; each backend gets a subdirectory.
    pub root: PathBuf,
    /// Keyring service name for OS-backed key-encryption keys.
    pub keyring_service: String,
    /// TPM NV index holding the hardware key-encryption key.
    pub tpm_nv_index: u32,
}

impl BackendSettings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            keyring_service: "pqems".to_string(),
            tpm_nv_index: DEFAULT_NV_INDEX,
        }
    }
}

/// The backend selected for this process.
#[derive(Clone)]
pub struct SecureBackend {
    kind: BackendKind,
    store: Arc<dyn SecretStore>,
}

impl SecureBackend {
    /// Wrap an already opened store, e.g. a test double.
    pub fn from_store(store: Arc<dyn SecretStore>) -> Self {
        Self {
            kind: store.kind(),
            store,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn store(&self) -> Arc<dyn SecretStore> {
        Arc::clone(&self.store)
    }
}

impl std::fmt::Debug for SecureBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureBackend")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Pick a backend kind: hardware anchor first, then by operating system name
/// (as reported by `std::env::consts::OS`).
pub fn probe_backend(anchor: &dyn TrustAnchor, os: &str) -> Result<BackendKind, StorageError> {
    match anchor.random_bytes(PROBE_BYTES) {
        Ok(bytes) if bytes.len() == PROBE_BYTES => {
            info!(anchor = anchor.name(), "hardware trust anchor detected");
            return Ok(BackendKind::Hardware);
        }
        Ok(bytes) => debug!(
            anchor = anchor.name(),
            len = bytes.len(),
            "short read from trust anchor"
        ),
        Err(err) => debug!(anchor = anchor.name(), %err, "no hardware trust anchor"),
    }

    let kind = kind_for_os(os)?;
    info!(os, backend = %kind, "selected OS secure storage");
    Ok(kind)
}

/// Map an operating system name to its native secret storage.
pub fn kind_for_os(os: &str) -> Result<BackendKind, StorageError> {
    match os {
        "windows" => Ok(BackendKind::OsCredentialApi),
        "linux" | "freebsd" | "openbsd" => Ok(BackendKind::OsSecretService),
        "macos" | "ios" => Ok(BackendKind::OsVault),
        other => Err(StorageError::UnsupportedPlatform {
            os: other.to_string(),
        }),
    }
}

/// Open the store for an already chosen backend kind.
pub fn open_backend(kind: BackendKind, settings: &BackendSettings) -> SecureBackend {
    let store: Arc<dyn SecretStore> = match kind {
        BackendKind::Hardware => Arc::new(EncryptedFileStore::new(
            settings.root.clone(),
            kind,
            TpmKeyProvider::new(Tpm2Tools::new(settings.tpm_nv_index)),
        )),
        BackendKind::OsCredentialApi | BackendKind::OsSecretService | BackendKind::OsVault => {
            Arc::new(EncryptedFileStore::new(
                settings.root.clone(),
                kind,
                KeyringProvider::new(settings.keyring_service.clone(), keyring_account(kind)),
            ))
        }
    };
    debug!(backend = %kind, root = ?settings.root, "secure backend opened");
    SecureBackend { kind, store }
}

/// Probe the running host and open the winning backend.
pub fn detect(settings: &BackendSettings) -> Result<SecureBackend, StorageError> {
    let anchor = Tpm2Tools::new(settings.tpm_nv_index);
    let kind = probe_backend(&anchor, std::env::consts::OS)?;
    Ok(open_backend(kind, settings))
}

fn keyring_account(kind: BackendKind) -> String {
    format!("kek-{}", kind.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust_anchor::tests::FakeAnchor;

    #[test]
    fn responsive_anchor_selects_hardware() {
        let kind = probe_backend(&FakeAnchor::default(), "plan9").expect("probe");
        assert_eq!(kind, BackendKind::Hardware);
    }

    #[test]
    fn falls_back_to_os_when_anchor_is_absent() {
        let anchor = FakeAnchor::offline();
        assert_eq!(
            probe_backend(&anchor, "windows").expect("windows"),
            BackendKind::OsCredentialApi
        );
        assert_eq!(
            probe_backend(&anchor, "linux").expect("linux"),
            BackendKind::OsSecretService
        );
        assert_eq!(
            probe_backend(&anchor, "macos").expect("macos"),
            BackendKind::OsVault
        );
    }

    #[test]
    fn unknown_platform_is_unsupported() {
        let err = probe_backend(&FakeAnchor::offline(), "plan9").expect_err("unsupported");
        assert_eq!(
            err,
            StorageError::UnsupportedPlatform {
                os: "plan9".to_string()
            }
        );
    }

    #[test]
    fn opened_backend_reports_its_kind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = BackendSettings::new(dir.path());
        for kind in BackendKind::ALL {
            let backend = open_backend(kind, &settings);
            assert_eq!(backend.kind(), kind);
            assert_eq!(backend.store().kind(), kind);
        }
    }

    #[test]
    fn wrapped_store_keeps_its_kind() {
        let store = pqems_core::storage::InMemorySecretStore::new(BackendKind::OsVault);
        let backend = SecureBackend::from_store(Arc::new(store));
        assert_eq!(backend.kind(), BackendKind::OsVault);
    }
}
