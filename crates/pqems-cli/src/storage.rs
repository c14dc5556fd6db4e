use std::path::PathBuf;

use crate::config::Config;
use color_eyre::{eyre::eyre, Result};
use dirs::data_dir;
use pqems_core::storage::BackendKind;
use pqems_storage::{
    probe::{self, BackendSettings, SecureBackend},
    trust_anchor::Tpm2Tools,
};
use tracing::debug;

/// Resolve the default data directory for PQEMS.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| eyre!("no data dir available"))?;
    Ok(base.join("pqems"))
}

/// Backend settings with config overrides applied.
pub fn settings_from_config(config: &Config) -> Result<BackendSettings> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    Ok(BackendSettings {
        root,
        keyring_service: config.keyring_service.clone(),
        tpm_nv_index: config.tpm_nv_index,
    })
}

/// Which backend this host would use, and whether the config forced it.
pub fn resolve_kind(config: &Config) -> Result<(BackendKind, bool)> {
    if let Some(kind) = config.backend {
        return Ok((kind, true));
    }
    let anchor = Tpm2Tools::new(config.tpm_nv_index);
    let kind = probe::probe_backend(&anchor, std::env::consts::OS)
        .map_err(|e| eyre!(e.to_string()))?;
    Ok((kind, false))
}

/// Open the configured backend, probing the host unless one is forced.
pub fn backend_from_config(config: &Config) -> Result<SecureBackend> {
    let settings = settings_from_config(config)?;
    if let Some(kind) = config.backend {
        debug!(backend = %kind, root = ?settings.root, "opening forced backend");
        return Ok(probe::open_backend(kind, &settings));
    }
    probe::detect(&settings).map_err(|e| eyre!(e.to_string()))
}

/// Helper for tests: an encrypted file store under a temp dir with an in-memory key.
#[cfg(test)]
pub fn test_backend(root: impl Into<PathBuf>) -> SecureBackend {
    use std::sync::Arc;

    use pqems_storage::{
        key_provider::InMemoryKeyProvider, secure_file_store::EncryptedFileStore,
    };

    SecureBackend::from_store(Arc::new(EncryptedFileStore::new(
        root,
        BackendKind::OsSecretService,
        InMemoryKeyProvider::default(),
    )))
}
