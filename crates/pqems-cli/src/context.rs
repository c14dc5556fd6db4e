use std::sync::Arc;

use color_eyre::Result;
use pqems_crypto::{KemCipher, KeyLifecycleManager};
use pqems_pipeline::SecureFilePipeline;
use pqems_storage::probe::SecureBackend;

use crate::{config::Config, storage};

/// Handles shared by every command, built once per invocation.
pub struct AppContext {
    backend: SecureBackend,
    keys: Arc<KeyLifecycleManager>,
    pipeline: SecureFilePipeline,
}

impl AppContext {
    /// Open the configured backend (probing the host if needed).
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = storage::backend_from_config(config)?;
        Ok(Self::with_backend(config, backend))
    }

    pub fn with_backend(config: &Config, backend: SecureBackend) -> Self {
        let keys = Arc::new(KeyLifecycleManager::new(
            backend.store(),
            config.kem_algorithm,
        ));
        let pipeline = SecureFilePipeline::new(KemCipher::new(Arc::clone(&keys)));
        Self {
            backend,
            keys,
            pipeline,
        }
    }

    pub fn backend(&self) -> &SecureBackend {
        &self.backend
    }

    pub fn keys(&self) -> &KeyLifecycleManager {
        &self.keys
    }

    pub fn pipeline(&self) -> &SecureFilePipeline {
        &self.pipeline
    }
}
