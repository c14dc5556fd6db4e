use std::sync::Arc;

use pqems_core::storage::{BackendKind, SecretStore, StorageError};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use zeroize::Zeroizing;

use crate::{
    error::KeyError,
    kem::{KemAlgorithm, KeyPair},
};

/// Record name of the stored public key.
pub const PUBLIC_KEY_NAME: &str = "kem_public_key";
/// Record name of the stored private key.
pub const PRIVATE_KEY_NAME: &str = "kem_private_key";

/// Owns the KEM key pair and bridges it to the secure storage backend.
///
/// Generation, lazy loading and deletion are serialized by a lock scoped to
/// this instance. The cached pair's private key is wiped when the manager is
/// dropped.
pub struct KeyLifecycleManager {
    store: Arc<dyn SecretStore>,
    algorithm: KemAlgorithm,
    current: Mutex<Option<KeyPair>>,
}

impl KeyLifecycleManager {
    pub fn new(store: Arc<dyn SecretStore>, algorithm: KemAlgorithm) -> Self {
        Self {
            store,
            algorithm,
            current: Mutex::new(None),
        }
    }

    pub fn algorithm(&self) -> KemAlgorithm {
        self.algorithm
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.store.kind()
    }

    /// Create a fresh key pair and persist both halves. If the private half
    /// cannot be stored, the public half is deleted again.
    #[instrument(skip_all, fields(backend = %self.store.kind(), algorithm = %self.algorithm))]
    pub async fn generate_and_store(&self) -> Result<KeyPair, KeyError> {
        let mut current = self.current.lock().await;
        let pair = self.persist_new().await?;
        *current = Some(pair.clone());
        Ok(pair)
    }

    /// Return the key pair, loading it from the backend or generating one
    /// when the backend holds none.
    #[instrument(skip_all, fields(backend = %self.store.kind()))]
    pub async fn ensure_keypair(&self) -> Result<KeyPair, KeyError> {
        let mut current = self.current.lock().await;
        if let Some(pair) = current.as_ref() {
            return Ok(pair.clone());
        }

        let public = optional(self.store.load(PUBLIC_KEY_NAME).await)?;
        let private = optional(self.store.load(PRIVATE_KEY_NAME).await)?;
        let pair = match (public, private) {
            (Some(public), Some(private)) => {
                debug!("loaded stored key pair");
                self.algorithm
                    .key_pair_from_parts(public, Zeroizing::new(private))?
            }
            (None, None) => self.persist_new().await?,
            (None, Some(_)) => {
                return Err(KeyError::IncompleteKeyPair {
                    missing: PUBLIC_KEY_NAME,
                })
            }
            (Some(_), None) => {
                return Err(KeyError::IncompleteKeyPair {
                    missing: PRIVATE_KEY_NAME,
                })
            }
        };
        *current = Some(pair.clone());
        Ok(pair)
    }

    /// Delete both stored halves and forget the cached pair. Halves that are
    /// already absent are skipped.
    #[instrument(skip_all, fields(backend = %self.store.kind()))]
    pub async fn delete_keys(&self) -> Result<(), KeyError> {
        let mut current = self.current.lock().await;
        current.take();
        for name in [PRIVATE_KEY_NAME, PUBLIC_KEY_NAME] {
            match self.store.delete(name).await {
                Ok(()) => info!(name, "deleted stored key"),
                Err(err) if err.is_not_found() => debug!(name, "key already absent"),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    pub async fn load_public(&self) -> Result<Vec<u8>, StorageError> {
        self.store.load(PUBLIC_KEY_NAME).await
    }

    pub async fn load_private(&self) -> Result<Zeroizing<Vec<u8>>, StorageError> {
        self.store.load(PRIVATE_KEY_NAME).await.map(Zeroizing::new)
    }

    /// Store an arbitrary named secret in the same backend.
    pub async fn store_key(&self, name: &str, payload: &[u8]) -> Result<(), StorageError> {
        self.store.store(name, payload).await
    }

    pub async fn load_key(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.store.load(name).await
    }

    async fn persist_new(&self) -> Result<KeyPair, KeyError> {
        let pair = self.algorithm.generate();

        self.store
            .store(PUBLIC_KEY_NAME, &pair.public_key)
            .await
            .map_err(|source| KeyError::KeyPersistenceFailed {
                name: PUBLIC_KEY_NAME,
                source,
            })?;

        if let Err(source) = self.store.store(PRIVATE_KEY_NAME, pair.private_key()).await {
            warn!(%source, "private key not persisted, rolling back public key");
            if let Err(rollback) = self.store.delete(PUBLIC_KEY_NAME).await {
                error!(%rollback, "public key rollback failed");
            }
            return Err(KeyError::KeyPersistenceFailed {
                name: PRIVATE_KEY_NAME,
                source,
            });
        }

        info!(algorithm = %self.algorithm, "generated and stored key pair");
        Ok(pair)
    }
}

fn optional(result: Result<Vec<u8>, StorageError>) -> Result<Option<Vec<u8>>, StorageError> {
    match result {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}
