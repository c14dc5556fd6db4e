use std::{
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_LEN: usize = 32;

/// Key-encryption key protecting records at rest.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    /// Identifier for logging/rotation (never log key bytes).
    #[zeroize(skip)]
    pub id: String,
    /// 256-bit symmetric key.
    pub bytes: [u8; KEY_LEN],
}

impl KeyMaterial {
    pub fn from_slice(id: impl Into<String>, bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != KEY_LEN {
            return Err(KeyError::Decode(format!(
                "expected {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; KEY_LEN];
        out.copy_from_slice(bytes);
        Ok(Self {
            id: id.into(),
            bytes: out,
        })
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    /// Trust anchor or keyring service cannot be reached.
    #[error("trust anchor unavailable: {0}")]
    Unavailable(String),
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
}

/// Provides the key-encryption key for a backend (OS keyring or TPM in
/// production; memory in tests).
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// The existing key, `None` when the anchor holds none.
    async fn get(&self) -> Result<Option<KeyMaterial>, KeyError>;

    /// The existing key, or a freshly generated one persisted in the anchor.
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError>;
}

/// OS keyring-backed provider: Windows Credential Manager, the Secret Service
/// on Linux and the BSDs, or the Apple Keychain, whichever `keyring` resolves
/// for the host.
pub struct KeyringProvider {
    service: String,
    account: String,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(service: &str, account: &str) -> Result<keyring::Entry, KeyError> {
        keyring::Entry::new(service, account).map_err(keyring_err)
    }
}

#[async_trait]
impl KeyProvider for KeyringProvider {
    async fn get(&self) -> Result<Option<KeyMaterial>, KeyError> {
        let (service, account) = (self.service.clone(), self.account.clone());
        run_blocking(move || {
            let entry = KeyringProvider::entry(&service, &account)?;
            match entry.get_password() {
                Ok(secret) => decode_key(&account, &secret).map(Some),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(err) => Err(keyring_err(err)),
            }
        })
        .await
    }

    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let (service, account) = (self.service.clone(), self.account.clone());
        run_blocking(move || {
            let entry = KeyringProvider::entry(&service, &account)?;
            match entry.get_password() {
                Ok(secret) => decode_key(&account, &secret),
                Err(keyring::Error::NoEntry) => {
                    debug!(account = %account, "creating key-encryption key in keyring");
                    let material = generate_key(&account);
                    entry
                        .set_password(&encode_key(&material))
                        .map_err(keyring_err)?;
                    Ok(material)
                }
                Err(err) => Err(keyring_err(err)),
            }
        })
        .await
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
}

impl InMemoryKeyProvider {
    fn guard(&self) -> Result<std::sync::MutexGuard<'_, Option<KeyMaterial>>, KeyError> {
        self.inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))
    }
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    async fn get(&self) -> Result<Option<KeyMaterial>, KeyError> {
        Ok(self.guard()?.clone())
    }

    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let mut guard = self.guard()?;
        if let Some(existing) = guard.clone() {
            return Ok(existing);
        }

        let material = generate_key("memory");
        *guard = Some(material.clone());
        Ok(material)
    }
}

/// Run synchronous anchor I/O (keyring, tpm2-tools) off the async workers.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, KeyError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, KeyError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| KeyError::Unavailable(format!("anchor task failed: {e}")))?
}

fn keyring_err(err: keyring::Error) -> KeyError {
    match err {
        keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
            KeyError::Unavailable(err.to_string())
        }
        other => KeyError::Keyring(other.to_string()),
    }
}

pub(crate) fn generate_key(id: &str) -> KeyMaterial {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    KeyMaterial {
        id: id.to_string(),
        bytes,
    }
}

fn encode_key(material: &KeyMaterial) -> String {
    general_purpose::STANDARD.encode(material.bytes)
}

fn decode_key(id: &str, secret: &str) -> Result<KeyMaterial, KeyError> {
    let mut bytes = general_purpose::STANDARD
        .decode(secret)
        .map_err(|e| KeyError::Decode(e.to_string()))?;
    let material = KeyMaterial::from_slice(id, &bytes);
    bytes.zeroize();
    material
}
