//! Error types for key management and payload encryption.

use pqems_core::storage::StorageError;
use thiserror::Error;

/// Malformed input to a KEM primitive.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KemError {
    #[error("invalid {algorithm} public key")]
    InvalidPublicKey { algorithm: &'static str },
    #[error("invalid {algorithm} private key")]
    InvalidPrivateKey { algorithm: &'static str },
    #[error("invalid {algorithm} ciphertext")]
    InvalidCiphertext { algorithm: &'static str },
}

/// Key lifecycle failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// Backend failure passed through unchanged (`KeyNotFound`, `BackendUnavailable`, ...).
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Persisting a freshly generated pair failed; any stored half was rolled back.
    #[error("failed to persist {name}: {source}")]
    KeyPersistenceFailed {
        name: &'static str,
        source: StorageError,
    },
    /// Only one half of the key pair exists in the backend.
    #[error("stored key pair is incomplete: {missing} is absent")]
    IncompleteKeyPair { missing: &'static str },
    #[error(transparent)]
    Kem(#[from] KemError),
}

/// Encrypt/decrypt failures.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("public key unavailable: {source}")]
    PublicKeyUnavailable { source: StorageError },
    #[error("private key unavailable: {source}")]
    PrivateKeyUnavailable { source: StorageError },
    /// Tampered envelope or wrong key. No plaintext is ever returned.
    #[error("envelope failed authentication")]
    AuthenticationFailed,
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    /// Message could not be normalized to or rebuilt from bytes.
    #[error("message encoding failed: {0}")]
    Encoding(String),
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error(transparent)]
    Key(#[from] KeyError),
}
