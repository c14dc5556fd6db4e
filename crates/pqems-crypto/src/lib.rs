//! Post-quantum key lifecycle and payload encryption.
//!
//! A [`keys::KeyLifecycleManager`] owns the Kyber key pair and persists it
//! through a [`pqems_core::storage::SecretStore`]; a [`cipher::KemCipher`]
//! encapsulates a fresh shared secret per message and seals the payload with
//! AES-256-GCM inside a self-describing [`envelope::Envelope`].

pub mod cipher;
pub mod envelope;
pub mod error;
pub mod kem;
pub mod keys;
pub mod message;

pub use cipher::KemCipher;
pub use error::{CipherError, KemError, KeyError};
pub use kem::{KemAlgorithm, KeyPair};
pub use keys::KeyLifecycleManager;
pub use message::{Message, MessageKind, Scalar};
