//! Secure storage backends for PQEMS.
//!
//! Every backend variant encrypts records with AES-GCM under a key-encryption
//! key held by a platform trust anchor: a TPM when one answers, otherwise the
//! OS keyring of the host. Selection happens once, in [`probe`].

pub mod key_provider;
pub mod probe;
pub mod secure_file_store;
pub mod trust_anchor;
