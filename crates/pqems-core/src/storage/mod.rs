//! Secure storage contract shared by every backend variant.

mod secret_store;

pub use secret_store::{
    BackendKind, InMemorySecretStore, SecretStore, StorageError, StoredKeyRecord,
};
