use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use pqems_core::storage::StorageError;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::{
    envelope::{Envelope, NONCE_LEN},
    error::{CipherError, KemError, KeyError},
    keys::KeyLifecycleManager,
    message::{Message, MessageKind},
};

/// HKDF info string for the payload key.
const PAYLOAD_KEY_INFO: &[u8] = b"pqems/envelope/v1/aes-256-gcm";

/// Encrypts messages to the managed public key and decrypts them with the
/// managed private key. Every encryption encapsulates a fresh shared secret,
/// so identical plaintexts never produce identical envelopes.
#[derive(Clone)]
pub struct KemCipher {
    keys: Arc<KeyLifecycleManager>,
}

impl KemCipher {
    pub fn new(keys: Arc<KeyLifecycleManager>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &KeyLifecycleManager {
        &self.keys
    }

    #[instrument(skip_all, fields(kind = %message.kind()))]
    pub async fn encrypt(&self, message: &Message) -> Result<Vec<u8>, CipherError> {
        let plaintext = Zeroizing::new(message.encode()?);
        self.seal(message.kind(), &plaintext).await
    }

    #[instrument(skip_all, fields(len = envelope.len()))]
    pub async fn decrypt(&self, envelope: &[u8]) -> Result<Message, CipherError> {
        let (kind, plaintext) = self.open(envelope).await?;
        Message::decode(kind, plaintext)
    }

    /// Encrypt a raw byte payload.
    pub async fn encrypt_bytes(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.seal(MessageKind::Bytes, data).await
    }

    /// Decrypt an envelope to its normalized payload bytes, whatever its kind.
    pub async fn decrypt_bytes(&self, envelope: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.open(envelope).await.map(|(_, plaintext)| plaintext)
    }

    async fn seal(&self, kind: MessageKind, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let public_key = self
            .keys
            .load_public()
            .await
            .map_err(|source| key_unavailable(source, true))?;

        let algorithm = self.keys.algorithm();
        let encapsulated = algorithm.encapsulate(&public_key).map_err(kem_err)?;
        let cipher = payload_cipher(&encapsulated.shared_secret)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let mut envelope = Envelope {
            algorithm,
            kind,
            kem_ciphertext: encapsulated.ciphertext,
            nonce,
            payload: Vec::new(),
        };
        let aad = envelope.header()?;
        envelope.payload = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| CipherError::Encryption(e.to_string()))?;

        debug!(payload_len = plaintext.len(), "payload sealed");
        envelope.to_bytes()
    }

    async fn open(&self, bytes: &[u8]) -> Result<(MessageKind, Vec<u8>), CipherError> {
        let envelope = Envelope::parse(bytes)?;
        let algorithm = self.keys.algorithm();
        if envelope.algorithm != algorithm {
            return Err(CipherError::MalformedEnvelope(format!(
                "envelope uses {}, key pair is {algorithm}",
                envelope.algorithm
            )));
        }

        let private_key = self
            .keys
            .load_private()
            .await
            .map_err(|source| key_unavailable(source, false))?;
        let shared_secret = algorithm
            .decapsulate(&envelope.kem_ciphertext, &private_key)
            .map_err(kem_err)?;
        let cipher = payload_cipher(&shared_secret)?;

        let aad = envelope.header()?;
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&envelope.nonce),
                Payload {
                    msg: &envelope.payload,
                    aad: &aad,
                },
            )
            .map_err(|_| CipherError::AuthenticationFailed)?;
        Ok((envelope.kind, plaintext))
    }
}

fn payload_cipher(shared_secret: &[u8]) -> Result<Aes256Gcm, CipherError> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(PAYLOAD_KEY_INFO, &mut key[..])
        .map_err(|_| CipherError::Encryption("payload key derivation failed".into()))?;
    Aes256Gcm::new_from_slice(&key[..]).map_err(|e| CipherError::Encryption(e.to_string()))
}

fn key_unavailable(source: StorageError, public: bool) -> CipherError {
    match (source.is_not_found(), public) {
        (true, true) => CipherError::PublicKeyUnavailable { source },
        (true, false) => CipherError::PrivateKeyUnavailable { source },
        (false, _) => CipherError::Key(KeyError::Storage(source)),
    }
}

fn kem_err(err: KemError) -> CipherError {
    match err {
        KemError::InvalidCiphertext { .. } => CipherError::MalformedEnvelope(err.to_string()),
        other => CipherError::Key(KeyError::Kem(other)),
    }
}

#[cfg(test)]
mod tests {
    use pqems_core::storage::{InMemorySecretStore, SecretStore};
    use serde_json::json;

    use super::*;
    use crate::{
        envelope::TAG_LEN,
        kem::KemAlgorithm,
        keys::{tests::FailingStore, PRIVATE_KEY_NAME, PUBLIC_KEY_NAME},
    };

    async fn cipher_with_keys() -> (KemCipher, InMemorySecretStore) {
        let store = InMemorySecretStore::default();
        let keys = Arc::new(KeyLifecycleManager::new(
            Arc::new(store.clone()),
            KemAlgorithm::Kyber1024,
        ));
        keys.generate_and_store().await.expect("generate");
        (KemCipher::new(keys), store)
    }

    #[tokio::test]
    async fn hello_world_encrypts_differently_each_time() {
        let (cipher, _) = cipher_with_keys().await;
        let message = Message::from("hello world");

        let first = cipher.encrypt(&message).await.expect("encrypt");
        let second = cipher.encrypt(&message).await.expect("encrypt");
        assert!(!first.is_empty());
        assert_ne!(first, second);

        assert_eq!(cipher.decrypt(&first).await.expect("decrypt"), message);
        assert_eq!(cipher.decrypt(&second).await.expect("decrypt"), message);
    }

    #[tokio::test]
    async fn every_message_kind_round_trips() {
        let (cipher, _) = cipher_with_keys().await;
        let messages = vec![
            Message::from("text with ünïcode"),
            Message::from(vec![0u8, 255, 1, 2]),
            Message::try_from(json!({"name": "sensor", "values": [1, 2.5, null]})).expect("record"),
            Message::try_from(json!([1, "two", {"three": 3}])).expect("record"),
            Message::from(-42i64),
            Message::from(6.25f64),
            Message::object(&(7u32, String::from("tuple"))).expect("object"),
            Message::from(""),
        ];

        for message in messages {
            let envelope = cipher.encrypt(&message).await.expect("encrypt");
            let decrypted = cipher.decrypt(&envelope).await.expect("decrypt");
            assert_eq!(decrypted, message);
        }
    }

    #[tokio::test]
    async fn text_digits_do_not_become_numbers() {
        let (cipher, _) = cipher_with_keys().await;
        let envelope = cipher.encrypt(&Message::from("123")).await.expect("encrypt");
        assert_eq!(
            cipher.decrypt(&envelope).await.expect("decrypt"),
            Message::Text("123".into())
        );
    }

    #[tokio::test]
    async fn tampered_payload_fails_authentication() {
        let (cipher, _) = cipher_with_keys().await;
        let mut envelope = cipher.encrypt(&Message::from("hello world")).await.expect("encrypt");

        let last = envelope.len() - TAG_LEN - 1;
        envelope[last] ^= 0x01;
        let err = cipher.decrypt(&envelope).await.expect_err("tampered");
        assert!(matches!(err, CipherError::AuthenticationFailed));
    }

    #[tokio::test]
    async fn tampered_header_fails_authentication() {
        let (cipher, _) = cipher_with_keys().await;
        let mut envelope = cipher.encrypt(&Message::from("42")).await.expect("encrypt");

        // Flip the message kind from text to bytes; the header is authenticated.
        envelope[6] = MessageKind::Bytes as u8;
        let err = cipher.decrypt(&envelope).await.expect_err("tampered");
        assert!(matches!(err, CipherError::AuthenticationFailed));

        let mut envelope = cipher.encrypt(&Message::from("42")).await.expect("encrypt");
        envelope[20] ^= 0x80;
        let err = cipher.decrypt(&envelope).await.expect_err("tampered kem ciphertext");
        assert!(matches!(err, CipherError::AuthenticationFailed));
    }

    #[tokio::test]
    async fn envelope_from_another_key_pair_is_rejected() {
        let (alice, _) = cipher_with_keys().await;
        let (bob, _) = cipher_with_keys().await;
        let envelope = alice.encrypt(&Message::from("for alice")).await.expect("encrypt");

        let err = bob.decrypt(&envelope).await.expect_err("wrong key");
        assert!(matches!(err, CipherError::AuthenticationFailed));
    }

    #[tokio::test]
    async fn missing_keys_are_reported_per_direction() {
        let store = InMemorySecretStore::default();
        let keys = Arc::new(KeyLifecycleManager::new(
            Arc::new(store.clone()),
            KemAlgorithm::Kyber1024,
        ));
        let cipher = KemCipher::new(keys);

        let err = cipher.encrypt(&Message::from("x")).await.expect_err("no keys");
        assert!(matches!(err, CipherError::PublicKeyUnavailable { .. }));

        cipher.keys().generate_and_store().await.expect("generate");
        let envelope = cipher.encrypt(&Message::from("x")).await.expect("encrypt");
        store.delete(PRIVATE_KEY_NAME).await.expect("drop private");

        let err = cipher.decrypt(&envelope).await.expect_err("no private key");
        assert!(matches!(err, CipherError::PrivateKeyUnavailable { .. }));
        assert!(store.load(PUBLIC_KEY_NAME).await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_backend_surfaces_as_storage_error() {
        let store = Arc::new(FailingStore::new(PRIVATE_KEY_NAME));
        store.disarm();
        let keys = Arc::new(KeyLifecycleManager::new(store.clone(), KemAlgorithm::Kyber768));
        let cipher = KemCipher::new(keys);
        cipher.keys().generate_and_store().await.expect("generate");
        let envelope = cipher.encrypt(&Message::from("x")).await.expect("encrypt");
        store.fail_loads();

        let err = cipher.encrypt(&Message::from("x")).await.expect_err("backend down");
        assert!(
            matches!(
                err,
                CipherError::Key(KeyError::Storage(StorageError::BackendUnavailable { .. }))
            ),
            "{err:?}"
        );
        let err = cipher.decrypt(&envelope).await.expect_err("backend down");
        assert!(
            matches!(
                err,
                CipherError::Key(KeyError::Storage(StorageError::BackendUnavailable { .. }))
            ),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn garbage_is_a_malformed_envelope() {
        let (cipher, _) = cipher_with_keys().await;
        let err = cipher.decrypt(b"not an envelope").await.expect_err("garbage");
        assert!(matches!(err, CipherError::MalformedEnvelope(_)));
    }

    #[tokio::test]
    async fn raw_bytes_helpers_round_trip() {
        let (cipher, _) = cipher_with_keys().await;
        let data = vec![0xAB; 4096];
        let envelope = cipher.encrypt_bytes(&data).await.expect("encrypt");
        assert_eq!(cipher.decrypt_bytes(&envelope).await.expect("decrypt"), data);
    }
}
