//! Kyber key encapsulation (ML-KEM round 3 parameter sets).

use std::fmt;

use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::KemError;

/// Runs `$body` with `$module` bound to the parameter set's pqcrypto module.
macro_rules! with_params {
    ($algorithm:expr, $module:ident => $body:expr) => {
        match $algorithm {
            KemAlgorithm::Kyber512 => {
                use pqcrypto_kyber::kyber512 as $module;
                $body
            }
            KemAlgorithm::Kyber768 => {
                use pqcrypto_kyber::kyber768 as $module;
                $body
            }
            KemAlgorithm::Kyber1024 => {
                use pqcrypto_kyber::kyber1024 as $module;
                $body
            }
        }
    };
}

/// Supported KEM parameter sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KemAlgorithm {
    Kyber512,
    Kyber768,
    #[default]
    Kyber1024,
}

impl KemAlgorithm {
    /// Human-readable algorithm identifier stored alongside key pairs.
    pub fn id(&self) -> &'static str {
        match self {
            KemAlgorithm::Kyber512 => "Kyber512",
            KemAlgorithm::Kyber768 => "Kyber768",
            KemAlgorithm::Kyber1024 => "Kyber1024",
        }
    }

    /// One-byte identifier used in envelopes.
    pub fn wire_id(&self) -> u8 {
        match self {
            KemAlgorithm::Kyber512 => 1,
            KemAlgorithm::Kyber768 => 2,
            KemAlgorithm::Kyber1024 => 3,
        }
    }

    pub fn from_wire_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(KemAlgorithm::Kyber512),
            2 => Some(KemAlgorithm::Kyber768),
            3 => Some(KemAlgorithm::Kyber1024),
            _ => None,
        }
    }

    /// Generate a fresh key pair.
    pub fn generate(&self) -> KeyPair {
        let (public_key, private_key) = with_params!(self, kem => {
            let (pk, sk) = kem::keypair();
            (pk.as_bytes().to_vec(), Zeroizing::new(sk.as_bytes().to_vec()))
        });
        KeyPair {
            public_key,
            private_key,
            algorithm_id: self.id().to_string(),
        }
    }

    /// Encapsulate a fresh shared secret to `public_key`.
    pub fn encapsulate(&self, public_key: &[u8]) -> Result<EncapsulatedSecret, KemError> {
        let algorithm = self.id();
        with_params!(self, kem => {
            let pk = kem::PublicKey::from_bytes(public_key)
                .map_err(|_| KemError::InvalidPublicKey { algorithm })?;
            let (ss, ct) = kem::encapsulate(&pk);
            Ok(EncapsulatedSecret {
                ciphertext: ct.as_bytes().to_vec(),
                shared_secret: Zeroizing::new(ss.as_bytes().to_vec()),
            })
        })
    }

    /// Recover the shared secret carried by `ciphertext`.
    pub fn decapsulate(
        &self,
        ciphertext: &[u8],
        private_key: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KemError> {
        let algorithm = self.id();
        with_params!(self, kem => {
            let ct = kem::Ciphertext::from_bytes(ciphertext)
                .map_err(|_| KemError::InvalidCiphertext { algorithm })?;
            let sk = kem::SecretKey::from_bytes(private_key)
                .map_err(|_| KemError::InvalidPrivateKey { algorithm })?;
            let ss = kem::decapsulate(&ct, &sk);
            Ok(Zeroizing::new(ss.as_bytes().to_vec()))
        })
    }

    /// Rebuild a key pair from stored halves, checking both parse for this
    /// parameter set.
    pub fn key_pair_from_parts(
        &self,
        public_key: Vec<u8>,
        private_key: Zeroizing<Vec<u8>>,
    ) -> Result<KeyPair, KemError> {
        let algorithm = self.id();
        with_params!(self, kem => {
            kem::PublicKey::from_bytes(&public_key)
                .map_err(|_| KemError::InvalidPublicKey { algorithm })?;
            kem::SecretKey::from_bytes(&private_key)
                .map_err(|_| KemError::InvalidPrivateKey { algorithm })?;
        });
        Ok(KeyPair {
            public_key,
            private_key,
            algorithm_id: algorithm.to_string(),
        })
    }
}

impl fmt::Display for KemAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A KEM key pair. The private half is wiped from memory on drop.
#[derive(Clone)]
pub struct KeyPair {
    pub public_key: Vec<u8>,
    private_key: Zeroizing<Vec<u8>>,
    pub algorithm_id: String,
}

impl KeyPair {
    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm_id", &self.algorithm_id)
            .field("public_key_len", &self.public_key.len())
            .field("private_key_len", &self.private_key.len())
            .finish()
    }
}

/// Output of one encapsulation; lives only for a single payload.
pub struct EncapsulatedSecret {
    pub ciphertext: Vec<u8>,
    pub shared_secret: Zeroizing<Vec<u8>>,
}
