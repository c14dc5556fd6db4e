//! Self-describing ciphertext container.
//!
//! Layout (integers big-endian):
//!
//! ```text
//! "PQEM" | version u8 | algorithm u8 | kind u8 | kem_ct_len u32 | kem_ct | nonce[12] | aead_payload
//! ```
//!
//! Everything before the nonce is the header and is authenticated as AEAD
//! associated data.

use crate::{error::CipherError, kem::KemAlgorithm, message::MessageKind};

pub const MAGIC: &[u8; 4] = b"PQEM";
pub const VERSION: u8 = 1;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

const FIXED_HEADER_LEN: usize = MAGIC.len() + 3 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub algorithm: KemAlgorithm,
    pub kind: MessageKind,
    pub kem_ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    /// AEAD ciphertext followed by its tag.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Header bytes bound to the payload as associated data.
    pub fn header(&self) -> Result<Vec<u8>, CipherError> {
        let ct_len = u32::try_from(self.kem_ciphertext.len())
            .map_err(|_| CipherError::Encryption("KEM ciphertext too large".into()))?;
        let mut out = Vec::with_capacity(FIXED_HEADER_LEN + self.kem_ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.push(self.algorithm.wire_id());
        out.push(self.kind as u8);
        out.extend_from_slice(&ct_len.to_be_bytes());
        out.extend_from_slice(&self.kem_ciphertext);
        Ok(out)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CipherError> {
        let mut out = self.header()?;
        out.reserve(NONCE_LEN + self.payload.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() < FIXED_HEADER_LEN {
            return Err(malformed("truncated header"));
        }
        if &bytes[..MAGIC.len()] != MAGIC {
            return Err(malformed("bad magic"));
        }
        let version = bytes[4];
        if version != VERSION {
            return Err(malformed(format!("unsupported version {version}")));
        }
        let algorithm = KemAlgorithm::from_wire_id(bytes[5])
            .ok_or_else(|| malformed(format!("unknown algorithm id {}", bytes[5])))?;
        let kind = MessageKind::from_wire(bytes[6])
            .ok_or_else(|| malformed(format!("unknown message kind {}", bytes[6])))?;
        let ct_len = u32::from_be_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]) as usize;

        let rest = &bytes[FIXED_HEADER_LEN..];
        if rest.len() < ct_len.saturating_add(NONCE_LEN + TAG_LEN) {
            return Err(malformed("truncated body"));
        }
        let (kem_ciphertext, rest) = rest.split_at(ct_len);
        let (nonce, payload) = rest.split_at(NONCE_LEN);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(nonce);

        Ok(Envelope {
            algorithm,
            kind,
            kem_ciphertext: kem_ciphertext.to_vec(),
            nonce: nonce_bytes,
            payload: payload.to_vec(),
        })
    }
}

fn malformed(reason: impl Into<String>) -> CipherError {
    CipherError::MalformedEnvelope(reason.into())
}
