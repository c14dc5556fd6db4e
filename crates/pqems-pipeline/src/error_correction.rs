use pqems_core::codec::{CodecError, ErrorCorrector};

const LEN_FIELD: usize = 8;
const COPIES: usize = 3;
const HEADER_LEN: usize = LEN_FIELD * COPIES;

/// Triple modular redundancy: the payload and its length are stored three
/// times and decoded by bitwise majority vote. Any corruption confined to one
/// copy of each bit position is repaired.
///
/// Layout: `len u64 BE` ×3, then the payload ×3.
#[derive(Debug, Clone, Copy, Default)]
pub struct TripleRedundancy;

impl ErrorCorrector for TripleRedundancy {
    fn name(&self) -> &'static str {
        "tmr"
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let len = (data.len() as u64).to_be_bytes();
        let mut out = Vec::with_capacity(HEADER_LEN + data.len() * COPIES);
        for _ in 0..COPIES {
            out.extend_from_slice(&len);
        }
        for _ in 0..COPIES {
            out.extend_from_slice(data);
        }
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        if data.len() < HEADER_LEN {
            return Err(corrupt("truncated length header"));
        }
        let header = majority(
            &data[..LEN_FIELD],
            &data[LEN_FIELD..2 * LEN_FIELD],
            &data[2 * LEN_FIELD..HEADER_LEN],
        );
        let mut len_bytes = [0u8; LEN_FIELD];
        len_bytes.copy_from_slice(&header);
        let len = usize::try_from(u64::from_be_bytes(len_bytes))
            .map_err(|_| corrupt("length does not fit in memory"))?;

        let body = &data[HEADER_LEN..];
        let expected = len
            .checked_mul(COPIES)
            .ok_or_else(|| corrupt("length overflow"))?;
        if body.len() != expected {
            return Err(corrupt(format!(
                "expected {expected} body bytes, found {}",
                body.len()
            )));
        }

        Ok(majority(&body[..len], &body[len..2 * len], &body[2 * len..]))
    }
}

fn majority(a: &[u8], b: &[u8], c: &[u8]) -> Vec<u8> {
    a.iter()
        .zip(b)
        .zip(c)
        .map(|((x, y), z)| (x & y) | (x & z) | (y & z))
        .collect()
}

fn corrupt(reason: impl Into<String>) -> CodecError {
    CodecError::Corrupt {
        codec: "tmr",
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repairs_damage_in_a_single_copy() {
        let codec = TripleRedundancy;
        let data = b"redundant payload".to_vec();
        let mut encoded = codec.encode(&data).expect("encode");

        // Flip bits in the first payload copy and in one length field.
        encoded[HEADER_LEN] ^= 0xFF;
        encoded[HEADER_LEN + 5] ^= 0x10;
        encoded[LEN_FIELD + 7] ^= 0x01;

        assert_eq!(codec.decode(&encoded).expect("decode"), data);
    }

    #[test]
    fn repairs_scattered_damage_across_copies() {
        let codec = TripleRedundancy;
        let data: Vec<u8> = (0..=255).collect();
        let mut encoded = codec.encode(&data).expect("encode");

        // Different positions in each copy: every bit still has a majority.
        encoded[HEADER_LEN + 10] ^= 0xAA;
        encoded[HEADER_LEN + data.len() + 20] ^= 0x55;
        encoded[HEADER_LEN + 2 * data.len() + 30] ^= 0x0F;

        assert_eq!(codec.decode(&encoded).expect("decode"), data);
    }

    #[test]
    fn empty_input_round_trips() {
        let codec = TripleRedundancy;
        let encoded = codec.encode(&[]).expect("encode");
        assert_eq!(encoded.len(), HEADER_LEN);
        assert!(codec.decode(&encoded).expect("decode").is_empty());
    }

    #[test]
    fn truncated_input_is_corrupt() {
        let codec = TripleRedundancy;
        let encoded = codec.encode(b"abc").expect("encode");
        let err = codec.decode(&encoded[..encoded.len() - 1]).expect_err("short");
        assert!(matches!(err, CodecError::Corrupt { codec: "tmr", .. }));
        assert!(codec.decode(&encoded[..4]).is_err());
    }
}
