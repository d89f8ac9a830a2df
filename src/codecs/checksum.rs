use crate::error::{ZarrError, ZarrResult};

const CHECKSUM_SIZE: usize = 4;

/// Appends a little-endian CRC32C of the payload; used by shard indexes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crc32cCodec;

impl Crc32cCodec {
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + CHECKSUM_SIZE);
        out.extend_from_slice(data);
        out.extend_from_slice(&crc32c::crc32c(data).to_le_bytes());
        out
    }

    pub fn decode(&self, data: &[u8]) -> ZarrResult<Vec<u8>> {
        if data.len() < CHECKSUM_SIZE {
            return Err(ZarrError::Decode(
                "crc32c: buffer shorter than its checksum".into(),
            ));
        }
        let (payload, stored) = data.split_at(data.len() - CHECKSUM_SIZE);
        let mut expected = [0u8; CHECKSUM_SIZE];
        expected.copy_from_slice(stored);
        if crc32c::crc32c(payload) != u32::from_le_bytes(expected) {
            return Err(ZarrError::Decode("crc32c: checksum mismatch".into()));
        }
        Ok(payload.to_vec())
    }

    pub fn encoded_size(&self, decoded_size: usize) -> usize {
        decoded_size + CHECKSUM_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupted_payload_is_detected() {
        let mut encoded = Crc32cCodec.encode(b"shard index");
        assert_eq!(Crc32cCodec.decode(&encoded).unwrap(), b"shard index");
        encoded[0] ^= 0xff;
        assert!(Crc32cCodec.decode(&encoded).is_err());
    }
}
