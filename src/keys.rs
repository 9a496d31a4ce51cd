//! Key encoding utilities
//!
//! All keys use a single-byte prefix followed by binary data.
//! This ensures deterministic, lexicographically ordered keys in RocksDB.

use alloy_primitives::{Address, B256};

/// Encode a block key.
///
/// Format: byte 'B' (0x42) + height (8 bytes, big-endian)
/// Total length: 9 bytes
pub fn encode_block_key(height: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(b'B');
    key.extend_from_slice(&height.to_be_bytes());
    key
}

/// Encode a block hash index key.
///
/// Format: byte 'I' (0x49) + block hash (32 bytes)
/// Total length: 33 bytes
pub fn encode_block_index_key(hash: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(b'I');
    key.extend_from_slice(hash.as_slice());
    key
}

/// Encode a registration key.
///
/// Format: byte 'R' (0x52) + client id bytes
pub fn encode_registration_key(client_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + client_id.len());
    key.push(b'R');
    key.extend_from_slice(client_id.as_bytes());
    key
}

/// Encode an address index key.
///
/// Format: byte 'X' (0x58) + address (20 bytes) + client id bytes.
/// The address prefix makes all registrations for one address a
/// contiguous key range.
pub fn encode_address_index_key(address: Address, client_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(21 + client_id.len());
    key.push(b'X');
    key.extend_from_slice(address.as_slice());
    key.extend_from_slice(client_id.as_bytes());
    key
}

/// Encode the address index prefix covering every client for an address.
pub fn encode_address_index_prefix(address: Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(21);
    key.push(b'X');
    key.extend_from_slice(address.as_slice());
    key
}

/// Decode the client id out of an address index key.
pub fn decode_address_index_client(key: &[u8]) -> Option<&str> {
    if key.len() < 21 || key[0] != b'X' {
        return None;
    }
    std::str::from_utf8(&key[21..]).ok()
}

/// Encode a meta key.
///
/// Format: byte 'M' (0x4D) + meta_id (1 byte)
/// Total length: 2 bytes
///
/// Meta IDs:
/// - 0x01: chain tip height
pub fn encode_meta_key(meta_id: u8) -> Vec<u8> {
    vec![b'M', meta_id]
}

/// Meta id of the persisted chain tip height.
pub const META_TIP_HEIGHT: u8 = 0x01;

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, b256};

    #[test]
    fn test_block_key_encoding() {
        let key = encode_block_key(12345);
        assert_eq!(key.len(), 9);
        assert_eq!(key[0], b'B');
        assert_eq!(u64::from_be_bytes(key[1..9].try_into().unwrap()), 12345);
    }

    #[test]
    fn test_block_index_key_encoding() {
        let hash = b256!("0000000000000000000000000000000000000000000000000000000000000001");
        let key = encode_block_index_key(hash);
        assert_eq!(key.len(), 33);
        assert_eq!(key[0], b'I');
        assert_eq!(&key[1..], hash.as_slice());
    }

    #[test]
    fn test_address_index_key_roundtrip() {
        let addr = address!("0742d35cc6634c0532925a3b844bc9e7595f0beb");
        let key = encode_address_index_key(addr, "client-a");
        assert!(key.starts_with(&encode_address_index_prefix(addr)));
        assert_eq!(decode_address_index_client(&key), Some("client-a"));
    }

    #[test]
    fn test_meta_key_encoding() {
        let key = encode_meta_key(META_TIP_HEIGHT);
        assert_eq!(key, vec![b'M', 0x01]);
    }
}
