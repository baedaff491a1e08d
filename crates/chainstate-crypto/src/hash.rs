use sha3::{Digest, Keccak256};

/// 32-byte digest produced by the trie's hash function.
pub type Hash = [u8; 32];

/// The empty hash, `keccak256(b"")`. Root of an empty trie, and the
/// sentinel `birth_place` for user accounts.
pub const EMPTY_HASH: Hash = [
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
];

/// Hash data using Keccak256, the trie's chosen hash function.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    hash
}
