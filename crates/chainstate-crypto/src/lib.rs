//! Hashing and address primitives shared by the trie, storage and account
//! layers.

pub mod address;
pub mod hash;

pub use address::{Address, AddressError};
pub use hash::{keccak256, Hash, EMPTY_HASH};
