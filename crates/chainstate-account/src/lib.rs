//! Account and account-state types for the chain state layer: per-account
//! balance, nonce and storage, and the keccak256-addressed collection of
//! accounts backing the outer state trie.

pub mod account;
pub mod account_state;
pub mod batch_guard;
pub mod error;

pub use account::Account;
pub use account_state::AccountState;
pub use batch_guard::BatchGuard;
pub use chainstate_crypto::Address;
pub use error::{AccountError, Result};
