use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("account not found")]
    AccountNotFound,

    #[error("key not found")]
    NotFound,

    #[error("insufficient balance")]
    BalanceInsufficient,

    #[error("a batch is already open")]
    AlreadyBatching,

    #[error("no batch is open")]
    NotBatching,

    #[error(transparent)]
    Trie(#[from] chainstate_trie::TrieError),

    #[error(transparent)]
    Storage(#[from] chainstate_storage::StorageError),

    #[error(transparent)]
    Address(#[from] chainstate_crypto::AddressError),

    #[error("malformed account encoding: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, AccountError>;
