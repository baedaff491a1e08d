use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrieError {
    #[error("invalid trie node")]
    InvalidTrieNode,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TrieError>;
