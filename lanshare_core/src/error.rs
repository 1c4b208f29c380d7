//! Error types for LanShare

use thiserror::Error;

/// Main error type for LanShare operations
#[derive(Error, Debug)]
pub enum LanshareError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Pairing failed: {0}")]
    Pairing(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timeout: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, LanshareError>;
