//! WolfQuorum Error Types

use thiserror::Error;

use crate::protocol::ErrorCode;

/// Result type alias for WolfQuorum operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfQuorum error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Client request errors
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    // Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown exec message id {0}")]
    UnknownMessage(u8),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Broadcast failed: {0}")]
    Broadcast(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Wire error code reported to IPC clients
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidParameter(_) => ErrorCode::InvalidParameter,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Error::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            Error::Protocol(_) | Error::UnknownMessage(_) | Error::Serialization(_) => {
                ErrorCode::InvalidRequest
            }
            _ => ErrorCode::Internal,
        }
    }
}
