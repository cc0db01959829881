use crate::core::capabilities::Operation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BzzVfsError {
    #[error("Content not found: {0}")]
    NotFound(String),

    #[error("Short read: requested {requested} bytes, store returned {got}")]
    ShortRead { requested: usize, got: usize },

    #[error("Storage transport failure: {0}")]
    Transport(String),

    #[error("Operation not supported on read-only backend: {0}")]
    Unsupported(Operation),

    #[error("SQLite initialization failed: {0}")]
    EngineInit(i32),

    #[error("VFS registration failed: {0}")]
    RegistrationFailed(i32),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("SQLite error {code}: {message}")]
    Engine { code: i32, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, BzzVfsError>;
