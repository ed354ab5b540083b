//! Common error types for the enforcement workspace

use thiserror::Error;

/// Common result type for placa operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across placa crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database write or schema operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Ledger could not be read; callers must not fabricate a status
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Plate text without any decimal digit
    #[error("Invalid plate: {0:?}")]
    InvalidPlate(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a failed read so it surfaces as `LedgerUnavailable`
    pub fn ledger_read(err: sqlx::Error) -> Self {
        Error::LedgerUnavailable(err.to_string())
    }
}
