//! Common error type for studyferry

use thiserror::Error;

/// Common result type for studyferry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the coupling and transfer passes
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP transport failure talking to the registry
    #[error("Registry transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Registry answered but refused or returned an unusable response
    #[error("Registry error: {0}")]
    Registry(String),

    /// DICOM file could not be read, decoded, or updated
    #[error("DICOM error: {0}")]
    Dicom(String),

    /// Store association could not be established or broke down
    #[error("Association error: {0}")]
    Association(String),

    /// Archive rejected a store request with a non-success status
    #[error("Store request failed with status 0x{0:04x}")]
    Store(u16),
}
