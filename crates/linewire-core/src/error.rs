//! Error types for `linewire` core library.

use thiserror::Error;

/// Result type alias using `linewire` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `linewire` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
