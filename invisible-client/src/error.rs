//! Error types for the client layer.

use invisible_core::WalletError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Local validation, signing or a settlement rejection.
    #[error(transparent)]
    Wallet(#[from] WalletError),

    /// The state store failed or returned malformed data.
    #[error("state store error: {0}")]
    Store(String),

    /// The local key cache could not be read or written.
    #[error("cache error: {0}")]
    Cache(String),

    /// The settlement service could not be reached.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    /// Whether this is a settlement rejection naming an unknown note.
    pub fn is_missing_note(&self) -> bool {
        matches!(self, ClientError::Wallet(err) if err.is_missing_note())
    }
}

impl From<sled::Error> for ClientError {
    fn from(err: sled::Error) -> Self {
        ClientError::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Cache(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
