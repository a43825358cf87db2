//! Error types for the wallet core.

use thiserror::Error;

/// Aggregated error type for wallet operations.
#[derive(Debug, Error)]
pub enum WalletError {
    /// A required field is missing or malformed. Raised before any ledger mutation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The ledger does not hold enough of a token to cover a spend.
    #[error("insufficient funds for token {token}: requested {requested}, available {available}")]
    InsufficientFunds {
        token: u32,
        requested: u64,
        available: u64,
    },

    /// A revealed amount does not open the stored commitment.
    #[error("invalid commitment for address {0}")]
    InvalidCommitment(String),

    /// No owned position or order tab matches the request.
    #[error("invalid position or order tab: {0}")]
    InvalidPositionOrTab(String),

    /// No private key is known for an address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Unrecognized side, effect or margin direction tag.
    #[error("invalid direction: {0}")]
    InvalidDirection(String),

    /// The chain encoded in a deposit id is not on the allow-list.
    #[error("unknown chain id {0}")]
    UnknownChainId(u64),

    /// Master key material wider than 240 bits.
    #[error("invalid key length: {0}")]
    InvalidKeyLength(String),

    /// The settlement service refused a submission.
    #[error("remote rejected: {0}")]
    RemoteRejected(String),

    /// The signature primitive failed.
    #[error("signing error: {0}")]
    Signing(String),

    /// Configuration could not be loaded or parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl WalletError {
    /// Whether a remote rejection points at a note the settlement service does not know.
    pub fn is_missing_note(&self) -> bool {
        matches!(self, WalletError::RemoteRejected(reason) if reason.contains("Note does not exist"))
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        WalletError::Config(err.to_string())
    }
}

/// Result alias for wallet operations.
pub type Result<T> = std::result::Result<T, WalletError>;
