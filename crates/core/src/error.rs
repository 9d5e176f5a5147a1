use thiserror::Error;

/// Shared error type used across all deployer crates.
#[derive(Debug, Error)]
pub enum AppError {
    /// Input rejected before any network call was made.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(u64),

    /// The user declined to sign.
    #[error("Wallet rejected the request: {0}")]
    WalletRejected(String),

    #[error("No wallet account connected")]
    NotConnected,

    #[error("A transaction is already in flight")]
    AlreadyInFlight,

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Transaction {0} reverted")]
    Reverted(String),

    /// A result arrived for a network, account or token that is no longer active.
    #[error("Discarded stale result: {0}")]
    Stale(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] eyre::Error),
}

impl AppError {
    /// Shorthand for a [`AppError::Validation`] with a formatted message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
