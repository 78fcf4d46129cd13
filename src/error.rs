//! Error types for wallet operations
//!
//! Every expected failure (bad input, wrong password, insufficient funds,
//! network hiccup, rejected broadcast) is a `WalletError` value returned to the
//! caller. Only `Corrupted` signals an unrecoverable break of persisted state.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid derivation tag: {0}")]
    InvalidTag(String),

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Entropy source failure: {0}")]
    Entropy(String),

    #[error("Wrong password")]
    WrongPassword,

    #[error("Wallet is locked")]
    LockedWallet,

    #[error("No wallet has been created or restored")]
    NoWallet,

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Ordinal not found: {0}")]
    OrdinalNotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Broadcast rejected: {0}")]
    Rejected(String),

    #[error("Broadcast outcome unknown: {0}")]
    Indeterminate(String),

    #[error("Ledger state violation: {0}")]
    State(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Bitcoin error: {0}")]
    Bitcoin(String),

    #[error("Corrupted persisted state: {0}")]
    Corrupted(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Coarse classification used by callers to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller input was bad; re-prompt.
    Validation,
    /// Re-authentication required.
    Auth,
    /// Different selection or input required.
    Funds,
    /// Transient; safe to retry a refresh.
    Network,
    /// `Rejected` or `Indeterminate`; see `WalletError::is_retry_safe`.
    Broadcast,
    /// Contract violation between components.
    State,
    /// Persisted state cannot be trusted; abort.
    Fatal,
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WalletError::InvalidDestination(_)
            | WalletError::InvalidAmount(_)
            | WalletError::InvalidTag(_)
            | WalletError::InvalidMnemonic(_)
            | WalletError::Entropy(_) => ErrorKind::Validation,
            WalletError::WrongPassword | WalletError::LockedWallet | WalletError::NoWallet => {
                ErrorKind::Auth
            }
            WalletError::InsufficientFunds(_) | WalletError::OrdinalNotFound(_) => ErrorKind::Funds,
            WalletError::Network(_) | WalletError::Storage(_) => ErrorKind::Network,
            WalletError::Rejected(_) | WalletError::Indeterminate(_) => ErrorKind::Broadcast,
            WalletError::State(_) | WalletError::Crypto(_) | WalletError::Bitcoin(_) => {
                ErrorKind::State
            }
            WalletError::Corrupted(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// Whether resubmitting the same operation cannot double-spend.
    ///
    /// An `Indeterminate` broadcast may have reached the network, so the
    /// caller must re-check UTXO state first.
    pub fn is_retry_safe(&self) -> bool {
        matches!(self, WalletError::Network(_) | WalletError::Rejected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy() {
        assert_eq!(WalletError::WrongPassword.kind(), ErrorKind::Auth);
        assert_eq!(WalletError::LockedWallet.kind(), ErrorKind::Auth);
        assert_eq!(
            WalletError::InsufficientFunds("x".into()).kind(),
            ErrorKind::Funds
        );
        assert_eq!(
            WalletError::Indeterminate("timeout".into()).kind(),
            ErrorKind::Broadcast
        );
        assert!(WalletError::Corrupted("bad json".into()).is_fatal());
        assert!(!WalletError::Network("down".into()).is_fatal());
    }

    #[test]
    fn test_retry_policy() {
        assert!(WalletError::Rejected("double spend".into()).is_retry_safe());
        assert!(!WalletError::Indeterminate("timeout".into()).is_retry_safe());
    }
}
