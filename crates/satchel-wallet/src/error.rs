//! Wallet error types.

use satchel_core::error::ServiceError;
use thiserror::Error;

/// Errors that can occur in wallet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// The storage service rejected the wallet identifier or shared key.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The storage service reports the account as locked.
    #[error("account locked")]
    AccountLocked,

    /// Transport failure, remote error or malformed response.
    #[error("server connection: {0}")]
    ServerConnection(String),

    /// Wrong password, corrupt ciphertext or wrong second password.
    #[error("decryption: {0}")]
    Decryption(String),

    /// Wrapper version is newer than this client understands.
    #[error("unsupported payload version: {0}")]
    UnsupportedVersion(u32),

    /// HD tree missing, not decrypted, or in an inconsistent state.
    #[error("hd wallet: {0}")]
    HdWallet(String),

    /// Not enough funds to cover the amount plus fee.
    #[error("insufficient money: short by {shortfall}")]
    InsufficientMoney {
        /// Missing amount in satoshis.
        shortfall: u64,
    },

    /// A key does not belong to any address in the wallet.
    #[error("no such address: {0}")]
    NoSuchAddress(String),

    /// Transaction violates a protocol limit.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Invalid BIP-39 mnemonic phrase.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Malformed private or extended key.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid address string.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Encryption failure.
    #[error("encryption: {0}")]
    Encryption(String),

    /// Serialization error.
    #[error("serialization: {0}")]
    Serialization(String),
}

impl WalletError {
    /// Classify a storage-service failure by its error body.
    pub fn from_storage(err: &ServiceError) -> Self {
        if err.body.contains("Unknown Wallet Identifier") {
            Self::InvalidCredentials
        } else if err.body.contains("locked") {
            Self::AccountLocked
        } else {
            Self::ServerConnection(err.body.clone())
        }
    }
}

impl From<ServiceError> for WalletError {
    fn from(err: ServiceError) -> Self {
        Self::ServerConnection(err.body)
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
