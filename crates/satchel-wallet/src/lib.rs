//! # satchel-wallet — non-custodial BTC/BCH wallet core.
//!
//! Derives BIP44/BIP84 keys from a mnemonic, keeps the versioned and
//! encrypted wallet payload, tracks balances and classified history through
//! a block explorer, and builds and signs payments for both the standard
//! and the replay-protected (fork id) network.
//!
//! # Modules
//!
//! - [`error`] — `WalletError` enum
//! - [`mnemonic`] — Seed entropy and BIP39 phrases
//! - [`keys`] — Master, account, chain and address keys
//! - [`encryption`] — PBKDF2 + AES-256-GCM payload and secret encryption
//! - [`payload`] — Wallet document, V2→V3→V4 upgrades, account discovery
//! - [`balance`] — Per-currency balance map
//! - [`history`] — Multi-address transaction classification and indices
//! - [`payment`] — Fees, coin selection, BIP69, building and signing
//! - [`manager`] — Load, mutate and save a wallet against remote storage

pub mod balance;
pub mod encryption;
pub mod error;
pub mod history;
pub mod keys;
pub mod manager;
pub mod mnemonic;
pub mod payload;
pub mod payment;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenient access
pub use balance::BalanceManager;
pub use error::WalletError;
pub use history::{MultiAddressFactory, TransactionSummary, TransactionType};
pub use keys::{AccountKey, Address, Chain, HdWallet, MasterKey};
pub use manager::PayloadManager;
pub use mnemonic::Seed;
pub use payload::{Wallet, WalletWrapper};
pub use payment::{OutputType, Payment, Recipient, SpendableUnspentOutputs, UnsignedTransaction};
