//! Trait interfaces for the external collaborators of the wallet core.
//!
//! - [`WalletStorage`] — encrypted payload fetch and save
//! - [`BlockExplorer`] — balances, history, unspent outputs and broadcast
//!
//! Both are blocking. Timeouts and retries belong to the implementor.

use std::collections::HashMap;

use crate::constants::CryptoCurrency;
use crate::error::ServiceError;
use crate::types::{Balance, BalanceFilter, MultiAddressResponse, Utxo};

/// Remote store holding the encrypted wallet wrapper.
pub trait WalletStorage: Send + Sync {
    /// Fetch the wrapper JSON for a wallet.
    fn fetch(&self, guid: &str, shared_key: &str) -> Result<String, ServiceError>;

    /// Store a brand-new wallet.
    fn insert(
        &self,
        guid: &str,
        shared_key: &str,
        wrapper_json: &str,
        checksum: &str,
        email: Option<&str>,
        device: &str,
    ) -> Result<(), ServiceError>;

    /// Replace an existing wallet. `old_checksum` must match the stored copy.
    #[allow(clippy::too_many_arguments)]
    fn update(
        &self,
        guid: &str,
        shared_key: &str,
        sync_addresses: &[String],
        wrapper_json: &str,
        new_checksum: &str,
        old_checksum: Option<&str>,
        device: &str,
    ) -> Result<(), ServiceError>;
}

/// Read access to chain data plus transaction broadcast.
pub trait BlockExplorer: Send + Sync {
    /// Balances keyed by extended key or address.
    fn get_balance(
        &self,
        currency: CryptoCurrency,
        legacy: &[String],
        segwit: &[String],
        filter: BalanceFilter,
    ) -> Result<HashMap<String, Balance>, ServiceError>;

    /// One page of transactions touching the given keys and addresses.
    ///
    /// `only_show` narrows the page to a subset of `legacy`/`segwit` while the
    /// full set is still used to attribute ownership.
    #[allow(clippy::too_many_arguments)]
    fn get_multi_address(
        &self,
        currency: CryptoCurrency,
        legacy: &[String],
        segwit: &[String],
        only_show: Option<&[String]>,
        filter: BalanceFilter,
        limit: u32,
        offset: u32,
    ) -> Result<MultiAddressResponse, ServiceError>;

    fn get_unspent_outputs(
        &self,
        currency: CryptoCurrency,
        legacy: &[String],
        segwit: &[String],
    ) -> Result<Vec<Utxo>, ServiceError>;

    /// Broadcast a signed transaction.
    fn push_tx(&self, currency: CryptoCurrency, raw_tx_hex: &str) -> Result<(), ServiceError>;
}
