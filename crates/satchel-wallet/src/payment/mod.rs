//! Payments: fee estimates, coin selection, transaction building and signing.
//!
//! - [`fees`] — size and fee estimates
//! - [`coin_selection`] — spendable coin bundles and sweep amounts
//! - [`builder`] — unsigned transactions, with or without replay protection
//! - [`bip69`] — canonical input and output ordering
//! - [`signer`] — per-network input signing
//!
//! [`Payment`] ties these to a [`BlockExplorer`] for fetching coins and
//! broadcasting.

pub mod bip69;
pub mod builder;
pub mod coin_selection;
pub mod fees;
pub mod signer;

use std::str::FromStr;
use std::sync::Arc;

use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{AddressType, PrivateKey, Transaction};
use tracing::info;

use satchel_core::constants::CryptoCurrency;
use satchel_core::traits::BlockExplorer;
use satchel_core::types::{DerivationKind, Utxo, XPubs};

use crate::error::WalletError;

pub use builder::{DustInput, Recipient, UnsignedTransaction};
pub use coin_selection::SpendableUnspentOutputs;

/// Output script kinds, with their serialized size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputType {
    P2pkh,
    P2wpkh,
    P2sh,
    P2wsh,
}

impl OutputType {
    pub fn size(&self) -> u64 {
        match self {
            Self::P2pkh => 34,
            Self::P2wpkh => 31,
            Self::P2sh => 32,
            Self::P2wsh => 43,
        }
    }

    /// Output type paying `address`.
    pub fn for_address(address: &str) -> Result<Self, WalletError> {
        let parsed = bitcoin::Address::from_str(address)
            .map_err(|e| WalletError::InvalidAddress(format!("{address}: {e}")))?
            .assume_checked();
        match parsed.address_type() {
            Some(AddressType::P2pkh) => Ok(Self::P2pkh),
            Some(AddressType::P2wpkh) => Ok(Self::P2wpkh),
            Some(AddressType::P2sh) => Ok(Self::P2sh),
            Some(AddressType::P2wsh) => Ok(Self::P2wsh),
            _ => Err(WalletError::InvalidAddress(format!("{address}: unsupported output type"))),
        }
    }

    /// Output type of addresses derived for `kind`.
    pub fn for_derivation(kind: DerivationKind) -> Self {
        match kind {
            DerivationKind::Legacy => Self::P2pkh,
            DerivationKind::Segwit => Self::P2wpkh,
        }
    }
}

/// Payment operations backed by a block explorer.
pub struct Payment<E: ?Sized> {
    explorer: Arc<E>,
}

impl<E: BlockExplorer + ?Sized> Payment<E> {
    pub fn new(explorer: Arc<E>) -> Self {
        Self { explorer }
    }

    pub fn estimated_fee(&self, inputs: &[Utxo], outputs: &[OutputType], fee_per_kb: u64) -> u64 {
        fees::estimated_fee(inputs, outputs, fee_per_kb)
    }

    pub fn estimated_size(&self, inputs: &[Utxo], outputs: &[OutputType]) -> f64 {
        fees::estimated_size(inputs, outputs)
    }

    pub fn is_adequate_fee(&self, inputs: &[Utxo], outputs: &[OutputType], absolute_fee: u64) -> bool {
        fees::is_adequate_fee(inputs, outputs, absolute_fee)
    }

    /// Unspent BTC outputs of one account's extended keys.
    pub fn unspent_btc_coins(&self, xpubs: &XPubs) -> Result<Vec<Utxo>, WalletError> {
        let keys = |kind| {
            xpubs
                .for_derivation(kind)
                .map(|x| vec![x.address.clone()])
                .unwrap_or_default()
        };
        let legacy = keys(DerivationKind::Legacy);
        let segwit = keys(DerivationKind::Segwit);
        Ok(self.explorer.get_unspent_outputs(CryptoCurrency::Btc, &legacy, &segwit)?)
    }

    /// Unspent BCH outputs of legacy extended keys or addresses.
    pub fn unspent_bch_coins(&self, addresses: &[String]) -> Result<Vec<Utxo>, WalletError> {
        Ok(self.explorer.get_unspent_outputs(CryptoCurrency::Bch, addresses, &[])?)
    }

    pub fn maximum_available(
        &self,
        unspent: &[Utxo],
        target: OutputType,
        fee_per_kb: u64,
        want_replay_protection: bool,
    ) -> (u64, u64) {
        coin_selection::maximum_available(unspent, target, fee_per_kb, want_replay_protection)
    }

    pub fn spendable_coins(
        &self,
        unspent: &[Utxo],
        target: OutputType,
        change: OutputType,
        amount: u64,
        fee_per_kb: u64,
        want_replay_protection: bool,
    ) -> Result<SpendableUnspentOutputs, WalletError> {
        coin_selection::spendable_coins(unspent, target, change, amount, fee_per_kb, want_replay_protection)
    }

    pub fn make_transaction(
        &self,
        unspent: &[Utxo],
        receivers: &[Recipient],
        fee: u64,
        change_address: Option<&str>,
    ) -> Result<UnsignedTransaction, WalletError> {
        builder::make_transaction(unspent, receivers, fee, change_address)
    }

    pub fn make_non_replayable_transaction(
        &self,
        unspent: &[Utxo],
        receivers: &[Recipient],
        fee: u64,
        change_address: Option<&str>,
        dust_input: &DustInput,
    ) -> Result<UnsignedTransaction, WalletError> {
        builder::make_non_replayable_transaction(unspent, receivers, fee, change_address, dust_input)
    }

    /// Sign for `currency`'s network; returns the number of inputs signed.
    pub fn sign_transaction(
        &self,
        currency: CryptoCurrency,
        unsigned: &mut UnsignedTransaction,
        keys: &[PrivateKey],
    ) -> Result<usize, WalletError> {
        signer::sign_transaction(&mut unsigned.tx, &unsigned.prevouts, keys, currency.network())
    }

    pub fn is_fully_signed(&self, tx: &Transaction) -> bool {
        signer::is_fully_signed(tx)
    }

    /// Broadcast a signed transaction.
    ///
    /// Partially signed transactions are refused; a replay-protected payment
    /// goes to the dust service instead, which completes the dust input.
    pub fn publish(&self, currency: CryptoCurrency, tx: &Transaction) -> Result<(), WalletError> {
        if !self.is_fully_signed(tx) {
            return Err(WalletError::Protocol("transaction is not fully signed".into()));
        }
        let network = currency.network();
        let txid = tx.compute_txid();
        self.explorer.push_tx(currency, &serialize_hex(tx))?;
        info!(%txid, ?network, "transaction published");
        Ok(())
    }
}
