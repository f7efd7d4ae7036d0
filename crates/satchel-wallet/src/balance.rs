//! In-memory balances for one currency, keyed by xpub or address.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use satchel_core::constants::CryptoCurrency;
use satchel_core::traits::BlockExplorer;
use satchel_core::types::{Balance, BalanceFilter, XPubs, split_xpubs};

use crate::error::WalletError;

#[derive(Debug, Clone, Default)]
pub struct BalanceManager {
    currency: CryptoCurrency,
    balances: HashMap<String, Balance>,
    imported: HashSet<String>,
    wallet_balance: i64,
    imported_balance: i64,
}

impl BalanceManager {
    pub fn new(currency: CryptoCurrency) -> Self {
        Self {
            currency,
            ..Self::default()
        }
    }

    pub fn currency(&self) -> CryptoCurrency {
        self.currency
    }

    /// Refresh every balance with one explorer call.
    ///
    /// The previous map is replaced wholesale, so keys that disappeared from
    /// the wallet stop being counted.
    pub fn update_all_balances<E>(
        &mut self,
        explorer: &E,
        xpubs: &[XPubs],
        imported: &[String],
    ) -> Result<(), WalletError>
    where
        E: BlockExplorer + ?Sized,
    {
        let (mut legacy, segwit) = split_xpubs(xpubs);
        legacy.extend(imported.iter().cloned());
        let balances = explorer.get_balance(self.currency, &legacy, &segwit, BalanceFilter::RemoveUnspendable)?;

        let imported: HashSet<String> = imported.iter().cloned().collect();
        self.imported_balance = imported
            .iter()
            .filter_map(|a| balances.get(a))
            .map(|b| b.final_balance)
            .sum();
        self.wallet_balance = legacy
            .iter()
            .chain(&segwit)
            .collect::<HashSet<_>>()
            .into_iter()
            .filter_map(|k| balances.get(k))
            .map(|b| b.final_balance)
            .sum();
        self.balances = balances;
        self.imported = imported;
        debug!(
            currency = self.currency.ticker(),
            keys = self.balances.len(),
            wallet = self.wallet_balance,
            "balances updated"
        );
        Ok(())
    }

    /// Debit an address locally right after a spend, before the explorer catches up.
    pub fn subtract_amount_from_address_balance(&mut self, address: &str, amount: u64) -> Result<(), WalletError> {
        let balance = self
            .balances
            .get_mut(address)
            .ok_or_else(|| WalletError::HdWallet(format!("no balance recorded for {address}")))?;
        let amount = i64::try_from(amount).map_err(|_| WalletError::Protocol("amount out of range".into()))?;
        balance.final_balance -= amount;
        self.wallet_balance -= amount;
        if self.imported.contains(address) {
            self.imported_balance -= amount;
        }
        Ok(())
    }

    pub fn balance(&self, key: &str) -> Option<&Balance> {
        self.balances.get(key)
    }

    /// Combined balance of an account's extended keys.
    pub fn account_balance(&self, xpubs: &XPubs) -> Balance {
        xpubs
            .xpubs
            .iter()
            .filter_map(|x| self.balances.get(&x.address))
            .fold(Balance::default(), |acc, b| acc.add(b))
    }

    /// Final balance of an account's extended keys (legacy plus segwit).
    pub fn address_balance(&self, xpubs: &XPubs) -> i64 {
        self.account_balance(xpubs).final_balance
    }

    /// Final balance of every account and imported address.
    pub fn wallet_balance(&self) -> i64 {
        self.wallet_balance
    }

    pub fn imported_addresses_balance(&self) -> i64 {
        self.imported_balance
    }
}
