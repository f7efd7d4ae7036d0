//! Scripted collaborators shared by the unit tests of this crate.

use std::collections::HashMap;

use parking_lot::Mutex;

use satchel_core::constants::CryptoCurrency;
use satchel_core::error::ServiceError;
use satchel_core::traits::{BlockExplorer, WalletStorage};
use satchel_core::types::{Balance, BalanceFilter, MultiAddressResponse, Utxo};

/// Explorer answering from fixed data and recording what it was asked.
#[derive(Default)]
pub struct StubExplorer {
    pub balances: HashMap<String, Balance>,
    pub multi_address: MultiAddressResponse,
    pub utxos: Vec<Utxo>,
    pub fail_with: Option<ServiceError>,
    pub balance_queries: Mutex<Vec<(Vec<String>, Vec<String>)>>,
    pub pushed: Mutex<Vec<String>>,
}

impl StubExplorer {
    pub fn with_balance(mut self, key: &str, final_balance: i64, tx_count: u64) -> Self {
        self.balances.insert(
            key.to_string(),
            Balance {
                final_balance,
                total_received: final_balance,
                tx_count,
            },
        );
        self
    }

    fn check(&self) -> Result<(), ServiceError> {
        match &self.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl BlockExplorer for StubExplorer {
    fn get_balance(
        &self,
        _currency: CryptoCurrency,
        legacy: &[String],
        segwit: &[String],
        _filter: BalanceFilter,
    ) -> Result<HashMap<String, Balance>, ServiceError> {
        self.check()?;
        self.balance_queries.lock().push((legacy.to_vec(), segwit.to_vec()));
        Ok(legacy
            .iter()
            .chain(segwit)
            .map(|k| (k.clone(), self.balances.get(k).copied().unwrap_or_default()))
            .collect())
    }

    fn get_multi_address(
        &self,
        _currency: CryptoCurrency,
        _legacy: &[String],
        _segwit: &[String],
        _only_show: Option<&[String]>,
        _filter: BalanceFilter,
        limit: u32,
        offset: u32,
    ) -> Result<MultiAddressResponse, ServiceError> {
        self.check()?;
        let mut page = self.multi_address.clone();
        page.txs = page
            .txs
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(page)
    }

    fn get_unspent_outputs(
        &self,
        _currency: CryptoCurrency,
        _legacy: &[String],
        _segwit: &[String],
    ) -> Result<Vec<Utxo>, ServiceError> {
        self.check()?;
        Ok(self.utxos.clone())
    }

    fn push_tx(&self, _currency: CryptoCurrency, raw_tx_hex: &str) -> Result<(), ServiceError> {
        self.check()?;
        self.pushed.lock().push(raw_tx_hex.to_string());
        Ok(())
    }
}

/// Arguments of one `update` call.
#[derive(Debug, Clone)]
pub struct UpdateCall {
    pub sync_addresses: Vec<String>,
    pub new_checksum: String,
    pub old_checksum: Option<String>,
}

/// Storage keeping wrapper JSON per GUID. `fail_next` makes the next call fail.
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<String, String>>,
    updates: Mutex<Vec<UpdateCall>>,
    failure: Mutex<Option<ServiceError>>,
}

impl MemoryStorage {
    pub fn fail_next(&self, err: ServiceError) {
        *self.failure.lock() = Some(err);
    }

    pub fn record(&self, guid: &str) -> Option<String> {
        self.records.lock().get(guid).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().len()
    }

    pub fn last_update(&self) -> Option<UpdateCall> {
        self.updates.lock().last().cloned()
    }

    fn check(&self) -> Result<(), ServiceError> {
        match self.failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl WalletStorage for MemoryStorage {
    fn fetch(&self, guid: &str, _shared_key: &str) -> Result<String, ServiceError> {
        self.check()?;
        self.record(guid)
            .ok_or_else(|| ServiceError::remote(500, "Unknown Wallet Identifier. Please check you entered it correctly."))
    }

    fn insert(
        &self,
        guid: &str,
        _shared_key: &str,
        wrapper_json: &str,
        _checksum: &str,
        _email: Option<&str>,
        _device: &str,
    ) -> Result<(), ServiceError> {
        self.check()?;
        self.records.lock().insert(guid.to_string(), wrapper_json.to_string());
        Ok(())
    }

    fn update(
        &self,
        guid: &str,
        _shared_key: &str,
        sync_addresses: &[String],
        wrapper_json: &str,
        new_checksum: &str,
        old_checksum: Option<&str>,
        _device: &str,
    ) -> Result<(), ServiceError> {
        self.check()?;
        self.records.lock().insert(guid.to_string(), wrapper_json.to_string());
        self.updates.lock().push(UpdateCall {
            sync_addresses: sync_addresses.to_vec(),
            new_checksum: new_checksum.to_string(),
            old_checksum: old_checksum.map(str::to_string),
        });
        Ok(())
    }
}
