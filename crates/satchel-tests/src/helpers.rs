//! Shared collaborators and fixtures for the scenario tests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use satchel_core::config::WalletConfig;
use satchel_core::constants::CryptoCurrency;
use satchel_core::error::ServiceError;
use satchel_core::traits::{BlockExplorer, WalletStorage};
use satchel_core::types::{Balance, BalanceFilter, DerivationKind, MultiAddressResponse, Utxo};
use satchel_wallet::{HdWallet, PayloadManager, Seed};

/// BIP39 phrase of all-zero 128-bit entropy.
pub const ABANDON: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// One recorded `update` call.
#[derive(Debug, Clone)]
pub struct SavedUpdate {
    pub guid: String,
    pub sync_addresses: Vec<String>,
    pub new_checksum: String,
    pub old_checksum: Option<String>,
    pub device: String,
}

/// Storage service holding wrapper JSON per GUID.
///
/// Rejects updates whose previous checksum does not match the stored copy,
/// like the real service does.
#[derive(Default)]
pub struct MockStorage {
    records: Mutex<HashMap<String, (String, String)>>,
    updates: Mutex<Vec<SavedUpdate>>,
    failures: Mutex<Vec<ServiceError>>,
}

impl MockStorage {
    /// Queue an error for the next call; queued errors are used in order.
    pub fn fail_next(&self, err: ServiceError) {
        self.failures.lock().push(err);
    }

    pub fn record(&self, guid: &str) -> Option<String> {
        self.records.lock().get(guid).map(|(json, _)| json.clone())
    }

    pub fn updates(&self) -> Vec<SavedUpdate> {
        self.updates.lock().clone()
    }

    fn check(&self) -> Result<(), ServiceError> {
        let mut failures = self.failures.lock();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.remove(0))
        }
    }
}

impl WalletStorage for MockStorage {
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
        checksum: &str,
        _email: Option<&str>,
        _device: &str,
    ) -> Result<(), ServiceError> {
        self.check()?;
        let mut records = self.records.lock();
        if records.contains_key(guid) {
            return Err(ServiceError::remote(500, "Wallet already exists"));
        }
        records.insert(guid.to_string(), (wrapper_json.to_string(), checksum.to_string()));
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
        device: &str,
    ) -> Result<(), ServiceError> {
        self.check()?;
        let mut records = self.records.lock();
        let stored = records
            .get(guid)
            .ok_or_else(|| ServiceError::remote(500, "Unknown Wallet Identifier"))?;
        if old_checksum != Some(stored.1.as_str()) {
            return Err(ServiceError::remote(500, "Checksum did not match"));
        }
        records.insert(guid.to_string(), (wrapper_json.to_string(), new_checksum.to_string()));
        self.updates.lock().push(SavedUpdate {
            guid: guid.to_string(),
            sync_addresses: sync_addresses.to_vec(),
            new_checksum: new_checksum.to_string(),
            old_checksum: old_checksum.map(str::to_string),
            device: device.to_string(),
        });
        Ok(())
    }
}

/// Explorer answering from fixed data.
#[derive(Default)]
pub struct MockExplorer {
    pub balances: HashMap<String, Balance>,
    pub multi_address: MultiAddressResponse,
    pub utxos: Vec<Utxo>,
    pub pushed: Mutex<Vec<(CryptoCurrency, String)>>,
}

impl MockExplorer {
    /// Report activity for `key`.
    pub fn with_activity(mut self, key: &str, final_balance: i64) -> Self {
        self.balances.insert(
            key.to_string(),
            Balance {
                final_balance,
                total_received: final_balance,
                tx_count: 1,
            },
        );
        self
    }
}

impl BlockExplorer for MockExplorer {
    fn get_balance(
        &self,
        _currency: CryptoCurrency,
        legacy: &[String],
        segwit: &[String],
        _filter: BalanceFilter,
    ) -> Result<HashMap<String, Balance>, ServiceError> {
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
        let mut page = self.multi_address.clone();
        page.txs = page.txs.into_iter().skip(offset as usize).take(limit as usize).collect();
        Ok(page)
    }

    fn get_unspent_outputs(
        &self,
        _currency: CryptoCurrency,
        _legacy: &[String],
        _segwit: &[String],
    ) -> Result<Vec<Utxo>, ServiceError> {
        Ok(self.utxos.clone())
    }

    fn push_tx(&self, currency: CryptoCurrency, raw_tx_hex: &str) -> Result<(), ServiceError> {
        self.pushed.lock().push((currency, raw_tx_hex.to_string()));
        Ok(())
    }
}

/// Config with a cheap iteration count for tests that do not check it.
pub fn fast_config() -> WalletConfig {
    WalletConfig {
        pbkdf2_iterations: 10,
        ..WalletConfig::default()
    }
}

/// HD tree of [`ABANDON`] with `n` accounts of both derivations.
pub fn abandon_wallet(n: u32) -> HdWallet {
    let seed = Seed::from_mnemonic(ABANDON).expect("valid mnemonic");
    HdWallet::from_seed(seed, "", n, &[DerivationKind::Legacy, DerivationKind::Segwit]).expect("derivable")
}

pub type TestManager = PayloadManager<MockStorage, MockExplorer>;

/// Manager over fresh mocks.
pub fn manager(explorer: MockExplorer, config: WalletConfig) -> (Arc<MockStorage>, Arc<MockExplorer>, TestManager) {
    let storage = Arc::new(MockStorage::default());
    let explorer = Arc::new(explorer);
    let manager = PayloadManager::new(Arc::clone(&storage), Arc::clone(&explorer), config);
    (storage, explorer, manager)
}
