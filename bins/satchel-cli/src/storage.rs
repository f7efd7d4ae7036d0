//! Local collaborators for the command-line client.
//!
//! [`FileStorage`] keeps each encrypted wallet record as a JSON file under a
//! data directory and enforces the same checksum rule as the remote service.
//! [`OfflineExplorer`] answers every chain query with "no activity" and
//! refuses to broadcast.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use satchel_core::constants::CryptoCurrency;
use satchel_core::error::ServiceError;
use satchel_core::traits::{BlockExplorer, WalletStorage};
use satchel_core::types::{Balance, BalanceFilter, MultiAddressResponse, Utxo};

const UNKNOWN_WALLET: &str = "Unknown Wallet Identifier. Please check you entered it correctly.";

/// One stored wallet record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
struct Record {
    shared_key: String,
    payload: String,
    checksum: String,
    #[serde(default)]
    email: Option<String>,
    device: String,
    #[serde(default)]
    sync_addresses: Vec<String>,
}

/// Directory-backed [`WalletStorage`]: `<root>/<guid>.json` per wallet.
pub struct FileStorage {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, guid: &str) -> Result<PathBuf, ServiceError> {
        if guid.is_empty() || !guid.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ServiceError::remote(500, UNKNOWN_WALLET));
        }
        Ok(self.root.join(format!("{guid}.json")))
    }

    fn read(&self, guid: &str, shared_key: &str) -> Result<Record, ServiceError> {
        let path = self.path_for(guid)?;
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ServiceError::remote(500, UNKNOWN_WALLET));
            }
            Err(e) => return Err(ServiceError::transport(format!("{}: {e}", path.display()))),
        };
        let record: Record = serde_json::from_str(&data)
            .map_err(|e| ServiceError::transport(format!("{}: {e}", path.display())))?;
        if record.shared_key != shared_key {
            return Err(ServiceError::remote(500, UNKNOWN_WALLET));
        }
        Ok(record)
    }

    fn write(&self, guid: &str, record: &Record) -> Result<(), ServiceError> {
        let path = self.path_for(guid)?;
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(record).map_err(|e| ServiceError::transport(e.to_string()))?;
        fs::write(&tmp, data)
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|e| ServiceError::transport(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "wallet record written");
        Ok(())
    }

    /// Addresses sent with the last save of `guid`.
    pub fn sync_addresses(&self, guid: &str, shared_key: &str) -> Result<Vec<String>, ServiceError> {
        Ok(self.read(guid, shared_key)?.sync_addresses)
    }
}

impl WalletStorage for FileStorage {
    fn fetch(&self, guid: &str, shared_key: &str) -> Result<String, ServiceError> {
        Ok(self.read(guid, shared_key)?.payload)
    }

    fn insert(
        &self,
        guid: &str,
        shared_key: &str,
        wrapper_json: &str,
        checksum: &str,
        email: Option<&str>,
        device: &str,
    ) -> Result<(), ServiceError> {
        let _guard = self.write_lock.lock();
        if self.path_for(guid)?.exists() {
            return Err(ServiceError::remote(500, "Wallet identifier already exists"));
        }
        self.write(
            guid,
            &Record {
                shared_key: shared_key.to_string(),
                payload: wrapper_json.to_string(),
                checksum: checksum.to_string(),
                email: email.map(str::to_string),
                device: device.to_string(),
                sync_addresses: Vec::new(),
            },
        )
    }

    fn update(
        &self,
        guid: &str,
        shared_key: &str,
        sync_addresses: &[String],
        wrapper_json: &str,
        new_checksum: &str,
        old_checksum: Option<&str>,
        device: &str,
    ) -> Result<(), ServiceError> {
        let _guard = self.write_lock.lock();
        let mut record = self.read(guid, shared_key)?;
        if old_checksum.is_some_and(|old| old != record.checksum) {
            return Err(ServiceError::remote(500, "Checksum did not match"));
        }
        record.payload = wrapper_json.to_string();
        record.checksum = new_checksum.to_string();
        record.device = device.to_string();
        record.sync_addresses = sync_addresses.to_vec();
        self.write(guid, &record)
    }
}

/// [`BlockExplorer`] for running without a network.
///
/// Every key reports no activity, so recovery keeps only the first account.
#[derive(Debug, Default)]
pub struct OfflineExplorer;

impl BlockExplorer for OfflineExplorer {
    fn get_balance(
        &self,
        _currency: CryptoCurrency,
        _legacy: &[String],
        _segwit: &[String],
        _filter: BalanceFilter,
    ) -> Result<HashMap<String, Balance>, ServiceError> {
        Ok(HashMap::new())
    }

    fn get_multi_address(
        &self,
        _currency: CryptoCurrency,
        _legacy: &[String],
        _segwit: &[String],
        _only_show: Option<&[String]>,
        _filter: BalanceFilter,
        _limit: u32,
        _offset: u32,
    ) -> Result<MultiAddressResponse, ServiceError> {
        Ok(MultiAddressResponse::default())
    }

    fn get_unspent_outputs(
        &self,
        _currency: CryptoCurrency,
        _legacy: &[String],
        _segwit: &[String],
    ) -> Result<Vec<Utxo>, ServiceError> {
        Ok(Vec::new())
    }

    fn push_tx(&self, currency: CryptoCurrency, _raw_tx_hex: &str) -> Result<(), ServiceError> {
        Err(ServiceError::transport(format!("offline: cannot broadcast {} transactions", currency.ticker())))
    }
}

/// Identifier and shared key of the wallet used by default.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub guid: String,
    pub shared_key: String,
}

impl Session {
    pub fn load(path: &Path) -> io::Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).map(Some).map_err(io::Error::other),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn store(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(path, data)
    }
}
