//! Individually imported (non-HD) addresses.

use bitcoin::PrivateKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use satchel_core::config::WalletConfig;
use satchel_core::types::{XPub, XPubs};

use crate::encryption;
use crate::error::WalletError;
use crate::keys::legacy_address_of;

/// `tag` of an active imported address.
pub const NORMAL_ADDRESS: u32 = 0;
/// `tag` of an archived imported address.
pub const ARCHIVED_ADDRESS: u32 = 2;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ImportedAddress {
    #[serde(rename = "addr")]
    pub address: String,
    /// Base58 raw key, WIF, or second-password ciphertext. Absent for watch-only.
    #[serde(rename = "priv", default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub tag: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_device_version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ImportedAddress {
    /// Watch-only entry for a bare address.
    pub fn watch_only(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            private_key: None,
            label: None,
            tag: NORMAL_ADDRESS,
            created_time: None,
            created_device_name: None,
            created_device_version: None,
            extra: Map::new(),
        }
    }

    /// Entry for a private key, stored as Base58 of the raw secret.
    pub fn from_key(key: &PrivateKey, config: &WalletConfig) -> Result<Self, WalletError> {
        Ok(Self {
            address: legacy_address_of(key)?,
            private_key: Some(raw_key_base58(key)),
            label: Some(String::new()),
            tag: NORMAL_ADDRESS,
            created_time: Some(chrono::Utc::now().timestamp_millis()),
            created_device_name: Some(config.device_name.clone()),
            created_device_version: Some(config.app_version.clone()),
            extra: Map::new(),
        })
    }

    pub fn is_archived(&self) -> bool {
        self.tag == ARCHIVED_ADDRESS
    }

    pub fn set_archived(&mut self, archived: bool) {
        self.tag = if archived { ARCHIVED_ADDRESS } else { NORMAL_ADDRESS };
    }

    pub fn is_watch_only(&self) -> bool {
        self.private_key.as_deref().is_none_or(str::is_empty)
    }

    pub fn is_private_key_encrypted(&self) -> bool {
        self.private_key
            .as_deref()
            .is_some_and(|k| !encryption::is_base58(k))
    }

    /// Label for display; falls back to the address.
    pub fn display_label(&self) -> &str {
        match self.label.as_deref() {
            Some(label) if !label.is_empty() => label,
            _ => &self.address,
        }
    }

    pub fn xpubs(&self) -> XPubs {
        XPubs::new(vec![XPub::legacy(&self.address)])
    }
}

/// Base58 encoding of a key's 32 secret bytes, the stored `priv` format.
pub fn raw_key_base58(key: &PrivateKey) -> String {
    bs58::encode(key.inner.secret_bytes()).into_string()
}
