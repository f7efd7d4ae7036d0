//! The outer `{version, pbkdf2_iterations, payload}` envelope.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use satchel_core::constants::DEFAULT_PBKDF2_ITERATIONS;

use crate::encryption;
use crate::error::WalletError;

use super::wallet::Wallet;

pub const V3: u32 = 3;
pub const V4: u32 = 4;
/// Newest payload version this client reads.
pub const SUPPORTED_VERSION: u32 = V4;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WalletWrapper {
    pub version: u32,
    #[serde(default)]
    pub pbkdf2_iterations: i64,
    pub payload: String,
}

impl WalletWrapper {
    /// Encrypt `wallet` under `password`, using the wallet's iteration count
    /// and wrapper version.
    pub fn wrap(wallet: &Wallet, password: &str) -> Result<Self, WalletError> {
        let iterations = wallet.pbkdf2_iterations();
        let payload = encryption::encrypt(wallet.to_json()?.as_bytes(), password, iterations)?;
        Ok(Self {
            version: wallet.wrapper_version(),
            pbkdf2_iterations: i64::from(iterations),
            payload,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, WalletError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, WalletError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Iteration count, falling back to the default when absent or non-positive.
    pub fn iterations(&self) -> u32 {
        u32::try_from(self.pbkdf2_iterations)
            .ok()
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_PBKDF2_ITERATIONS)
    }

    /// Decrypt and parse the payload.
    ///
    /// A wrong password, corrupt ciphertext and a plaintext that is not a
    /// wallet document all fail with [`WalletError::Decryption`].
    pub fn decrypt_payload(&self, password: &str) -> Result<Wallet, WalletError> {
        if self.version > SUPPORTED_VERSION {
            return Err(WalletError::UnsupportedVersion(self.version));
        }
        let plain = encryption::decrypt(&self.payload, password, self.iterations())?;
        let json = String::from_utf8(plain)
            .map_err(|_| WalletError::Decryption("payload is not utf-8".into()))?;
        Wallet::from_json(&json, self.version)
            .map_err(|e| WalletError::Decryption(format!("payload is not a wallet: {e}")))
    }
}

/// Hex SHA-256 of a serialized wrapper, used for optimistic save checks.
pub fn checksum(wrapper_json: &str) -> String {
    hex::encode(Sha256::digest(wrapper_json.as_bytes()))
}
