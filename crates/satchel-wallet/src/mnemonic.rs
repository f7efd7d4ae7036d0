//! Seed entropy and BIP-39 mnemonic backup.

use std::fmt;

use bip39::{Language, Mnemonic};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::WalletError;

/// Entropy length used for new wallets (12 words).
pub const DEFAULT_ENTROPY_LEN: usize = 16;

/// Raw seed entropy from which the mnemonic and HD seed are derived.
///
/// Secret material is zeroized on drop to prevent leaking key material
/// in freed memory.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Seed {
    entropy: Vec<u8>,
}

impl Seed {
    /// Generate fresh 128-bit entropy from the OS cryptographic RNG.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut entropy = vec![0u8; DEFAULT_ENTROPY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut entropy);
        Self { entropy }
    }

    /// Create a seed from raw entropy. Length must be 16 to 32 bytes in
    /// steps of 4, as BIP-39 requires.
    pub fn from_entropy(entropy: &[u8]) -> Result<Self, WalletError> {
        let len = entropy.len();
        if !(16..=32).contains(&len) || len % 4 != 0 {
            return Err(WalletError::InvalidMnemonic(format!(
                "entropy must be 16-32 bytes in steps of 4, got {len}"
            )));
        }
        Ok(Self {
            entropy: entropy.to_vec(),
        })
    }

    /// Restore from the hex form stored in the payload.
    pub fn from_hex(hex_str: &str) -> Result<Self, WalletError> {
        let bytes = Zeroizing::new(
            hex::decode(hex_str).map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?,
        );
        Self::from_entropy(&bytes)
    }

    /// Parse a BIP-39 phrase. Whitespace and case are normalized first.
    pub fn from_mnemonic(phrase: &str) -> Result<Self, WalletError> {
        let normalized = Zeroizing::new(
            phrase
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase(),
        );
        let m = Mnemonic::parse_in(Language::English, normalized.as_str())
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        Self::from_entropy(&m.to_entropy())
    }

    /// Get the raw entropy. Handle with care.
    pub fn as_bytes(&self) -> &[u8] {
        &self.entropy
    }

    /// Hex form stored as `seed_hex` in the payload.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.entropy)
    }

    /// English mnemonic words for this entropy.
    pub fn mnemonic(&self) -> Result<Vec<String>, WalletError> {
        let m = Mnemonic::from_entropy_in(Language::English, &self.entropy)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        Ok(m.words().map(str::to_string).collect())
    }

    /// 512-bit BIP-39 seed used as the HD root.
    pub fn hd_seed(&self, passphrase: &str) -> Result<Zeroizing<[u8; 64]>, WalletError> {
        let m = Mnemonic::from_entropy_in(Language::English, &self.entropy)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        Ok(Zeroizing::new(m.to_seed_normalized(passphrase)))
    }
}

impl PartialEq for Seed {
    fn eq(&self, other: &Self) -> bool {
        self.entropy == other.entropy
    }
}

impl Eq for Seed {}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seed")
            .field("entropy", &"[REDACTED]")
            .finish()
    }
}
