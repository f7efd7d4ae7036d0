//! Wallet-level options block.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use satchel_core::constants::{DEFAULT_FEE_PER_KB, DEFAULT_LOGOUT_TIME_MS, DEFAULT_PBKDF2_ITERATIONS};

fn default_fee_per_kb() -> u64 {
    DEFAULT_FEE_PER_KB
}

fn default_logout_time() -> u64 {
    DEFAULT_LOGOUT_TIME_MS
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Options {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pbkdf2_iterations: Option<i64>,
    #[serde(default = "default_fee_per_kb")]
    pub fee_per_kb: u64,
    #[serde(default)]
    pub html5_notifications: bool,
    #[serde(default = "default_logout_time")]
    pub logout_time: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: Some(i64::from(DEFAULT_PBKDF2_ITERATIONS)),
            fee_per_kb: DEFAULT_FEE_PER_KB,
            html5_notifications: false,
            logout_time: DEFAULT_LOGOUT_TIME_MS,
            extra: Map::new(),
        }
    }
}

impl Options {
    pub fn with_iterations(iterations: u32) -> Self {
        Self {
            pbkdf2_iterations: Some(i64::from(iterations)),
            ..Self::default()
        }
    }

    /// Stored iteration count when it is usable.
    pub fn iterations(&self) -> Option<u32> {
        self.pbkdf2_iterations
            .filter(|&n| n > 0)
            .and_then(|n| u32::try_from(n).ok())
    }
}

/// Resolve the iteration count of a payload.
///
/// The default applies first, a legacy `wallet_options` block overrides it,
/// and `options` overrides both.
pub fn resolve_iterations(options: Option<&Options>, wallet_options: Option<&Options>) -> u32 {
    options
        .and_then(Options::iterations)
        .or_else(|| wallet_options.and_then(Options::iterations))
        .unwrap_or(DEFAULT_PBKDF2_ITERATIONS)
}
