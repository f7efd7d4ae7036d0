//! Client configuration passed into the wallet core.
//!
//! Provides [`WalletConfig`] with defaults for device identity and payload
//! settings. Values can be layered from a TOML file and `SATCHEL_*`
//! environment variables with [`WalletConfig::load`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_PBKDF2_ITERATIONS;

/// Backend environment the client talks to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Staging,
    Dev,
}

/// Device and payload settings for one wallet client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct WalletConfig {
    /// Device name recorded on saves and on imported addresses.
    pub device_name: String,
    /// Client version recorded on imported addresses.
    pub app_version: String,
    pub environment: Environment,
    /// API code sent to the remote services.
    pub api_code: String,
    /// Label given to the first account of a new wallet.
    pub default_account_name: String,
    /// PBKDF2 iterations used for freshly created wallets.
    pub pbkdf2_iterations: u32,
    /// Create and upgrade to the segwit-capable payload version.
    pub v4_enabled: bool,
    /// Log level filter string (e.g. "info", "satchel_wallet=debug").
    pub log_level: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            device_name: "satchel".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: Environment::Production,
            api_code: String::new(),
            default_account_name: "My Bitcoin Wallet".to_string(),
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            v4_enabled: true,
            log_level: "info".to_string(),
        }
    }
}

impl WalletConfig {
    /// Load defaults, then `path` if it exists, then `SATCHEL_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ::config::ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(false),
            );
        }
        builder
            .add_source(::config::Environment::with_prefix("SATCHEL").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_iterations() {
        let cfg = WalletConfig::default();
        assert_eq!(cfg.pbkdf2_iterations, 5000);
    }

    #[test]
    fn default_account_name() {
        let cfg = WalletConfig::default();
        assert_eq!(cfg.default_account_name, "My Bitcoin Wallet");
        assert!(cfg.v4_enabled);
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let cfg = WalletConfig::load(None).unwrap();
        assert_eq!(cfg.default_account_name, WalletConfig::default().default_account_name);
    }

    #[test]
    fn load_from_toml_overrides_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("satchel.toml");
        std::fs::write(
            &path,
            "device_name = \"android\"\nenvironment = \"staging\"\npbkdf2_iterations = 7000\n",
        )
        .unwrap();

        let cfg = WalletConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.device_name, "android");
        assert_eq!(cfg.environment, Environment::Staging);
        assert_eq!(cfg.pbkdf2_iterations, 7000);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = WalletConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg, WalletConfig::load(None).unwrap());
    }

    #[test]
    fn config_is_clone_and_debug() {
        let cfg = WalletConfig::default();
        let debug = format!("{:?}", cfg.clone());
        assert!(debug.contains("WalletConfig"));
    }
}
