//! The decrypted wallet payload.
//!
//! [`Wallet`] is the JSON document stored (encrypted) by the storage service.
//! It owns the HD body, the imported addresses and the options, and enforces
//! second-password ("double") encryption of every private key it holds.
//! Fields this client does not model are kept in `extra` and written back
//! unchanged.

use bitcoin::PrivateKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use satchel_core::config::WalletConfig;
use satchel_core::types::{DerivationKind, XPubs};

use crate::encryption;
use crate::error::WalletError;
use crate::keys::{HdWallet, legacy_address_of, parse_private_key};

use super::account::Account;
use super::body::{WalletBody, account_label, new_account};
use super::imported::{ImportedAddress, NORMAL_ADDRESS, raw_key_base58};
use super::options::{Options, resolve_iterations};
use super::wrapper::{V3, V4};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Wallet {
    pub guid: String,
    #[serde(rename = "sharedKey")]
    pub shared_key: String,
    #[serde(default)]
    pub double_encryption: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpasswordhash: Option<String>,
    #[serde(rename = "metadataHDNode", default, skip_serializing_if = "Option::is_none")]
    pub metadata_hd_node: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub tx_notes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Options>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_options: Option<Options>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hd_wallets: Vec<WalletBody>,
    #[serde(default)]
    pub keys: Vec<ImportedAddress>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(skip)]
    wrapper_version: u32,
}

impl Wallet {
    /// New wallet with a fresh seed, GUID and shared key.
    pub fn new(default_label: &str, v4: bool, config: &WalletConfig) -> Result<Self, WalletError> {
        let body = WalletBody::create(default_label, v4)?;
        Ok(Self::with_body(body, v4, config))
    }

    /// New wallet around an existing (e.g. recovered) HD body.
    pub fn with_body(body: WalletBody, v4: bool, config: &WalletConfig) -> Self {
        Self {
            guid: uuid::Uuid::new_v4().to_string(),
            shared_key: uuid::Uuid::new_v4().to_string(),
            double_encryption: false,
            dpasswordhash: None,
            metadata_hd_node: None,
            tx_notes: Map::new(),
            options: Some(Options::with_iterations(config.pbkdf2_iterations)),
            wallet_options: None,
            hd_wallets: vec![body],
            keys: Vec::new(),
            extra: Map::new(),
            wrapper_version: if v4 { V4 } else { V3 },
        }
    }

    /// Parse a decrypted payload written under wrapper `version`.
    ///
    /// Version 4 payloads must hold only version 4 accounts and earlier
    /// versions only version 3 accounts.
    pub fn from_json(json: &str, version: u32) -> Result<Self, WalletError> {
        let mut wallet: Wallet = serde_json::from_str(json)?;
        wallet.wrapper_version = version;
        let expected = if version >= V4 { 4 } else { 3 };
        let mismatched = wallet
            .hd_wallets
            .iter()
            .flat_map(|b| b.accounts.iter())
            .any(|a| a.version() != expected);
        if mismatched {
            return Err(WalletError::Serialization(format!(
                "account shape does not match payload version {version}"
            )));
        }
        wallet.fix_pbkdf2_iterations();
        Ok(wallet)
    }

    pub fn to_json(&self) -> Result<String, WalletError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn wrapper_version(&self) -> u32 {
        self.wrapper_version
    }

    pub fn set_wrapper_version(&mut self, version: u32) {
        self.wrapper_version = version;
    }

    pub fn is_upgraded_to_v3(&self) -> bool {
        !self.hd_wallets.is_empty()
    }

    pub fn is_upgraded_to_v4(&self) -> bool {
        self.wrapper_version >= V4
    }

    /// The HD body. Only the first is ever used.
    pub fn wallet_body(&self) -> Option<&WalletBody> {
        self.hd_wallets.first()
    }

    pub fn wallet_body_mut(&mut self) -> Option<&mut WalletBody> {
        self.hd_wallets.first_mut()
    }

    fn body_or_err(&self) -> Result<&WalletBody, WalletError> {
        self.wallet_body()
            .ok_or_else(|| WalletError::HdWallet("wallet has no hd body".into()))
    }

    fn body_mut_or_err(&mut self) -> Result<&mut WalletBody, WalletError> {
        self.wallet_body_mut()
            .ok_or_else(|| WalletError::HdWallet("wallet has no hd body".into()))
    }

    pub fn accounts(&self) -> &[Account] {
        self.wallet_body().map(|b| b.accounts.as_slice()).unwrap_or_default()
    }

    /// Iteration count used for the wrapper and second-password secrets.
    pub fn pbkdf2_iterations(&self) -> u32 {
        resolve_iterations(self.options.as_ref(), self.wallet_options.as_ref())
    }

    /// Settle the iteration count into `options` so the next save uses it.
    fn fix_pbkdf2_iterations(&mut self) {
        let iterations = self.pbkdf2_iterations();
        let options = self.options.get_or_insert_with(Options::default);
        options.pbkdf2_iterations = Some(i64::from(iterations));
    }

    pub fn fee_per_kb(&self) -> u64 {
        self.options.as_ref().map(|o| o.fee_per_kb).unwrap_or_else(|| Options::default().fee_per_kb)
    }

    // -- second password --------------------------------------------------

    /// Check a second password against the stored hash.
    ///
    /// A double-encrypted wallet requires a matching password; any other
    /// wallet rejects one being supplied.
    pub fn validate_second_password(&self, second_password: Option<&str>) -> Result<(), WalletError> {
        match (self.double_encryption, second_password) {
            (true, None) => Err(WalletError::Decryption("second password required".into())),
            (true, Some(pw)) => {
                let hash = encryption::second_password_hash(&self.shared_key, pw, self.pbkdf2_iterations());
                if self.dpasswordhash.as_deref() == Some(hash.as_str()) {
                    Ok(())
                } else {
                    Err(WalletError::Decryption("second password incorrect".into()))
                }
            }
            (false, Some(_)) => Err(WalletError::Decryption(
                "second password supplied for a wallet without double encryption".into(),
            )),
            (false, None) => Ok(()),
        }
    }

    /// Plaintext of a stored secret.
    fn reveal(&self, stored: &str, second_password: Option<&str>) -> Result<String, WalletError> {
        match (self.double_encryption, second_password) {
            (true, Some(pw)) => {
                encryption::decrypt_secret(stored, &self.shared_key, pw, self.pbkdf2_iterations())
            }
            (true, None) => Err(WalletError::Decryption("second password required".into())),
            (false, _) => Ok(stored.to_string()),
        }
    }

    /// Stored form of a new secret.
    fn conceal(&self, plain: &str, second_password: Option<&str>) -> Result<String, WalletError> {
        match second_password {
            Some(pw) if !plain.is_empty() => {
                encryption::encrypt_secret(plain, &self.shared_key, pw, self.pbkdf2_iterations())
            }
            _ => Ok(plain.to_string()),
        }
    }

    /// Encrypt every private key under a new second password.
    pub fn set_second_password(&mut self, second_password: &str) -> Result<(), WalletError> {
        if self.double_encryption {
            return Err(WalletError::Encryption("wallet is already double encrypted".into()));
        }
        let pw = Some(second_password);
        let snapshot = self.clone();
        let conceal = |s: &str| snapshot.conceal(s, pw);
        self.map_all_secrets(conceal)?;
        self.dpasswordhash = Some(encryption::second_password_hash(
            &self.shared_key,
            second_password,
            self.pbkdf2_iterations(),
        ));
        self.double_encryption = true;
        info!("second password enabled");
        Ok(())
    }

    /// Decrypt every private key and switch double encryption off.
    pub fn remove_second_password(&mut self, second_password: &str) -> Result<(), WalletError> {
        self.validate_second_password(Some(second_password))?;
        let snapshot = self.clone();
        let reveal = |s: &str| snapshot.reveal(s, Some(second_password));
        self.map_all_secrets(reveal)?;
        self.dpasswordhash = None;
        self.double_encryption = false;
        info!("second password removed");
        Ok(())
    }

    fn map_all_secrets<F>(&mut self, f: F) -> Result<(), WalletError>
    where
        F: Fn(&str) -> Result<String, WalletError>,
    {
        for imported in &mut self.keys {
            if let Some(k) = imported.private_key.as_mut().filter(|k| !k.is_empty()) {
                let rewritten = f(k.as_str())?;
                *k = rewritten;
            }
        }
        for body in &mut self.hd_wallets {
            if !body.seed_hex.is_empty() {
                body.seed_hex = f(&body.seed_hex)?;
            }
            for account in &mut body.accounts {
                account.map_private_keys(&f)?;
            }
        }
        Ok(())
    }

    /// True when every private key's stored form matches the double
    /// encryption flag. Watch-only entries are ignored.
    pub fn is_encryption_consistent(&self) -> bool {
        let imported = self.keys.iter().filter_map(|k| k.private_key.as_deref());
        let hd = self
            .hd_wallets
            .iter()
            .flat_map(|b| b.accounts.iter())
            .flat_map(|a| a.private_keys());
        imported.chain(hd).filter(|k| !k.is_empty()).all(|k| {
            if self.double_encryption {
                encryption::is_encrypted_key(k)
            } else {
                encryption::is_base58(k)
            }
        })
    }

    // -- hd ---------------------------------------------------------------

    /// HD tree with private keys, decrypting secrets when needed.
    pub fn decrypt_hd_wallet(&self, second_password: Option<&str>) -> Result<HdWallet, WalletError> {
        self.validate_second_password(second_password)?;
        let body = self.body_or_err()?;
        body.restore_hd_wallet(|s| self.reveal(s, second_password))
    }

    /// HD tree rebuilt from xpubs only.
    pub fn watch_only_hd_wallet(&self) -> Result<HdWallet, WalletError> {
        self.body_or_err()?.watch_only_hd_wallet()
    }

    /// Keys of every non-archived account.
    pub fn active_xpubs(&self) -> Vec<XPubs> {
        self.wallet_body().map(WalletBody::active_xpubs).unwrap_or_default()
    }

    /// Derive and append a new account.
    pub fn add_account(&mut self, label: &str, second_password: Option<&str>) -> Result<&Account, WalletError> {
        let hd = self.decrypt_hd_wallet(second_password)?;
        let v4 = self.is_upgraded_to_v4();
        let index = self.accounts().len() as u32;
        let legacy = hd.derive_account(DerivationKind::Legacy, index)?;
        let segwit = if v4 {
            Some(hd.derive_account(DerivationKind::Segwit, index)?)
        } else {
            None
        };

        let mut account = new_account(label.to_string(), &legacy, segwit.as_ref())?;
        account.map_private_keys(|s| self.conceal(s, second_password))?;

        let body = self.body_mut_or_err()?;
        body.accounts.push(account);
        debug!(index, "account added");
        Ok(&body.accounts[index as usize])
    }

    // -- upgrades ---------------------------------------------------------

    /// Create the HD body on a wallet that has only imported addresses.
    pub fn upgrade_v2_to_v3(&mut self, second_password: Option<&str>, label: &str) -> Result<(), WalletError> {
        self.validate_second_password(second_password)?;
        if self.is_upgraded_to_v3() {
            return Ok(());
        }
        let mut body = WalletBody::create(label, false)?;
        body.seed_hex = self.conceal(&body.seed_hex, second_password)?;
        for account in &mut body.accounts {
            account.map_private_keys(|s| self.conceal(s, second_password))?;
        }
        self.hd_wallets.push(body);
        self.wrapper_version = V3;
        info!("payload upgraded to v3");
        Ok(())
    }

    /// Add a segwit derivation to every account.
    pub fn upgrade_v3_to_v4(&mut self, second_password: Option<&str>) -> Result<(), WalletError> {
        let hd = self.decrypt_hd_wallet(second_password)?;
        let snapshot = self.clone();
        let conceal = |s: &str| snapshot.conceal(s, second_password);
        self.body_mut_or_err()?.upgrade_accounts_to_v4(&hd, conceal)?;
        self.wrapper_version = V4;
        info!("payload upgraded to v4");
        Ok(())
    }

    // -- imported addresses -----------------------------------------------

    /// Add an imported address, encrypting its key under the second password.
    pub fn add_imported_address(
        &mut self,
        mut address: ImportedAddress,
        second_password: Option<&str>,
    ) -> Result<&ImportedAddress, WalletError> {
        self.validate_second_password(second_password)?;
        if self.contains_imported_address(&address.address) {
            return Err(WalletError::HdWallet(format!("address {} already imported", address.address)));
        }
        if let Some(key) = address.private_key.as_deref() {
            address.private_key = Some(self.conceal(key, second_password)?);
        }
        self.keys.push(address);
        let last = self.keys.len() - 1;
        Ok(&self.keys[last])
    }

    pub fn add_imported_address_from_key(
        &mut self,
        key: &PrivateKey,
        second_password: Option<&str>,
        config: &WalletConfig,
    ) -> Result<&ImportedAddress, WalletError> {
        let address = ImportedAddress::from_key(key, config)?;
        self.add_imported_address(address, second_password)
    }

    /// Attach a private key to the matching (usually watch-only) entry.
    pub fn set_key_for_imported_address(
        &mut self,
        key: &PrivateKey,
        second_password: Option<&str>,
    ) -> Result<&ImportedAddress, WalletError> {
        self.validate_second_password(second_password)?;
        let address = legacy_address_of(key)?;
        let stored = self.conceal(&raw_key_base58(key), second_password)?;
        let entry = self
            .keys
            .iter_mut()
            .find(|k| k.address == address)
            .ok_or_else(|| WalletError::NoSuchAddress(address.clone()))?;
        entry.private_key = Some(stored);
        Ok(entry)
    }

    pub fn imported_address(&self, address: &str) -> Option<&ImportedAddress> {
        self.keys.iter().find(|k| k.address == address)
    }

    pub fn imported_address_mut(&mut self, address: &str) -> Option<&mut ImportedAddress> {
        self.keys.iter_mut().find(|k| k.address == address)
    }

    pub fn contains_imported_address(&self, address: &str) -> bool {
        self.imported_address(address).is_some()
    }

    /// Addresses carrying `tag`.
    pub fn imported_address_strings(&self, tag: u32) -> Vec<String> {
        self.keys
            .iter()
            .filter(|k| k.tag == tag)
            .map(|k| k.address.clone())
            .collect()
    }

    pub fn non_archived_imported_addresses(&self) -> Vec<String> {
        self.imported_address_strings(NORMAL_ADDRESS)
    }

    /// The entry's label, or the address itself when unlabelled or unknown.
    pub fn label_from_imported_address<'a>(&'a self, address: &'a str) -> &'a str {
        self.imported_address(address)
            .map(ImportedAddress::display_label)
            .unwrap_or(address)
    }

    /// Decrypted signing key of an imported address.
    pub fn signing_key_for_imported_address(
        &self,
        address: &str,
        second_password: Option<&str>,
    ) -> Result<PrivateKey, WalletError> {
        self.validate_second_password(second_password)?;
        let entry = self
            .imported_address(address)
            .ok_or_else(|| WalletError::NoSuchAddress(address.to_string()))?;
        let stored = entry
            .private_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| WalletError::HdWallet(format!("{address} is watch-only")))?;
        parse_private_key(&self.reveal(stored, second_password)?)
    }

    // -- notes ------------------------------------------------------------

    pub fn tx_note(&self, tx_hash: &str) -> Option<&str> {
        self.tx_notes.get(tx_hash).and_then(Value::as_str)
    }

    /// Set a note; an empty note removes it.
    pub fn set_tx_note(&mut self, tx_hash: &str, note: &str) {
        if note.is_empty() {
            self.tx_notes.remove(tx_hash);
        } else {
            self.tx_notes.insert(tx_hash.to_string(), Value::String(note.to_string()));
        }
    }

    /// Label of the next account added with `default_label`.
    pub fn next_account_label(&self, default_label: &str) -> String {
        account_label(default_label, self.accounts().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WalletConfig {
        WalletConfig {
            pbkdf2_iterations: 10,
            ..WalletConfig::default()
        }
    }

    fn wallet(v4: bool) -> Wallet {
        Wallet::new("Main", v4, &config()).unwrap()
    }

    const WIF: &str = "L3wP9Q3gTZ9YwuTuB8nuczhWG9uEXQEE94PTWDZgpVttFzJbKSHL";
    const WIF_ADDR: &str = "1JjHeuviHUxCRGcVXYjt3XTbX8H1qifUt2";

    #[test]
    fn new_wallet_shape() {
        let w = wallet(true);
        assert_eq!(w.guid.len(), 36);
        assert_eq!(w.shared_key.len(), 36);
        assert_eq!(w.accounts().len(), 1);
        assert_eq!(w.wrapper_version(), V4);
        assert_eq!(w.pbkdf2_iterations(), 10);
        assert!(w.is_encryption_consistent());
    }

    #[test]
    fn json_round_trip_keeps_unknown_fields() {
        let mut w = wallet(false);
        w.extra.insert("address_book".into(), serde_json::json!([{"addr": "1x", "label": "bob"}]));
        w.extra.insert("tx_tags".into(), serde_json::json!({}));
        let json = w.to_json().unwrap();
        let back = Wallet::from_json(&json, V3).unwrap();
        assert_eq!(back.extra["address_book"][0]["label"], "bob");
        assert_eq!(back.to_json().unwrap(), json);
    }

    #[test]
    fn version_shape_mismatch_is_rejected() {
        let json = wallet(true).to_json().unwrap();
        assert!(matches!(Wallet::from_json(&json, V3), Err(WalletError::Serialization(_))));
    }

    #[test]
    fn iterations_come_from_wallet_options_when_options_lack_them() {
        let mut w = wallet(false);
        w.options = None;
        w.wallet_options = Some(Options::with_iterations(7777));
        let back = Wallet::from_json(&w.to_json().unwrap(), V3).unwrap();
        assert_eq!(back.pbkdf2_iterations(), 7777);
        assert_eq!(back.options.as_ref().and_then(Options::iterations), Some(7777));
    }

    #[test]
    fn second_password_rules() {
        let mut w = wallet(false);
        assert!(w.validate_second_password(None).is_ok());
        assert!(matches!(w.validate_second_password(Some("x")), Err(WalletError::Decryption(_))));

        w.set_second_password("hunter2").unwrap();
        assert!(w.double_encryption);
        assert!(w.validate_second_password(Some("hunter2")).is_ok());
        assert!(matches!(w.validate_second_password(Some("nope")), Err(WalletError::Decryption(_))));
        assert!(matches!(w.validate_second_password(None), Err(WalletError::Decryption(_))));
    }

    #[test]
    fn double_encryption_round_trip() {
        let mut w = wallet(true);
        let plain = w.clone();
        w.set_second_password("pw").unwrap();
        assert!(w.is_encryption_consistent());
        assert_ne!(w.hd_wallets[0].seed_hex, plain.hd_wallets[0].seed_hex);

        let hd = w.decrypt_hd_wallet(Some("pw")).unwrap();
        assert_eq!(hd.accounts()[0].xpubs(), plain.accounts()[0].xpubs());

        w.remove_second_password("pw").unwrap();
        assert_eq!(w.hd_wallets, plain.hd_wallets);
        assert!(w.is_encryption_consistent());
    }

    #[test]
    fn flipping_one_key_breaks_consistency() {
        let mut w = wallet(false);
        w.set_second_password("pw").unwrap();
        let plain_xpriv = wallet(false).hd_wallets[0].accounts[0]
            .xpriv_for(DerivationKind::Legacy)
            .unwrap()
            .to_string();
        if let Account::V3(a) = &mut w.hd_wallets[0].accounts[0] {
            a.xpriv = plain_xpriv;
        }
        assert!(!w.is_encryption_consistent());
    }

    #[test]
    fn add_account_encrypts_under_second_password() {
        let mut w = wallet(true);
        w.set_second_password("pw").unwrap();
        let account = w.add_account("Second", Some("pw")).unwrap();
        assert_eq!(account.label(), "Second");
        assert_eq!(account.version(), 4);
        assert!(w.is_encryption_consistent());
        assert_eq!(w.accounts().len(), 2);
        assert!(w.add_account("Third", None).is_err());
    }

    #[test]
    fn upgrade_v2_to_v3_then_v4() {
        let mut w = wallet(false);
        w.hd_wallets.clear();
        w.set_wrapper_version(2);
        w.set_second_password("pw").unwrap();

        w.upgrade_v2_to_v3(Some("pw"), "Main").unwrap();
        assert!(w.is_upgraded_to_v3());
        assert_eq!(w.wrapper_version(), V3);
        assert!(w.is_encryption_consistent());

        w.upgrade_v3_to_v4(Some("pw")).unwrap();
        assert_eq!(w.wrapper_version(), V4);
        assert_eq!(w.accounts()[0].version(), 4);
        assert!(w.is_encryption_consistent());
        assert!(w.accounts()[0].xpub_for(DerivationKind::Segwit).is_some());
    }

    #[test]
    fn imported_address_lifecycle() {
        let mut w = wallet(false);
        w.add_imported_address(ImportedAddress::watch_only(WIF_ADDR), None).unwrap();
        assert!(w.add_imported_address(ImportedAddress::watch_only(WIF_ADDR), None).is_err());
        assert!(w.signing_key_for_imported_address(WIF_ADDR, None).is_err());

        let key = PrivateKey::from_wif(WIF).unwrap();
        w.set_key_for_imported_address(&key, None).unwrap();
        let signing = w.signing_key_for_imported_address(WIF_ADDR, None).unwrap();
        assert_eq!(signing.inner, key.inner);
        assert_eq!(w.non_archived_imported_addresses(), vec![WIF_ADDR.to_string()]);
        assert_eq!(w.label_from_imported_address(WIF_ADDR), WIF_ADDR);
    }

    #[test]
    fn set_key_for_unknown_address_fails() {
        let mut w = wallet(false);
        let key = PrivateKey::from_wif(WIF).unwrap();
        assert!(matches!(
            w.set_key_for_imported_address(&key, None),
            Err(WalletError::NoSuchAddress(_))
        ));
    }

    #[test]
    fn imported_key_encrypted_with_second_password() {
        let mut w = wallet(false);
        w.set_second_password("pw").unwrap();
        let key = PrivateKey::from_wif(WIF).unwrap();
        w.add_imported_address_from_key(&key, Some("pw"), &config()).unwrap();
        assert!(w.keys[0].is_private_key_encrypted());
        assert!(w.is_encryption_consistent());
        let signing = w.signing_key_for_imported_address(WIF_ADDR, Some("pw")).unwrap();
        assert_eq!(signing.inner, key.inner);
    }

    #[test]
    fn tx_notes() {
        let mut w = wallet(false);
        w.set_tx_note("abcd", "rent");
        assert_eq!(w.tx_note("abcd"), Some("rent"));
        w.set_tx_note("abcd", "");
        assert_eq!(w.tx_note("abcd"), None);
    }
}
