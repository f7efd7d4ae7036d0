//! The HD wallet body (`hd_wallets[0]`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use satchel_core::types::{DerivationKind, XPubs};

use crate::error::WalletError;
use crate::keys::{AccountKey, HdAccount, HdWallet};
use crate::mnemonic::Seed;

use super::account::{Account, AccountV3, AccountV4, Derivation};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WalletBody {
    #[serde(default)]
    pub accounts: Vec<Account>,
    /// Seed entropy hex, second-password encrypted when double encryption is on.
    #[serde(default)]
    pub seed_hex: String,
    #[serde(default)]
    pub passphrase: String,
    #[serde(default)]
    pub mnemonic_verified: bool,
    #[serde(default)]
    pub default_account_idx: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Label for the account at `index`: "Name", "Name 2", "Name 3", ...
pub fn account_label(default_label: &str, index: usize) -> String {
    if index == 0 {
        default_label.to_string()
    } else {
        format!("{default_label} {}", index + 1)
    }
}

/// Account record for derived keys. A segwit key makes it version 4.
pub fn new_account(
    label: String,
    legacy: &AccountKey,
    segwit: Option<&AccountKey>,
) -> Result<Account, WalletError> {
    Ok(match segwit {
        Some(segwit) => Account::V4(AccountV4::new(
            label,
            Derivation::from_account_key(legacy)?,
            Derivation::from_account_key(segwit)?,
        )),
        None => Account::V3(AccountV3::new(label, legacy)?),
    })
}

impl WalletBody {
    /// Fresh body with a new random seed and one account.
    pub fn create(default_label: &str, v4: bool) -> Result<Self, WalletError> {
        let hd = HdWallet::from_seed(Seed::generate(), "", 1, &kinds_for(v4))?;
        Self::from_hd_wallet(&hd, default_label, v4)
    }

    /// Body recording every account of `hd`.
    pub fn from_hd_wallet(hd: &HdWallet, default_label: &str, v4: bool) -> Result<Self, WalletError> {
        let seed = hd
            .seed()
            .ok_or_else(|| WalletError::HdWallet("hd wallet has no seed".into()))?;
        let mut body = Self {
            accounts: Vec::with_capacity(hd.accounts().len()),
            seed_hex: seed.to_hex(),
            passphrase: hd.passphrase().to_string(),
            mnemonic_verified: false,
            default_account_idx: 0,
            extra: Map::new(),
        };
        for (i, account) in hd.accounts().iter().enumerate() {
            let label = account_label(default_label, i);
            let segwit = if v4 { account.segwit() } else { None };
            body.push_account(label, account.legacy(), segwit)?;
        }
        Ok(body)
    }

    /// Append an account built from derived keys.
    pub fn push_account(
        &mut self,
        label: String,
        legacy: &AccountKey,
        segwit: Option<&AccountKey>,
    ) -> Result<&mut Account, WalletError> {
        self.accounts.push(new_account(label, legacy, segwit)?);
        let last = self.accounts.len() - 1;
        Ok(&mut self.accounts[last])
    }

    pub fn is_v4(&self) -> bool {
        !self.accounts.is_empty() && self.accounts.iter().all(|a| a.version() == 4)
    }

    pub fn account(&self, index: usize) -> Option<&Account> {
        self.accounts.get(index)
    }

    pub fn default_account(&self) -> Option<&Account> {
        self.accounts.get(self.default_account_idx as usize)
    }

    /// Keys of every non-archived account.
    pub fn active_xpubs(&self) -> Vec<XPubs> {
        self.accounts
            .iter()
            .filter(|a| !a.is_archived())
            .map(Account::xpubs)
            .collect()
    }

    pub fn account_index_of_xpub(&self, xpub: &str) -> Option<usize> {
        self.accounts.iter().position(|a| a.contains_xpub(xpub))
    }

    pub fn label_from_xpub(&self, xpub: &str) -> Option<&str> {
        self.accounts
            .iter()
            .find(|a| a.contains_xpub(xpub))
            .map(Account::label)
    }

    /// Rebuild the HD tree with private keys.
    ///
    /// `reveal` turns a stored secret into plaintext (identity unless the
    /// wallet is double encrypted). The seed is preferred; without it the
    /// stored xprivs are used and no new accounts can be derived.
    pub(crate) fn restore_hd_wallet<F>(&self, reveal: F) -> Result<HdWallet, WalletError>
    where
        F: Fn(&str) -> Result<String, WalletError>,
    {
        let kinds = kinds_for(self.accounts.iter().any(|a| a.version() == 4));
        if !self.seed_hex.is_empty() {
            let seed = Seed::from_hex(&reveal(&self.seed_hex)?)?;
            let count = self.accounts.len().max(1) as u32;
            return HdWallet::from_seed(seed, &self.passphrase, count, &kinds);
        }

        let accounts = self
            .accounts
            .iter()
            .enumerate()
            .map(|(i, account)| {
                let legacy = account
                    .xpriv_for(DerivationKind::Legacy)
                    .ok_or_else(|| WalletError::HdWallet(format!("account {i} has no private key")))?;
                let legacy = AccountKey::from_xpriv_str(DerivationKind::Legacy, &reveal(legacy)?)?;
                let segwit = account
                    .xpriv_for(DerivationKind::Segwit)
                    .map(|x| reveal(x).and_then(|x| AccountKey::from_xpriv_str(DerivationKind::Segwit, &x)))
                    .transpose()?;
                Ok(HdAccount::new(i as u32, legacy, segwit))
            })
            .collect::<Result<Vec<_>, WalletError>>()?;
        Ok(HdWallet::from_accounts(accounts))
    }

    /// HD tree rebuilt from stored xpubs only.
    pub fn watch_only_hd_wallet(&self) -> Result<HdWallet, WalletError> {
        let accounts = self
            .accounts
            .iter()
            .enumerate()
            .map(|(i, account)| {
                let legacy = account.account_key(DerivationKind::Legacy)?;
                let segwit = match account.xpub_for(DerivationKind::Segwit) {
                    Some(_) => Some(account.account_key(DerivationKind::Segwit)?),
                    None => None,
                };
                Ok(HdAccount::new(i as u32, legacy, segwit))
            })
            .collect::<Result<Vec<_>, WalletError>>()?;
        Ok(HdWallet::from_accounts(accounts))
    }

    /// Convert every account to version 4, deriving its segwit keys from `hd`.
    ///
    /// `conceal` encrypts new xprivs when the wallet is double encrypted.
    pub(crate) fn upgrade_accounts_to_v4<F>(&mut self, hd: &HdWallet, conceal: F) -> Result<(), WalletError>
    where
        F: Fn(&str) -> Result<String, WalletError>,
    {
        let mut upgraded = Vec::with_capacity(self.accounts.len());
        for (i, account) in self.accounts.iter().enumerate() {
            let key = hd.derive_account(DerivationKind::Segwit, i as u32)?;
            let mut segwit = Derivation::from_account_key(&key)?;
            segwit.xpriv = conceal(&segwit.xpriv)?;
            upgraded.push(Account::V4(account.upgrade_to_v4(segwit)?));
        }
        self.accounts = upgraded;
        Ok(())
    }
}

pub(crate) fn kinds_for(v4: bool) -> Vec<DerivationKind> {
    if v4 {
        vec![DerivationKind::Legacy, DerivationKind::Segwit]
    } else {
        vec![DerivationKind::Legacy]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &str = "all all all all all all all all all all all all";

    fn body(v4: bool, n: u32) -> WalletBody {
        let seed = Seed::from_mnemonic(ALL).unwrap();
        let hd = HdWallet::from_seed(seed, "", n, &kinds_for(v4)).unwrap();
        WalletBody::from_hd_wallet(&hd, "My Wallet", v4).unwrap()
    }

    #[test]
    fn seed_hex_is_entropy() {
        assert_eq!(body(false, 1).seed_hex, "0660cc198330660cc198330660cc1983");
    }

    #[test]
    fn labels_are_numbered_from_two() {
        let b = body(false, 3);
        let labels: Vec<_> = b.accounts.iter().map(Account::label).collect();
        assert_eq!(labels, ["My Wallet", "My Wallet 2", "My Wallet 3"]);
    }

    #[test]
    fn v4_body_has_both_derivations() {
        let b = body(true, 2);
        assert!(b.is_v4());
        assert_eq!(b.active_xpubs()[0].xpubs.len(), 2);
        assert_eq!(b.accounts[1].default_kind(), DerivationKind::Segwit);
    }

    #[test]
    fn create_makes_one_account() {
        let b = WalletBody::create("Main", false).unwrap();
        assert_eq!(b.accounts.len(), 1);
        assert_eq!(b.seed_hex.len(), 32);
        assert!(!b.mnemonic_verified);
    }

    #[test]
    fn restore_from_seed_matches_stored_xpubs() {
        let b = body(true, 2);
        let hd = b.restore_hd_wallet(|s| Ok(s.to_string())).unwrap();
        assert!(hd.has_private_keys());
        for (stored, derived) in b.accounts.iter().zip(hd.accounts()) {
            assert_eq!(stored.xpubs(), derived.xpubs());
        }
    }

    #[test]
    fn restore_without_seed_uses_xprivs() {
        let mut b = body(false, 2);
        b.seed_hex.clear();
        let hd = b.restore_hd_wallet(|s| Ok(s.to_string())).unwrap();
        assert!(hd.has_private_keys());
        assert!(hd.master_key().is_err());
        assert_eq!(hd.accounts()[1].xpubs(), b.accounts[1].xpubs());
    }

    #[test]
    fn watch_only_tree_has_no_private_keys() {
        let b = body(true, 1);
        let hd = b.watch_only_hd_wallet().unwrap();
        assert!(!hd.has_private_keys());
        assert_eq!(hd.accounts()[0].xpubs(), b.accounts[0].xpubs());
    }

    #[test]
    fn upgrade_accounts_adds_segwit() {
        let mut b = body(false, 2);
        let hd = b.restore_hd_wallet(|s| Ok(s.to_string())).unwrap();
        b.upgrade_accounts_to_v4(&hd, |s| Ok(s.to_string())).unwrap();
        assert!(b.is_v4());
        let expected = body(true, 2);
        for (a, e) in b.accounts.iter().zip(&expected.accounts) {
            assert_eq!(a.xpubs(), e.xpubs());
        }
    }

    #[test]
    fn xpub_lookup() {
        let b = body(false, 2);
        let xpub = b.accounts[1].default_xpub().to_string();
        assert_eq!(b.account_index_of_xpub(&xpub), Some(1));
        assert_eq!(b.label_from_xpub(&xpub), Some("My Wallet 2"));
        assert_eq!(b.account_index_of_xpub("xpub-unknown"), None);
    }
}
