//! Loads, mutates and saves one wallet against the remote storage service.
//!
//! Every mutating call follows the same pattern: snapshot the decrypted
//! wallet, apply the change locally, save with the previous checksum, and
//! restore the snapshot if the save fails. Saves are serialized per
//! manager; balance and history reads do not wait for them.

use std::sync::Arc;

use bitcoin::{PrivateKey, ScriptBuf};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use satchel_core::config::WalletConfig;
use satchel_core::constants::{CryptoCurrency, SYNC_ADDRESS_LOOKAHEAD};
use satchel_core::traits::{BlockExplorer, WalletStorage};
use satchel_core::types::{Balance, DerivationKind, Utxo, XPub, XPubs};

use crate::balance::BalanceManager;
use crate::error::WalletError;
use crate::history::{MultiAddressFactory, TransactionSummary};
use crate::keys::{Chain, HdWallet};
use crate::payload::{ImportedAddress, Wallet, WalletWrapper, checksum};
use crate::payment::Payment;

#[derive(Default)]
struct State {
    wallet: Option<Wallet>,
    password: Option<Zeroizing<String>>,
    checksum: Option<String>,
    btc: BalanceManager,
    bch: BalanceManager,
}

/// A decrypted wallet plus the collaborators it is saved to and queried with.
pub struct PayloadManager<S: ?Sized, E: ?Sized> {
    storage: Arc<S>,
    explorer: Arc<E>,
    config: WalletConfig,
    state: RwLock<State>,
    btc_history: Mutex<MultiAddressFactory>,
    bch_history: Mutex<MultiAddressFactory>,
    save_lock: Mutex<()>,
}

fn no_wallet() -> WalletError {
    WalletError::HdWallet("no wallet loaded".into())
}

fn storage_error(err: satchel_core::error::ServiceError) -> WalletError {
    WalletError::from_storage(&err)
}

/// Keys to query for `currency`. BCH only follows legacy derivations.
fn xpubs_for(wallet: &Wallet, currency: CryptoCurrency) -> Vec<XPubs> {
    let active = wallet.active_xpubs();
    match currency {
        CryptoCurrency::Btc => active,
        CryptoCurrency::Bch => active
            .into_iter()
            .filter_map(|x| x.for_derivation(DerivationKind::Legacy).cloned())
            .map(|x| XPubs::new(vec![x]))
            .collect(),
    }
}

fn derivation_for(wallet: &Wallet, currency: CryptoCurrency) -> DerivationKind {
    match currency {
        CryptoCurrency::Btc if wallet.is_upgraded_to_v4() => DerivationKind::Segwit,
        _ => DerivationKind::Legacy,
    }
}

impl<S, E> PayloadManager<S, E>
where
    S: WalletStorage + ?Sized,
    E: BlockExplorer + ?Sized,
{
    pub fn new(storage: Arc<S>, explorer: Arc<E>, config: WalletConfig) -> Self {
        Self {
            storage,
            explorer,
            config,
            state: RwLock::new(State {
                btc: BalanceManager::new(CryptoCurrency::Btc),
                bch: BalanceManager::new(CryptoCurrency::Bch),
                ..State::default()
            }),
            btc_history: Mutex::new(MultiAddressFactory::new(CryptoCurrency::Btc)),
            bch_history: Mutex::new(MultiAddressFactory::new(CryptoCurrency::Bch)),
            save_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Payment engine sharing this manager's explorer.
    pub fn payment(&self) -> Payment<E> {
        Payment::new(Arc::clone(&self.explorer))
    }

    fn history(&self, currency: CryptoCurrency) -> &Mutex<MultiAddressFactory> {
        match currency {
            CryptoCurrency::Btc => &self.btc_history,
            CryptoCurrency::Bch => &self.bch_history,
        }
    }

    // -- lifecycle --------------------------------------------------------

    /// Create a fresh wallet and store it as a new record.
    pub fn create(&self, password: &str, email: Option<&str>) -> Result<(), WalletError> {
        let wallet = Wallet::new(&self.config.default_account_name, self.config.v4_enabled, &self.config)?;
        self.insert(wallet, password, email)?;
        info!("wallet created");
        Ok(())
    }

    /// Restore a wallet from its mnemonic and store it as a new record.
    pub fn recover_from_mnemonic(
        &self,
        mnemonic: &str,
        passphrase: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<(), WalletError> {
        let wallet = Wallet::recover_from_mnemonic(
            self.explorer.as_ref(),
            mnemonic,
            passphrase,
            &self.config.default_account_name,
            self.config.v4_enabled,
            &self.config,
        )?;
        let accounts = wallet.accounts().len();
        self.insert(wallet, password, email)?;
        info!(accounts, "wallet recovered");
        Ok(())
    }

    fn insert(&self, wallet: Wallet, password: &str, email: Option<&str>) -> Result<(), WalletError> {
        let _guard = self.save_lock.lock();
        self.validate_save(&wallet)?;
        let json = WalletWrapper::wrap(&wallet, password)?.to_json()?;
        let sum = checksum(&json);
        self.storage
            .insert(&wallet.guid, &wallet.shared_key, &json, &sum, email, &self.config.device_name)
            .map_err(storage_error)?;

        let mut state = self.state.write();
        state.wallet = Some(wallet);
        state.password = Some(Zeroizing::new(password.to_string()));
        state.checksum = Some(sum);
        Ok(())
    }

    /// Fetch and decrypt an existing wallet.
    pub fn initialize_and_decrypt(&self, guid: &str, shared_key: &str, password: &str) -> Result<(), WalletError> {
        let json = self.storage.fetch(guid, shared_key).map_err(storage_error)?;
        let wrapper = WalletWrapper::from_json(&json)
            .map_err(|e| WalletError::ServerConnection(format!("malformed wallet record: {e}")))?;
        let wallet = wrapper.decrypt_payload(password)?;
        debug!(version = wrapper.version, accounts = wallet.accounts().len(), "payload decrypted");

        let mut state = self.state.write();
        state.wallet = Some(wallet);
        state.password = Some(Zeroizing::new(password.to_string()));
        state.checksum = Some(checksum(&json));
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.state.read().wallet.is_some()
    }

    /// Run `f` against the loaded wallet.
    pub fn with_wallet<R>(&self, f: impl FnOnce(&Wallet) -> R) -> Result<R, WalletError> {
        let state = self.state.read();
        state.wallet.as_ref().map(f).ok_or_else(no_wallet)
    }

    /// Checksum of the last stored wrapper.
    pub fn checksum(&self) -> Option<String> {
        self.state.read().checksum.clone()
    }

    // -- saving -----------------------------------------------------------

    fn validate_save(&self, wallet: &Wallet) -> Result<(), WalletError> {
        if !wallet.is_encryption_consistent() {
            return Err(WalletError::HdWallet("payload encryption is inconsistent".into()));
        }
        if self.config.device_name.trim().is_empty() {
            return Err(WalletError::HdWallet("device name is not set".into()));
        }
        Ok(())
    }

    /// Encrypt and store the current wallet.
    pub fn save(&self) -> Result<(), WalletError> {
        let _guard = self.save_lock.lock();
        self.save_locked()
    }

    fn save_locked(&self) -> Result<(), WalletError> {
        let (guid, shared_key, json, sum, old, sync) = {
            let state = self.state.read();
            let wallet = state.wallet.as_ref().ok_or_else(no_wallet)?;
            self.validate_save(wallet)?;
            let password = state
                .password
                .as_ref()
                .ok_or_else(|| WalletError::HdWallet("no password for save".into()))?;
            let json = WalletWrapper::wrap(wallet, password)?.to_json()?;
            let sum = checksum(&json);
            let sync = self.sync_addresses(wallet)?;
            (wallet.guid.clone(), wallet.shared_key.clone(), json, sum, state.checksum.clone(), sync)
        };

        self.storage
            .update(&guid, &shared_key, &sync, &json, &sum, old.as_deref(), &self.config.device_name)
            .map_err(storage_error)?;
        self.state.write().checksum = Some(sum);
        info!(sync_addresses = sync.len(), "wallet saved");
        Ok(())
    }

    /// Addresses the storage service watches for notifications: the next
    /// receive window of every active account plus active imported addresses.
    fn sync_addresses(&self, wallet: &Wallet) -> Result<Vec<String>, WalletError> {
        let kind = derivation_for(wallet, CryptoCurrency::Btc);
        let history = self.btc_history.lock();
        let mut out = Vec::new();
        for account in wallet.accounts().iter().filter(|a| !a.is_archived()) {
            let key = account.account_key(kind)?;
            let next = history.next_receive_index(&key.xpub_string(), account.address_labels());
            out.extend(key.receive_addresses(next, next + SYNC_ADDRESS_LOOKAHEAD)?);
        }
        out.extend(wallet.non_archived_imported_addresses());
        Ok(out)
    }

    /// Apply `f` and save; on any failure the wallet is restored as it was.
    fn mutate<T, F>(&self, f: F) -> Result<T, WalletError>
    where
        F: FnOnce(&mut Wallet, &WalletConfig) -> Result<T, WalletError>,
    {
        let _guard = self.save_lock.lock();
        let (snapshot, value) = {
            let mut state = self.state.write();
            let wallet = state.wallet.as_mut().ok_or_else(no_wallet)?;
            let snapshot = wallet.clone();
            match f(wallet, &self.config) {
                Ok(value) => (snapshot, value),
                Err(e) => {
                    *wallet = snapshot;
                    return Err(e);
                }
            }
        };
        if let Err(e) = self.save_locked() {
            warn!(error = %e, "save failed, restoring previous wallet state");
            if let Some(wallet) = self.state.write().wallet.as_mut() {
                *wallet = snapshot;
            }
            return Err(e);
        }
        Ok(value)
    }

    /// Re-encrypt the wrapper under a new main password.
    pub fn update_password(&self, new_password: &str) -> Result<(), WalletError> {
        let _guard = self.save_lock.lock();
        let previous = self
            .state
            .write()
            .password
            .replace(Zeroizing::new(new_password.to_string()));
        if let Err(e) = self.save_locked() {
            self.state.write().password = previous;
            return Err(e);
        }
        info!("main password changed");
        Ok(())
    }

    // -- mutations --------------------------------------------------------

    /// Derive a new account; returns its index.
    pub fn add_account(&self, label: &str, second_password: Option<&str>) -> Result<usize, WalletError> {
        self.mutate(|wallet, _| {
            wallet.add_account(label, second_password)?;
            Ok(wallet.accounts().len() - 1)
        })
    }

    pub fn set_account_label(&self, account_index: usize, label: &str) -> Result<(), WalletError> {
        self.mutate(|wallet, _| {
            account_mut(wallet, account_index)?.set_label(label);
            Ok(())
        })
    }

    /// Archive or restore an account. The default account cannot be archived.
    pub fn set_account_archived(&self, account_index: usize, archived: bool) -> Result<(), WalletError> {
        self.mutate(|wallet, _| {
            let default = wallet.wallet_body().map(|b| b.default_account_idx as usize);
            if archived && default == Some(account_index) {
                return Err(WalletError::HdWallet("cannot archive the default account".into()));
            }
            account_mut(wallet, account_index)?.set_archived(archived);
            Ok(())
        })
    }

    pub fn add_imported_address(
        &self,
        address: ImportedAddress,
        second_password: Option<&str>,
    ) -> Result<(), WalletError> {
        self.mutate(|wallet, _| wallet.add_imported_address(address, second_password).map(|_| ()))
    }

    /// Import a private key; returns the address it controls.
    pub fn add_imported_address_from_key(
        &self,
        key: &PrivateKey,
        second_password: Option<&str>,
    ) -> Result<String, WalletError> {
        self.mutate(|wallet, config| {
            wallet
                .add_imported_address_from_key(key, second_password, config)
                .map(|a| a.address.clone())
        })
    }

    /// Replace the label and tag of an imported address.
    pub fn update_imported_address(&self, updated: &ImportedAddress) -> Result<(), WalletError> {
        self.mutate(|wallet, _| {
            let entry = wallet
                .imported_address_mut(&updated.address)
                .ok_or_else(|| WalletError::NoSuchAddress(updated.address.clone()))?;
            entry.label = updated.label.clone();
            entry.tag = updated.tag;
            Ok(())
        })
    }

    pub fn set_key_for_imported_address(
        &self,
        key: &PrivateKey,
        second_password: Option<&str>,
    ) -> Result<(), WalletError> {
        self.mutate(|wallet, _| wallet.set_key_for_imported_address(key, second_password).map(|_| ()))
    }

    /// Label a receive index so it is skipped when handing out addresses.
    pub fn reserve_address(&self, account_index: usize, index: u32, label: &str) -> Result<(), WalletError> {
        self.mutate(|wallet, _| account_mut(wallet, account_index)?.add_address_label(index, label))
    }

    pub fn remove_address_label(&self, account_index: usize, index: u32) -> Result<(), WalletError> {
        self.mutate(|wallet, _| {
            account_mut(wallet, account_index)?.remove_address_label(index);
            Ok(())
        })
    }

    pub fn set_tx_note(&self, tx_hash: &str, note: &str) -> Result<(), WalletError> {
        self.mutate(|wallet, _| {
            wallet.set_tx_note(tx_hash, note);
            Ok(())
        })
    }

    pub fn set_second_password(&self, second_password: &str) -> Result<(), WalletError> {
        self.mutate(|wallet, _| wallet.set_second_password(second_password))
    }

    pub fn remove_second_password(&self, second_password: &str) -> Result<(), WalletError> {
        self.mutate(|wallet, _| wallet.remove_second_password(second_password))
    }

    // -- upgrades ---------------------------------------------------------

    /// Give a V2 wallet an HD body. The body is removed again if the save fails.
    pub fn upgrade_v2_to_v3(&self, second_password: Option<&str>) -> Result<(), WalletError> {
        self.mutate(|wallet, config| wallet.upgrade_v2_to_v3(second_password, &config.default_account_name))
    }

    /// Add segwit derivations. Accounts and version are restored if the save fails.
    pub fn upgrade_v3_to_v4(&self, second_password: Option<&str>) -> Result<(), WalletError> {
        self.mutate(|wallet, _| wallet.upgrade_v3_to_v4(second_password))
    }

    // -- addresses --------------------------------------------------------

    fn next_address(&self, currency: CryptoCurrency, account_index: usize, chain: Chain) -> Result<(u32, String), WalletError> {
        let state = self.state.read();
        let wallet = state.wallet.as_ref().ok_or_else(no_wallet)?;
        let account = wallet
            .accounts()
            .get(account_index)
            .ok_or_else(|| WalletError::HdWallet(format!("no account {account_index}")))?;
        let key = account.account_key(derivation_for(wallet, currency))?;
        let xpub = key.xpub_string();
        let history = self.history(currency).lock();
        let index = match chain {
            Chain::Receive => history.next_receive_index(&xpub, account.address_labels()),
            Chain::Change => history.next_change_index(&xpub),
        };
        Ok((index, key.address(chain, index)?.formatted()))
    }

    /// First unused, unreserved receive address of an account.
    pub fn next_receive_address(&self, currency: CryptoCurrency, account_index: usize) -> Result<String, WalletError> {
        self.next_address(currency, account_index, Chain::Receive).map(|(_, a)| a)
    }

    pub fn next_change_address(&self, currency: CryptoCurrency, account_index: usize) -> Result<String, WalletError> {
        self.next_address(currency, account_index, Chain::Change).map(|(_, a)| a)
    }

    /// Next receive address, reserved under `label` before it is returned.
    ///
    /// The index is picked and labelled under the save lock, so concurrent
    /// callers never receive the same address.
    pub fn next_receive_address_and_reserve(&self, account_index: usize, label: &str) -> Result<String, WalletError> {
        self.mutate(|wallet, _| {
            let kind = derivation_for(wallet, CryptoCurrency::Btc);
            let account = account_mut(wallet, account_index)?;
            let key = account.account_key(kind)?;
            let index = self
                .btc_history
                .lock()
                .next_receive_index(&key.xpub_string(), account.address_labels());
            account.add_address_label(index, label)?;
            Ok(key.address(Chain::Receive, index)?.formatted())
        })
    }

    // -- balances ---------------------------------------------------------

    /// Refresh all balances of one currency.
    pub fn update_all_balances(&self, currency: CryptoCurrency) -> Result<(), WalletError> {
        let (xpubs, imported) = self.with_wallet(|w| (xpubs_for(w, currency), w.non_archived_imported_addresses()))?;
        let mut fresh = BalanceManager::new(currency);
        fresh.update_all_balances(self.explorer.as_ref(), &xpubs, &imported)?;
        let mut state = self.state.write();
        match currency {
            CryptoCurrency::Btc => state.btc = fresh,
            CryptoCurrency::Bch => state.bch = fresh,
        }
        Ok(())
    }

    fn balances<R>(&self, currency: CryptoCurrency, f: impl FnOnce(&BalanceManager) -> R) -> R {
        let state = self.state.read();
        match currency {
            CryptoCurrency::Btc => f(&state.btc),
            CryptoCurrency::Bch => f(&state.bch),
        }
    }

    pub fn wallet_balance(&self, currency: CryptoCurrency) -> i64 {
        self.balances(currency, BalanceManager::wallet_balance)
    }

    pub fn imported_addresses_balance(&self, currency: CryptoCurrency) -> i64 {
        self.balances(currency, BalanceManager::imported_addresses_balance)
    }

    pub fn account_balance(&self, currency: CryptoCurrency, account_index: usize) -> Result<Balance, WalletError> {
        let xpubs = self.with_wallet(|w| xpubs_for_account(w, currency, account_index))??;
        Ok(self.balances(currency, |b| b.account_balance(&xpubs)))
    }

    pub fn subtract_amount_from_address_balance(
        &self,
        currency: CryptoCurrency,
        address: &str,
        amount: u64,
    ) -> Result<(), WalletError> {
        let mut state = self.state.write();
        match currency {
            CryptoCurrency::Btc => state.btc.subtract_amount_from_address_balance(address, amount),
            CryptoCurrency::Bch => state.bch.subtract_amount_from_address_balance(address, amount),
        }
    }

    // -- history ----------------------------------------------------------

    /// Every account and imported address, the set that defines ownership.
    fn ownership_set(&self, currency: CryptoCurrency) -> Result<(Vec<XPubs>, Vec<String>), WalletError> {
        self.with_wallet(|w| {
            let mut all = xpubs_for(w, currency);
            let imported = w.non_archived_imported_addresses();
            all.extend(imported.iter().map(|a| XPubs::new(vec![XPub::legacy(a.clone())])));
            (all, imported)
        })
    }

    /// One page of history for an account, or for the whole wallet when
    /// `account_index` is `None`.
    pub fn account_transactions(
        &self,
        currency: CryptoCurrency,
        account_index: Option<usize>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<TransactionSummary>, WalletError> {
        let (all, _) = self.ownership_set(currency)?;
        let only_show = match account_index {
            Some(i) => Some(
                self.with_wallet(|w| xpubs_for_account(w, currency, i))??
                    .xpubs
                    .into_iter()
                    .map(|x| x.address)
                    .collect::<Vec<_>>(),
            ),
            None => None,
        };
        self.history(currency).lock().account_transactions(
            self.explorer.as_ref(),
            &all,
            None,
            only_show.as_deref(),
            limit,
            offset,
            currency.starting_block_height(),
        )
    }

    /// One page of history touching imported addresses.
    pub fn imported_addresses_transactions(
        &self,
        currency: CryptoCurrency,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<TransactionSummary>, WalletError> {
        let (all, imported) = self.ownership_set(currency)?;
        if imported.is_empty() {
            return Ok(Vec::new());
        }
        self.history(currency).lock().account_transactions(
            self.explorer.as_ref(),
            &all,
            Some(&imported),
            Some(&imported),
            limit,
            offset,
            currency.starting_block_height(),
        )
    }

    // -- signing ----------------------------------------------------------

    /// HD tree with private keys; the second password is checked first.
    pub fn decrypt_hd_wallet(&self, second_password: Option<&str>) -> Result<HdWallet, WalletError> {
        self.with_wallet(|w| w.decrypt_hd_wallet(second_password))?
    }

    /// Private key of the address at `path` (`M/chain/index`) under `xpub`.
    pub fn address_signing_key(
        &self,
        xpub: &str,
        path: &str,
        second_password: Option<&str>,
    ) -> Result<PrivateKey, WalletError> {
        self.decrypt_hd_wallet(second_password)?.private_key_for(xpub, path)
    }

    /// Keys able to spend `utxos`.
    ///
    /// HD coins are resolved through their xpub and path; other coins are
    /// matched to imported addresses by their output script. Coins the
    /// wallet cannot sign for (including the dust placeholder) are skipped.
    pub fn signing_keys(&self, utxos: &[Utxo], second_password: Option<&str>) -> Result<Vec<PrivateKey>, WalletError> {
        self.with_wallet(|wallet| {
            wallet.validate_second_password(second_password)?;
            let hd = if utxos.iter().any(|u| u.xpub.is_some()) {
                Some(wallet.decrypt_hd_wallet(second_password)?)
            } else {
                None
            };
            let mut keys = Vec::new();
            for utxo in utxos {
                match (&utxo.xpub, &hd) {
                    (Some(r), Some(hd)) => keys.push(hd.private_key_for(&r.address, &r.derivation_path)?),
                    _ => {
                        let Some(address) = script_address(&utxo.script) else {
                            continue;
                        };
                        let signable = wallet
                            .imported_address(&address)
                            .is_some_and(|a| !a.is_watch_only());
                        if signable {
                            keys.push(wallet.signing_key_for_imported_address(&address, second_password)?);
                        }
                    }
                }
            }
            Ok::<_, WalletError>(keys)
        })?
    }

    /// Decrypted mnemonic words.
    pub fn mnemonic(&self, second_password: Option<&str>) -> Result<Vec<String>, WalletError> {
        self.decrypt_hd_wallet(second_password)?.mnemonic()
    }
}

fn account_mut(wallet: &mut Wallet, index: usize) -> Result<&mut crate::payload::Account, WalletError> {
    wallet
        .wallet_body_mut()
        .and_then(|b| b.accounts.get_mut(index))
        .ok_or_else(|| WalletError::HdWallet(format!("no account {index}")))
}

fn xpubs_for_account(wallet: &Wallet, currency: CryptoCurrency, index: usize) -> Result<XPubs, WalletError> {
    let account = wallet
        .accounts()
        .get(index)
        .ok_or_else(|| WalletError::HdWallet(format!("no account {index}")))?;
    let xpubs = account.xpubs();
    Ok(match currency {
        CryptoCurrency::Btc => xpubs,
        CryptoCurrency::Bch => XPubs::new(xpubs.for_derivation(DerivationKind::Legacy).cloned().into_iter().collect()),
    })
}

/// Mainnet address paid by a hex output script.
fn script_address(script_hex: &str) -> Option<String> {
    let script = ScriptBuf::from_hex(script_hex).ok()?;
    bitcoin::Address::from_script(&script, bitcoin::Network::Bitcoin)
        .ok()
        .map(|a| a.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    use crate::mnemonic::Seed;
    use crate::test_support::{MemoryStorage, StubExplorer};
    use satchel_core::error::ServiceError;
    use satchel_core::types::XpubRef;

    fn config() -> WalletConfig {
        WalletConfig {
            pbkdf2_iterations: 10,
            ..WalletConfig::default()
        }
    }

    fn manager() -> (Arc<MemoryStorage>, PayloadManager<MemoryStorage, StubExplorer>) {
        let storage = Arc::new(MemoryStorage::default());
        let explorer = Arc::new(StubExplorer::default());
        let m = PayloadManager::new(Arc::clone(&storage), explorer, config());
        m.create("hunter2", Some("a@b.c")).unwrap();
        (storage, m)
    }

    #[test]
    fn create_stores_decryptable_record() {
        let (storage, m) = manager();
        let (guid, shared_key) = m.with_wallet(|w| (w.guid.clone(), w.shared_key.clone())).unwrap();
        assert_eq!(guid.len(), 36);

        let other = PayloadManager::new(Arc::clone(&storage), Arc::new(StubExplorer::default()), config());
        other.initialize_and_decrypt(&guid, &shared_key, "hunter2").unwrap();
        assert_eq!(other.with_wallet(|w| w.accounts().len()).unwrap(), 1);
        assert_eq!(other.checksum(), m.checksum());
    }

    #[test]
    fn wrong_password_is_decryption_error() {
        let (storage, m) = manager();
        let (guid, shared_key) = m.with_wallet(|w| (w.guid.clone(), w.shared_key.clone())).unwrap();
        let other = PayloadManager::new(storage, Arc::new(StubExplorer::default()), config());
        assert!(matches!(
            other.initialize_and_decrypt(&guid, &shared_key, "wrong"),
            Err(WalletError::Decryption(_))
        ));
        assert!(!other.is_loaded());
    }

    #[test]
    fn fetch_errors_are_classified() {
        let storage = Arc::new(MemoryStorage::default());
        let m = PayloadManager::new(Arc::clone(&storage), Arc::new(StubExplorer::default()), config());
        assert_eq!(m.initialize_and_decrypt("nope", "nope", "pw"), Err(WalletError::InvalidCredentials));

        storage.fail_next(ServiceError::remote(403, "Wallet is locked"));
        assert_eq!(m.initialize_and_decrypt("nope", "nope", "pw"), Err(WalletError::AccountLocked));
    }

    #[test]
    fn save_sends_previous_checksum_and_sync_addresses() {
        let (storage, m) = manager();
        let before = m.checksum();
        m.set_tx_note("ab".repeat(32).as_str(), "rent").unwrap();

        let update = storage.last_update().unwrap();
        assert_eq!(update.old_checksum, before);
        assert_eq!(Some(update.new_checksum), m.checksum());
        assert_eq!(update.sync_addresses.len(), SYNC_ADDRESS_LOOKAHEAD as usize);
        assert!(update.sync_addresses[0].starts_with("bc1q"));
    }

    #[test]
    fn failed_save_rolls_back_new_account() {
        let (storage, m) = manager();
        storage.fail_next(ServiceError::remote(500, "Internal Server Error"));
        assert_eq!(
            m.add_account("Savings", None),
            Err(WalletError::ServerConnection("Internal Server Error".into()))
        );
        assert_eq!(m.with_wallet(|w| w.accounts().len()).unwrap(), 1);

        assert_eq!(m.add_account("Savings", None).unwrap(), 1);
        assert_eq!(m.with_wallet(|w| w.accounts()[1].label().to_string()).unwrap(), "Savings");
    }

    #[test]
    fn failed_upgrade_restores_v3() {
        let storage = Arc::new(MemoryStorage::default());
        let cfg = WalletConfig {
            v4_enabled: false,
            ..config()
        };
        let m = PayloadManager::new(Arc::clone(&storage), Arc::new(StubExplorer::default()), cfg);
        m.create("pw", None).unwrap();
        let before = m.with_wallet(|w| w.clone()).unwrap();

        storage.fail_next(ServiceError::remote(500, "boom"));
        assert!(m.upgrade_v3_to_v4(None).is_err());
        let after = m.with_wallet(|w| w.clone()).unwrap();
        assert_eq!(after, before);
        assert_eq!(after.wrapper_version(), 3);

        m.upgrade_v3_to_v4(None).unwrap();
        assert!(m.with_wallet(Wallet::is_upgraded_to_v4).unwrap());
    }

    #[test]
    fn failed_v2_upgrade_removes_body() {
        let storage = Arc::new(MemoryStorage::default());
        let m = PayloadManager::new(Arc::clone(&storage), Arc::new(StubExplorer::default()), config());
        m.create("pw", None).unwrap();
        m.mutate(|w, _| {
            w.hd_wallets.clear();
            Ok(())
        })
        .unwrap();

        storage.fail_next(ServiceError::remote(500, "boom"));
        assert!(m.upgrade_v2_to_v3(None).is_err());
        assert!(!m.with_wallet(Wallet::is_upgraded_to_v3).unwrap());
        m.upgrade_v2_to_v3(None).unwrap();
        assert_eq!(m.with_wallet(|w| w.accounts().len()).unwrap(), 1);
    }

    #[test]
    fn empty_device_name_fails_before_network() {
        let storage = Arc::new(MemoryStorage::default());
        let cfg = WalletConfig {
            device_name: " ".into(),
            ..config()
        };
        let m = PayloadManager::new(Arc::clone(&storage), Arc::new(StubExplorer::default()), cfg);
        assert!(matches!(m.create("pw", None), Err(WalletError::HdWallet(_))));
        assert_eq!(storage.record_count(), 0);
    }

    #[test]
    fn inconsistent_encryption_blocks_save() {
        let (storage, m) = manager();
        let saves = storage.update_count();
        let result = m.mutate(|w, _| {
            w.double_encryption = true;
            Ok(())
        });
        assert!(matches!(result, Err(WalletError::HdWallet(_))));
        assert_eq!(storage.update_count(), saves);
        assert!(!m.with_wallet(|w| w.double_encryption).unwrap());
    }

    #[test]
    fn reserved_addresses_are_skipped() {
        let (_, m) = manager();
        let first = m.next_receive_address(CryptoCurrency::Btc, 0).unwrap();
        let reserved = m.next_receive_address_and_reserve(0, "invoice 7").unwrap();
        assert_eq!(first, reserved);
        let next = m.next_receive_address(CryptoCurrency::Btc, 0).unwrap();
        assert_ne!(next, reserved);
        assert!(m.next_receive_address(CryptoCurrency::Bch, 0).unwrap().starts_with('1'));
    }

    #[test]
    fn second_password_guards_signing_keys() {
        let (_, m) = manager();
        m.set_second_password("extra").unwrap();
        assert!(m.with_wallet(Wallet::is_encryption_consistent).unwrap());

        let hd = m.decrypt_hd_wallet(Some("extra")).unwrap();
        let xpub = hd.account(0).unwrap().default_key().xpub_string();
        assert!(matches!(m.address_signing_key(&xpub, "M/0/0", None), Err(WalletError::Decryption(_))));
        assert!(matches!(
            m.address_signing_key(&xpub, "M/0/0", Some("nope")),
            Err(WalletError::Decryption(_))
        ));
        let key = m.address_signing_key(&xpub, "M/0/0", Some("extra")).unwrap();
        let expected = hd.account(0).unwrap().default_key().address(Chain::Receive, 0).unwrap();
        assert_eq!(Some(&key), expected.private_key());
    }

    #[test]
    fn signing_keys_cover_hd_and_imported_coins() {
        let (_, m) = manager();
        let imported = PrivateKey::from_wif("L3wP9Q3gTZ9YwuTuB8nuczhWG9uEXQEE94PTWDZgpVttFzJbKSHL").unwrap();
        let address = m.add_imported_address_from_key(&imported, None).unwrap();
        let script = bitcoin::Address::from_str(&address)
            .unwrap()
            .assume_checked()
            .script_pubkey()
            .to_hex_string();
        let xpub = m.with_wallet(|w| w.accounts()[0].default_xpub().to_string()).unwrap();

        let utxos = vec![
            Utxo {
                xpub: Some(XpubRef {
                    address: xpub,
                    derivation_path: "M/1/3".into(),
                }),
                ..Utxo::default()
            },
            Utxo {
                script,
                ..Utxo::default()
            },
            Utxo {
                force_include: true,
                ..Utxo::default()
            },
        ];
        let keys = m.signing_keys(&utxos, None).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[1], imported);
    }

    #[test]
    fn imported_address_update_and_duplicates() {
        let (_, m) = manager();
        m.add_imported_address(ImportedAddress::watch_only("1JEggWq9VVaVnDmdTbYuHmJXN4icdF89Kq"), None)
            .unwrap();
        assert!(matches!(
            m.add_imported_address(ImportedAddress::watch_only("1JEggWq9VVaVnDmdTbYuHmJXN4icdF89Kq"), None),
            Err(WalletError::HdWallet(_))
        ));

        let mut updated = ImportedAddress::watch_only("1JEggWq9VVaVnDmdTbYuHmJXN4icdF89Kq");
        updated.label = Some("cold".into());
        m.update_imported_address(&updated).unwrap();
        assert_eq!(
            m.with_wallet(|w| w.label_from_imported_address("1JEggWq9VVaVnDmdTbYuHmJXN4icdF89Kq").to_string())
                .unwrap(),
            "cold"
        );
        assert!(matches!(
            m.update_imported_address(&ImportedAddress::watch_only("1BoatSLRHtKNngkdXEeobR76b53LETtpyT")),
            Err(WalletError::NoSuchAddress(_))
        ));
    }

    #[test]
    fn balances_are_replaced_per_currency() {
        const ABANDON: &str =
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
        let hd = HdWallet::from_seed(
            Seed::from_mnemonic(ABANDON).unwrap(),
            "",
            1,
            &[DerivationKind::Legacy, DerivationKind::Segwit],
        )
        .unwrap();
        let legacy = hd.account(0).unwrap().legacy().xpub_string();
        let segwit = hd.account(0).unwrap().segwit().unwrap().xpub_string();

        let explorer = StubExplorer::default()
            .with_balance(&legacy, 700, 1)
            .with_balance(&segwit, 300, 2);
        let m = PayloadManager::new(Arc::new(MemoryStorage::default()), Arc::new(explorer), config());
        m.recover_from_mnemonic(ABANDON, "", "pw", None).unwrap();
        assert_eq!(m.with_wallet(|w| w.accounts().len()).unwrap(), 1);

        m.update_all_balances(CryptoCurrency::Btc).unwrap();
        assert_eq!(m.wallet_balance(CryptoCurrency::Btc), 1_000);
        assert_eq!(m.account_balance(CryptoCurrency::Btc, 0).unwrap().final_balance, 1_000);
        assert_eq!(m.wallet_balance(CryptoCurrency::Bch), 0);

        m.update_all_balances(CryptoCurrency::Bch).unwrap();
        assert_eq!(m.wallet_balance(CryptoCurrency::Bch), 700);
        m.subtract_amount_from_address_balance(CryptoCurrency::Bch, &legacy, 200).unwrap();
        assert_eq!(m.wallet_balance(CryptoCurrency::Bch), 500);
        assert_eq!(m.account_balance(CryptoCurrency::Bch, 0).unwrap().final_balance, 500);
    }

    #[test]
    fn password_change_rolls_back() {
        let (storage, m) = manager();
        storage.fail_next(ServiceError::transport("offline"));
        assert!(m.update_password("new").is_err());
        m.save().unwrap();
        let guid = m.with_wallet(|w| w.guid.clone()).unwrap();
        let wrapper = WalletWrapper::from_json(&storage.record(&guid).unwrap()).unwrap();
        assert!(wrapper.decrypt_payload("hunter2").is_ok());
        assert!(wrapper.decrypt_payload("new").is_err());
    }
}
