//! Hierarchical deterministic key derivation.
//!
//! A [`MasterKey`] derived from the BIP-39 seed produces one [`AccountKey`]
//! per purpose and account (`m/44'/0'/n'` legacy, `m/84'/0'/n'` segwit).
//! Account keys expose the receive and change [`ChainKey`]s, which produce
//! [`Address`] values on demand. Account keys rebuilt from an xpub are
//! watch-only: they derive addresses but never private keys.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Network, PrivateKey};
use satchel_core::types::{DerivationKind, XPub, XPubs};

use crate::error::WalletError;
use crate::mnemonic::Seed;

pub(crate) static SECP: LazyLock<Secp256k1<All>> = LazyLock::new(Secp256k1::new);

/// BIP-44 purpose number for legacy P2PKH accounts.
pub const LEGACY_PURPOSE: u32 = 44;
/// BIP-84 purpose number for native segwit accounts.
pub const SEGWIT_PURPOSE: u32 = 84;
/// Coin type shared by both coins; Bitcoin Cash accounts reuse the Bitcoin tree.
pub const COIN_TYPE: u32 = 0;

/// Purpose number for a derivation kind.
pub fn purpose(kind: DerivationKind) -> u32 {
    match kind {
        DerivationKind::Legacy => LEGACY_PURPOSE,
        DerivationKind::Segwit => SEGWIT_PURPOSE,
    }
}

/// Receive or change branch of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    Receive,
    Change,
}

impl Chain {
    pub fn index(&self) -> u32 {
        match self {
            Self::Receive => 0,
            Self::Change => 1,
        }
    }
}

/// A derived address, with its private key when the tree holds one.
#[derive(Clone)]
pub struct Address {
    address: bitcoin::Address,
    public_key: CompressedPublicKey,
    private_key: Option<PrivateKey>,
    path: String,
}

impl Address {
    pub(crate) fn new(
        kind: DerivationKind,
        public_key: CompressedPublicKey,
        private_key: Option<PrivateKey>,
        path: String,
    ) -> Self {
        let address = match kind {
            DerivationKind::Legacy => bitcoin::Address::p2pkh(public_key.pubkey_hash(), Network::Bitcoin),
            DerivationKind::Segwit => bitcoin::Address::p2wpkh(&public_key, Network::Bitcoin),
        };
        Self {
            address,
            public_key,
            private_key,
            path,
        }
    }

    /// Encoded address string (Base58 P2PKH or bech32 P2WPKH).
    pub fn formatted(&self) -> String {
        self.address.to_string()
    }

    pub fn address(&self) -> &bitcoin::Address {
        &self.address
    }

    pub fn public_key(&self) -> &CompressedPublicKey {
        &self.public_key
    }

    /// Private key, or `None` for watch-only addresses.
    pub fn private_key(&self) -> Option<&PrivateKey> {
        self.private_key.as_ref()
    }

    /// Relative derivation path such as `M/0/5`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_watch_only(&self) -> bool {
        self.private_key.is_none()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Address")
            .field("address", &self.formatted())
            .field("path", &self.path)
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Root extended private key of an HD tree.
#[derive(Clone)]
pub struct MasterKey {
    xpriv: Xpriv,
}

impl MasterKey {
    /// BIP-32 master key from the BIP-39 seed of `seed` and `passphrase`.
    pub fn from_seed(seed: &Seed, passphrase: &str) -> Result<Self, WalletError> {
        let hd_seed = seed.hd_seed(passphrase)?;
        let xpriv = Xpriv::new_master(Network::Bitcoin, &hd_seed[..])
            .map_err(|e| WalletError::HdWallet(e.to_string()))?;
        Ok(Self { xpriv })
    }

    /// Account key at `m/purpose'/0'/index'`.
    pub fn account(&self, kind: DerivationKind, index: u32) -> Result<AccountKey, WalletError> {
        let path = [
            hardened(purpose(kind))?,
            hardened(COIN_TYPE)?,
            hardened(index)?,
        ];
        let xpriv = self
            .xpriv
            .derive_priv(&SECP, &path)
            .map_err(|e| WalletError::HdWallet(e.to_string()))?;
        Ok(AccountKey::from_xpriv(kind, xpriv))
    }

    pub fn xpriv(&self) -> &Xpriv {
        &self.xpriv
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("xpriv", &"[REDACTED]")
            .finish()
    }
}

fn hardened(index: u32) -> Result<ChildNumber, WalletError> {
    ChildNumber::from_hardened_idx(index).map_err(|e| WalletError::HdWallet(e.to_string()))
}

fn normal(index: u32) -> Result<ChildNumber, WalletError> {
    ChildNumber::from_normal_idx(index).map_err(|e| WalletError::HdWallet(e.to_string()))
}

/// Extended key of one account for one derivation kind.
#[derive(Clone)]
pub struct AccountKey {
    kind: DerivationKind,
    xpriv: Option<Xpriv>,
    xpub: Xpub,
}

impl AccountKey {
    pub fn from_xpriv(kind: DerivationKind, xpriv: Xpriv) -> Self {
        let xpub = Xpub::from_priv(&SECP, &xpriv);
        Self {
            kind,
            xpriv: Some(xpriv),
            xpub,
        }
    }

    /// Watch-only account key.
    pub fn from_xpub(kind: DerivationKind, xpub: Xpub) -> Self {
        Self {
            kind,
            xpriv: None,
            xpub,
        }
    }

    pub fn from_xpriv_str(kind: DerivationKind, xpriv: &str) -> Result<Self, WalletError> {
        let xpriv = Xpriv::from_str(xpriv).map_err(|e| WalletError::InvalidKey(e.to_string()))?;
        Ok(Self::from_xpriv(kind, xpriv))
    }

    pub fn from_xpub_str(kind: DerivationKind, xpub: &str) -> Result<Self, WalletError> {
        let xpub = Xpub::from_str(xpub).map_err(|e| WalletError::InvalidKey(e.to_string()))?;
        Ok(Self::from_xpub(kind, xpub))
    }

    pub fn kind(&self) -> DerivationKind {
        self.kind
    }

    pub fn has_private_key(&self) -> bool {
        self.xpriv.is_some()
    }

    pub fn xpub_string(&self) -> String {
        self.xpub.to_string()
    }

    pub fn xpriv_string(&self) -> Option<String> {
        self.xpriv.as_ref().map(|x| x.to_string())
    }

    /// Derive a direct child key. Hardened children need the private key.
    pub fn derive_child(&self, child: ChildNumber) -> Result<AccountKey, WalletError> {
        match &self.xpriv {
            Some(xpriv) => {
                let derived = xpriv
                    .derive_priv(&SECP, &[child])
                    .map_err(|e| WalletError::HdWallet(e.to_string()))?;
                Ok(AccountKey::from_xpriv(self.kind, derived))
            }
            None if child.is_hardened() => Err(WalletError::HdWallet(
                "cannot derive a hardened child from a public key".into(),
            )),
            None => {
                let derived = self
                    .xpub
                    .ckd_pub(&SECP, child)
                    .map_err(|e| WalletError::HdWallet(e.to_string()))?;
                Ok(AccountKey::from_xpub(self.kind, derived))
            }
        }
    }

    /// Receive or change branch.
    pub fn chain(&self, chain: Chain) -> Result<ChainKey, WalletError> {
        let key = self.derive_child(normal(chain.index())?)?;
        Ok(ChainKey { chain, key })
    }

    /// Address at `chain/index`.
    pub fn address(&self, chain: Chain, index: u32) -> Result<Address, WalletError> {
        self.chain(chain)?.address_at(index)
    }

    /// Receive addresses in `start..end`.
    pub fn receive_addresses(&self, start: u32, end: u32) -> Result<Vec<String>, WalletError> {
        let chain = self.chain(Chain::Receive)?;
        (start..end)
            .map(|i| chain.address_at(i).map(|a| a.formatted()))
            .collect()
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKey")
            .field("kind", &self.kind)
            .field("xpub", &self.xpub_string())
            .field("xpriv", &self.xpriv.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Receive or change branch of an [`AccountKey`].
#[derive(Debug, Clone)]
pub struct ChainKey {
    chain: Chain,
    key: AccountKey,
}

impl ChainKey {
    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Extended public key of the branch, stored in the derivation cache.
    pub fn xpub_string(&self) -> String {
        self.key.xpub_string()
    }

    pub fn address_at(&self, index: u32) -> Result<Address, WalletError> {
        let child = self.key.derive_child(normal(index)?)?;
        let private_key = child.xpriv.as_ref().map(|x| x.to_priv());
        Ok(Address::new(
            self.key.kind,
            child.xpub.to_pub(),
            private_key,
            format!("M/{}/{index}", self.chain.index()),
        ))
    }
}

/// Legacy and, when present, segwit keys of one account.
#[derive(Debug, Clone)]
pub struct HdAccount {
    index: u32,
    legacy: AccountKey,
    segwit: Option<AccountKey>,
}

impl HdAccount {
    pub fn new(index: u32, legacy: AccountKey, segwit: Option<AccountKey>) -> Self {
        Self {
            index,
            legacy,
            segwit,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn legacy(&self) -> &AccountKey {
        &self.legacy
    }

    pub fn segwit(&self) -> Option<&AccountKey> {
        self.segwit.as_ref()
    }

    pub fn key(&self, kind: DerivationKind) -> Option<&AccountKey> {
        match kind {
            DerivationKind::Legacy => Some(&self.legacy),
            DerivationKind::Segwit => self.segwit.as_ref(),
        }
    }

    /// Segwit key when present, otherwise legacy.
    pub fn default_key(&self) -> &AccountKey {
        self.segwit.as_ref().unwrap_or(&self.legacy)
    }

    /// Extended public keys, default derivation first.
    pub fn xpubs(&self) -> XPubs {
        let mut xpubs = Vec::with_capacity(2);
        if let Some(segwit) = &self.segwit {
            xpubs.push(XPub::segwit(segwit.xpub_string()));
        }
        xpubs.push(XPub::legacy(self.legacy.xpub_string()));
        XPubs::new(xpubs)
    }
}

/// In-memory HD tree: seed, master key and derived accounts.
///
/// Built either from a seed (full wallet) or from stored extended keys
/// (no seed; watch-only when only xpubs are given).
pub struct HdWallet {
    seed: Option<Seed>,
    passphrase: String,
    master: Option<MasterKey>,
    kinds: Vec<DerivationKind>,
    accounts: Vec<HdAccount>,
}

impl HdWallet {
    /// Derive `n_accounts` accounts for each kind in `kinds` from a seed.
    pub fn from_seed(
        seed: Seed,
        passphrase: &str,
        n_accounts: u32,
        kinds: &[DerivationKind],
    ) -> Result<Self, WalletError> {
        let master = MasterKey::from_seed(&seed, passphrase)?;
        let mut wallet = Self {
            seed: Some(seed),
            passphrase: passphrase.to_string(),
            master: Some(master),
            kinds: kinds.to_vec(),
            accounts: Vec::new(),
        };
        for _ in 0..n_accounts {
            wallet.add_account()?;
        }
        Ok(wallet)
    }

    /// Rebuild from stored account keys without the seed.
    pub fn from_accounts(accounts: Vec<HdAccount>) -> Self {
        let mut kinds = vec![DerivationKind::Legacy];
        if accounts.iter().any(|a| a.segwit.is_some()) {
            kinds.push(DerivationKind::Segwit);
        }
        Self {
            seed: None,
            passphrase: String::new(),
            master: None,
            kinds,
            accounts,
        }
    }

    /// Watch-only tree from legacy xpub strings.
    pub fn from_xpubs(xpubs: &[String]) -> Result<Self, WalletError> {
        let accounts = xpubs
            .iter()
            .enumerate()
            .map(|(i, x)| {
                Ok(HdAccount::new(
                    i as u32,
                    AccountKey::from_xpub_str(DerivationKind::Legacy, x)?,
                    None,
                ))
            })
            .collect::<Result<Vec<_>, WalletError>>()?;
        Ok(Self::from_accounts(accounts))
    }

    /// Derive and append the next account.
    pub fn add_account(&mut self) -> Result<&HdAccount, WalletError> {
        let master = self.master.as_ref().ok_or_else(|| {
            WalletError::HdWallet("cannot derive new accounts without the seed".into())
        })?;
        let index = self.accounts.len() as u32;
        let legacy = master.account(DerivationKind::Legacy, index)?;
        let segwit = if self.kinds.contains(&DerivationKind::Segwit) {
            Some(master.account(DerivationKind::Segwit, index)?)
        } else {
            None
        };
        self.accounts.push(HdAccount::new(index, legacy, segwit));
        Ok(&self.accounts[index as usize])
    }

    /// Derive a single account key without appending it.
    pub fn derive_account(&self, kind: DerivationKind, index: u32) -> Result<AccountKey, WalletError> {
        self.master_key()?.account(kind, index)
    }

    pub fn accounts(&self) -> &[HdAccount] {
        &self.accounts
    }

    pub fn account(&self, index: usize) -> Option<&HdAccount> {
        self.accounts.get(index)
    }

    pub fn master_key(&self) -> Result<&MasterKey, WalletError> {
        self.master
            .as_ref()
            .ok_or_else(|| WalletError::HdWallet("master key not available".into()))
    }

    pub fn seed(&self) -> Option<&Seed> {
        self.seed.as_ref()
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    pub fn mnemonic(&self) -> Result<Vec<String>, WalletError> {
        self.seed
            .as_ref()
            .ok_or_else(|| WalletError::HdWallet("seed not available".into()))?
            .mnemonic()
    }

    /// True when every account can sign.
    pub fn has_private_keys(&self) -> bool {
        self.accounts.iter().all(|a| a.legacy.has_private_key())
    }

    /// Account key whose xpub string is `xpub`.
    pub fn account_key_for_xpub(&self, xpub: &str) -> Option<&AccountKey> {
        self.accounts
            .iter()
            .flat_map(|a| std::iter::once(&a.legacy).chain(a.segwit.as_ref()))
            .find(|k| k.xpub_string() == xpub)
    }

    /// Private key for the address at relative `path` (`M/chain/index`) under `xpub`.
    pub fn private_key_for(&self, xpub: &str, path: &str) -> Result<PrivateKey, WalletError> {
        let account = self
            .account_key_for_xpub(xpub)
            .ok_or_else(|| WalletError::NoSuchAddress(format!("unknown xpub {xpub}")))?;
        let (chain, index) = parse_relative_path(path)?;
        account
            .address(chain, index)?
            .private_key()
            .copied()
            .ok_or_else(|| WalletError::HdWallet("account is watch-only".into()))
    }
}

/// Split `M/0/5` into its chain and index.
pub fn parse_relative_path(path: &str) -> Result<(Chain, u32), WalletError> {
    let bad = || WalletError::HdWallet(format!("bad derivation path {path}"));
    let mut parts = path.split('/');
    if parts.next() != Some("M") {
        return Err(bad());
    }
    let chain = match parts.next() {
        Some("0") => Chain::Receive,
        Some("1") => Chain::Change,
        _ => return Err(bad()),
    };
    let index = parts.next().and_then(|i| i.parse().ok()).ok_or_else(bad)?;
    if parts.next().is_some() {
        return Err(bad());
    }
    Ok((chain, index))
}

impl fmt::Debug for HdWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdWallet")
            .field("seed", &self.seed)
            .field("kinds", &self.kinds)
            .field("accounts", &self.accounts.len())
            .finish()
    }
}

/// P2PKH address of a compressed private key, used for imported keys.
pub fn legacy_address_of(key: &PrivateKey) -> Result<String, WalletError> {
    let pk = CompressedPublicKey::from_private_key(&SECP, key)
        .map_err(|e| WalletError::InvalidKey(e.to_string()))?;
    Ok(bitcoin::Address::p2pkh(pk.pubkey_hash(), Network::Bitcoin).to_string())
}

/// Parse a WIF, or a Base58/hex raw 32-byte secret, into a private key.
pub fn parse_private_key(s: &str) -> Result<PrivateKey, WalletError> {
    if let Ok(key) = PrivateKey::from_wif(s) {
        return Ok(key);
    }
    let raw = match bs58::decode(s).into_vec() {
        Ok(bytes) if bytes.len() == 32 => bytes,
        _ => hex::decode(s).map_err(|_| WalletError::InvalidKey("unrecognized key format".into()))?,
    };
    let secret = bitcoin::secp256k1::SecretKey::from_slice(&raw)
        .map_err(|e| WalletError::InvalidKey(e.to_string()))?;
    Ok(PrivateKey::new(secret, Network::Bitcoin))
}
