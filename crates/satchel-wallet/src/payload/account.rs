//! HD account records stored in the wallet body.
//!
//! Version 3 payloads carry one legacy extended key pair per account.
//! Version 4 payloads carry a list of [`Derivation`]s (legacy and bech32)
//! with a default. Both shapes are held in [`Account`], which exposes a
//! common view so callers rarely need to care which one they have.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use satchel_core::types::{DerivationKind, XPub, XPubs};

use crate::error::WalletError;
use crate::keys::{AccountKey, Chain, purpose};

/// Derivation `type` value for BIP44 P2PKH.
pub const LEGACY_TYPE: &str = "legacy";
/// Derivation `type` value for BIP84 P2WPKH.
pub const SEGWIT_TYPE: &str = "bech32";

fn type_name(kind: DerivationKind) -> &'static str {
    match kind {
        DerivationKind::Legacy => LEGACY_TYPE,
        DerivationKind::Segwit => SEGWIT_TYPE,
    }
}

fn parse_type(s: &str) -> Option<DerivationKind> {
    match s {
        LEGACY_TYPE => Some(DerivationKind::Legacy),
        SEGWIT_TYPE => Some(DerivationKind::Segwit),
        _ => None,
    }
}

mod derivation_type {
    use serde::de::Error as _;

    use super::*;

    pub fn serialize<S: Serializer>(kind: &DerivationKind, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(type_name(*kind))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DerivationKind, D::Error> {
        let s = String::deserialize(d)?;
        parse_type(&s).ok_or_else(|| D::Error::custom(format!("unknown derivation type {s}")))
    }
}

/// Chain-level xpubs cached so address derivation can skip one step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AddressCache {
    #[serde(rename = "receiveAccount", default)]
    pub receive_account: String,
    #[serde(rename = "changeAccount", default)]
    pub change_account: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AddressCache {
    pub fn from_account_key(key: &AccountKey) -> Result<Self, WalletError> {
        Ok(Self {
            receive_account: key.chain(Chain::Receive)?.xpub_string(),
            change_account: key.chain(Chain::Change)?.xpub_string(),
            extra: Map::new(),
        })
    }
}

/// A label attached to a receive index. Labelled indices are reserved.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AddressLabel {
    pub index: u32,
    pub label: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AddressLabel {
    pub fn new(index: u32, label: impl Into<String>) -> Self {
        Self {
            index,
            label: label.into(),
            extra: Map::new(),
        }
    }
}

/// One derivation scheme of a version 4 account.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Derivation {
    #[serde(rename = "type", with = "derivation_type")]
    pub kind: DerivationKind,
    pub purpose: u32,
    /// Plain or second-password-encrypted xprv; empty when watch-only.
    #[serde(default)]
    pub xpriv: String,
    pub xpub: String,
    #[serde(default)]
    pub address_labels: Vec<AddressLabel>,
    #[serde(default)]
    pub cache: AddressCache,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Derivation {
    pub fn from_account_key(key: &AccountKey) -> Result<Self, WalletError> {
        Ok(Self {
            kind: key.kind(),
            purpose: purpose(key.kind()),
            xpriv: key.xpriv_string().unwrap_or_default(),
            xpub: key.xpub_string(),
            address_labels: Vec::new(),
            cache: AddressCache::from_account_key(key)?,
            extra: Map::new(),
        })
    }
}

/// Version 3 account: a single legacy key pair.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccountV3 {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub xpriv: String,
    pub xpub: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_labels: Vec<AddressLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<AddressCache>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AccountV3 {
    pub fn new(label: impl Into<String>, key: &AccountKey) -> Result<Self, WalletError> {
        Ok(Self {
            label: label.into(),
            archived: false,
            xpriv: key.xpriv_string().unwrap_or_default(),
            xpub: key.xpub_string(),
            address_labels: Vec::new(),
            cache: Some(AddressCache::from_account_key(key)?),
            extra: Map::new(),
        })
    }
}

/// Version 4 account: several derivations, one of them the default.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccountV4 {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(with = "derivation_type")]
    pub default_derivation: DerivationKind,
    pub derivations: Vec<Derivation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AccountV4 {
    /// New account with a legacy and a bech32 derivation, bech32 default.
    pub fn new(label: impl Into<String>, legacy: Derivation, segwit: Derivation) -> Self {
        Self {
            label: label.into(),
            archived: false,
            default_derivation: DerivationKind::Segwit,
            derivations: vec![legacy, segwit],
            extra: Map::new(),
        }
    }

    pub fn derivation(&self, kind: DerivationKind) -> Option<&Derivation> {
        self.derivations.iter().find(|d| d.kind == kind)
    }

    pub fn derivation_mut(&mut self, kind: DerivationKind) -> Option<&mut Derivation> {
        self.derivations.iter_mut().find(|d| d.kind == kind)
    }

    fn default_index(&self) -> usize {
        self.derivations
            .iter()
            .position(|d| d.kind == self.default_derivation)
            .unwrap_or(0)
    }
}

/// An account of either payload version.
///
/// The untagged representation tries the version 4 shape first; a record
/// without `derivations` falls through to version 3.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Account {
    V4(AccountV4),
    V3(AccountV3),
}

impl Account {
    pub fn version(&self) -> u32 {
        match self {
            Self::V3(_) => 3,
            Self::V4(_) => 4,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::V3(a) => &a.label,
            Self::V4(a) => &a.label,
        }
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        match self {
            Self::V3(a) => a.label = label.into(),
            Self::V4(a) => a.label = label.into(),
        }
    }

    pub fn is_archived(&self) -> bool {
        match self {
            Self::V3(a) => a.archived,
            Self::V4(a) => a.archived,
        }
    }

    pub fn set_archived(&mut self, archived: bool) {
        match self {
            Self::V3(a) => a.archived = archived,
            Self::V4(a) => a.archived = archived,
        }
    }

    pub fn default_kind(&self) -> DerivationKind {
        match self {
            Self::V3(_) => DerivationKind::Legacy,
            Self::V4(a) => a.default_derivation,
        }
    }

    /// Extended public keys, default derivation first.
    pub fn xpubs(&self) -> XPubs {
        match self {
            Self::V3(a) => XPubs::new(vec![XPub::legacy(&a.xpub)]),
            Self::V4(a) => {
                let first = a.default_index();
                let mut ordered: Vec<&Derivation> = a.derivations.iter().collect();
                if first < ordered.len() {
                    let default = ordered.remove(first);
                    ordered.insert(0, default);
                }
                XPubs::new(
                    ordered
                        .into_iter()
                        .map(|d| XPub {
                            address: d.xpub.clone(),
                            derivation: d.kind,
                        })
                        .collect(),
                )
            }
        }
    }

    pub fn xpub_for(&self, kind: DerivationKind) -> Option<&str> {
        match (self, kind) {
            (Self::V3(a), DerivationKind::Legacy) => Some(&a.xpub),
            (Self::V3(_), DerivationKind::Segwit) => None,
            (Self::V4(a), kind) => a.derivation(kind).map(|d| d.xpub.as_str()),
        }
    }

    pub fn default_xpub(&self) -> &str {
        match self {
            Self::V3(a) => &a.xpub,
            Self::V4(a) => a
                .derivations
                .get(a.default_index())
                .map(|d| d.xpub.as_str())
                .unwrap_or_default(),
        }
    }

    pub fn contains_xpub(&self, xpub: &str) -> bool {
        match self {
            Self::V3(a) => a.xpub == xpub,
            Self::V4(a) => a.derivations.iter().any(|d| d.xpub == xpub),
        }
    }

    pub fn xpriv_for(&self, kind: DerivationKind) -> Option<&str> {
        let xpriv = match (self, kind) {
            (Self::V3(a), DerivationKind::Legacy) => a.xpriv.as_str(),
            (Self::V3(_), DerivationKind::Segwit) => return None,
            (Self::V4(a), kind) => a.derivation(kind)?.xpriv.as_str(),
        };
        (!xpriv.is_empty()).then_some(xpriv)
    }

    /// Every non-empty stored xpriv.
    pub fn private_keys(&self) -> Vec<&str> {
        match self {
            Self::V3(a) => vec![a.xpriv.as_str()],
            Self::V4(a) => a.derivations.iter().map(|d| d.xpriv.as_str()).collect(),
        }
        .into_iter()
        .filter(|k| !k.is_empty())
        .collect()
    }

    /// Rewrite every stored xpriv, e.g. to add or strip second-password encryption.
    pub fn map_private_keys<F>(&mut self, mut f: F) -> Result<(), WalletError>
    where
        F: FnMut(&str) -> Result<String, WalletError>,
    {
        let slots: Vec<&mut String> = match self {
            Self::V3(a) => vec![&mut a.xpriv],
            Self::V4(a) => a.derivations.iter_mut().map(|d| &mut d.xpriv).collect(),
        };
        for slot in slots {
            if !slot.is_empty() {
                let rewritten = f(slot.as_str())?;
                *slot = rewritten;
            }
        }
        Ok(())
    }

    /// Labels of the default derivation.
    pub fn address_labels(&self) -> &[AddressLabel] {
        match self {
            Self::V3(a) => &a.address_labels,
            Self::V4(a) => a
                .derivations
                .get(a.default_index())
                .map(|d| d.address_labels.as_slice())
                .unwrap_or_default(),
        }
    }

    fn address_labels_mut(&mut self) -> Option<&mut Vec<AddressLabel>> {
        match self {
            Self::V3(a) => Some(&mut a.address_labels),
            Self::V4(a) => {
                let i = a.default_index();
                a.derivations.get_mut(i).map(|d| &mut d.address_labels)
            }
        }
    }

    /// Label (and thereby reserve) a receive index, replacing any label already there.
    pub fn add_address_label(&mut self, index: u32, label: impl Into<String>) -> Result<(), WalletError> {
        let labels = self
            .address_labels_mut()
            .ok_or_else(|| WalletError::HdWallet("account has no derivations".into()))?;
        let label = label.into();
        match labels.iter_mut().find(|l| l.index == index) {
            Some(existing) => existing.label = label,
            None => labels.push(AddressLabel::new(index, label)),
        }
        Ok(())
    }

    pub fn remove_address_label(&mut self, index: u32) {
        if let Some(labels) = self.address_labels_mut() {
            labels.retain(|l| l.index != index);
        }
    }

    /// Watch-only account key rebuilt from the stored xpub.
    pub fn account_key(&self, kind: DerivationKind) -> Result<AccountKey, WalletError> {
        let xpub = self
            .xpub_for(kind)
            .ok_or_else(|| WalletError::HdWallet(format!("account has no {} derivation", type_name(kind))))?;
        AccountKey::from_xpub_str(kind, xpub)
    }

    /// Convert to the version 4 shape, adding `segwit` when it is missing.
    ///
    /// Labels and cache of a version 3 account move onto its legacy derivation.
    pub fn upgrade_to_v4(&self, segwit: Derivation) -> Result<AccountV4, WalletError> {
        match self {
            Self::V4(a) => {
                let mut upgraded = a.clone();
                if upgraded.derivation(DerivationKind::Segwit).is_none() {
                    upgraded.derivations.push(segwit);
                }
                Ok(upgraded)
            }
            Self::V3(a) => {
                let cache = match &a.cache {
                    Some(cache) => cache.clone(),
                    None => AddressCache::from_account_key(&AccountKey::from_xpub_str(
                        DerivationKind::Legacy,
                        &a.xpub,
                    )?)?,
                };
                let legacy = Derivation {
                    kind: DerivationKind::Legacy,
                    purpose: purpose(DerivationKind::Legacy),
                    xpriv: a.xpriv.clone(),
                    xpub: a.xpub.clone(),
                    address_labels: a.address_labels.clone(),
                    cache,
                    extra: Map::new(),
                };
                let mut upgraded = AccountV4::new(a.label.clone(), legacy, segwit);
                upgraded.archived = a.archived;
                upgraded.extra = a.extra.clone();
                Ok(upgraded)
            }
        }
    }
}
