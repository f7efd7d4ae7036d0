//! Shared data types exchanged with the block explorer and storage collaborators.
//!
//! All monetary values are satoshis held as `i64` where the explorer may report
//! negative deltas and `u64` where a value is always a positive amount.

use serde::{Deserialize, Serialize};

/// Which derivation scheme an extended public key belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DerivationKind {
    /// BIP44 P2PKH (`m/44'/0'/n'`).
    Legacy,
    /// BIP84 P2WPKH (`m/84'/0'/n'`).
    Segwit,
}

/// A derivation-tagged extended public key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct XPub {
    pub address: String,
    pub derivation: DerivationKind,
}

impl XPub {
    pub fn legacy(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            derivation: DerivationKind::Legacy,
        }
    }

    pub fn segwit(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            derivation: DerivationKind::Segwit,
        }
    }
}

/// Every extended public key of one account, default first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct XPubs {
    pub xpubs: Vec<XPub>,
}

impl XPubs {
    pub fn new(xpubs: Vec<XPub>) -> Self {
        Self { xpubs }
    }

    /// The key new receive addresses are generated from.
    pub fn default_xpub(&self) -> Option<&XPub> {
        self.xpubs.first()
    }

    pub fn for_derivation(&self, kind: DerivationKind) -> Option<&XPub> {
        self.xpubs.iter().find(|x| x.derivation == kind)
    }
}

/// Split a list of accounts' keys into the legacy and segwit parameter lists
/// the explorer expects.
pub fn split_xpubs(xpubs: &[XPubs]) -> (Vec<String>, Vec<String>) {
    let mut legacy = Vec::new();
    let mut segwit = Vec::new();
    for x in xpubs.iter().flat_map(|a| a.xpubs.iter()) {
        match x.derivation {
            DerivationKind::Legacy => legacy.push(x.address.clone()),
            DerivationKind::Segwit => segwit.push(x.address.clone()),
        }
    }
    (legacy, segwit)
}

/// Aggregate balance for one address or extended key.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Balance {
    pub final_balance: i64,
    pub total_received: i64,
    #[serde(rename = "n_tx")]
    pub tx_count: u64,
}

impl Balance {
    pub fn add(&self, other: &Balance) -> Balance {
        Balance {
            final_balance: self.final_balance + other.final_balance,
            total_received: self.total_received + other.total_received,
            tx_count: self.tx_count + other.tx_count,
        }
    }
}

/// Which addresses an explorer balance query should count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalanceFilter {
    All,
    Confirmed,
    #[default]
    RemoveUnspendable,
}

/// Extended key attribution on an explorer output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct XpubRef {
    /// The owning extended public key.
    #[serde(rename = "m")]
    pub address: String,
    /// Relative derivation path such as `M/0/3`.
    #[serde(rename = "path")]
    pub derivation_path: String,
}

impl XpubRef {
    /// True when the path points into the change chain.
    pub fn is_change(&self) -> bool {
        self.derivation_path.starts_with("M/1/")
    }
}

/// Unspent output as reported by the explorer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    /// Funding transaction hash in the explorer's internal byte order.
    pub tx_hash: String,
    #[serde(rename = "tx_output_n")]
    pub output_index: u32,
    /// Hex-encoded scriptPubKey of the output.
    pub script: String,
    pub value: u64,
    #[serde(default)]
    pub xpub: Option<XpubRef>,
    #[serde(default)]
    pub is_segwit: bool,
    #[serde(default = "default_replayable")]
    pub is_replayable: bool,
    #[serde(default)]
    pub force_include: bool,
}

fn default_replayable() -> bool {
    true
}

/// Coins are replayable unless the explorer says otherwise.
impl Default for Utxo {
    fn default() -> Self {
        Self {
            tx_hash: String::new(),
            output_index: 0,
            script: String::new(),
            value: 0,
            xpub: None,
            is_segwit: false,
            is_replayable: default_replayable(),
            force_include: false,
        }
    }
}

/// Explorer per-address summary carried in a multi-address response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct AddressSummary {
    pub address: String,
    #[serde(default)]
    pub final_balance: i64,
    #[serde(default)]
    pub total_received: i64,
    #[serde(default)]
    pub n_tx: u64,
    /// Next unused receive index for an extended key.
    #[serde(default)]
    pub account_index: u32,
    /// Next unused change index for an extended key.
    #[serde(default)]
    pub change_index: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct RawOutput {
    #[serde(default)]
    pub addr: Option<String>,
    pub value: i64,
    #[serde(default)]
    pub xpub: Option<XpubRef>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct RawInput {
    /// Absent for coinbase inputs.
    #[serde(default)]
    pub prev_out: Option<RawOutput>,
}

/// One transaction as returned by a multi-address query.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct RawTransaction {
    pub hash: String,
    /// Net effect on the queried set, as computed by the explorer.
    #[serde(default)]
    pub result: i64,
    #[serde(default)]
    pub fee: i64,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub block_height: Option<u64>,
    #[serde(default)]
    pub double_spend: bool,
    #[serde(default)]
    pub inputs: Vec<RawInput>,
    #[serde(default)]
    pub out: Vec<RawOutput>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatestBlock {
    pub height: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChainInfo {
    pub latest_block: LatestBlock,
}

/// Response body of a multi-address query.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct MultiAddressResponse {
    #[serde(default)]
    pub addresses: Vec<AddressSummary>,
    #[serde(default)]
    pub txs: Vec<RawTransaction>,
    #[serde(default)]
    pub info: ChainInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_xpubs_by_derivation() {
        let accounts = vec![
            XPubs::new(vec![XPub::segwit("zpub-a"), XPub::legacy("xpub-a")]),
            XPubs::new(vec![XPub::legacy("xpub-b")]),
        ];
        let (legacy, segwit) = split_xpubs(&accounts);
        assert_eq!(legacy, vec!["xpub-a", "xpub-b"]);
        assert_eq!(segwit, vec!["zpub-a"]);
    }

    #[test]
    fn default_xpub_is_first() {
        let x = XPubs::new(vec![XPub::segwit("s"), XPub::legacy("l")]);
        assert_eq!(x.default_xpub().map(|x| x.address.as_str()), Some("s"));
        assert_eq!(
            x.for_derivation(DerivationKind::Legacy).map(|x| x.address.as_str()),
            Some("l")
        );
    }

    #[test]
    fn utxo_default_matches_explorer_default() {
        let parsed: Utxo =
            serde_json::from_str(r#"{"tx_hash":"","tx_output_n":0,"script":"","value":0}"#).unwrap();
        assert!(parsed.is_replayable);
        assert_eq!(Utxo::default(), parsed);
    }

    #[test]
    fn balance_add() {
        let a = Balance { final_balance: 10, total_received: 20, tx_count: 1 };
        let b = Balance { final_balance: 5, total_received: 5, tx_count: 2 };
        assert_eq!(a.add(&b), Balance { final_balance: 15, total_received: 25, tx_count: 3 });
    }

    #[test]
    fn xpub_ref_change_path() {
        let change = XpubRef { address: "x".into(), derivation_path: "M/1/4".into() };
        let receive = XpubRef { address: "x".into(), derivation_path: "M/0/4".into() };
        assert!(change.is_change());
        assert!(!receive.is_change());
    }

    #[test]
    fn utxo_json_defaults() {
        let json = r#"{"tx_hash":"ab","tx_output_n":1,"script":"76a9","value":1000}"#;
        let utxo: Utxo = serde_json::from_str(json).unwrap();
        assert_eq!(utxo.output_index, 1);
        assert!(utxo.is_replayable);
        assert!(!utxo.force_include);
        assert!(utxo.xpub.is_none());
    }

    #[test]
    fn multi_address_parses_explorer_shape() {
        let json = r#"{
            "addresses":[{"address":"xpub1","final_balance":100,"account_index":3,"change_index":1}],
            "txs":[{"hash":"h","result":100,"fee":10,"time":1,"block_height":5,
                    "inputs":[{"prev_out":{"addr":"a","value":110}}],
                    "out":[{"addr":"b","value":100,"xpub":{"m":"xpub1","path":"M/0/2"}}]}],
            "info":{"latest_block":{"height":7}}
        }"#;
        let resp: MultiAddressResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.addresses[0].account_index, 3);
        assert_eq!(resp.txs[0].out[0].xpub.as_ref().unwrap().derivation_path, "M/0/2");
        assert_eq!(resp.info.latest_block.height, 7);
    }
}
