//! Unsigned transaction assembly.
//!
//! Inputs are consumed in the order given (the order coin selection
//! produced), receivers become outputs, change is added when it is worth
//! more than dust, and the result is put in BIP69 order.

use std::collections::HashMap;
use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use satchel_core::constants::{COIN, DUST, MAX_SUPPLY};
use satchel_core::types::Utxo;

use crate::error::WalletError;

use super::bip69;

/// Once inputs exceed the need by this much, no further inputs are added.
pub const MIN_FREE_OUTPUT_SIZE: u64 = COIN / 100;

/// A payment destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// Base58 or bech32 address.
    pub address: String,
    /// Amount in satoshis.
    pub amount: u64,
}

impl Recipient {
    pub fn new(address: impl Into<String>, amount: u64) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }
}

/// Coin prepared by the dust service for replay-protected sends.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DustInput {
    /// Funding transaction hash in internal byte order, like [`Utxo::tx_hash`].
    pub tx_hash: String,
    pub tx_output_n: u32,
    pub script: String,
    pub value: u64,
    /// Hex script of the output returning the dust.
    pub output_script: String,
    /// Secret the dust service expects alongside the broadcast.
    pub lock_secret: String,
}

impl DustInput {
    pub fn outpoint(&self) -> Result<OutPoint, WalletError> {
        Ok(OutPoint {
            txid: txid_from_internal_hex(&self.tx_hash)?,
            vout: self.tx_output_n,
        })
    }
}

/// A transaction ready for signing, with the outputs its inputs spend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub tx: Transaction,
    /// Previous outputs by outpoint. Inputs missing here are signed elsewhere.
    pub prevouts: HashMap<OutPoint, TxOut>,
}

impl UnsignedTransaction {
    /// Inputs minus outputs. Only inputs listed in `prevouts` count, so a
    /// dust service input is left out while its output is not.
    pub fn fee(&self) -> u64 {
        let spent: u64 = self
            .tx
            .input
            .iter()
            .filter_map(|i| self.prevouts.get(&i.previous_output))
            .map(|o| o.value.to_sat())
            .sum();
        let created: u64 = self.tx.output.iter().map(|o| o.value.to_sat()).sum();
        spent.saturating_sub(created)
    }
}

pub(crate) fn txid_from_internal_hex(s: &str) -> Result<Txid, WalletError> {
    let bytes: [u8; 32] = hex::decode(s)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| WalletError::Protocol(format!("bad transaction hash {s}")))?;
    Ok(Txid::from_byte_array(bytes))
}

fn script_from_hex(s: &str) -> Result<ScriptBuf, WalletError> {
    hex::decode(s)
        .map(ScriptBuf::from_bytes)
        .map_err(|e| WalletError::Protocol(format!("bad script hex: {e}")))
}

/// Output script paying `address`.
pub fn script_for_address(address: &str) -> Result<ScriptBuf, WalletError> {
    let parsed = bitcoin::Address::from_str(address)
        .map_err(|e| WalletError::InvalidAddress(format!("{address}: {e}")))?
        .require_network(bitcoin::Network::Bitcoin)
        .map_err(|e| WalletError::InvalidAddress(format!("{address}: {e}")))?;
    Ok(parsed.script_pubkey())
}

fn add_outputs(tx: &mut Transaction, receivers: &[Recipient]) -> Result<u64, WalletError> {
    let mut sum = 0u64;
    for r in receivers {
        if r.amount == 0 || r.amount < DUST {
            debug!(address = %r.address, amount = r.amount, "skipping dust receiver");
            continue;
        }
        tx.output.push(TxOut {
            value: Amount::from_sat(r.amount),
            script_pubkey: script_for_address(&r.address)?,
        });
        sum += r.amount;
    }
    Ok(sum)
}

fn add_inputs(
    tx: &mut Transaction,
    prevouts: &mut HashMap<OutPoint, TxOut>,
    coins: &[Utxo],
    needed: u64,
) -> Result<u64, WalletError> {
    let mut sum = 0u64;
    for coin in coins {
        let outpoint = OutPoint {
            txid: txid_from_internal_hex(&coin.tx_hash)?,
            vout: coin.output_index,
        };
        tx.input.push(TxIn {
            previous_output: outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        });
        prevouts.insert(
            outpoint,
            TxOut {
                value: Amount::from_sat(coin.value),
                script_pubkey: script_from_hex(&coin.script)?,
            },
        );
        sum = sum.saturating_add(coin.value);
        if sum == needed || sum >= needed.saturating_add(MIN_FREE_OUTPUT_SIZE) {
            break;
        }
    }

    if sum > MAX_SUPPLY {
        return Err(WalletError::Protocol("21m limit exceeded".into()));
    }
    if sum < needed {
        return Err(WalletError::InsufficientMoney {
            shortfall: needed - sum,
        });
    }
    Ok(sum)
}

fn add_change(tx: &mut Transaction, change_address: &str, change: u64) -> Result<(), WalletError> {
    if change > DUST {
        tx.output.push(TxOut {
            value: Amount::from_sat(change),
            script_pubkey: script_for_address(change_address)?,
        });
    }
    Ok(())
}

fn empty_transaction() -> Transaction {
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: Vec::new(),
        output: Vec::new(),
    }
}

/// Build an unsigned payment.
///
/// # Arguments
/// - `unspent` — coins to spend, in spending order
/// - `receivers` — destinations; zero and dust amounts are skipped
/// - `fee` — absolute fee in satoshis
/// - `change_address` — where change goes; without one, change is left to the fee
pub fn make_transaction(
    unspent: &[Utxo],
    receivers: &[Recipient],
    fee: u64,
    change_address: Option<&str>,
) -> Result<UnsignedTransaction, WalletError> {
    let mut tx = empty_transaction();
    let mut prevouts = HashMap::new();

    let output_sum = add_outputs(&mut tx, receivers)?;
    let input_sum = add_inputs(&mut tx, &mut prevouts, unspent, output_sum.saturating_add(fee))?;
    if let Some(address) = change_address {
        add_change(&mut tx, address, input_sum - output_sum - fee)?;
    }

    bip69::sort(&mut tx);
    Ok(UnsignedTransaction { tx, prevouts })
}

/// Build a payment that cannot be replayed on the other chain.
///
/// A leading dust placeholder from coin selection is dropped and the dust
/// service's real coin and its matching output are added instead. The dust
/// input stays unsigned here; the service completes it.
pub fn make_non_replayable_transaction(
    unspent: &[Utxo],
    receivers: &[Recipient],
    fee: u64,
    change_address: Option<&str>,
    dust_input: &DustInput,
) -> Result<UnsignedTransaction, WalletError> {
    info!("making non-replayable transaction");
    let mut tx = empty_transaction();
    let mut prevouts = HashMap::new();

    let output_sum = add_outputs(&mut tx, receivers)?;
    let mut needed = output_sum.saturating_add(fee);

    let coins = match unspent.first() {
        Some(first) if first.value == DUST && first.force_include && !first.is_replayable => {
            debug!("removing forced dust input");
            needed = needed.saturating_sub(DUST);
            &unspent[1..]
        }
        _ => unspent,
    };

    let input_sum = add_inputs(&mut tx, &mut prevouts, coins, needed)?;
    if let Some(address) = change_address {
        let change = input_sum.saturating_sub(output_sum).saturating_sub(fee);
        add_change(&mut tx, address, change)?;
    }

    tx.input.push(TxIn {
        previous_output: dust_input.outpoint()?,
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    });
    tx.output.push(TxOut {
        value: Amount::from_sat(dust_input.value),
        script_pubkey: script_from_hex(&dust_input.output_script)?,
    });

    bip69::sort(&mut tx);
    Ok(UnsignedTransaction { tx, prevouts })
}
