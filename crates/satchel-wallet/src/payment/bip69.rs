//! BIP69 lexicographic ordering of inputs and outputs.
//!
//! Reordering changes what every signature commits to, so it is applied
//! while building and never after signing.

use std::cmp::Ordering;

use bitcoin::hashes::Hash;
use bitcoin::{Transaction, TxIn, TxOut};

/// Inputs by previous txid as displayed (big-endian), then output index.
pub fn compare_inputs(a: &TxIn, b: &TxIn) -> Ordering {
    let a_hash = a.previous_output.txid.to_byte_array();
    let b_hash = b.previous_output.txid.to_byte_array();
    a_hash
        .iter()
        .rev()
        .cmp(b_hash.iter().rev())
        .then(a.previous_output.vout.cmp(&b.previous_output.vout))
}

/// Outputs by value, then by script bytes.
pub fn compare_outputs(a: &TxOut, b: &TxOut) -> Ordering {
    a.value
        .cmp(&b.value)
        .then_with(|| a.script_pubkey.as_bytes().cmp(b.script_pubkey.as_bytes()))
}

pub fn sort(tx: &mut Transaction) {
    tx.input.sort_by(compare_inputs);
    tx.output.sort_by(compare_outputs);
}
