//! Transaction size and fee estimates.
//!
//! Sizes are in virtual bytes. A transaction with at least one segwit input
//! pays the segwit overhead and per-input cost for its segwit inputs.

use satchel_core::types::Utxo;

use super::OutputType;

/// Fixed overhead of a transaction without segwit inputs.
pub const TX_OVERHEAD: f64 = 10.0;
/// Fixed overhead once any input is segwit (marker, flag and witness count).
pub const TX_OVERHEAD_SEGWIT: f64 = 10.75;
pub const INPUT_SIZE_LEGACY: f64 = 148.0;
pub const INPUT_SIZE_SEGWIT: f64 = 67.75;

/// Relay floor used by [`is_adequate_fee`], in satoshis per kilobyte.
pub const MIN_RELAY_FEE_PER_KB: u64 = 1000;

/// Estimated virtual size of a transaction spending `inputs` into `outputs`.
pub fn estimated_size(inputs: &[Utxo], outputs: &[OutputType]) -> f64 {
    let segwit = inputs.iter().filter(|u| u.is_segwit).count() as f64;
    let legacy = inputs.len() as f64 - segwit;
    let overhead = if segwit > 0.0 { TX_OVERHEAD_SEGWIT } else { TX_OVERHEAD };
    let outputs: f64 = outputs.iter().map(|o| o.size() as f64).sum();
    overhead + legacy * INPUT_SIZE_LEGACY + segwit * INPUT_SIZE_SEGWIT + outputs
}

/// Fee in satoshis for the estimated size at `fee_per_kb`, rounded up.
///
/// # Examples
///
/// ```
/// use satchel_wallet::payment::{OutputType, fees};
/// use satchel_core::types::Utxo;
///
/// let input = Utxo::default();
/// assert_eq!(fees::estimated_fee(&[input], &[OutputType::P2pkh], 30_000), 5_760);
/// ```
pub fn estimated_fee(inputs: &[Utxo], outputs: &[OutputType], fee_per_kb: u64) -> u64 {
    let kb = estimated_size(inputs, outputs) / 1000.0;
    (fee_per_kb as f64 * kb).ceil() as u64
}

/// True when `absolute_fee` beats the relay floor for this shape.
pub fn is_adequate_fee(inputs: &[Utxo], outputs: &[OutputType], absolute_fee: u64) -> bool {
    absolute_fee > estimated_fee(inputs, outputs, MIN_RELAY_FEE_PER_KB)
}
