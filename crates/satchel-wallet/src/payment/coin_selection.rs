//! Fee-aware coin selection.
//!
//! Coins are weighed by their effective value (value minus the fee their
//! input costs at the current rate). Coins worth nothing after that fee are
//! left out unless the caller forces them in. Selection walks the ordered
//! coins, keeping every forced coin and adding others until the amount plus
//! the fee for the chosen inputs is covered.

use tracing::debug;

use satchel_core::constants::{DUST, MAX_SUPPLY};
use satchel_core::types::Utxo;

use crate::error::WalletError;

use super::OutputType;

/// Fixed bytes charged per transaction during selection.
pub const COST_BASE: u64 = 10;
pub const COST_PER_INPUT_LEGACY: u64 = 149;
pub const COST_PER_INPUT_SEGWIT: u64 = 68;

/// Outcome of coin selection for one payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpendableUnspentOutputs {
    /// Coins to spend, in spending order.
    pub spendable_outputs: Vec<Utxo>,
    /// Fee in satoshis, including any remainder folded in.
    pub absolute_fee: u64,
    /// Remainder below the dust threshold that went to the fee instead of change.
    pub consumed_amount: u64,
    /// True when the first coin cannot be replayed on the other chain.
    pub is_replay_protected: bool,
}

impl SpendableUnspentOutputs {
    pub fn total_value(&self) -> u64 {
        self.spendable_outputs.iter().fold(0, |sum, u| sum.saturating_add(u.value))
    }

    /// Change left for a payment of `amount`.
    pub fn change(&self, amount: u64) -> u64 {
        self.total_value()
            .saturating_sub(amount)
            .saturating_sub(self.absolute_fee)
    }
}

/// Satoshis per byte for a per-kilobyte rate, rounded up.
pub fn fee_per_byte(fee_per_kb: u64) -> u64 {
    fee_per_kb.div_ceil(1000)
}

/// Selects coins at a fixed fee rate.
pub struct CoinSelector {
    coins: Vec<Utxo>,
    fee_per_byte: u64,
}

impl CoinSelector {
    /// Selector over `coins`, which are considered in the given order.
    pub fn new(coins: Vec<Utxo>, fee_per_byte: u64) -> Self {
        Self { coins, fee_per_byte }
    }

    /// Pick coins for `amount` to one `target` output.
    ///
    /// When the remainder after the fee is worth at least the dust threshold
    /// of `change`, the fee is recomputed for two outputs and the remainder
    /// becomes change. Otherwise it is folded into the fee.
    pub fn select(
        &self,
        amount: u64,
        target: OutputType,
        change: OutputType,
    ) -> Result<SpendableUnspentOutputs, WalletError> {
        let mut selected: Vec<Utxo> = Vec::new();
        let mut accumulated = 0u64;
        let mut fee = self.fee_for(&selected, 1, target);

        for coin in self.effective_coins() {
            if !coin.force_include && accumulated >= amount.saturating_add(fee) {
                continue;
            }
            accumulated = accumulated
                .checked_add(coin.value)
                .filter(|total| *total <= MAX_SUPPLY)
                .ok_or_else(|| WalletError::Protocol("21m limit exceeded".into()))?;
            selected.push(coin.clone());
            fee = self.fee_for(&selected, 1, target);
        }

        let needed = amount.saturating_add(fee);
        if selected.is_empty() || accumulated < needed {
            return Err(WalletError::InsufficientMoney {
                shortfall: needed - accumulated,
            });
        }

        let is_replay_protected = replay_protected(&selected);
        let remaining = accumulated - needed;
        let dust = dust_threshold(change, self.fee_per_byte);
        if remaining >= dust {
            let absolute_fee = self.fee_for(&selected, 2, change);
            Ok(SpendableUnspentOutputs {
                spendable_outputs: selected,
                absolute_fee,
                consumed_amount: 0,
                is_replay_protected,
            })
        } else {
            Ok(SpendableUnspentOutputs {
                spendable_outputs: selected,
                absolute_fee: fee.saturating_add(remaining),
                consumed_amount: remaining,
                is_replay_protected,
            })
        }
    }

    /// Every coin worth spending, with the fee for sweeping them all to one output.
    pub fn select_all(&self, target: OutputType) -> SpendableUnspentOutputs {
        let coins: Vec<Utxo> = self.effective_coins().cloned().collect();
        let value = coins.iter().fold(0u64, |sum, u| sum.saturating_add(u.value));
        let balance = value.saturating_sub(self.fee_for(&coins, 1, target));
        SpendableUnspentOutputs {
            is_replay_protected: replay_protected(&coins),
            absolute_fee: value - balance,
            consumed_amount: 0,
            spendable_outputs: coins,
        }
    }

    fn effective_coins(&self) -> impl Iterator<Item = &Utxo> {
        self.coins
            .iter()
            .filter(|c| c.force_include || effective_value(c, self.fee_per_byte) > 0)
    }

    fn fee_for(&self, inputs: &[Utxo], outputs: u64, output_type: OutputType) -> u64 {
        transaction_bytes(inputs, outputs, output_type).saturating_mul(self.fee_per_byte)
    }
}

fn input_cost(coin: &Utxo) -> u64 {
    if coin.is_segwit {
        COST_PER_INPUT_SEGWIT
    } else {
        COST_PER_INPUT_LEGACY
    }
}

fn effective_value(coin: &Utxo, fee_per_byte: u64) -> u64 {
    coin.value.saturating_sub(input_cost(coin).saturating_mul(fee_per_byte))
}

fn transaction_bytes(inputs: &[Utxo], outputs: u64, output_type: OutputType) -> u64 {
    COST_BASE + inputs.iter().map(input_cost).sum::<u64>() + output_type.size() * outputs
}

/// Smallest change worth creating: the cost of one more output plus the
/// input needed to spend it later.
pub fn dust_threshold(output_type: OutputType, fee_per_byte: u64) -> u64 {
    let input = match output_type {
        OutputType::P2pkh | OutputType::P2sh => COST_PER_INPUT_LEGACY,
        OutputType::P2wpkh | OutputType::P2wsh => COST_PER_INPUT_SEGWIT,
    };
    (input + output_type.size()).saturating_mul(fee_per_byte)
}

fn replay_protected(coins: &[Utxo]) -> bool {
    coins.first().is_some_and(|c| !c.is_replayable)
}

/// Placeholder for the dust service's coin, replaced when the transaction is built.
pub fn forced_dust_input() -> Utxo {
    Utxo {
        value: DUST,
        is_replayable: false,
        force_include: true,
        ..Utxo::default()
    }
}

/// Order coins for selection.
///
/// Without replay protection coins go largest first. With it, the smallest
/// non-replayable coin leads and is forced in (or a dust placeholder when
/// there is none), followed by replayable coins and then the remaining
/// non-replayable ones, each largest first.
fn arrange(utxos: &[Utxo], want_replay_protection: bool) -> Vec<Utxo> {
    let by_value_desc = |a: &Utxo, b: &Utxo| b.value.cmp(&a.value);
    if !want_replay_protection || utxos.is_empty() {
        let mut coins = utxos.to_vec();
        coins.sort_by(by_value_desc);
        return coins;
    }

    let (mut non_replayable, mut replayable): (Vec<Utxo>, Vec<Utxo>) =
        utxos.iter().cloned().partition(|u| !u.is_replayable);
    non_replayable.sort_by(by_value_desc);
    replayable.sort_by(by_value_desc);

    let head = match non_replayable.pop() {
        Some(mut coin) => {
            coin.force_include = true;
            coin
        }
        None => {
            debug!("no non-replayable coin, adding dust placeholder");
            forced_dust_input()
        }
    };
    let mut coins = Vec::with_capacity(utxos.len() + 1);
    coins.push(head);
    coins.extend(replayable);
    coins.extend(non_replayable);
    coins
}

/// Smallest set of coins paying `amount` to a `target` output.
///
/// # Arguments
/// - `utxos` — every coin the wallet may spend
/// - `target` — type of the receiving output
/// - `change` — type of the change output, if one is needed
/// - `amount` — satoshis to send, excluding the fee
/// - `fee_per_kb` — fee rate in satoshis per kilobyte
/// - `want_replay_protection` — lead with a coin the other chain will reject
pub fn spendable_coins(
    utxos: &[Utxo],
    target: OutputType,
    change: OutputType,
    amount: u64,
    fee_per_kb: u64,
    want_replay_protection: bool,
) -> Result<SpendableUnspentOutputs, WalletError> {
    let selector = CoinSelector::new(arrange(utxos, want_replay_protection), fee_per_byte(fee_per_kb));
    selector.select(amount, target, change)
}

/// Largest amount that can be swept to one `target` output, and its fee.
pub fn maximum_available(
    utxos: &[Utxo],
    target: OutputType,
    fee_per_kb: u64,
    want_replay_protection: bool,
) -> (u64, u64) {
    let selector = CoinSelector::new(arrange(utxos, want_replay_protection), fee_per_byte(fee_per_kb));
    let sweep = selector.select_all(target);
    (sweep.total_value().saturating_sub(sweep.absolute_fee), sweep.absolute_fee)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn coin(value: u64) -> Utxo {
        Utxo {
            tx_hash: "00".repeat(32),
            script: "76a91469dec09e9b32ffd447c80d413d58f0413e99208e88ac".into(),
            value,
            ..Utxo::default()
        }
    }

    fn non_replayable(value: u64) -> Utxo {
        Utxo {
            is_replayable: false,
            ..coin(value)
        }
    }

    fn values(bundle: &SpendableUnspentOutputs) -> Vec<u64> {
        bundle.spendable_outputs.iter().map(|u| u.value).collect()
    }

    const P2PKH: OutputType = OutputType::P2pkh;

    #[test]
    fn fee_per_byte_rounds_up() {
        assert_eq!(fee_per_byte(100), 1);
        assert_eq!(fee_per_byte(6756), 7);
        assert_eq!(fee_per_byte(30_000), 30);
        assert_eq!(fee_per_byte(0), 0);
    }

    #[test]
    fn max_spendable_single_coin() {
        assert_eq!(maximum_available(&[coin(10_000)], P2PKH, 100, false), (9_807, 193));
    }

    #[test]
    fn max_spendable_two_coins() {
        assert_eq!(maximum_available(&[coin(10_000), coin(1_000)], P2PKH, 100, false), (10_658, 342));
    }

    #[test]
    fn uneconomic_coin_is_left_out() {
        let coins = [coin(10_000), coin(1_000)];
        assert_eq!(maximum_available(&coins, P2PKH, 6_756, false), (8_649, 1_351));
        assert_eq!(maximum_available(&coins, P2PKH, 6_757, false), (8_649, 1_351));
        assert_eq!(
            spendable_coins(&coins, P2PKH, P2PKH, 8_702, 6_756, false),
            Err(WalletError::InsufficientMoney { shortfall: 53 })
        );
    }

    #[test]
    fn three_largest_coins_plus_change() {
        let coins: Vec<Utxo> = [80_200, 70_000, 60_000, 50_000, 40_000, 30_000, 20_000, 10_000]
            .into_iter()
            .map(coin)
            .collect();
        let bundle = spendable_coins(&coins, P2PKH, P2PKH, 150_200, 30_000, false).unwrap();
        assert_eq!(values(&bundle), vec![80_200, 70_000, 60_000]);
        assert_eq!(bundle.absolute_fee, (10 + 3 * 149 + 2 * 34) * 30);
        assert_eq!(bundle.consumed_amount, 0);
        assert_eq!(bundle.change(150_200), 210_200 - 150_200 - 15_750);
    }

    #[test]
    fn small_remainder_goes_to_fee() {
        // 10000 - 9800 - 193 leaves 7, below the dust threshold of 183.
        let bundle = spendable_coins(&[coin(10_000)], P2PKH, P2PKH, 9_800, 1_000, false).unwrap();
        assert_eq!(bundle.consumed_amount, 7);
        assert_eq!(bundle.absolute_fee, 200);
        assert_eq!(bundle.change(9_800), 0);
    }

    #[test]
    fn empty_set_is_insufficient() {
        let err = spendable_coins(&[], P2PKH, P2PKH, 1_500_000, 30_000, true).unwrap_err();
        assert_eq!(err, WalletError::InsufficientMoney { shortfall: 1_500_000 + 44 * 30 });
        assert_eq!(maximum_available(&[], P2PKH, 1_000, true), (0, 0));
    }

    #[test]
    fn replay_protection_adds_dust_placeholder() {
        let coins: Vec<Utxo> = [8_139, 6_600, 8_324, 4_000, 8_140].into_iter().map(coin).collect();
        let bundle = spendable_coins(&coins, P2PKH, P2PKH, 4_134, 35_000, true).unwrap();
        assert_eq!(values(&bundle), vec![546, 8_324, 8_140, 8_139, 6_600]);
        let first = &bundle.spendable_outputs[0];
        assert!(first.force_include && !first.is_replayable);
        assert!(bundle.spendable_outputs[1..].iter().all(|u| u.is_replayable));
        assert!(bundle.is_replay_protected);
    }

    #[test]
    fn replay_protection_leads_with_smallest_non_replayable() {
        let coins = vec![
            non_replayable(8_140),
            coin(8_324),
            non_replayable(6_600),
            coin(5_000),
            non_replayable(8_139),
            coin(4_947),
        ];
        let bundle = spendable_coins(&coins, P2PKH, P2PKH, 31_770, 10_000, true).unwrap();
        assert_eq!(values(&bundle), vec![6_600, 8_324, 5_000, 4_947, 8_140, 8_139]);
        let replayable: Vec<bool> = bundle.spendable_outputs.iter().map(|u| u.is_replayable).collect();
        assert_eq!(replayable, vec![false, true, true, true, false, false]);
        assert!(bundle.is_replay_protected);
        assert_eq!(bundle.consumed_amount, 0);
    }

    #[test]
    fn single_non_replayable_is_forced_first() {
        let mut coins: Vec<Utxo> = [8_324, 8_140, 8_139, 6_600, 5_000, 4_947].into_iter().map(coin).collect();
        coins.push(non_replayable(1_323));
        let bundle = spendable_coins(&coins, P2PKH, P2PKH, 34_864, 7_000, true).unwrap();
        assert_eq!(values(&bundle), vec![1_323, 8_324, 8_140, 8_139, 6_600, 5_000, 4_947]);
        assert!(bundle.is_replay_protected);
    }

    #[test]
    fn sweep_with_replay_protection_counts_placeholder() {
        let (available, fee) = maximum_available(&[coin(1_323)], P2PKH, 1_000, true);
        assert_eq!(fee, 342);
        assert_eq!(available, 1_323 + 546 - 342);
    }

    #[test]
    fn supply_cap_is_enforced_during_selection() {
        let coins = [coin(3_000_000_000_000_000), coin(3_000_000_000_000_000)];
        let err = spendable_coins(&coins, P2PKH, P2PKH, 5_000_000_000_000_000, 1_000, false).unwrap_err();
        assert!(matches!(err, WalletError::Protocol(_)));
    }

    #[test]
    fn huge_coin_values_do_not_overflow() {
        let huge = u64::MAX / 2 + 1;
        let coins = [coin(huge), coin(huge)];
        assert!(matches!(
            spendable_coins(&coins, P2PKH, P2PKH, u64::MAX - 1, 1_000, false),
            Err(WalletError::Protocol(_))
        ));
        let (available, fee) = maximum_available(&coins, P2PKH, 1_000, false);
        assert_eq!(fee, 10 + 2 * 149 + 34);
        assert_eq!(available, u64::MAX - fee);
    }

    #[test]
    fn hostile_fee_rate_saturates() {
        assert_eq!(dust_threshold(P2PKH, u64::MAX), u64::MAX);
        let err = spendable_coins(&[coin(10_000)], P2PKH, P2PKH, 1_000, u64::MAX, false).unwrap_err();
        assert!(matches!(err, WalletError::InsufficientMoney { .. }));
        assert_eq!(maximum_available(&[coin(10_000)], P2PKH, u64::MAX, false), (0, 0));
    }

    #[test]
    fn plain_selection_is_not_replay_protected() {
        let bundle = spendable_coins(&[coin(10_000)], P2PKH, P2PKH, 5_000, 1_000, false).unwrap();
        assert!(!bundle.is_replay_protected);
    }

    #[test]
    fn segwit_coins_are_cheaper() {
        let segwit = Utxo {
            is_segwit: true,
            ..coin(10_000)
        };
        let (_, fee) = maximum_available(&[segwit], OutputType::P2wpkh, 1_000, false);
        assert_eq!(fee, 10 + 68 + 31);
    }

    proptest! {
        #[test]
        fn selection_conserves_value(
            values in prop::collection::vec(1_000u64..2_000_000, 1..20),
            amount in 1_000u64..5_000_000,
            fee_per_kb in 0u64..60_000,
        ) {
            let coins: Vec<Utxo> = values.into_iter().map(coin).collect();
            match spendable_coins(&coins, P2PKH, P2PKH, amount, fee_per_kb, false) {
                Ok(bundle) => {
                    let total = bundle.total_value();
                    prop_assert!(total >= amount + bundle.absolute_fee);
                    prop_assert_eq!(total - bundle.change(amount) - bundle.absolute_fee, amount);
                    prop_assert!(bundle.consumed_amount < dust_threshold(P2PKH, fee_per_byte(fee_per_kb)).max(1));
                }
                Err(WalletError::InsufficientMoney { shortfall }) => prop_assert!(shortfall > 0),
                Err(other) => prop_assert!(false, "unexpected error {other:?}"),
            }
        }
    }
}
