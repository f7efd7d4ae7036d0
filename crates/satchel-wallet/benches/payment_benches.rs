//! Criterion benchmarks for satchel-wallet payment operations.
//!
//! Covers: coin selection, sweep amount calculation, and BIP69 ordering.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use satchel_wallet::payment::coin_selection::{maximum_available, spendable_coins};
use satchel_wallet::payment::{OutputType, Recipient, builder};
use satchel_core::types::Utxo;

/// `n` legacy coins of increasing value with distinct outpoints.
fn coins(n: u32) -> Vec<Utxo> {
    (0..n)
        .map(|i| Utxo {
            tx_hash: format!("{:064x}", i + 1),
            output_index: i % 3,
            script: "76a914c27982b0008a2fdb1edd3f663ec554019204ad2e88ac".into(),
            value: 10_000 + u64::from(i) * 1_337,
            ..Utxo::default()
        })
        .collect()
}

fn bench_spendable_coins(c: &mut Criterion) {
    let utxos = coins(500);

    c.bench_function("spendable_coins_500", |b| {
        b.iter(|| {
            spendable_coins(
                black_box(&utxos),
                OutputType::P2pkh,
                OutputType::P2pkh,
                black_box(2_500_000),
                30_000,
                false,
            )
        })
    });
}

fn bench_spendable_coins_replay(c: &mut Criterion) {
    let utxos = coins(500);

    c.bench_function("spendable_coins_replay_protected_500", |b| {
        b.iter(|| {
            spendable_coins(
                black_box(&utxos),
                OutputType::P2pkh,
                OutputType::P2pkh,
                black_box(2_500_000),
                30_000,
                true,
            )
        })
    });
}

fn bench_maximum_available(c: &mut Criterion) {
    let utxos = coins(500);

    c.bench_function("maximum_available_500", |b| {
        b.iter(|| maximum_available(black_box(&utxos), OutputType::P2wpkh, 30_000, false))
    });
}

fn bench_make_transaction(c: &mut Criterion) {
    let utxos = coins(50);
    let receivers = vec![
        Recipient::new("1NNDb5uQU32CtQnBxnrfvJSjkWcREoFWe7", 300_000),
        Recipient::new("bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu", 120_000),
    ];

    c.bench_function("make_transaction_bip69_50_inputs", |b| {
        b.iter(|| {
            builder::make_transaction(
                black_box(&utxos),
                black_box(&receivers),
                10_000,
                Some("1JEggWq9VVaVnDmdTbYuHmJXN4icdF89Kq"),
            )
        })
    });
}

criterion_group!(
    benches,
    bench_spendable_coins,
    bench_spendable_coins_replay,
    bench_maximum_available,
    bench_make_transaction,
);
criterion_main!(benches);
