//! Criterion benchmarks for tapforge-wallet hot paths.
//!
//! Covers: BIP32 derivation, coin selection and signing per script type.

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use tapforge_core::address::Network;
use tapforge_core::fee::FeeRate;
use tapforge_core::script::Script;
use tapforge_core::types::{Hash256, OutPoint, Utxo};
use tapforge_wallet::builder::TransactionBuilder;
use tapforge_wallet::coin_selection::{CoinSelector, SelectionParams, SelectionStrategy};
use tapforge_wallet::hd::{DerivationPath, ExtendedKey, HdKeyTree, Purpose};
use tapforge_wallet::signer::Signer;

const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

fn bench_derivation(c: &mut Criterion) {
    let master = ExtendedKey::master_from_seed(&[7u8; 64], Network::Mainnet).unwrap();
    let path: DerivationPath = "m/84'/0'/0'/0/0".parse().unwrap();
    c.bench_function("derive_bip84_path", |b| {
        b.iter(|| master.derive_path(black_box(&path)).unwrap())
    });

    let mut tree = HdKeyTree::new(master.clone(), 0);
    c.bench_function("next_taproot_address", |b| {
        b.iter(|| tree.next_address(Purpose::Bip86).unwrap())
    });
}

fn bench_selection(c: &mut Criterion) {
    let utxos: Vec<Utxo> = (0..200u32)
        .map(|i| {
            let value = 1_000 + (i as u64 * 7_919) % 500_000;
            Utxo::new(OutPoint::new(Hash256([i as u8; 32]), i), value, Script::p2wpkh(&[1; 20])).unwrap()
        })
        .collect();
    let params = SelectionParams::new(FeeRate::from_sat_per_vb(5), Script::p2wpkh(&[2; 20]));
    for strategy in [SelectionStrategy::BranchAndBound, SelectionStrategy::LargestFirst] {
        c.bench_function(&format!("select_200_{strategy:?}"), |b| {
            b.iter(|| CoinSelector::select(black_box(&utxos), 1_234_567, &params, strategy))
        });
    }
}

fn bench_signing(c: &mut Criterion) {
    let signer = Signer::deterministic();
    for purpose in [Purpose::Bip44, Purpose::Bip84, Purpose::Bip86] {
        let mut tree = HdKeyTree::from_mnemonic(ABANDON, "", Network::Mainnet, 0).unwrap();
        let from = tree.next_address(purpose).unwrap();
        let change = tree.next_change_address(purpose).unwrap();
        let utxos: Vec<Utxo> = (0..4u8)
            .map(|i| Utxo::new(OutPoint::new(Hash256([i; 32]), 0), 50_000, from.script_pubkey()).unwrap())
            .collect();
        c.bench_function(&format!("sign_4_inputs_{purpose:?}"), |b| {
            b.iter_batched(
                || {
                    let mut builder = TransactionBuilder::new(Network::Mainnet);
                    for utxo in &utxos {
                        builder.add_input(utxo.clone());
                    }
                    builder.add_output(&from, 150_000).set_change(&change).fee(2_000);
                    builder.build().unwrap()
                },
                |partial| signer.sign(partial, &tree).unwrap(),
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, bench_derivation, bench_selection, bench_signing);
criterion_main!(benches);
