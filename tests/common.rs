#![allow(unused)]

use bitcoin::{Network, OutPoint, Script, Transaction, TxIn, TxOut, Txid};

use tidewallet::catalog::{CatalogUtils, CoinCatalog, MemoryCatalog};
use tidewallet::types::{FeeRate, Receiver, TransactionDetails};
use tidewallet::wallet::tx_builder::{TxBuilder, TxOrdering};
use tidewallet::wallet::Wallet;

/// The fee-rate bar the scenario tests build against, in sat/vbyte.
pub const TARGET: f32 = 30.0;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A script the test wallet owns. Tags 1..=9 are registered by `funded_wallet`.
pub fn own_script(tag: u8) -> Script {
    let mut bytes = vec![0x00, 0x14];
    bytes.extend(std::iter::repeat(tag).take(20));
    Script::from(bytes)
}

/// A script of some other wallet.
pub fn foreign_script(tag: u8) -> Script {
    let mut bytes = vec![0x00, 0x14];
    bytes.extend(std::iter::repeat(tag).take(20));
    bytes.push(0xff);
    Script::from(bytes)
}

// Return a wallet over a fresh catalog holding one confirmed coin per entry in
// `amounts`, all paying the wallet's first script.
pub fn funded_wallet(amounts: &[u64]) -> Wallet<MemoryCatalog> {
    init_logger();

    let mut catalog = MemoryCatalog::new();
    for tag in 1..=9 {
        catalog.insert_script(own_script(tag));
    }

    for (index, amount) in amounts.iter().enumerate() {
        let funding = Transaction {
            version: 1,
            // vary the locktime so every funding tx gets its own txid
            lock_time: index as u32,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::default(),
                    vout: index as u32,
                },
                script_sig: Script::default(),
                sequence: 0xFFFF_FFFF,
                witness: vec![],
            }],
            output: vec![TxOut {
                value: *amount,
                script_pubkey: own_script(1),
            }],
        };
        catalog.insert_tx(&funding, 1_000, Some(100)).unwrap();
    }

    Wallet::new(catalog, Network::Regtest)
}

/// Build a payment back to the wallet at `rate` and record it as pending.
///
/// The resulting transaction has the fixed output at vout 0 and the remainder
/// (change) at vout 1, both wallet-owned.
pub fn send_to_self(wallet: &Wallet<MemoryCatalog>, amount: u64, rate: f32) -> TransactionDetails {
    send_recorded(
        wallet,
        TxBuilder::with_receivers(vec![
            Receiver::fixed(own_script(2), amount),
            Receiver::remainder(own_script(3)),
        ])
        .fee_rate(FeeRate::from_sat_per_vb(rate))
        .ordering(TxOrdering::Untouched),
    )
}

/// Build a transaction spending exactly `coins` and record it as pending.
pub fn send_preset(
    wallet: &Wallet<MemoryCatalog>,
    coins: Vec<OutPoint>,
    receivers: Vec<Receiver>,
    rate: f32,
) -> TransactionDetails {
    send_recorded(
        wallet,
        TxBuilder::with_receivers(receivers)
            .coins(coins)
            .manually_selected_only()
            .fee_rate(FeeRate::from_sat_per_vb(rate))
            .ordering(TxOrdering::Untouched),
    )
}

fn send_recorded<Cs>(wallet: &Wallet<MemoryCatalog>, builder: TxBuilder<Cs>) -> TransactionDetails
where
    Cs: tidewallet::wallet::coin_selection::CoinSelectionAlgorithm,
{
    let details = wallet.create_tx(builder).unwrap();
    wallet.catalog_mut().record_tx(&details).unwrap();
    wallet
        .catalog()
        .get_tx(&details.txid, true)
        .unwrap()
        .unwrap()
}

/// The transaction's own fee rate in sat/vbyte.
pub fn own_rate(details: &TransactionDetails) -> f32 {
    details.fee as f32 / details.vsize as f32
}

/// The combined fee rate of a set of transactions treated as one package.
pub fn package_rate(set: &[&TransactionDetails]) -> f32 {
    let fees: u64 = set.iter().map(|details| details.fee).sum();
    let vsizes: u64 = set.iter().map(|details| details.vsize).sum();
    fees as f32 / vsizes as f32
}

/// Check the accounting invariant: input total == output total + fee.
pub fn assert_accounting(wallet: &Wallet<MemoryCatalog>, details: &TransactionDetails) {
    let tx = details.transaction.as_ref().expect("raw transaction");
    let catalog = wallet.catalog();

    let input_total: u64 = tx
        .input
        .iter()
        .map(|txin| {
            catalog
                .get_coin(&txin.previous_output)
                .unwrap()
                .expect("input known to catalog")
                .txout
                .value
        })
        .sum();
    let output_total: u64 = tx.output.iter().map(|txout| txout.value).sum();

    assert_eq!(input_total, output_total + details.fee);
}

/// The output paying `script`, if any.
pub fn output_to<'t>(details: &'t TransactionDetails, script: &Script) -> Option<&'t TxOut> {
    details
        .transaction
        .as_ref()
        .expect("raw transaction")
        .output
        .iter()
        .find(|txout| &txout.script_pubkey == script)
}

/// Outpoints of the wallet's currently spendable coins produced by `txid`.
pub fn spendable_from(wallet: &Wallet<MemoryCatalog>, txid: &Txid) -> Vec<OutPoint> {
    wallet
        .catalog()
        .spendable_coins()
        .unwrap()
        .into_iter()
        .filter(|coin| coin.outpoint.txid == *txid)
        .map(|coin| coin.outpoint)
        .collect()
}
