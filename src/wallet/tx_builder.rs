// Tidewallet
// Copyright (c) 2025 Tidewallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Transaction builder
//!
//! A [`TxBuilder`] collects everything a spend request can specify - receivers,
//! target fee rate, preset inputs, sweep behavior - and is consumed by
//! [`Wallet::create_tx`](super::Wallet::create_tx).
//!
//! ## Example
//!
//! ```no_run
//! # use tidewallet::wallet::tx_builder::TxBuilder;
//! # use tidewallet::types::{FeeRate, Receiver};
//! # let script = bitcoin::Script::new();
//! # let remainder = bitcoin::Script::new();
//! let builder = TxBuilder::with_receivers(vec![
//!     Receiver::fixed(script, 50_000),
//!     Receiver::remainder(remainder),
//! ])
//! .fee_rate(FeeRate::from_sat_per_vb(5.0));
//! ```

use bitcoin::{OutPoint, Transaction, Txid};

use super::coin_selection::{CoinSelectionAlgorithm, DefaultCoinSelectionAlgorithm};
use crate::types::{FeeRate, Receiver};

/// A transaction builder
#[derive(Debug, Default)]
pub struct TxBuilder<Cs: CoinSelectionAlgorithm> {
    pub(crate) receivers: Vec<Receiver>,
    pub(crate) fee_rate: Option<FeeRate>,
    pub(crate) coins: Option<Vec<OutPoint>>,
    pub(crate) unspendable: Vec<OutPoint>,
    pub(crate) manually_selected_only: bool,
    pub(crate) drain_wallet: bool,
    pub(crate) send_max: bool,
    pub(crate) subtract_fee_from: Vec<usize>,
    pub(crate) ordering: TxOrdering,
    pub(crate) locktime: Option<u32>,
    pub(crate) sequence: Option<u32>,
    pub(crate) allow_dust: bool,
    pub(crate) bumping_fee: Option<PreviousFee>,
    pub(crate) coin_selection: Cs,
}

/// Fee of the transaction a fee bump is replacing
#[derive(Debug, Clone, Copy)]
pub(crate) struct PreviousFee {
    pub txid: Txid,
    pub absolute: u64,
    pub rate: f32,
}

impl TxBuilder<DefaultCoinSelectionAlgorithm> {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder starting from a list of receivers
    pub fn with_receivers(receivers: Vec<Receiver>) -> Self {
        Self::default().set_receivers(receivers)
    }
}

impl<Cs: CoinSelectionAlgorithm> TxBuilder<Cs> {
    /// Replace the internal list of receivers
    pub fn set_receivers(mut self, receivers: Vec<Receiver>) -> Self {
        self.receivers = receivers;
        self
    }

    /// Add a receiver to the internal list
    pub fn add_receiver(mut self, receiver: Receiver) -> Self {
        self.receivers.push(receiver);
        self
    }

    /// Set a custom fee rate
    pub fn fee_rate(mut self, fee_rate: FeeRate) -> Self {
        self.fee_rate = Some(fee_rate);
        self
    }

    /// Replace the internal list of coins that **must** be spent
    ///
    /// The coins are named by outpoint; each one must be known to the catalog
    /// and still unspent, or the build fails before selection starts.
    pub fn coins(mut self, coins: Vec<OutPoint>) -> Self {
        self.coins = Some(coins);
        self
    }

    /// Add a coin to the internal list of coins that **must** be spent
    pub fn add_coin(mut self, coin: OutPoint) -> Self {
        self.coins.get_or_insert(vec![]).push(coin);
        self
    }

    /// Only spend coins added by [`add_coin`](Self::add_coin) and [`coins`](Self::coins)
    ///
    /// The wallet will not add anything else to the selection, even when the
    /// named coins cannot cover outputs and fee.
    pub fn manually_selected_only(mut self) -> Self {
        self.manually_selected_only = true;
        self
    }

    /// Replace the internal list of coins that must not be spent
    pub fn unspendable(mut self, unspendable: Vec<OutPoint>) -> Self {
        self.unspendable = unspendable;
        self
    }

    /// Add a coin to the internal list of coins that must not be spent
    pub fn add_unspendable(mut self, unspendable: OutPoint) -> Self {
        self.unspendable.push(unspendable);
        self
    }

    /// Spend every eligible coin the wallet holds
    ///
    /// This turns the build into a sweep: the remainder receivers absorb
    /// whatever is left once fixed outputs and the fee are paid.
    pub fn drain_wallet(mut self) -> Self {
        self.drain_wallet = true;
        self
    }

    /// While draining, leave behind coins whose effective value at the target
    /// fee rate is not positive
    pub fn send_max(mut self) -> Self {
        self.send_max = true;
        self
    }

    /// Subtract the fee from the fixed receivers at these indexes, split evenly
    pub fn subtract_fee_from(mut self, indexes: Vec<usize>) -> Self {
        self.subtract_fee_from = indexes;
        self
    }

    /// Choose the ordering applied to inputs and outputs of the final transaction
    pub fn ordering(mut self, ordering: TxOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Use a specific nLockTime
    pub fn nlocktime(mut self, locktime: u32) -> Self {
        self.locktime = Some(locktime);
        self
    }

    /// Use a specific nSequence for every input
    ///
    /// The default (`0xFFFF_FFFD`) signals replaceability; pass `0xFFFF_FFFF`
    /// to build a final transaction that a fee bump will refuse to touch.
    pub fn sequence(mut self, sequence: u32) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Allow outputs below the dust threshold
    pub fn allow_dust(mut self) -> Self {
        self.allow_dust = true;
        self
    }

    /// Choose the coin selection algorithm
    ///
    /// Overrides the [`DefaultCoinSelectionAlgorithm`].
    pub fn coin_selection<P: CoinSelectionAlgorithm>(self, coin_selection: P) -> TxBuilder<P> {
        TxBuilder {
            receivers: self.receivers,
            fee_rate: self.fee_rate,
            coins: self.coins,
            unspendable: self.unspendable,
            manually_selected_only: self.manually_selected_only,
            drain_wallet: self.drain_wallet,
            send_max: self.send_max,
            subtract_fee_from: self.subtract_fee_from,
            ordering: self.ordering,
            locktime: self.locktime,
            sequence: self.sequence,
            allow_dust: self.allow_dust,
            bumping_fee: self.bumping_fee,
            coin_selection,
        }
    }
}

/// Ordering of the transaction's inputs and outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOrdering {
    /// Randomized (default)
    Shuffle,
    /// Unmodified, use the order they were added to the builder
    Untouched,
    /// BIP69 / Lexicographic
    Bip69Lexicographic,
}

impl Default for TxOrdering {
    fn default() -> Self {
        TxOrdering::Shuffle
    }
}

impl TxOrdering {
    /// Sort transaction inputs and outputs by [`TxOrdering`] variant
    pub fn modify_tx(&self, tx: &mut Transaction) {
        match self {
            TxOrdering::Untouched => {}
            TxOrdering::Shuffle => {
                use rand::seq::SliceRandom;
                #[cfg(test)]
                use rand::SeedableRng;

                #[cfg(not(test))]
                let mut rng = rand::thread_rng();
                #[cfg(test)]
                let mut rng = rand::rngs::StdRng::seed_from_u64(0);

                tx.output.shuffle(&mut rng);
            }
            TxOrdering::Bip69Lexicographic => {
                tx.input.sort_unstable_by_key(|txin| {
                    (txin.previous_output.txid, txin.previous_output.vout)
                });
                tx.output
                    .sort_unstable_by_key(|txout| (txout.value, txout.script_pubkey.clone()));
            }
        }
    }
}

#[cfg(test)]
mod test {
    const ORDERING_TEST_TX: &str = "0200000003c26f3eb7932f7acddc5ddd26602b77e7516079b03090a16e2c2f54\
                                    85d1fd600f0100000000ffffffffc26f3eb7932f7acddc5ddd26602b77e75160\
                                    79b03090a16e2c2f5485d1fd600f0000000000ffffffff571fb3e02278217852\
                                    dd5d299947e2b7354a639adc32ec1fa7b82cfb5dec530e0500000000ffffffff\
                                    03e80300000000000002aaeee80300000000000001aa200300000000000001ff\
                                    00000000";
    macro_rules! ordering_test_tx {
        () => {
            deserialize::<bitcoin::Transaction>(&Vec::<u8>::from_hex(ORDERING_TEST_TX).unwrap())
                .unwrap()
        };
    }

    use bitcoin::consensus::deserialize;
    use bitcoin::hashes::hex::FromHex;

    use super::*;

    #[test]
    fn test_output_ordering_untouched() {
        let original_tx = ordering_test_tx!();
        let mut tx = original_tx.clone();

        TxOrdering::Untouched.modify_tx(&mut tx);

        assert_eq!(original_tx, tx);
    }

    #[test]
    fn test_output_ordering_shuffle() {
        let original_tx = ordering_test_tx!();
        let mut tx = original_tx.clone();

        TxOrdering::Shuffle.modify_tx(&mut tx);

        assert_eq!(original_tx.input, tx.input);
        assert_ne!(original_tx.output, tx.output);
    }

    #[test]
    fn test_output_ordering_bip69() {
        use std::str::FromStr;

        let original_tx = ordering_test_tx!();
        let mut tx = original_tx.clone();

        TxOrdering::Bip69Lexicographic.modify_tx(&mut tx);

        assert_eq!(
            tx.input[0].previous_output,
            bitcoin::OutPoint::from_str(
                "0e53ec5dfb2cb8a71fec32dc9a634a35b7e24799295ddd5278217822e0b31f57:5"
            )
            .unwrap()
        );
        assert_eq!(
            tx.input[1].previous_output,
            bitcoin::OutPoint::from_str(
                "0f60fdd185542f2c6ea19030b0796051e7772b6026dd5ddccd7a2f93b73e6fc2:0"
            )
            .unwrap()
        );
        assert_eq!(
            tx.input[2].previous_output,
            bitcoin::OutPoint::from_str(
                "0f60fdd185542f2c6ea19030b0796051e7772b6026dd5ddccd7a2f93b73e6fc2:1"
            )
            .unwrap()
        );

        assert_eq!(tx.output[0].value, 800);
        assert_eq!(tx.output[1].script_pubkey, From::from(vec![0xAA]));
        assert_eq!(tx.output[2].script_pubkey, From::from(vec![0xAA, 0xEE]));
    }
}
