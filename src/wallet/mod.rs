// Tidewallet
// Copyright (c) 2025 Tidewallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Wallet
//!
//! This module defines the [`Wallet`] structure: the spend construction
//! pipeline ([`create_tx`](Wallet::create_tx)), the sweep surface
//! ([`sweep`](Wallet::sweep)) and the replace engine
//! ([`build_fee_bump`](Wallet::build_fee_bump)).
//!
//! The wallet holds no keys and performs no network I/O: it reads a snapshot
//! of coin and ancestry state from its [`CoinCatalog`] and produces candidate
//! transactions whose fee rate - measured across the unconfirmed ancestor
//! package they join, not just over the transaction itself - meets the
//! caller's target.

use std::cell::RefCell;
use std::collections::HashSet;

use bitcoin::{Network, OutPoint, Script, Transaction, TxIn, TxOut, Txid};

#[allow(unused_imports)]
use log::{debug, error, info, trace};

pub mod ancestry;
pub mod coin_selection;
pub mod tx_builder;
pub(crate) mod utils;

use coin_selection::{effective_value, CoinSelectionAlgorithm};
use tx_builder::{PreviousFee, TxBuilder, TxOrdering};
use utils::{satisfied_weight, weight_to_vsize, IsDust};

use crate::catalog::{CatalogUtils, CoinCatalog};
use crate::error::Error;
use crate::types::{Coin, FeeRate, Receiver, TransactionDetails, WeightedCoin};

// n. of items on witness (1WU) + signature len (1WU) + signature and sighash (72WU)
// + pubkey len (1WU) + pubkey (33WU) + script sig len (1 byte, 4WU)
/// Satisfaction weight of a P2WPKH input, the default assumed for wallet coins
pub const P2WPKH_SATISFACTION_WEIGHT: usize = 1 + 1 + 72 + 1 + 33 + 4;

// nSequence values from this one down signal replaceability
const RBF_SEQUENCE: u32 = 0xFFFF_FFFD;

/// Options for [`Wallet::sweep`]
#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Target fee rate, defaults to the minimum relay fee
    pub fee_rate: Option<FeeRate>,
    /// Sweep only these coins instead of the whole wallet
    pub inputs: Option<Vec<OutPoint>>,
    /// Leave behind coins that are uneconomic to spend at the target fee rate
    pub send_max: bool,
    /// Record the resulting transaction in the catalog as a pending spend
    pub add_to_wallet: bool,
    /// Take the fee out of the fixed receivers instead of the remainder
    pub subtract_fee_from_amount: bool,
}

impl Default for SweepOptions {
    fn default() -> Self {
        SweepOptions {
            fee_rate: None,
            inputs: None,
            send_max: false,
            add_to_wallet: true,
            subtract_fee_from_amount: false,
        }
    }
}

/// A transaction-building wallet over an external coin catalog
///
/// Generic over the [`CoinCatalog`] supplying coins and ancestor-package
/// economics. Every build runs against a snapshot of catalog state and either
/// returns a complete [`TransactionDetails`] or fails before touching any
/// state other than coin reservations taken for the returned candidate.
pub struct Wallet<D: CoinCatalog> {
    catalog: RefCell<D>,
    network: Network,
    satisfaction_weight: usize,
}

impl<D: CoinCatalog> Wallet<D> {
    /// Create a new wallet over `catalog`
    pub fn new(catalog: D, network: Network) -> Self {
        Wallet {
            catalog: RefCell::new(catalog),
            network,
            satisfaction_weight: P2WPKH_SATISFACTION_WEIGHT,
        }
    }

    /// Override the satisfaction weight assumed for the wallet's coins
    pub fn with_satisfaction_weight(mut self, satisfaction_weight: usize) -> Self {
        self.satisfaction_weight = satisfaction_weight;
        self
    }

    /// The network the wallet operates on
    pub fn network(&self) -> Network {
        self.network
    }

    /// Borrow the underlying catalog
    pub fn catalog(&self) -> std::cell::Ref<'_, D> {
        self.catalog.borrow()
    }

    /// Mutably borrow the underlying catalog
    pub fn catalog_mut(&self) -> std::cell::RefMut<'_, D> {
        self.catalog.borrow_mut()
    }

    /// Every coin currently known to the catalog
    pub fn list_coins(&self) -> Result<Vec<Coin>, Error> {
        self.catalog.borrow().iter_coins()
    }

    /// Sum of the face values of the wallet's unspent coins
    pub fn get_balance(&self) -> Result<u64, Error> {
        self.catalog.borrow().balance()
    }

    /// Release the coin reservations held by a discarded candidate
    pub fn cancel_tx(&self, tx: &Transaction) {
        let mut catalog = self.catalog.borrow_mut();
        for txin in &tx.input {
            let _ = catalog.release_coin(&txin.previous_output);
        }
    }

    /// Build a transaction according to the options set on `builder`
    ///
    /// On success the selected coins are reserved in the catalog and a
    /// descriptor of the candidate is returned; broadcasting it and observing
    /// confirmation are the caller's business.
    pub fn create_tx<Cs: CoinSelectionAlgorithm>(
        &self,
        builder: TxBuilder<Cs>,
    ) -> Result<TransactionDetails, Error> {
        if builder.receivers.is_empty() {
            return Err(Error::NoReceivers);
        }

        let fee_rate = builder.fee_rate.unwrap_or_default();
        if let Some(previous_fee) = builder.bumping_fee {
            let required_rate = FeeRate::from_sat_per_vb(previous_fee.rate + 1.0);
            if fee_rate < required_rate {
                return Err(Error::FeeRateTooLow {
                    required: required_rate,
                });
            }
        }

        let subtract_fee_from = &builder.subtract_fee_from;
        for &index in subtract_fee_from {
            match builder.receivers.get(index) {
                Some(Receiver::Fixed { .. }) => {}
                _ => {
                    return Err(Error::Generic(format!(
                        "receiver {} cannot have the fee subtracted from it",
                        index
                    )))
                }
            }
        }

        let n_sequence = builder.sequence.unwrap_or(RBF_SEQUENCE);
        let lock_time = builder.locktime.unwrap_or(0);

        let mut tx = Transaction {
            version: 1,
            lock_time,
            input: vec![],
            output: vec![],
        };

        // fixed receivers land in the outputs verbatim, remainder receivers as
        // placeholders that get their value once the fee is known
        let mut outgoing: u64 = 0;
        let mut remainder_indexes: Vec<usize> = vec![];
        for (index, receiver) in builder.receivers.iter().enumerate() {
            match receiver {
                Receiver::Fixed { script, value } => {
                    if !builder.allow_dust
                        && value.is_dust()
                        && !subtract_fee_from.contains(&index)
                    {
                        return Err(Error::DustOutput {
                            receiver: Some(index),
                            value: *value,
                        });
                    }
                    outgoing += *value;
                    tx.output.push(TxOut {
                        script_pubkey: script.clone(),
                        value: *value,
                    });
                }
                Receiver::Remainder { script } => {
                    remainder_indexes.push(index);
                    tx.output.push(TxOut {
                        script_pubkey: script.clone(),
                        value: 0,
                    });
                }
            }
        }

        let subtracting = !subtract_fee_from.is_empty();

        let catalog = self.catalog.borrow();
        let (required_coins, optional_coins) = self.preselect_coins(&*catalog, &builder, fee_rate)?;

        if builder.drain_wallet && required_coins.is_empty() && optional_coins.is_empty() {
            return Err(Error::PoolExhausted);
        }

        // fee already owed before any input is added: header, outputs, and the
        // segwit marker
        let skeleton_fee = fee_rate.fee_wu(tx.get_weight() + utils::SEGWIT_HEADER_WEIGHT);

        // with subtract-fee-from, the fee comes out of the marked outputs, so
        // the inputs only have to cover the outputs themselves
        let selection_rate = if subtracting {
            FeeRate::from_sat_per_vb(0.0)
        } else {
            fee_rate
        };

        let exclude: Vec<Txid> = builder
            .bumping_fee
            .iter()
            .map(|previous_fee| previous_fee.txid)
            .collect();

        let mut extra_fee: u64 = 0;
        let max_rounds = optional_coins.len() + 2;
        let (selected, fee_amount, tx_vsize) = {
            let mut round = 0;
            loop {
                round += 1;
                let target_amount = if subtracting {
                    outgoing
                } else {
                    outgoing + skeleton_fee + extra_fee
                };

                let result = builder.coin_selection.coin_select(
                    required_coins.clone(),
                    optional_coins.clone(),
                    selection_rate,
                    target_amount,
                )?;

                tx.input = result
                    .selected
                    .iter()
                    .map(|weighted_coin| TxIn {
                        previous_output: weighted_coin.coin.outpoint,
                        script_sig: Script::default(),
                        sequence: n_sequence,
                        witness: vec![],
                    })
                    .collect();

                let satisfaction_total: usize = result
                    .selected
                    .iter()
                    .map(|weighted_coin| weighted_coin.satisfaction_weight)
                    .sum();
                let weight = satisfied_weight(&tx, satisfaction_total);
                let vsize = weight_to_vsize(weight);
                let base_fee = fee_rate.fee_wu(weight);

                let packages = ancestry::packages_for_excluding(
                    &*catalog,
                    &result.selected,
                    &exclude,
                )?;
                let required = ancestry::required_fee(base_fee, vsize, fee_rate, &packages);

                let input_total = result.selected_amount();
                let funded = input_total.saturating_sub(outgoing);

                if subtracting || funded >= required {
                    break (result.selected, required, vsize);
                }

                if round > max_rounds {
                    return Err(Error::InsufficientFunds {
                        needed: outgoing + required,
                        available: input_total,
                    });
                }

                debug!(
                    "round {}: fee {} not covered by excess {}, reselecting",
                    round, required, funded
                );
                extra_fee = required.saturating_sub(base_fee);
            }
        };

        let input_total: u64 = selected.iter().map(|wc| wc.coin.txout.value).sum();
        let funded = input_total.saturating_sub(outgoing);
        let mut fee_amount = fee_amount;

        // take the fee out of the marked outputs, minus whatever the inputs
        // already over-fund
        if subtracting {
            let subtraction_total = fee_amount.saturating_sub(funded);
            let share = subtraction_total / subtract_fee_from.len() as u64;
            let mut spread = subtraction_total % subtract_fee_from.len() as u64;
            for &index in subtract_fee_from {
                let txout = &mut tx.output[index];
                let cut = share + if spread > 0 { 1 } else { 0 };
                spread = spread.saturating_sub(1);
                if txout.value < cut {
                    return Err(Error::InsufficientFunds {
                        needed: cut,
                        available: txout.value,
                    });
                }
                txout.value -= cut;
                if !builder.allow_dust && txout.value.is_dust() {
                    return Err(Error::DustOutput {
                        receiver: Some(index),
                        value: txout.value,
                    });
                }
            }
        }

        // with subtract-fee-from the inputs only funded the outputs, so only
        // what exceeds the fee's input-funded share is left over
        let excess = if subtracting {
            funded.saturating_sub(fee_amount)
        } else {
            funded - fee_amount
        };

        if remainder_indexes.is_empty() {
            if excess > 0 {
                if excess.is_dust() {
                    // nothing sensible to do with a sub-dust excess, it adds up to the fee
                    debug!("folding sub-dust excess {} into the fee", excess);
                    fee_amount += excess;
                } else {
                    return Err(Error::NoRemainderReceiver);
                }
            }
        } else {
            let share = excess / remainder_indexes.len() as u64;
            let mut spread = excess % remainder_indexes.len() as u64;
            for &index in &remainder_indexes {
                let value = share + if spread > 0 { 1 } else { 0 };
                spread = spread.saturating_sub(1);
                if !builder.allow_dust && value.is_dust() {
                    if builder.drain_wallet {
                        return Err(Error::DustOutput {
                            receiver: None,
                            value,
                        });
                    }
                    // a spend's remainder is the wallet's own leftover: instead
                    // of aborting, skip the output and let the fee absorb it
                    debug!("remainder of {} is dust, dropping the output", value);
                    fee_amount += value;
                    tx.output[index].value = 0;
                    continue;
                }
                tx.output[index].value = value;
            }
            // drop any remainder placeholder left at zero
            tx.output.retain(|txout| txout.value > 0);
        }

        let output_total: u64 = tx.output.iter().map(|txout| txout.value).sum();
        if input_total != output_total + fee_amount {
            return Err(Error::Generic(format!(
                "accounting mismatch: {} in, {} out, {} fee",
                input_total, output_total, fee_amount
            )));
        }

        // a replacement also has to outbid the transaction it evicts
        if let Some(previous_fee) = builder.bumping_fee {
            if fee_amount < previous_fee.absolute {
                return Err(Error::FeeTooLow {
                    required: previous_fee.absolute,
                });
            }
        }

        builder.ordering.modify_tx(&mut tx);

        let mut received: u64 = 0;
        for txout in &tx.output {
            if catalog.is_mine(&txout.script_pubkey)? {
                received += txout.value;
            }
        }

        let txid = tx.txid();
        drop(catalog);

        if builder.bumping_fee.is_none() {
            let mut catalog = self.catalog.borrow_mut();
            for weighted_coin in &selected {
                catalog.reserve_coin(&weighted_coin.coin.outpoint)?;
            }
        }

        debug!(
            "built {}: {} sat fee over {} vb",
            txid, fee_amount, tx_vsize
        );

        Ok(TransactionDetails {
            transaction: Some(tx),
            txid,
            received,
            sent: input_total,
            fee: fee_amount,
            vsize: tx_vsize,
            confirmation_height: None,
            timestamp: utils::get_timestamp(),
        })
    }

    /// Sweep some or all of the wallet's coins into the given receivers
    ///
    /// At least one receiver must be a [`Receiver::Remainder`]; fixed amounts
    /// are paid verbatim and the remainder receivers split what is left after
    /// the fee. Without an explicit input list the whole spendable pool is
    /// consumed (minus uneconomic coins when `send_max` is set).
    pub fn sweep(
        &self,
        receivers: Vec<Receiver>,
        options: SweepOptions,
    ) -> Result<TransactionDetails, Error> {
        if !receivers.iter().any(Receiver::is_remainder) {
            return Err(Error::NoRemainderReceiver);
        }
        let any_fixed = receivers.iter().any(|receiver| !receiver.is_remainder());

        let subtract_fee_from = if options.subtract_fee_from_amount {
            receivers
                .iter()
                .enumerate()
                .filter(|(_, receiver)| !receiver.is_remainder())
                .map(|(index, _)| index)
                .collect()
        } else {
            vec![]
        };

        let mut builder =
            TxBuilder::with_receivers(receivers).ordering(TxOrdering::Untouched);
        builder = match options.inputs {
            Some(inputs) => builder.coins(inputs).manually_selected_only(),
            None => builder.drain_wallet(),
        };
        if options.send_max {
            builder = builder.send_max();
        }
        if let Some(fee_rate) = options.fee_rate {
            builder = builder.fee_rate(fee_rate);
        }
        if !subtract_fee_from.is_empty() {
            builder = builder.subtract_fee_from(subtract_fee_from);
        }

        let details = self.create_tx(builder).map_err(|err| match err {
            // a drain with no fixed amounts that cannot pay its own fee means
            // the pool as a whole is uneconomic
            Error::InsufficientFunds { .. } if !any_fixed => Error::PoolExhausted,
            other => other,
        })?;

        if options.add_to_wallet {
            self.catalog.borrow_mut().record_tx(&details)?;
        }

        Ok(details)
    }

    /// Build a replacement for a pending transaction at a higher fee rate
    ///
    /// The replacement spends exactly the same inputs as the original. An
    /// output paying a wallet-owned script becomes the remainder receiver; if
    /// there is none, the fee is taken out of the fixed outputs. Fails with
    /// [`Error::ReplacementNotAllowed`] when the original is already
    /// confirmed.
    pub fn build_fee_bump(
        &self,
        txid: &Txid,
        fee_rate: FeeRate,
    ) -> Result<TransactionDetails, Error> {
        let catalog = self.catalog.borrow();

        let details = catalog
            .get_tx(txid, true)?
            .ok_or(Error::TransactionNotFound)?;
        if details.confirmation_height.is_some() {
            return Err(Error::ReplacementNotAllowed);
        }
        let tx = details.transaction.clone().ok_or(Error::FeeRateUnavailable)?;
        if details.vsize == 0 {
            return Err(Error::FeeRateUnavailable);
        }

        if !tx.input.iter().any(|txin| txin.sequence <= RBF_SEQUENCE) {
            return Err(Error::IrreplaceableTransaction);
        }

        // the original outputs become the receiver list; the first output we
        // recognize as our own turns into the remainder receiver
        let mut receivers = Vec::with_capacity(tx.output.len());
        let mut has_remainder = false;
        for txout in &tx.output {
            if !has_remainder && catalog.is_mine(&txout.script_pubkey)? {
                has_remainder = true;
                receivers.push(Receiver::remainder(txout.script_pubkey.clone()));
            } else {
                receivers.push(Receiver::fixed(txout.script_pubkey.clone(), txout.value));
            }
        }
        let subtract_fee_from: Vec<usize> = if has_remainder {
            vec![]
        } else {
            (0..receivers.len()).collect()
        };

        let coins: Vec<OutPoint> = tx.input.iter().map(|txin| txin.previous_output).collect();
        drop(catalog);

        let mut builder = TxBuilder::with_receivers(receivers)
            .coins(coins)
            .manually_selected_only()
            .fee_rate(fee_rate)
            .ordering(TxOrdering::Untouched);
        builder.bumping_fee = Some(PreviousFee {
            txid: *txid,
            absolute: details.fee,
            rate: details.fee_rate().as_sat_per_vb(),
        });
        if !subtract_fee_from.is_empty() {
            builder = builder.subtract_fee_from(subtract_fee_from);
        }

        self.create_tx(builder)
    }

    // Split the spendable pool into the coins a build must use and the ones it
    // may use, applying the effective-value filter where automatic selection
    // is allowed to be picky.
    fn preselect_coins<Cs: CoinSelectionAlgorithm>(
        &self,
        catalog: &D,
        builder: &TxBuilder<Cs>,
        fee_rate: FeeRate,
    ) -> Result<(Vec<WeightedCoin>, Vec<WeightedCoin>), Error> {
        let bumping = builder.bumping_fee.is_some();

        let mut required = vec![];
        let mut named: HashSet<OutPoint> = HashSet::new();
        if let Some(outpoints) = &builder.coins {
            for outpoint in outpoints {
                if !named.insert(*outpoint) {
                    continue;
                }
                let coin = catalog
                    .get_coin(outpoint)?
                    .ok_or(Error::InputNotFound(*outpoint))?;
                if (coin.is_spent || coin.is_reserved) && !bumping {
                    return Err(Error::InputUnavailable(*outpoint));
                }
                required.push(self.weighted(coin));
            }
        }

        if builder.manually_selected_only {
            if required.is_empty() {
                return Err(Error::NoCoinsSelected);
            }
            return Ok((required, vec![]));
        }

        let unspendable: HashSet<&OutPoint> = builder.unspendable.iter().collect();
        let mut optional: Vec<WeightedCoin> = catalog
            .spendable_coins()?
            .into_iter()
            .filter(|coin| !named.contains(&coin.outpoint))
            .filter(|coin| !unspendable.contains(&coin.outpoint))
            .map(|coin| self.weighted(coin))
            .collect();

        // a plain drain spends uneconomic coins too; `send_max` (and every
        // non-drain build) leaves them behind
        if !builder.drain_wallet || builder.send_max {
            optional.retain(|weighted_coin| {
                effective_value(
                    weighted_coin.coin.txout.value,
                    weighted_coin.satisfaction_weight,
                    fee_rate,
                ) > 0
            });
        }

        if builder.drain_wallet {
            required.append(&mut optional);
        }

        Ok((required, optional))
    }

    fn weighted(&self, coin: Coin) -> WeightedCoin {
        WeightedCoin {
            satisfaction_weight: self.satisfaction_weight,
            coin,
        }
    }
}
