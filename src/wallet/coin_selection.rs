// Tidewallet
// Copyright (c) 2025 Tidewallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Coin selection
//!
//! This module provides the trait [`CoinSelectionAlgorithm`] that can be implemented to
//! define custom coin selection algorithms.
//!
//! The coin selection algorithm is not globally part of a [`Wallet`](super::Wallet), instead it
//! is selected whenever a [`Wallet::create_tx`](super::Wallet::create_tx) call is made, through
//! the use of the [`TxBuilder`] structure, specifically with
//! [`TxBuilder::coin_selection`](super::tx_builder::TxBuilder::coin_selection) method.
//!
//! The [`DefaultCoinSelectionAlgorithm`] selects the default coin selection algorithm that
//! [`TxBuilder`] uses, if it's not explicitly overridden.
//!
//! [`TxBuilder`]: super::tx_builder::TxBuilder

use std::convert::TryInto;

use rand::seq::SliceRandom;

use crate::error::Error;
use crate::types::{FeeRate, WeightedCoin};

/// Default coin selection algorithm used by [`TxBuilder`](super::tx_builder::TxBuilder) if not
/// overridden
pub type DefaultCoinSelectionAlgorithm = BranchAndBoundCoinSelection;

// Base weight of a TxIn, not counting the weight needed for satisfying it.
// prev_txid (32 bytes) + prev_vout (4 bytes) + sequence (4 bytes)
pub(crate) const TXIN_BASE_WEIGHT: usize = (32 + 4 + 4) * 4;

/// The fee cost of adding a coin as an input at `fee_rate`
pub fn input_fee(satisfaction_weight: usize, fee_rate: FeeRate) -> u64 {
    fee_rate.fee_wu(TXIN_BASE_WEIGHT + satisfaction_weight)
}

/// A coin's value net of the fee cost of spending it at `fee_rate`
///
/// Coins with a non-positive effective value are not worth adding to a
/// transaction automatically: they consume more fee than they contribute.
pub fn effective_value(value: u64, satisfaction_weight: usize, fee_rate: FeeRate) -> i64 {
    value as i64 - input_fee(satisfaction_weight, fee_rate) as i64
}

/// Result of a successful coin selection
#[derive(Debug)]
pub struct CoinSelectionResult {
    /// List of coins selected for use as inputs, with their satisfaction weights
    pub selected: Vec<WeightedCoin>,
    /// Fee cost of the selected inputs at the requested fee rate, in satoshis
    pub fee_amount: u64,
}

impl CoinSelectionResult {
    /// The total value of the inputs selected
    pub fn selected_amount(&self) -> u64 {
        self.selected.iter().map(|wc| wc.coin.txout.value).sum()
    }
}

/// Trait for generalized coin selection algorithms
///
/// This trait can be implemented to make the [`Wallet`](super::Wallet) use a customized coin
/// selection algorithm when it creates transactions.
pub trait CoinSelectionAlgorithm: std::fmt::Debug {
    /// Perform the coin selection
    ///
    /// - `required_coins`: the coins that must be spent regardless of `target_amount`, with
    ///                     their weight cost
    /// - `optional_coins`: the remaining available coins to satisfy `target_amount`, with their
    ///                     weight cost
    /// - `fee_rate`: fee rate to use
    /// - `target_amount`: the outgoing amount in satoshis plus the fees already accumulated
    ///                    from the added outputs and the transaction's header
    fn coin_select(
        &self,
        required_coins: Vec<WeightedCoin>,
        optional_coins: Vec<WeightedCoin>,
        fee_rate: FeeRate,
        target_amount: u64,
    ) -> Result<CoinSelectionResult, Error>;
}

/// Simple and dumb coin selection
///
/// This coin selection algorithm sorts the available coins by value and then picks them starting
/// from the largest ones until the required amount is reached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LargestFirstCoinSelection;

impl CoinSelectionAlgorithm for LargestFirstCoinSelection {
    fn coin_select(
        &self,
        required_coins: Vec<WeightedCoin>,
        mut optional_coins: Vec<WeightedCoin>,
        fee_rate: FeeRate,
        target_amount: u64,
    ) -> Result<CoinSelectionResult, Error> {
        log::debug!(
            "target_amount = `{}`, fee_rate = `{:?}`",
            target_amount,
            fee_rate
        );

        // We put the required coins first and make sure the optional ones are sorted, initially
        // smallest to largest, before being reversed with `.rev()`. Sorting equal values by
        // confirmation keeps confirmed coins ahead once reversed.
        let coins = {
            optional_coins
                .sort_unstable_by_key(|wc| (wc.coin.txout.value, wc.coin.is_confirmed()));
            required_coins
                .into_iter()
                .map(|wc| (true, wc))
                .chain(optional_coins.into_iter().rev().map(|wc| (false, wc)))
        };

        select_sorted_coins(coins, fee_rate, target_amount)
    }
}

/// OldestFirstCoinSelection always picks the coin with the smallest confirmation height to add
/// to the selected coins next
///
/// Unconfirmed coins sort last and are only reached once every confirmed coin has been used.
#[derive(Debug, Default, Clone, Copy)]
pub struct OldestFirstCoinSelection;

impl CoinSelectionAlgorithm for OldestFirstCoinSelection {
    fn coin_select(
        &self,
        required_coins: Vec<WeightedCoin>,
        mut optional_coins: Vec<WeightedCoin>,
        fee_rate: FeeRate,
        target_amount: u64,
    ) -> Result<CoinSelectionResult, Error> {
        let coins = {
            optional_coins.sort_unstable_by_key(|wc| match wc.coin.confirmation_height {
                Some(height) => height,
                None => u32::MAX,
            });

            required_coins
                .into_iter()
                .map(|wc| (true, wc))
                .chain(optional_coins.into_iter().map(|wc| (false, wc)))
        };

        select_sorted_coins(coins, fee_rate, target_amount)
    }
}

fn select_sorted_coins(
    coins: impl Iterator<Item = (bool, WeightedCoin)>,
    fee_rate: FeeRate,
    target_amount: u64,
) -> Result<CoinSelectionResult, Error> {
    let mut selected_amount = 0;
    let mut fee_amount = 0;
    let selected = coins
        .scan(
            (&mut selected_amount, &mut fee_amount),
            |(selected_amount, fee_amount), (must_use, weighted_coin)| {
                if must_use || **selected_amount < target_amount + **fee_amount {
                    **fee_amount += input_fee(weighted_coin.satisfaction_weight, fee_rate);
                    **selected_amount += weighted_coin.coin.txout.value;

                    log::debug!(
                        "Selected {}, updated fee_amount = `{}`",
                        weighted_coin.coin.outpoint,
                        fee_amount
                    );

                    Some(weighted_coin)
                } else {
                    None
                }
            },
        )
        .collect::<Vec<_>>();

    let amount_needed_with_fees = target_amount + fee_amount;
    if selected_amount < amount_needed_with_fees {
        return Err(Error::InsufficientFunds {
            needed: amount_needed_with_fees,
            available: selected_amount,
        });
    }

    Ok(CoinSelectionResult {
        selected,
        fee_amount,
    })
}

#[derive(Debug, Clone)]
// Adds fee information to a coin
struct OutputGroup {
    weighted_coin: WeightedCoin,
    // Amount of fees for spending a certain coin, calculated using a certain FeeRate
    fee: u64,
    // The effective value of the coin, i.e. the coin value minus the fee for spending it
    effective_value: i64,
}

impl OutputGroup {
    fn new(weighted_coin: WeightedCoin, fee_rate: FeeRate) -> Self {
        let fee = input_fee(weighted_coin.satisfaction_weight, fee_rate);
        let effective_value = weighted_coin.coin.txout.value as i64 - fee as i64;
        OutputGroup {
            weighted_coin,
            fee,
            effective_value,
        }
    }
}

/// Branch and bound coin selection
///
/// Looks for the input set wasting the least: an exact match avoids paying for a remainder
/// output altogether, and among in-range selections the smallest value (and therefore the
/// smallest overshoot) wins. Code adapted from Bitcoin Core's implementation and from Mark
/// Erhardt Master's Thesis: <http://murch.one/wp-content/uploads/2016/11/erhardt2016coinselection.pdf>
#[derive(Debug, Clone)]
pub struct BranchAndBoundCoinSelection {
    size_of_remainder: u64,
}

impl Default for BranchAndBoundCoinSelection {
    fn default() -> Self {
        Self {
            // P2WPKH cost of a remainder output -> value (8 bytes) + script len (1 bytes) + script (22 bytes)
            size_of_remainder: 8 + 1 + 22,
        }
    }
}

impl BranchAndBoundCoinSelection {
    /// Create new instance with a target size for the remainder output
    pub fn new(size_of_remainder: u64) -> Self {
        Self { size_of_remainder }
    }
}

const BNB_TOTAL_TRIES: usize = 100_000;

impl CoinSelectionAlgorithm for BranchAndBoundCoinSelection {
    fn coin_select(
        &self,
        required_coins: Vec<WeightedCoin>,
        optional_coins: Vec<WeightedCoin>,
        fee_rate: FeeRate,
        target_amount: u64,
    ) -> Result<CoinSelectionResult, Error> {
        let required_coins: Vec<OutputGroup> = required_coins
            .into_iter()
            .map(|wc| OutputGroup::new(wc, fee_rate))
            .collect();

        // Coins with a negative effective value would only dilute the selection, so they are
        // filtered out here; callers wanting them anyway pass them as required
        let optional_coins: Vec<OutputGroup> = optional_coins
            .into_iter()
            .map(|wc| OutputGroup::new(wc, fee_rate))
            .filter(|og| og.effective_value.is_positive())
            .collect();

        let curr_value = required_coins
            .iter()
            .fold(0, |acc, og| acc + og.effective_value);

        let curr_available_value = optional_coins
            .iter()
            .fold(0, |acc, og| acc + og.effective_value);

        let cost_of_remainder = self.size_of_remainder as f32 * fee_rate.as_sat_per_vb();

        // `curr_value` and `curr_available_value` are both sums of *effective values*: the
        // optional set is filtered to positive values, the required set is not, so `curr_value`
        // may well be negative. If everything we can possibly spend doesn't reach the target,
        // there is no point running the search.
        let total_value: Result<u64, _> = (curr_available_value + curr_value).try_into();
        match total_value {
            Ok(v) if v >= target_amount => {}
            _ => {
                // Assume we spend all the coins we can (all the required + all the optional with
                // positive effective value), sum their value and their fee cost.
                let (coin_fees, coin_value) = required_coins
                    .iter()
                    .chain(optional_coins.iter())
                    .fold((0, 0), |(mut fees, mut value), og| {
                        fees += og.fee;
                        value += og.weighted_coin.coin.txout.value;

                        (fees, value)
                    });

                return Err(Error::InsufficientFunds {
                    needed: target_amount + coin_fees,
                    available: coin_value,
                });
            }
        }

        let signed_target_amount = target_amount
            .try_into()
            .expect("target amount to fit into i64");

        if curr_value >= signed_target_amount {
            // the required coins alone are already enough
            return Ok(BranchAndBoundCoinSelection::calculate_cs_result(
                vec![],
                required_coins,
            ));
        }

        Ok(self
            .bnb(
                required_coins.clone(),
                optional_coins.clone(),
                curr_value,
                curr_available_value,
                signed_target_amount,
                cost_of_remainder,
            )
            .unwrap_or_else(|_| {
                self.single_random_draw(
                    required_coins,
                    optional_coins,
                    curr_value,
                    signed_target_amount,
                )
            }))
    }
}

impl BranchAndBoundCoinSelection {
    fn bnb(
        &self,
        required_coins: Vec<OutputGroup>,
        mut optional_coins: Vec<OutputGroup>,
        mut curr_value: i64,
        mut curr_available_value: i64,
        target_amount: i64,
        cost_of_remainder: f32,
    ) -> Result<CoinSelectionResult, Error> {
        // current_selection[i] will contain true if we are using optional_coins[i],
        // false otherwise. Note that current_selection.len() could be less than
        // optional_coins.len(), it just means that we still haven't decided if we should keep
        // certain optional_coins or not.
        let mut current_selection: Vec<bool> = Vec::with_capacity(optional_coins.len());

        // Sort the pool largest-effective-value first; among equal values a confirmed coin is
        // explored before an unconfirmed one
        optional_coins
            .sort_unstable_by_key(|og| (og.effective_value, og.weighted_coin.coin.is_confirmed()));
        optional_coins.reverse();

        // Contains the best selection we found
        let mut best_selection = Vec::new();
        let mut best_selection_value = None;

        // Depth first search loop for choosing the coins
        for _ in 0..BNB_TOTAL_TRIES {
            // Conditions for starting a backtrack
            let mut backtrack = false;
            // Cannot possibly reach target with the amount remaining in curr_available_value,
            // or the selected value is out of range. Go back and try other branch
            if curr_value + curr_available_value < target_amount
                || curr_value > target_amount + cost_of_remainder as i64
            {
                backtrack = true;
            } else if curr_value >= target_amount {
                // Selected value is within range, there's no point in going forward. Start
                // backtracking
                backtrack = true;

                // If we found a solution better than the previous one, or if there wasn't a
                // previous one, update the best solution
                if best_selection_value.is_none() || curr_value < best_selection_value.unwrap() {
                    best_selection = current_selection.clone();
                    best_selection_value = Some(curr_value);
                }

                // If we found a perfect match, break here
                if curr_value == target_amount {
                    break;
                }
            }

            // Backtracking, moving backwards
            if backtrack {
                // Walk backwards to find the last included coin that still needs to have its
                // omission branch traversed
                while let Some(false) = current_selection.last() {
                    current_selection.pop();
                    curr_available_value += optional_coins[current_selection.len()].effective_value;
                }

                if current_selection.last_mut().is_none() {
                    // We have walked back to the first coin and no branch is untraversed. All
                    // solutions searched. If the best selection is empty there's no exact match
                    if best_selection.is_empty() {
                        return Err(Error::BnBNoExactMatch);
                    }
                    break;
                }

                if let Some(c) = current_selection.last_mut() {
                    // Output was included on previous iterations, try excluding now
                    *c = false;
                }

                let og = &optional_coins[current_selection.len() - 1];
                curr_value -= og.effective_value;
            } else {
                // Moving forwards, continuing down this branch
                let og = &optional_coins[current_selection.len()];

                // Remove this coin from the curr_available_value amount
                curr_available_value -= og.effective_value;

                // Inclusion branch first (largest first exploration)
                current_selection.push(true);
                curr_value += og.effective_value;
            }
        }

        // Check for solution
        if best_selection.is_empty() {
            return Err(Error::BnBTotalTriesExceeded);
        }

        // Set output set
        let selected_coins = optional_coins
            .into_iter()
            .zip(best_selection)
            .filter_map(|(optional, is_in_best)| if is_in_best { Some(optional) } else { None })
            .collect::<Vec<OutputGroup>>();

        Ok(BranchAndBoundCoinSelection::calculate_cs_result(
            selected_coins,
            required_coins,
        ))
    }

    fn single_random_draw(
        &self,
        required_coins: Vec<OutputGroup>,
        mut optional_coins: Vec<OutputGroup>,
        curr_value: i64,
        target_amount: i64,
    ) -> CoinSelectionResult {
        optional_coins.shuffle(&mut rand::thread_rng());
        let selected_coins = optional_coins
            .into_iter()
            .fold((curr_value, vec![]), |(mut amount, mut coins), og| {
                if amount >= target_amount {
                    (amount, coins)
                } else {
                    amount += og.effective_value;
                    coins.push(og);
                    (amount, coins)
                }
            });

        BranchAndBoundCoinSelection::calculate_cs_result(selected_coins.1, required_coins)
    }

    fn calculate_cs_result(
        mut selected_coins: Vec<OutputGroup>,
        mut required_coins: Vec<OutputGroup>,
    ) -> CoinSelectionResult {
        selected_coins.append(&mut required_coins);
        let fee_amount = selected_coins.iter().map(|og| og.fee).sum::<u64>();
        let selected = selected_coins
            .into_iter()
            .map(|og| og.weighted_coin)
            .collect::<Vec<_>>();

        CoinSelectionResult {
            selected,
            fee_amount,
        }
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use assert_matches::assert_matches;
    use bitcoin::{OutPoint, Script, TxOut};

    use super::*;
    use crate::types::Coin;

    // n. of items on witness (1WU) + signature len (1WU) + signature and sighash (72WU)
    // + pubkey len (1WU) + pubkey (33WU) + script sig len (1 byte, 4WU)
    const P2WPKH_SATISFACTION_WEIGHT: usize = 1 + 1 + 72 + 1 + 33 + 4;

    const FEE_AMOUNT: u64 = 50;

    fn coin(value: u64, index: u32, confirmation_height: Option<u32>) -> WeightedCoin {
        assert!(index < 10);
        let outpoint = OutPoint::from_str(&format!(
            "000000000000000000000000000000000000000000000000000000000000000{}:0",
            index
        ))
        .unwrap();
        WeightedCoin {
            satisfaction_weight: P2WPKH_SATISFACTION_WEIGHT,
            coin: Coin {
                outpoint,
                txout: TxOut {
                    value,
                    script_pubkey: Script::new(),
                },
                confirmation_height,
                is_spent: false,
                is_reserved: false,
            },
        }
    }

    fn get_test_coins() -> Vec<WeightedCoin> {
        vec![
            coin(100_000, 0, Some(12)),
            coin(FEE_AMOUNT - 40, 1, Some(12)),
            coin(200_000, 2, None),
        ]
    }

    #[test]
    fn test_largest_first_coin_selection_success() {
        let coins = get_test_coins();
        let result = LargestFirstCoinSelection::default()
            .coin_select(coins, vec![], FeeRate::from_sat_per_vb(1.0), 250_000 + FEE_AMOUNT)
            .unwrap();

        // all three coins are required, so all of them are spent
        assert_eq!(result.selected.len(), 3);
        assert_eq!(result.selected_amount(), 300_010);
        assert_eq!(result.fee_amount, 201);
    }

    #[test]
    fn test_largest_first_coin_selection_use_all() {
        let coins = get_test_coins();
        let result = LargestFirstCoinSelection::default()
            .coin_select(coins, vec![], FeeRate::from_sat_per_vb(1.0), 20_000 + FEE_AMOUNT)
            .unwrap();

        assert_eq!(result.selected.len(), 3);
        assert_eq!(result.selected_amount(), 300_010);
        assert_eq!(result.fee_amount, 201);
    }

    #[test]
    fn test_largest_first_coin_selection_use_only_necessary() {
        let coins = get_test_coins();
        let result = LargestFirstCoinSelection::default()
            .coin_select(vec![], coins, FeeRate::from_sat_per_vb(1.0), 20_000 + FEE_AMOUNT)
            .unwrap();

        assert_eq!(result.selected.len(), 1);
        assert_eq!(result.selected_amount(), 200_000);
        assert_eq!(result.fee_amount, 67);
    }

    #[test]
    fn test_largest_first_coin_selection_insufficient_funds() {
        let coins = get_test_coins();
        let err = LargestFirstCoinSelection::default()
            .coin_select(vec![], coins, FeeRate::from_sat_per_vb(1.0), 500_000 + FEE_AMOUNT)
            .unwrap_err();

        assert_matches!(err, Error::InsufficientFunds { .. });
    }

    #[test]
    fn test_largest_first_coin_selection_insufficient_funds_high_fees() {
        let coins = get_test_coins();
        let err = LargestFirstCoinSelection::default()
            .coin_select(
                vec![],
                coins,
                FeeRate::from_sat_per_vb(1000.0),
                250_000 + FEE_AMOUNT,
            )
            .unwrap_err();

        assert_matches!(err, Error::InsufficientFunds { .. });
    }

    #[test]
    fn test_oldest_first_coin_selection_prefers_deep_confirmations() {
        let coins = vec![
            coin(120_000, 0, Some(80)),
            coin(120_000, 1, Some(5)),
            coin(120_000, 2, None),
        ];

        let result = OldestFirstCoinSelection::default()
            .coin_select(vec![], coins, FeeRate::from_sat_per_vb(1.0), 100_000)
            .unwrap();

        assert_eq!(result.selected.len(), 1);
        assert_eq!(result.selected[0].coin.confirmation_height, Some(5));
    }

    #[test]
    fn test_bnb_coin_selection_success() {
        // In this case bnb won't find an exact match and are the coins added in the fallback
        // single random draw
        let coins = get_test_coins();
        let result = BranchAndBoundCoinSelection::default()
            .coin_select(vec![], coins, FeeRate::from_sat_per_vb(1.0), 250_000 + FEE_AMOUNT)
            .unwrap();

        assert_eq!(result.selected_amount(), 300_000);
        assert!(result.selected_amount() >= 250_000 + FEE_AMOUNT + result.fee_amount);
    }

    #[test]
    fn test_bnb_coin_selection_required_are_enough() {
        let coins = get_test_coins();
        let result = BranchAndBoundCoinSelection::default()
            .coin_select(coins.clone(), coins, FeeRate::from_sat_per_vb(1.0), 20_000 + FEE_AMOUNT)
            .unwrap();

        assert_eq!(result.selected.len(), 3);
        assert_eq!(result.selected_amount(), 300_010);
        assert_eq!(result.fee_amount, 201);
    }

    #[test]
    fn test_bnb_coin_selection_exact_match() {
        // an exact match on the effective value avoids the remainder output entirely
        let fee_rate = FeeRate::from_sat_per_vb(1.0);
        let target = 100_000 - input_fee(P2WPKH_SATISFACTION_WEIGHT, fee_rate);

        let result = BranchAndBoundCoinSelection::default()
            .coin_select(
                vec![],
                vec![coin(100_000, 0, Some(12)), coin(50_000, 1, Some(12))],
                fee_rate,
                target,
            )
            .unwrap();

        assert_eq!(result.selected.len(), 1);
        assert_eq!(result.selected_amount(), 100_000);
        assert_eq!(
            result.selected_amount(),
            target + result.fee_amount
        );
    }

    #[test]
    fn test_bnb_coin_selection_insufficient_funds() {
        let coins = get_test_coins();
        let err = BranchAndBoundCoinSelection::default()
            .coin_select(vec![], coins, FeeRate::from_sat_per_vb(1.0), 500_000 + FEE_AMOUNT)
            .unwrap_err();

        assert_matches!(err, Error::InsufficientFunds { .. });
    }

    #[test]
    fn test_bnb_filters_negative_effective_value() {
        // at 10 sat/vb the 10 sat coin costs more than it adds and must not appear
        let coins = vec![coin(300_000, 0, Some(12)), coin(10, 1, Some(12))];
        let result = BranchAndBoundCoinSelection::default()
            .coin_select(vec![], coins, FeeRate::from_sat_per_vb(10.0), 250_000)
            .unwrap();

        assert_eq!(result.selected.len(), 1);
        assert_eq!(result.selected[0].coin.txout.value, 300_000);
    }

    #[test]
    fn test_effective_value_sign() {
        let rate = FeeRate::from_sat_per_vb(1.0);
        assert!(effective_value(1_000, P2WPKH_SATISFACTION_WEIGHT, rate) > 0);
        assert!(effective_value(10, P2WPKH_SATISFACTION_WEIGHT, rate) < 0);
    }
}
