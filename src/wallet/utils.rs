// Tidewallet
// Copyright (c) 2025 Tidewallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use bitcoin::Transaction;

// De-facto standard "dust limit" (even though it should change based on the output type)
const DUST_LIMIT_SATOSHI: u64 = 546;

/// Trait to check if a value is below the dust limit
// we implement this trait to make sure we don't mess up the comparison with off-by-one like a <
// instead of a <= etc. The constant value for the dust limit is not public on purpose, to
// encourage the usage of this trait.
pub trait IsDust {
    /// Check whether or not a value is below dust limit
    fn is_dust(&self) -> bool;
}

impl IsDust for u64 {
    fn is_dust(&self) -> bool {
        *self <= DUST_LIMIT_SATOSHI
    }
}

// Segwit transactions' header is 2WU larger than legacy txs' header: one weight unit each for
// the witness marker and flag. We don't know at estimation time whether every input will be
// satisfied with witness data only, so we always account for the two extra units. Overshooting
// the weight (and therefore the fee) is fine, undershooting could produce a transaction below
// the target fee rate.
pub(crate) const SEGWIT_HEADER_WEIGHT: usize = 2;

/// Estimated weight of the transaction once every input carries its satisfaction data.
///
/// `tx` is expected to hold unsatisfied inputs (empty `script_sig`, no witness);
/// `satisfaction_weight` is the total over all inputs.
pub(crate) fn satisfied_weight(tx: &Transaction, satisfaction_weight: usize) -> usize {
    tx.get_weight() + satisfaction_weight + SEGWIT_HEADER_WEIGHT
}

/// Virtual size, in vbytes, for a weight expressed in weight units, rounding up.
pub(crate) fn weight_to_vsize(weight: usize) -> u64 {
    ((weight + 3) / 4) as u64
}

#[cfg(target_arch = "wasm32")]
pub(crate) fn get_timestamp() -> u64 {
    0
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn get_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock is before unix epoch")
        .as_secs()
}
