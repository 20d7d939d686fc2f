// Tidewallet
// Copyright (c) 2025 Tidewallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Ancestor package analysis
//!
//! Spending an unconfirmed coin ties the new transaction's fate to its
//! ancestors: miners rank the whole package, not the child alone. The
//! functions here resolve the packages behind a selected input set and compute
//! the fee the new transaction must pay so that every package it joins clears
//! the target fee rate.

use std::collections::HashSet;
use std::sync::Arc;

use bitcoin::hash_types::Txid;

#[allow(unused_imports)]
use log::{debug, trace};

use crate::catalog::CoinCatalog;
use crate::error::Error;
use crate::types::{AncestorInfo, FeeRate, WeightedCoin};

/// Resolve the ancestor packages behind a selected input set
///
/// Confirmed coins contribute nothing. Coins produced by the same unconfirmed
/// transaction share one package, which is counted once. Coins from different
/// transactions are resolved independently even if their ancestries overlap
/// somewhere upstream; the shared portion then appears in both aggregates and
/// the fee requirement stays on the conservative side.
pub fn packages_for<D: CoinCatalog>(
    catalog: &D,
    selected: &[WeightedCoin],
) -> Result<Vec<Arc<AncestorInfo>>, Error> {
    packages_for_excluding(catalog, selected, &[])
}

/// Same as [`packages_for`], ignoring the transactions in `exclude`
///
/// A fee bump runs the pipeline against the inputs of the transaction it is
/// about to replace; the replaced transaction is still broadcast at that
/// point, and without the exclusion its fee would count toward its own
/// ancestors' position and make them look better funded than they will be
/// once the replacement evicts it.
pub fn packages_for_excluding<D: CoinCatalog>(
    catalog: &D,
    selected: &[WeightedCoin],
    exclude: &[Txid],
) -> Result<Vec<Arc<AncestorInfo>>, Error> {
    let mut seen: HashSet<Txid> = HashSet::new();
    let mut packages = Vec::new();

    for weighted_coin in selected {
        let txid = weighted_coin.coin.outpoint.txid;
        if !seen.insert(txid) {
            continue;
        }
        if let Some(info) = catalog.ancestor_info_excluding(&txid, exclude)? {
            trace!(
                "input {} carries package: {} sat / {} vb",
                weighted_coin.coin.outpoint,
                info.fee,
                info.vsize
            );
            packages.push(info);
        }
    }

    Ok(packages)
}

/// The fee the new transaction must pay so that it, and every ancestor package
/// it joins, meets `target`
///
/// For each package the combined constraint is
/// `(package_fee + tx_fee) / (package_vsize + tx_vsize) >= target`; solving for
/// `tx_fee` and taking the maximum across packages gives the single binding
/// requirement (the constraint is monotonic in the shared fee, so the maximum
/// satisfies all of them at once). The result is never below `base_fee`, the
/// fee the transaction pays for its own weight alone.
pub fn required_fee(
    base_fee: u64,
    tx_vsize: u64,
    target: FeeRate,
    packages: &[Arc<AncestorInfo>],
) -> u64 {
    let own_fee = target.fee_vb(tx_vsize as usize);
    let mut required = base_fee.max(own_fee);

    for package in packages {
        let combined = target.fee_vb((package.vsize + tx_vsize) as usize);
        let needed = combined.saturating_sub(package.fee);
        if needed > required {
            debug!(
                "package ({} sat / {} vb) raises required fee {} -> {}",
                package.fee, package.vsize, required, needed
            );
            required = needed;
        }
    }

    required
}
