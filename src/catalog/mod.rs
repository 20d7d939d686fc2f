// Tidewallet
// Copyright (c) 2025 Tidewallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Coin catalog
//!
//! This module defines the [`CoinCatalog`] trait, the wallet's view of the
//! collaborator that tracks spendable coins, the transactions that produced
//! them, and the ancestor-package economics of everything still unconfirmed.
//!
//! The wallet never walks the mempool itself: the catalog answers
//! [`ancestor_info`](CoinCatalog::ancestor_info) with the aggregate fee and
//! virtual size of a transaction's unconfirmed ancestry *as currently
//! broadcast*, sibling contributions included. [`MemoryCatalog`] is the
//! in-memory implementation used by the tests and by callers that feed the
//! wallet from an external source.

use std::sync::Arc;

use bitcoin::{OutPoint, Script, Txid};

use crate::error::Error;
use crate::types::{AncestorInfo, Coin, TransactionDetails};

mod memory;
pub use memory::MemoryCatalog;

/// Trait for the wallet's source of coins and ancestry metadata
pub trait CoinCatalog {
    /// Return every coin known to the catalog, spent and unspent
    fn iter_coins(&self) -> Result<Vec<Coin>, Error>;

    /// Look up a specific coin
    fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, Error>;

    /// Look up a transaction descriptor, optionally with the raw transaction attached
    fn get_tx(&self, txid: &Txid, include_raw: bool) -> Result<Option<TransactionDetails>, Error>;

    /// Aggregate fee and virtual size of `txid`'s ancestor package
    ///
    /// Returns `None` when the transaction is confirmed (or unknown): confirmed
    /// coins contribute no ancestor cost. The aggregate is shared, not copied:
    /// two coins hanging off the same ancestor resolve to the same allocation.
    fn ancestor_info(&self, txid: &Txid) -> Result<Option<Arc<AncestorInfo>>, Error> {
        self.ancestor_info_excluding(txid, &[])
    }

    /// Same as [`ancestor_info`](Self::ancestor_info), pretending the
    /// transactions in `exclude` were never broadcast
    ///
    /// Used when building a replacement: the to-be-replaced transaction must
    /// not count toward its own ancestors' package.
    fn ancestor_info_excluding(
        &self,
        txid: &Txid,
        exclude: &[Txid],
    ) -> Result<Option<Arc<AncestorInfo>>, Error>;

    /// Whether a script belongs to this wallet
    fn is_mine(&self, script: &Script) -> Result<bool, Error>;

    /// Take the build-time reservation on a coin
    ///
    /// Returns `false` if the coin was already reserved. A reserved coin is
    /// skipped by automatic selection until released, which is what keeps two
    /// interleaved builds from choosing the same coin.
    fn reserve_coin(&mut self, outpoint: &OutPoint) -> Result<bool, Error>;

    /// Release the build-time reservation on a coin
    fn release_coin(&mut self, outpoint: &OutPoint) -> Result<(), Error>;

    /// Record a transaction in the pending set
    ///
    /// Marks the coins it spends as consumed and credits any output paying a
    /// wallet-owned script as a fresh coin.
    fn record_tx(&mut self, details: &TransactionDetails) -> Result<(), Error>;
}

/// Convenience methods that any [`CoinCatalog`] gets for free
pub trait CatalogUtils: CoinCatalog {
    /// Coins that can be fed to coin selection: unspent and unreserved
    fn spendable_coins(&self) -> Result<Vec<Coin>, Error> {
        Ok(self
            .iter_coins()?
            .into_iter()
            .filter(|coin| !coin.is_spent && !coin.is_reserved)
            .collect())
    }

    /// Sum of the face values of all unspent coins
    fn balance(&self) -> Result<u64, Error> {
        Ok(self
            .iter_coins()?
            .iter()
            .filter(|coin| !coin.is_spent)
            .fold(0, |sum, coin| sum + coin.txout.value))
    }
}

impl<T: CoinCatalog> CatalogUtils for T {}
