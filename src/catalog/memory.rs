// Tidewallet
// Copyright (c) 2025 Tidewallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use bitcoin::{OutPoint, Script, Transaction, Txid};

#[allow(unused_imports)]
use log::{debug, trace};

use crate::catalog::CoinCatalog;
use crate::error::Error;
use crate::types::{AncestorInfo, Coin, TransactionDetails};
use crate::wallet::utils::weight_to_vsize;

/// In-memory coin catalog
///
/// Tracks wallet-owned scripts, the coins paying them, and every transaction
/// the catalog has been shown, confirmed or pending. Ancestor-package
/// aggregates are computed on demand and cached per transaction id; any
/// mutation of the transaction set drops the cache, since a new broadcast can
/// change the economics of an existing package.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    scripts: HashSet<Script>,
    coins: BTreeMap<OutPoint, Coin>,
    txs: HashMap<Txid, TransactionDetails>,
    packages: RefCell<HashMap<Txid, Arc<AncestorInfo>>>,
}

impl MemoryCatalog {
    /// Create a new, empty instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a script as belonging to the wallet
    ///
    /// Outputs paying registered scripts become coins when their transaction is
    /// inserted.
    pub fn insert_script(&mut self, script: Script) {
        self.scripts.insert(script);
    }

    /// Insert a raw transaction observed at `confirmation_height` (or pending
    /// when `None`), with the fee it pays
    ///
    /// Marks the coins it spends as consumed, credits outputs paying registered
    /// scripts, and stores a descriptor for later lookup. The virtual size is
    /// derived from the raw transaction.
    pub fn insert_tx(
        &mut self,
        tx: &Transaction,
        fee: u64,
        confirmation_height: Option<u32>,
    ) -> Result<TransactionDetails, Error> {
        let details = TransactionDetails {
            transaction: Some(tx.clone()),
            txid: tx.txid(),
            received: 0,
            sent: 0,
            fee,
            vsize: weight_to_vsize(tx.get_weight()),
            confirmation_height,
            timestamp: 0,
        };
        self.record(&details)?;
        Ok(self.txs.get(&details.txid).cloned().expect("just inserted"))
    }

    /// Mark a pending transaction as confirmed at `height`
    pub fn confirm_tx(&mut self, txid: &Txid, height: u32) -> Result<(), Error> {
        let details = self
            .txs
            .get_mut(txid)
            .ok_or(Error::TransactionNotFound)?;
        details.confirmation_height = Some(height);

        for coin in self.coins.values_mut() {
            if coin.outpoint.txid == *txid {
                coin.confirmation_height = Some(height);
            }
        }

        self.packages.borrow_mut().clear();
        Ok(())
    }

    /// Drop a pending transaction that will never confirm
    ///
    /// The coins it spent become spendable again and the coins it created are
    /// withdrawn, mirroring the restore half of the coin lifecycle.
    pub fn evict_tx(&mut self, txid: &Txid) -> Result<(), Error> {
        let details = self.txs.remove(txid).ok_or(Error::TransactionNotFound)?;

        if let Some(tx) = details.transaction {
            for txin in &tx.input {
                if let Some(coin) = self.coins.get_mut(&txin.previous_output) {
                    coin.is_spent = false;
                }
            }
        }
        self.coins.retain(|outpoint, _| outpoint.txid != *txid);

        self.packages.borrow_mut().clear();
        Ok(())
    }

    fn record(&mut self, details: &TransactionDetails) -> Result<(), Error> {
        let tx = details
            .transaction
            .as_ref()
            .ok_or_else(|| Error::Generic("cannot record a transaction without its raw form".into()))?;
        let txid = tx.txid();

        let mut sent = 0;
        for txin in &tx.input {
            if let Some(coin) = self.coins.get_mut(&txin.previous_output) {
                coin.is_spent = true;
                coin.is_reserved = false;
                sent += coin.txout.value;
            }
        }

        let mut received = 0;
        for (vout, txout) in tx.output.iter().enumerate() {
            if self.scripts.contains(&txout.script_pubkey) {
                received += txout.value;
                self.coins.insert(
                    OutPoint {
                        txid,
                        vout: vout as u32,
                    },
                    Coin {
                        outpoint: OutPoint {
                            txid,
                            vout: vout as u32,
                        },
                        txout: txout.clone(),
                        confirmation_height: details.confirmation_height,
                        is_spent: false,
                        is_reserved: false,
                    },
                );
            }
        }

        let mut details = details.clone();
        details.txid = txid;
        details.received = received;
        details.sent = sent;
        self.txs.insert(txid, details);

        self.packages.borrow_mut().clear();
        Ok(())
    }

    // The package of an unconfirmed transaction, in its current broadcast
    // state: the unconfirmed ancestor closure, folded together with any
    // already-broadcast descendant of a member whose own fee rate improves the
    // aggregate. A generous sibling raises the shared ancestor's position and
    // becomes part of the package; a stingy one is left out rather than
    // dragging the aggregate down. Transactions in `exclude` are treated as
    // never broadcast.
    fn compute_package(&self, txid: &Txid, exclude: &[Txid]) -> AncestorInfo {
        let mut members: BTreeSet<Txid> = BTreeSet::new();
        let mut stack = vec![*txid];
        while let Some(current) = stack.pop() {
            if exclude.contains(&current) || !members.insert(current) {
                continue;
            }
            let tx = match self.txs.get(&current).and_then(|d| d.transaction.as_ref()) {
                Some(tx) => tx,
                None => continue,
            };
            for txin in &tx.input {
                let parent = txin.previous_output.txid;
                if let Some(details) = self.txs.get(&parent) {
                    if details.confirmation_height.is_none() {
                        stack.push(parent);
                    }
                }
            }
        }

        let aggregate = |members: &BTreeSet<Txid>| -> AncestorInfo {
            members.iter().fold(AncestorInfo::default(), |mut acc, member| {
                let details = &self.txs[member];
                acc.fee += details.fee;
                acc.vsize += details.vsize;
                acc
            })
        };

        let mut info = aggregate(&members);
        loop {
            // best broadcast descendant of the current member set
            let candidate = self
                .txs
                .values()
                .filter(|d| {
                    d.confirmation_height.is_none()
                        && !members.contains(&d.txid)
                        && !exclude.contains(&d.txid)
                })
                .filter(|d| {
                    d.transaction.as_ref().map_or(false, |tx| {
                        tx.input
                            .iter()
                            .any(|txin| members.contains(&txin.previous_output.txid))
                    })
                })
                .max_by(|a, b| {
                    a.fee_rate()
                        .as_sat_per_vb()
                        .partial_cmp(&b.fee_rate().as_sat_per_vb())
                        .expect("fee rates are finite")
                });

            match candidate {
                Some(descendant)
                    if descendant.fee_rate().as_sat_per_vb()
                        > info.fee_rate().as_sat_per_vb() =>
                {
                    trace!(
                        "package of {} picks up descendant {} at {} sat/vb",
                        txid,
                        descendant.txid,
                        descendant.fee_rate().as_sat_per_vb()
                    );
                    members.insert(descendant.txid);
                    info = aggregate(&members);
                }
                _ => break,
            }
        }

        debug!(
            "package of {}: {} member(s), {} sat / {} vb",
            txid,
            members.len(),
            info.fee,
            info.vsize
        );
        info
    }
}

impl CoinCatalog for MemoryCatalog {
    fn iter_coins(&self) -> Result<Vec<Coin>, Error> {
        Ok(self.coins.values().cloned().collect())
    }

    fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, Error> {
        Ok(self.coins.get(outpoint).cloned())
    }

    fn get_tx(&self, txid: &Txid, include_raw: bool) -> Result<Option<TransactionDetails>, Error> {
        Ok(self.txs.get(txid).map(|details| {
            let mut details = details.clone();
            if !include_raw {
                details.transaction = None;
            }
            details
        }))
    }

    fn ancestor_info_excluding(
        &self,
        txid: &Txid,
        exclude: &[Txid],
    ) -> Result<Option<Arc<AncestorInfo>>, Error> {
        match self.txs.get(txid) {
            Some(details) if details.confirmation_height.is_none() => {}
            _ => return Ok(None),
        }

        // only unfiltered aggregates are worth caching and sharing
        if exclude.is_empty() {
            if let Some(info) = self.packages.borrow().get(txid) {
                return Ok(Some(Arc::clone(info)));
            }
        }

        let info = Arc::new(self.compute_package(txid, exclude));
        if exclude.is_empty() {
            self.packages
                .borrow_mut()
                .insert(*txid, Arc::clone(&info));
        }
        Ok(Some(info))
    }

    fn is_mine(&self, script: &Script) -> Result<bool, Error> {
        Ok(self.scripts.contains(script))
    }

    fn reserve_coin(&mut self, outpoint: &OutPoint) -> Result<bool, Error> {
        let coin = self
            .coins
            .get_mut(outpoint)
            .ok_or(Error::InputNotFound(*outpoint))?;
        if coin.is_reserved {
            return Ok(false);
        }
        coin.is_reserved = true;
        Ok(true)
    }

    fn release_coin(&mut self, outpoint: &OutPoint) -> Result<(), Error> {
        if let Some(coin) = self.coins.get_mut(outpoint) {
            coin.is_reserved = false;
        }
        Ok(())
    }

    fn record_tx(&mut self, details: &TransactionDetails) -> Result<(), Error> {
        self.record(details)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use bitcoin::{Transaction, TxIn, TxOut};

    use super::*;
    use crate::catalog::CatalogUtils;

    fn dummy_script(tag: u8) -> Script {
        Script::from(vec![0x51, 0x01, tag])
    }

    fn build_tx(spend: Vec<OutPoint>, outputs: Vec<(Script, u64)>) -> Transaction {
        Transaction {
            version: 1,
            lock_time: 0,
            input: spend
                .into_iter()
                .map(|previous_output| TxIn {
                    previous_output,
                    script_sig: Script::default(),
                    sequence: 0xFFFF_FFFD,
                    witness: vec![],
                })
                .collect(),
            output: outputs
                .into_iter()
                .map(|(script_pubkey, value)| TxOut {
                    value,
                    script_pubkey,
                })
                .collect(),
        }
    }

    fn funding_outpoint() -> OutPoint {
        OutPoint::from_str("aad194c72fd5cfd16d23da9462930ca91e35df1cfee05242b62f4034f50c3d41:5")
            .unwrap()
    }

    #[test]
    fn test_insert_tx_credits_and_spends() {
        let mut catalog = MemoryCatalog::new();
        catalog.insert_script(dummy_script(1));

        let funding = build_tx(
            vec![funding_outpoint()],
            vec![(dummy_script(1), 50_000), (dummy_script(99), 10_000)],
        );
        catalog.insert_tx(&funding, 200, Some(100)).unwrap();

        assert_eq!(catalog.balance().unwrap(), 50_000);
        assert_eq!(catalog.spendable_coins().unwrap().len(), 1);

        let spend = build_tx(
            vec![OutPoint {
                txid: funding.txid(),
                vout: 0,
            }],
            vec![(dummy_script(99), 49_000)],
        );
        catalog.insert_tx(&spend, 1_000, None).unwrap();

        assert_eq!(catalog.balance().unwrap(), 0);
        let coin = catalog
            .get_coin(&OutPoint {
                txid: funding.txid(),
                vout: 0,
            })
            .unwrap()
            .unwrap();
        assert!(coin.is_spent);
    }

    #[test]
    fn test_evict_restores_spent_coins() {
        let mut catalog = MemoryCatalog::new();
        catalog.insert_script(dummy_script(1));

        let funding = build_tx(vec![funding_outpoint()], vec![(dummy_script(1), 50_000)]);
        catalog.insert_tx(&funding, 200, Some(100)).unwrap();

        let spend = build_tx(
            vec![OutPoint {
                txid: funding.txid(),
                vout: 0,
            }],
            vec![(dummy_script(99), 49_000)],
        );
        catalog.insert_tx(&spend, 1_000, None).unwrap();
        assert_eq!(catalog.balance().unwrap(), 0);

        catalog.evict_tx(&spend.txid()).unwrap();
        assert_eq!(catalog.balance().unwrap(), 50_000);
        assert!(catalog.get_tx(&spend.txid(), false).unwrap().is_none());
    }

    #[test]
    fn test_ancestor_info_confirmed_is_none() {
        let mut catalog = MemoryCatalog::new();
        catalog.insert_script(dummy_script(1));
        let funding = build_tx(vec![funding_outpoint()], vec![(dummy_script(1), 50_000)]);
        catalog.insert_tx(&funding, 200, Some(100)).unwrap();

        assert!(catalog.ancestor_info(&funding.txid()).unwrap().is_none());
    }

    #[test]
    fn test_ancestor_info_chain() {
        let mut catalog = MemoryCatalog::new();
        catalog.insert_script(dummy_script(1));

        let funding = build_tx(vec![funding_outpoint()], vec![(dummy_script(1), 100_000)]);
        catalog.insert_tx(&funding, 200, Some(100)).unwrap();

        let parent = build_tx(
            vec![OutPoint {
                txid: funding.txid(),
                vout: 0,
            }],
            vec![(dummy_script(1), 99_000)],
        );
        let parent_details = catalog.insert_tx(&parent, 1_000, None).unwrap();

        let child = build_tx(
            vec![OutPoint {
                txid: parent.txid(),
                vout: 0,
            }],
            vec![(dummy_script(1), 98_500)],
        );
        let child_details = catalog.insert_tx(&child, 500, None).unwrap();

        let info = catalog.ancestor_info(&child.txid()).unwrap().unwrap();
        assert_eq!(info.fee, 1_500);
        assert_eq!(
            info.vsize,
            parent_details.vsize + child_details.vsize
        );

        // same allocation handed out twice
        let again = catalog.ancestor_info(&child.txid()).unwrap().unwrap();
        assert!(Arc::ptr_eq(&info, &again));
    }

    #[test]
    fn test_ancestor_info_ignores_stingy_sibling() {
        let mut catalog = MemoryCatalog::new();
        catalog.insert_script(dummy_script(1));

        let funding = build_tx(vec![funding_outpoint()], vec![(dummy_script(1), 100_000)]);
        catalog.insert_tx(&funding, 200, Some(100)).unwrap();

        // parent with two outputs, paying more per vbyte than the sibling will
        let parent = build_tx(
            vec![OutPoint {
                txid: funding.txid(),
                vout: 0,
            }],
            vec![(dummy_script(1), 60_000), (dummy_script(1), 39_000)],
        );
        let parent_details = catalog.insert_tx(&parent, 240, None).unwrap();

        // a sibling spending the second output at a lower rate than the parent
        let sibling = build_tx(
            vec![OutPoint {
                txid: parent.txid(),
                vout: 1,
            }],
            vec![(dummy_script(99), 38_900)],
        );
        catalog.insert_tx(&sibling, 100, None).unwrap();

        let info = catalog.ancestor_info(&parent.txid()).unwrap().unwrap();
        assert_eq!(info.fee, parent_details.fee);
        assert_eq!(info.vsize, parent_details.vsize);
    }

    #[test]
    fn test_ancestor_info_folds_in_generous_sibling() {
        let mut catalog = MemoryCatalog::new();
        catalog.insert_script(dummy_script(1));

        let funding = build_tx(vec![funding_outpoint()], vec![(dummy_script(1), 100_000)]);
        catalog.insert_tx(&funding, 200, Some(100)).unwrap();

        let parent = build_tx(
            vec![OutPoint {
                txid: funding.txid(),
                vout: 0,
            }],
            vec![(dummy_script(1), 60_000), (dummy_script(1), 39_000)],
        );
        let parent_details = catalog.insert_tx(&parent, 120, None).unwrap();

        // sibling paying well above the parent's own rate
        let sibling = build_tx(
            vec![OutPoint {
                txid: parent.txid(),
                vout: 1,
            }],
            vec![(dummy_script(99), 29_000)],
        );
        let sibling_details = catalog.insert_tx(&sibling, 10_000, None).unwrap();

        let info = catalog.ancestor_info(&parent.txid()).unwrap().unwrap();
        assert_eq!(info.fee, parent_details.fee + sibling_details.fee);
        assert_eq!(info.vsize, parent_details.vsize + sibling_details.vsize);
    }

    #[test]
    fn test_reservation_is_exclusive() {
        let mut catalog = MemoryCatalog::new();
        catalog.insert_script(dummy_script(1));
        let funding = build_tx(vec![funding_outpoint()], vec![(dummy_script(1), 50_000)]);
        catalog.insert_tx(&funding, 200, Some(100)).unwrap();
        let outpoint = OutPoint {
            txid: funding.txid(),
            vout: 0,
        };

        assert!(catalog.reserve_coin(&outpoint).unwrap());
        assert!(!catalog.reserve_coin(&outpoint).unwrap());
        assert!(catalog.spendable_coins().unwrap().is_empty());

        catalog.release_coin(&outpoint).unwrap();
        assert!(catalog.reserve_coin(&outpoint).unwrap());
    }
}
