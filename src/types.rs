// Tidewallet
// Copyright (c) 2025 Tidewallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use bitcoin::blockdata::transaction::{OutPoint, Transaction, TxOut};
use bitcoin::hash_types::Txid;
use bitcoin::Script;

use serde::{Deserialize, Serialize};

/// Fee rate
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd)]
// Internally stored as satoshi/vbyte
pub struct FeeRate(f32);

impl FeeRate {
    /// Create a new instance of [`FeeRate`] given a float fee rate in btc/kvbytes
    pub fn from_btc_per_kvb(btc_per_kvb: f32) -> Self {
        FeeRate(btc_per_kvb * 1e5)
    }

    /// Create a new instance of [`FeeRate`] given a float fee rate in satoshi/vbyte
    pub const fn from_sat_per_vb(sat_per_vb: f32) -> Self {
        FeeRate(sat_per_vb)
    }

    /// Create a new [`FeeRate`] with the default min relay fee value
    pub const fn default_min_relay_fee() -> Self {
        FeeRate(1.0)
    }

    /// Return the value as satoshi/vbyte
    pub fn as_sat_per_vb(&self) -> f32 {
        self.0
    }

    /// Fee in satoshis for a size expressed in virtual bytes, rounding up
    pub fn fee_vb(&self, vbytes: usize) -> u64 {
        (self.0 * vbytes as f32).ceil() as u64
    }

    /// Fee in satoshis for a size expressed in weight units, rounding up
    pub fn fee_wu(&self, weight: usize) -> u64 {
        self.fee_vb((weight as f32 / 4.0).ceil() as usize)
    }
}

impl std::default::Default for FeeRate {
    fn default() -> Self {
        FeeRate::default_min_relay_fee()
    }
}

/// A spendable (or spent) coin tracked by the wallet's catalog
///
/// Unlike a bare `TxOut` reference, a `Coin` remembers whether the catalog has
/// seen it consumed by a later transaction (`is_spent`), and whether a build in
/// progress currently holds it (`is_reserved`). Both flags stay with the
/// catalog entry after the coin leaves the spendable set, so callers naming a
/// coin explicitly can be told *why* it is no longer available.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coin {
    /// Reference to the transaction output backing this coin
    pub outpoint: OutPoint,
    /// Transaction output
    pub txout: TxOut,
    /// Height of the block that confirmed the source transaction, if any
    pub confirmation_height: Option<u32>,
    /// Whether a later transaction in the pending set already consumes this coin
    pub is_spent: bool,
    /// Whether an in-progress build holds a reservation on this coin
    pub is_reserved: bool,
}

impl Coin {
    /// Whether the source transaction is confirmed
    pub fn is_confirmed(&self) -> bool {
        self.confirmation_height.is_some()
    }
}

/// A [`Coin`] with its `satisfaction_weight`
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedCoin {
    /// The weight of the witness data and `scriptSig` expressed in weight units. This is used to
    /// properly maintain the feerate when adding this coin as an input to a transaction during
    /// coin selection.
    pub satisfaction_weight: usize,
    /// The coin
    pub coin: Coin,
}

/// Aggregate fee and virtual size of an unconfirmed ancestor package
///
/// Owned by the catalog and shared by reference: every coin hanging off the
/// same ancestor sees the same aggregate, including fee already contributed by
/// sibling transactions that improved the ancestor's position.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AncestorInfo {
    /// Aggregate fee of the package in satoshis
    pub fee: u64,
    /// Aggregate virtual size of the package in vbytes
    pub vsize: u64,
}

impl AncestorInfo {
    /// The package's aggregate fee rate
    pub fn fee_rate(&self) -> FeeRate {
        if self.vsize == 0 {
            return FeeRate::from_sat_per_vb(0.0);
        }
        FeeRate::from_sat_per_vb(self.fee as f32 / self.vsize as f32)
    }
}

/// A transaction output requested by the caller
///
/// A receiver either carries a fixed amount, placed in the transaction
/// verbatim, or is a bare script marking it as a recipient of the remainder
/// left over once fixed outputs and the fee are accounted for. Keeping the two
/// shapes as variants makes "at least one remainder receiver" checkable
/// without inspecting amounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receiver {
    /// Output with a caller-specified amount
    Fixed {
        /// Destination script
        script: Script,
        /// Amount in satoshis
        value: u64,
    },
    /// Bare destination absorbing (a share of) the remainder
    Remainder {
        /// Destination script
        script: Script,
    },
}

impl Receiver {
    /// Shorthand for a fixed-amount receiver
    pub fn fixed(script: Script, value: u64) -> Self {
        Receiver::Fixed { script, value }
    }

    /// Shorthand for a remainder receiver
    pub fn remainder(script: Script) -> Self {
        Receiver::Remainder { script }
    }

    /// The destination script of either variant
    pub fn script(&self) -> &Script {
        match self {
            Receiver::Fixed { script, .. } => script,
            Receiver::Remainder { script } => script,
        }
    }

    /// Whether this receiver absorbs remainder
    pub fn is_remainder(&self) -> bool {
        matches!(self, Receiver::Remainder { .. })
    }
}

/// A wallet transaction descriptor
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TransactionDetails {
    /// Optional raw transaction
    pub transaction: Option<Transaction>,
    /// Transaction id
    pub txid: Txid,
    /// Received value (sats)
    pub received: u64,
    /// Sent value (sats)
    pub sent: u64,
    /// Fee value (sats)
    pub fee: u64,
    /// Estimated virtual size of the fully satisfied transaction (vbytes)
    pub vsize: u64,
    /// Confirmed in block height, `None` means unconfirmed
    pub confirmation_height: Option<u32>,
    /// Timestamp of creation
    pub timestamp: u64,
}

impl TransactionDetails {
    /// The transaction's own fee rate
    pub fn fee_rate(&self) -> FeeRate {
        if self.vsize == 0 {
            return FeeRate::from_sat_per_vb(0.0);
        }
        FeeRate::from_sat_per_vb(self.fee as f32 / self.vsize as f32)
    }
}
