// Tidewallet
// Copyright (c) 2025 Tidewallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

// rustdoc will warn if there are missing docs
#![warn(missing_docs)]
// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

//! An ancestor-aware transaction builder for UTXO wallets.
//!
//! Tidewallet builds spends whose fee rate holds up where it matters: across
//! the whole unconfirmed ancestor package the transaction joins, not just over
//! its own virtual size. Spending an unconfirmed coin raises the new
//! transaction's fee until the combined package clears the caller's target
//! (child-pays-for-parent); replacing a pending transaction re-runs the same
//! pipeline over the exact same inputs at a higher target (replace-by-fee);
//! sweeping empties the wallet into one or more receivers with correct
//! remainder and dust handling.
//!
//! Key management, signing, broadcast and persistence live elsewhere: the
//! wallet consumes a [`CoinCatalog`](catalog::CoinCatalog) for coins and
//! ancestry metadata and returns candidate transactions for the caller to
//! sign and relay.
//!
//! ## Example
//!
//! ```no_run
//! use bitcoin::Network;
//! use tidewallet::catalog::MemoryCatalog;
//! use tidewallet::types::{FeeRate, Receiver};
//! use tidewallet::wallet::tx_builder::TxBuilder;
//! use tidewallet::wallet::Wallet;
//!
//! # fn main() -> Result<(), tidewallet::Error> {
//! # let destination = bitcoin::Script::new();
//! # let remainder = bitcoin::Script::new();
//! let wallet = Wallet::new(MemoryCatalog::new(), Network::Regtest);
//!
//! let details = wallet.create_tx(
//!     TxBuilder::with_receivers(vec![
//!         Receiver::fixed(destination, 50_000),
//!         Receiver::remainder(remainder),
//!     ])
//!     .fee_rate(FeeRate::from_sat_per_vb(5.0)),
//! )?;
//!
//! // sign, broadcast, ...
//! # Ok(())
//! # }
//! ```

pub extern crate bitcoin;
extern crate log;
extern crate serde;
extern crate serde_json;

#[macro_use]
pub(crate) mod error;
pub mod catalog;
pub mod types;
pub mod wallet;

pub use error::Error;
pub use types::*;
pub use wallet::tx_builder::TxBuilder;
pub use wallet::{SweepOptions, Wallet};
