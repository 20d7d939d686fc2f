// Tidewallet
// Copyright (c) 2025 Tidewallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::fmt;

use bitcoin::OutPoint;

/// Errors that can be thrown by the [`Wallet`](crate::wallet::Wallet)
#[derive(Debug)]
pub enum Error {
    /// Generic error
    Generic(String),
    /// Cannot build a tx without receivers
    NoReceivers,
    /// Remainder must be assigned dynamically but no bare receiver is present
    NoRemainderReceiver,
    /// `manually_selected_only` option is selected but no coin has been passed
    NoCoinsSelected,
    /// An output falls below the dust threshold. Carries the receiver index for
    /// fixed amounts, `None` when a dynamically assigned remainder share is the
    /// offender, and the computed value
    DustOutput {
        /// Index of the offending receiver, `None` for a computed remainder
        receiver: Option<usize>,
        /// The output value in satoshis
        value: u64,
    },
    /// Wallet's coin pool is not enough to cover the requested outputs plus fee
    InsufficientFunds {
        /// Sats needed for the transaction
        needed: u64,
        /// Sats available for spending
        available: u64,
    },
    /// Every coin in the pool has a non-positive effective value at the
    /// requested fee rate; lowering the fee rate or excluding uneconomic coins
    /// is the caller's move
    PoolExhausted,
    /// A named coin is known but already consumed by a pending transaction
    InputUnavailable(OutPoint),
    /// A named coin is not part of this wallet
    InputNotFound(OutPoint),
    /// Branch and bound coin selection possible attempts with sufficiently big coin pools could
    /// grow exponentially, thus a limit is set, and when hit, this error is thrown
    BnBTotalTriesExceeded,
    /// Branch and bound coin selection tries to avoid needing a remainder by finding the right
    /// inputs for the desired outputs plus fee, if there is no such combination this error is
    /// thrown
    BnBNoExactMatch,
    /// Thrown when a tx is not found in the catalog
    TransactionNotFound,
    /// Happens when trying to replace a transaction that is already confirmed
    ReplacementNotAllowed,
    /// Trying to replace a tx that does not signal replaceability
    IrreplaceableTransaction,
    /// When bumping a tx the fee rate requested is lower than required
    FeeRateTooLow {
        /// Required fee rate (satoshi/vbyte)
        required: crate::types::FeeRate,
    },
    /// When bumping a tx the absolute fee requested is lower than the replaced tx absolute fee
    FeeTooLow {
        /// Required fee absolute value (satoshi)
        required: u64,
    },
    /// The fee of a transaction to replace cannot be determined
    FeeRateUnavailable,
    /// Encoding error
    Encode(bitcoin::consensus::encode::Error),
    /// Error serializing or deserializing JSON data
    Json(serde_json::Error),
    /// Hex decoding error
    Hex(bitcoin::hashes::hex::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic(err) => write!(f, "Generic error: {}", err),
            Self::NoReceivers => write!(f, "Cannot build tx without receivers"),
            Self::NoRemainderReceiver => write!(
                f,
                "Must provide at least one receiver without a specified amount"
            ),
            Self::NoCoinsSelected => write!(f, "No coin selected"),
            Self::DustOutput {
                receiver: Some(index),
                value,
            } => write!(
                f,
                "Output to receiver {} is below the dust threshold: {} sat",
                index, value
            ),
            Self::DustOutput {
                receiver: None,
                value,
            } => write!(
                f,
                "Dynamically assigned remainder results in dust output: {} sat",
                value
            ),
            Self::InsufficientFunds { needed, available } => write!(
                f,
                "Insufficient funds: {} sat available of {} sat needed",
                available, needed
            ),
            Self::PoolExhausted => write!(
                f,
                "Total value of coin pool too low to pay for transaction, try a lower fee rate \
                 or exclude uneconomic coins"
            ),
            Self::InputUnavailable(outpoint) => write!(
                f,
                "Input not available: coin ({}) was already spent",
                outpoint
            ),
            Self::InputNotFound(outpoint) => write!(
                f,
                "Input not found: coin ({}) is not part of this wallet",
                outpoint
            ),
            Self::BnBTotalTriesExceeded => {
                write!(f, "Branch and bound coin selection: total tries exceeded")
            }
            Self::BnBNoExactMatch => write!(f, "Branch and bound coin selection: no exact match"),
            Self::TransactionNotFound => write!(f, "Transaction not found in the catalog"),
            Self::ReplacementNotAllowed => {
                write!(f, "Cannot replace a transaction that is already confirmed")
            }
            Self::IrreplaceableTransaction => write!(f, "Transaction can't be replaced"),
            Self::FeeRateTooLow { required } => write!(
                f,
                "Fee rate too low: required {} sat/vbyte",
                required.as_sat_per_vb()
            ),
            Self::FeeTooLow { required } => write!(f, "Fee too low: required {} sat", required),
            Self::FeeRateUnavailable => write!(f, "Fee rate unavailable"),
            Self::Encode(err) => write!(f, "Encoding error: {}", err),
            Self::Json(err) => write!(f, "Serialize/Deserialize JSON error: {}", err),
            Self::Hex(err) => write!(f, "Hex decoding error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

macro_rules! impl_error {
    ( $from:ty, $to:ident ) => {
        impl std::convert::From<$from> for Error {
            fn from(err: $from) -> Self {
                Error::$to(err)
            }
        }
    };
}

impl_error!(bitcoin::consensus::encode::Error, Encode);
impl_error!(serde_json::Error, Json);
impl_error!(bitcoin::hashes::hex::Error, Hex);
