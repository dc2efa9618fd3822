// Bitcoin Dev Kit
// Written in 2020 by Alekos Filini <alekos.filini@gmail.com>
//
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
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
//! The coin selection algorithm is not globally part of a [`Ledger`](super::Ledger), instead it
//! is selected whenever a transaction is built, through the use of the [`TxBuilder`] structure,
//! specifically with the [`TxBuilder::coin_selection`](super::tx_builder::TxBuilder::coin_selection)
//! method.
//!
//! The [`DefaultCoinSelectionAlgorithm`] selects the default coin selection algorithm that
//! [`TxBuilder`] uses, if it's not explicitly overridden.
//!
//! [`TxBuilder`]: super::tx_builder::TxBuilder
//!
//! ## Example
//!
//! ```
//! # use ln_ledger::wallet::coin_selection::*;
//! # use ln_ledger::*;
//! #[derive(Debug)]
//! struct AlwaysSpendEverything;
//!
//! impl CoinSelectionAlgorithm for AlwaysSpendEverything {
//!     fn coin_select(
//!         &self,
//!         required_utxos: Vec<WeightedUtxo>,
//!         optional_utxos: Vec<WeightedUtxo>,
//!         fee_rate: FeeRate,
//!         amount_needed: u64,
//!         fee_amount: f32,
//!     ) -> Result<CoinSelectionResult, ln_ledger::Error> {
//!         let all = required_utxos.into_iter().chain(optional_utxos).collect::<Vec<_>>();
//!         let selected_amount = all.iter().map(|w| w.utxo.txout.value.to_sat()).sum::<u64>();
//!         let additional_weight = all
//!             .iter()
//!             .map(|w| TXIN_BASE_WEIGHT + w.satisfaction_weight)
//!             .sum::<usize>();
//!         let fee_amount = fee_amount + fee_rate.fee_wu(additional_weight);
//!
//!         if fee_amount.ceil() as u64 + amount_needed > selected_amount {
//!             return Err(ln_ledger::Error::InsufficientFunds {
//!                 needed: fee_amount.ceil() as u64 + amount_needed,
//!                 available: selected_amount,
//!             });
//!         }
//!
//!         Ok(CoinSelectionResult {
//!             selected: all.into_iter().map(|w| w.utxo).collect(),
//!             selected_amount,
//!             fee_amount,
//!         })
//!     }
//! }
//! ```

use crate::error::Error;
use crate::types::{FeeRate, Utxo, WeightedUtxo};

/// Default coin selection algorithm used by [`TxBuilder`](super::tx_builder::TxBuilder) if not
/// overridden
pub type DefaultCoinSelectionAlgorithm = LargestFirstCoinSelection;

/// Weight of a transaction input without its satisfaction: outpoint, empty script sig length
/// and sequence, 41 bytes
pub const TXIN_BASE_WEIGHT: usize = 41 * 4;

/// Result of a successful coin selection
#[derive(Debug)]
pub struct CoinSelectionResult {
    /// List of outputs selected for use as inputs
    pub selected: Vec<Utxo>,
    /// Sum of the selected inputs' value
    pub selected_amount: u64,
    /// Total fee amount in satoshi
    pub fee_amount: f32,
}

/// Trait for generalized coin selection algorithms
///
/// This trait can be implemented to make the [`Ledger`](super::Ledger) use a customized coin
/// selection algorithm when it creates transactions.
///
/// For an example see [this module](crate::wallet::coin_selection)'s documentation.
pub trait CoinSelectionAlgorithm: std::fmt::Debug {
    /// Perform the coin selection
    ///
    /// - `required_utxos`: the utxos that must be spent regardless of `amount_needed` with their
    ///                     weight cost
    /// - `optional_utxos`: the utxos that may be spent to satisfy `amount_needed` with their
    ///                     weight cost
    /// - `fee_rate`: fee rate to use
    /// - `amount_needed`: the amount in satoshi to select
    /// - `fee_amount`: the amount of fees in satoshi already accumulated from adding outputs and
    ///                 the transaction's header
    fn coin_select(
        &self,
        required_utxos: Vec<WeightedUtxo>,
        optional_utxos: Vec<WeightedUtxo>,
        fee_rate: FeeRate,
        amount_needed: u64,
        fee_amount: f32,
    ) -> Result<CoinSelectionResult, Error>;
}

/// Simple and dumb coin selection
///
/// This coin selection algorithm sorts the available UTXOs by value and then picks them starting
/// from the largest ones until the required amount is reached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LargestFirstCoinSelection;

impl CoinSelectionAlgorithm for LargestFirstCoinSelection {
    fn coin_select(
        &self,
        required_utxos: Vec<WeightedUtxo>,
        mut optional_utxos: Vec<WeightedUtxo>,
        fee_rate: FeeRate,
        amount_needed: u64,
        mut fee_amount: f32,
    ) -> Result<CoinSelectionResult, Error> {
        log::debug!(
            "amount_needed = `{}`, fee_amount = `{}`, fee_rate = `{:?}`",
            amount_needed,
            fee_amount,
            fee_rate
        );

        // We put the "required" UTXOs first and make sure the "optional" are sorted, initially
        // smallest to largest, before being reversed with `.rev()`.
        let available = required_utxos
            .iter()
            .chain(optional_utxos.iter())
            .map(|w| w.utxo.txout.value.to_sat())
            .sum::<u64>();
        let utxos = {
            optional_utxos.sort_unstable_by_key(|w| w.utxo.txout.value);
            required_utxos
                .into_iter()
                .map(|utxo| (true, utxo))
                .chain(optional_utxos.into_iter().rev().map(|utxo| (false, utxo)))
        };

        // Keep including inputs until we've got enough.
        // Store the total input value in selected_amount and the total fee being paid in fee_amount
        let mut selected_amount = 0;
        let selected = utxos
            .scan(
                (&mut selected_amount, &mut fee_amount),
                |(selected_amount, fee_amount), (must_use, weighted)| {
                    if must_use || **selected_amount < amount_needed + (fee_amount.ceil() as u64) {
                        **fee_amount +=
                            fee_rate.fee_wu(TXIN_BASE_WEIGHT + weighted.satisfaction_weight);
                        **selected_amount += weighted.utxo.txout.value.to_sat();

                        log::debug!(
                            "Selected {}, updated fee_amount = `{}`",
                            weighted.utxo.outpoint,
                            fee_amount
                        );

                        Some(weighted.utxo)
                    } else {
                        None
                    }
                },
            )
            .collect::<Vec<_>>();

        let needed = amount_needed + (fee_amount.ceil() as u64);
        if selected_amount < needed {
            return Err(Error::InsufficientFunds { needed, available });
        }

        Ok(CoinSelectionResult {
            selected,
            fee_amount,
            selected_amount,
        })
    }
}
