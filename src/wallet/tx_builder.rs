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

//! Transaction builder
//!
//! ## Example
//!
//! ```
//! # use std::str::FromStr;
//! # use bitcoin::{Amount, ScriptBuf, WPubkeyHash};
//! # use ln_ledger::FeeRate;
//! # use ln_ledger::wallet::tx_builder::TxBuilder;
//! # let to_script = ScriptBuf::new_p2wpkh(&WPubkeyHash::from_str("0000000000000000000000000000000000000000").unwrap());
//! # let change_script = to_script.clone();
//! let builder = TxBuilder::new()
//!     .add_recipient(to_script, Amount::from_sat(50_000))
//!     .change_script(change_script)
//!     .fee_rate(FeeRate::from_sat_per_vb(5.0));
//! ```

use std::collections::HashMap;

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize;
use bitcoin::transaction::Version;
use bitcoin::{Amount, ScriptBuf, Sequence, Transaction, TxIn, TxOut};

use super::coin_selection::{
    CoinSelectionAlgorithm, CoinSelectionResult, DefaultCoinSelectionAlgorithm,
};
use super::signer::SigningKeys;
use super::utils::{IsDust, SecpCtx, DUST_LIMIT_SATOSHI};
use crate::error::Error;
use crate::types::{FeeRate, Utxo, WeightedUtxo};

/// Weight of the witness satisfying a P2WPKH script: a signature (up to 73 bytes with its
/// sighash byte), a compressed public key and their length prefixes
pub const P2WPKH_SATISFACTION_WEIGHT: usize = 73 + 33 + 2;

/// Weight of version, lock time and the input and output counts
const TX_BASE_WEIGHT: usize = 10 * 4;

/// Weight of the segwit marker and flag
const SEGWIT_MARKER_WEIGHT: usize = 2;

/// Attach the P2WPKH satisfaction weight to `utxo`
pub fn p2wpkh_weighted(utxo: Utxo) -> WeightedUtxo {
    WeightedUtxo {
        satisfaction_weight: P2WPKH_SATISFACTION_WEIGHT,
        utxo,
    }
}

/// A transaction builder
///
/// This structure contains the configuration that the ledger must follow to build a transaction.
///
/// For an example see [this module](super::tx_builder)'s documentation.
#[derive(Debug, Default)]
pub struct TxBuilder<Cs: CoinSelectionAlgorithm = DefaultCoinSelectionAlgorithm> {
    pub(crate) recipients: Vec<TxOut>,
    pub(crate) must_spend: Vec<WeightedUtxo>,
    pub(crate) may_spend: Vec<WeightedUtxo>,
    pub(crate) change_script: Option<ScriptBuf>,
    pub(crate) fee_rate: Option<FeeRate>,
    pub(crate) signing_keys: SigningKeys,
    pub(crate) coin_selection: Cs,
}

/// A transaction produced by a [`TxBuilder`]
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltTransaction {
    /// The transaction, with the inputs spending known keys signed
    pub transaction: Transaction,
    /// Outputs consumed by the transaction, in input order
    pub spent: Vec<Utxo>,
    /// Absolute fee in satoshi
    pub fee: u64,
    /// Index of the change output, if one was added
    pub change_index: Option<usize>,
}

impl TxBuilder<DefaultCoinSelectionAlgorithm> {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder starting from a list of recipients
    pub fn with_recipients(recipients: Vec<TxOut>) -> Self {
        Self::default().set_recipients(recipients)
    }
}

impl<Cs: CoinSelectionAlgorithm> TxBuilder<Cs> {
    /// Replace the recipients already added with a new list
    pub fn set_recipients(mut self, recipients: Vec<TxOut>) -> Self {
        self.recipients = recipients;
        self
    }

    /// Add a recipient to the internal list
    pub fn add_recipient(mut self, script_pubkey: ScriptBuf, value: Amount) -> Self {
        self.recipients.push(TxOut {
            script_pubkey,
            value,
        });
        self
    }

    /// Set a custom fee rate, the default is the minimum relay fee
    pub fn fee_rate(mut self, fee_rate: FeeRate) -> Self {
        self.fee_rate = Some(fee_rate);
        self
    }

    /// Outputs that must be spent, regardless of the amount needed
    pub fn must_spend(mut self, utxos: Vec<WeightedUtxo>) -> Self {
        self.must_spend = utxos;
        self
    }

    /// Add an output that must be spent
    pub fn add_must_spend(mut self, utxo: WeightedUtxo) -> Self {
        self.must_spend.push(utxo);
        self
    }

    /// Outputs the coin selection can pick from
    pub fn may_spend(mut self, utxos: Vec<WeightedUtxo>) -> Self {
        self.may_spend = utxos;
        self
    }

    /// Script receiving the change, if any is left
    ///
    /// Without a change script whatever is left goes to the fees.
    pub fn change_script(mut self, script: ScriptBuf) -> Self {
        self.change_script = Some(script);
        self
    }

    /// Keys used to sign the inputs once the transaction is built
    pub fn signing_keys(mut self, keys: SigningKeys) -> Self {
        self.signing_keys = keys;
        self
    }

    /// Choose the coin selection algorithm
    ///
    /// Overrides the [`DefaultCoinSelectionAlgorithm`](super::coin_selection::DefaultCoinSelectionAlgorithm).
    pub fn coin_selection<P: CoinSelectionAlgorithm>(self, coin_selection: P) -> TxBuilder<P> {
        TxBuilder {
            recipients: self.recipients,
            must_spend: self.must_spend,
            may_spend: self.may_spend,
            change_script: self.change_script,
            fee_rate: self.fee_rate,
            signing_keys: self.signing_keys,
            coin_selection,
        }
    }

    /// Run the coin selection, build the transaction and sign the inputs with a known key
    pub fn finish(self, secp: &SecpCtx) -> Result<BuiltTransaction, Error> {
        if self.recipients.is_empty() && self.must_spend.is_empty() {
            return Err(Error::NoRecipients);
        }

        let fee_rate = self.fee_rate.unwrap_or_default();
        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![],
            output: vec![],
        };

        // we keep it as a float while we accumulate it, and only round it at the end
        let mut fee_amount = fee_rate.fee_wu(TX_BASE_WEIGHT + SEGWIT_MARKER_WEIGHT);
        let mut outgoing: u64 = 0;

        for (index, recipient) in self.recipients.iter().enumerate() {
            if recipient.value.is_dust() {
                return Err(Error::OutputBelowDustLimit(index));
            }

            fee_amount += fee_rate.fee_wu(serialize(recipient).len() * 4);
            outgoing += recipient.value.to_sat();
            tx.output.push(recipient.clone());
        }

        let CoinSelectionResult {
            selected,
            selected_amount,
            fee_amount,
        } = self.coin_selection.coin_select(
            self.must_spend,
            self.may_spend,
            fee_rate,
            outgoing,
            fee_amount,
        )?;

        tx.input = selected
            .iter()
            .map(|utxo| TxIn {
                previous_output: utxo.outpoint,
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                ..Default::default()
            })
            .collect();

        // coin selection guarantees that this covers the fees without a change output
        let remaining = selected_amount - outgoing;
        let mut fee = remaining;
        let mut change_index = None;
        if let Some(script_pubkey) = self.change_script {
            let mut change_output = TxOut {
                script_pubkey,
                value: Amount::ZERO,
            };
            // take the change into account for fees
            let fee_with_change = (fee_amount
                + fee_rate.fee_wu(serialize(&change_output).len() * 4))
            .ceil() as u64;

            match remaining.checked_sub(fee_with_change) {
                Some(change_val) if !change_val.is_dust() => {
                    change_output.value = Amount::from_sat(change_val);
                    change_index = Some(tx.output.len());
                    tx.output.push(change_output);
                    fee = fee_with_change;
                }
                // skip the change output because it's dust, this adds up to the fees
                _ => log::debug!("Change of {} sat would be dust, adding it to the fee", remaining),
            }
        }

        if tx.output.is_empty() {
            return Err(Error::InsufficientFunds {
                needed: (fee_amount.ceil() as u64) + DUST_LIMIT_SATOSHI + 1,
                available: selected_amount,
            });
        }

        let prevouts = selected
            .iter()
            .map(|utxo| (utxo.outpoint, utxo.txout.clone()))
            .collect::<HashMap<_, _>>();
        self.signing_keys.sign(&mut tx, &prevouts, secp)?;

        Ok(BuiltTransaction {
            transaction: tx,
            spent: selected,
            fee,
            change_index,
        })
    }
}
