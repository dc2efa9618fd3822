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

//! Channel records

use bitcoin::{OutPoint, TxOut};

#[allow(unused_imports)]
use log::{debug, error, info, trace};

use super::Ledger;
use crate::database::{BatchDatabase, DatabaseUtils};
use crate::error::Error;
use crate::types::*;

/// An output the node can sweep once a channel has been closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendableOutput {
    /// The output
    pub outpoint: OutPoint,
    /// Value and script of the output
    pub txout: TxOut,
    /// Serialized descriptor needed to spend the output
    pub data: Vec<u8>,
}

impl<D: BatchDatabase> Ledger<D> {
    /// Insert a channel or replace its state
    ///
    /// Spendable data attached to an existing record is kept.
    pub async fn upsert_channel(
        &self,
        wallet_id: &str,
        funding: OutPoint,
        data: Vec<u8>,
    ) -> Result<(), Error> {
        let mut batch = self.database.begin_batch();
        batch.upsert_channel(Channel {
            wallet_id: wallet_id.to_string(),
            funding,
            data,
            spendable_data: None,
        });
        self.database.commit_batch(batch)
    }

    /// Record the outputs of closing transactions and attach their descriptors to the channels
    ///
    /// Each output is attached to the channels of `wallet_id` whose funding coin is spent by the
    /// transaction creating the output, at the input with the output's index.
    pub async fn attach_spendable_data(
        &self,
        wallet_id: &str,
        outputs: &[SpendableOutput],
    ) -> Result<(), Error> {
        let mut batch = self.database.begin_batch();
        for output in outputs {
            let script_pubkey = output.txout.script_pubkey.clone();
            batch
                .insert_script(script_pubkey.clone().into())
                .insert_wallet_script(WalletScript {
                    wallet_id: wallet_id.to_string(),
                    script_pubkey: script_pubkey.clone(),
                    derivation_path: None,
                })
                .insert_coin(Coin {
                    outpoint: output.outpoint,
                    script_pubkey,
                    value: output.txout.value,
                    spent_by: None,
                })
                .attach_spendable_data(wallet_id, output.outpoint, output.data.clone());
        }
        self.database.commit_batch(batch)?;

        debug!(
            "Attached {} spendable outputs for wallet {}",
            outputs.len(),
            wallet_id
        );
        Ok(())
    }

    /// Channels of a wallet
    pub async fn channels(&self, wallet_id: &str) -> Result<Vec<Channel>, Error> {
        self.database.iter_channels(Some(wallet_id))
    }
}
