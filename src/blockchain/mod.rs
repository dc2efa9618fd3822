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

//! Chain indexer interface
//!
//! The ledger doesn't talk to the network itself: an external chain indexer watches the scripts
//! it's told to track and reports the transactions touching them as [`TransactionObserved`]
//! events, and new blocks as [`NewBlock`] events. The indexer can also be queried through the
//! [`ChainSource`] trait.

use async_trait::async_trait;
use bitcoin::{Amount, BlockHash, OutPoint, Script, ScriptBuf, Txid};

use crate::error::Error;

/// Source the indexer was tracking when it matched a transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackedSource {
    /// Scripts derived deterministically from a wallet's seed, reported with their key path
    DerivationScheme(String),
    /// Individually tracked scripts or addresses
    External(String),
}

impl TrackedSource {
    /// Whether the source derives its scripts from a wallet seed
    pub fn is_deterministic(&self) -> bool {
        matches!(self, TrackedSource::DerivationScheme(_))
    }

    /// Name of the source
    pub fn name(&self) -> &str {
        match self {
            TrackedSource::DerivationScheme(name) | TrackedSource::External(name) => name,
        }
    }
}

/// A transaction input that spends a coin of the tracked source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedInput {
    /// Index of the input in the transaction
    pub input_index: u32,
    /// Outpoint being spent
    pub previous_output: OutPoint,
    /// Script of the coin being spent
    pub script_pubkey: ScriptBuf,
    /// Value of the coin being spent
    pub value: Amount,
    /// Path of the script relative to the source, like `0/5`, if known
    pub key_path: Option<String>,
}

/// A transaction output paying to the tracked source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedOutput {
    /// Index of the output in the transaction
    pub index: u32,
    /// Script of the output
    pub script_pubkey: ScriptBuf,
    /// Value of the output
    pub value: Amount,
    /// Path of the script relative to the source, if known
    pub key_path: Option<String>,
}

/// A transaction touching a tracked source was seen on the network or in a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionObserved {
    /// Transaction id
    pub txid: Txid,
    /// Containing block, `None` if the transaction is in the mempool
    pub block_hash: Option<BlockHash>,
    /// Transaction this one replaces, if any
    pub replaced_txid: Option<Txid>,
    /// Inputs spending coins of the source
    pub inputs: Vec<ObservedInput>,
    /// Outputs paying to the source
    pub outputs: Vec<ObservedOutput>,
}

impl TransactionObserved {
    /// Every script referenced by the event, inputs first, without duplicates
    pub fn scripts(&self) -> Vec<&Script> {
        let mut scripts: Vec<&Script> = Vec::new();
        let all = self
            .inputs
            .iter()
            .map(|i| i.script_pubkey.as_script())
            .chain(self.outputs.iter().map(|o| o.script_pubkey.as_script()));
        for script in all {
            if !scripts.contains(&script) {
                scripts.push(script);
            }
        }

        scripts
    }
}

/// A block was connected to the best chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewBlock {
    /// Hash of the block
    pub hash: BlockHash,
    /// Height of the block
    pub height: u32,
}

/// Confirmation status of a transaction, as known by the indexer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxStatus {
    /// Containing block, `None` while unconfirmed
    pub block_hash: Option<BlockHash>,
}

/// Query interface of the chain indexer
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Ask the indexer to report the transactions touching `script` for `wallet_id`
    async fn track_script(&self, wallet_id: &str, script: &Script) -> Result<(), Error>;

    /// Current status of a transaction, `None` if the indexer doesn't know it
    async fn get_tx_status(&self, txid: &Txid) -> Result<Option<TxStatus>, Error>;
}
