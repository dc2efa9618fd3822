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

//! Database types
//!
//! This module provides the implementation of some defaults database types, along with traits that
//! can be implemented externally to let the [`Ledger`](crate::wallet::Ledger)s use customized
//! databases.
//!
//! Backends only store opaque bytes under opaque keys: reads go through [`Database`] and writes
//! are always grouped into a [`Batch`], which is committed atomically with
//! [`BatchDatabase::commit_batch`]. The batch carries *operations* instead of final values, and
//! every operation's conflict policy is evaluated at commit time against the latest state of the
//! store. Two policies exist:
//!
//! * `insert_*` operations create a row only if it is absent and never touch an existing one;
//! * `merge_*`/`upsert_*`/`raise_*` operations update a specific subset of fields when the row
//!   already exists.
//!
//! Currently there are two database types available:
//!
//! * [`MemoryDatabase`], a simple in-memory database
//! * [`SledDatabase`](keyvalue::SledDatabase), a key-value store built on [`sled`], enabled with
//!   the `key-value-db` feature (on by default)

use std::collections::BTreeMap;
use std::fmt;

use bitcoin::{BlockHash, OutPoint, Txid};

use crate::error::Error;
use crate::types::*;

pub mod any;
pub use any::{AnyDatabase, AnyDatabaseConfig, ConfigurableDatabase};

#[cfg(feature = "key-value-db")]
pub mod keyvalue;
#[cfg(feature = "key-value-db")]
pub use keyvalue::SledDatabase;

pub mod memory;
pub use memory::MemoryDatabase;

use memory::MapKey;

/// Set of changes produced by staging a [`Batch`]: `None` values are deletions
pub(crate) type Changes = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Read access to the raw content of a database
pub trait Database: fmt::Debug + Send + Sync {
    /// Read the value stored under `key`
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;

    /// Return every key-value pair whose key starts with `prefix`, sorted by key
    fn iter_raw(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>;
}

/// Trait for a database that supports atomic batch writes
pub trait BatchDatabase: Database {
    /// Create a new empty batch
    fn begin_batch(&self) -> Batch {
        Batch::default()
    }

    /// Atomically stage and apply all the operations in `batch`
    ///
    /// If any operation fails nothing is written.
    fn commit_batch(&self, batch: Batch) -> Result<(), Error>;
}

/// Typed accessors over the raw content of a database
///
/// This trait is implemented for every type that implements [`Database`].
pub trait DatabaseUtils: Database {
    /// Read a single entity by key
    fn get_entity<E: Entity>(&self, key: &E::Key) -> Result<Option<E>, Error> {
        self.get_raw(&MapKey::for_entity::<E>(key))?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
            .map_err(Error::from)
    }

    /// Read every entity stored under `prefix`
    fn iter_entities<E: Entity>(&self, prefix: MapKey<'_>) -> Result<Vec<E>, Error> {
        self.iter_raw(&prefix.as_prefix())?
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(Error::from))
            .collect()
    }

    /// Get a wallet by id
    fn get_wallet(&self, wallet_id: &str) -> Result<Option<Wallet>, Error> {
        self.get_entity(&wallet_id.to_string())
    }

    /// Iterate over all the wallets
    fn iter_wallets(&self) -> Result<Vec<Wallet>, Error> {
        self.iter_entities(MapKey::Kind(EntityKind::Wallet))
    }

    /// Get a script record
    fn get_script(&self, script: &bitcoin::ScriptBuf) -> Result<Option<ScriptRecord>, Error> {
        self.get_entity(script)
    }

    /// Get the association of a script with a wallet
    fn get_wallet_script(&self, key: &WalletScriptKey) -> Result<Option<WalletScript>, Error> {
        self.get_entity(key)
    }

    /// Iterate over the scripts associated with `wallet_id`
    fn iter_wallet_scripts(&self, wallet_id: &str) -> Result<Vec<WalletScript>, Error> {
        self.iter_entities(MapKey::WalletScripts(wallet_id))
    }

    /// Get a transaction record
    fn get_transaction(&self, txid: &Txid) -> Result<Option<TransactionRecord>, Error> {
        self.get_entity(txid)
    }

    /// Iterate over all the transaction records
    fn iter_transactions(&self) -> Result<Vec<TransactionRecord>, Error> {
        self.iter_entities(MapKey::Kind(EntityKind::Transaction))
    }

    /// Iterate over the scripts referenced by `txid`
    fn iter_transaction_scripts(&self, txid: &Txid) -> Result<Vec<TransactionScript>, Error> {
        self.iter_entities(MapKey::TransactionScripts(txid))
    }

    /// Get a coin by its funding outpoint
    fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, Error> {
        self.get_entity(outpoint)
    }

    /// Iterate over all the coins
    fn iter_coins(&self) -> Result<Vec<Coin>, Error> {
        self.iter_entities(MapKey::Kind(EntityKind::Coin))
    }

    /// Iterate over the coins created by `txid`
    fn iter_coins_funded_by(&self, txid: &Txid) -> Result<Vec<Coin>, Error> {
        self.iter_entities(MapKey::CoinsFundedBy(txid))
    }

    /// Get a channel record
    fn get_channel(&self, key: &ChannelKey) -> Result<Option<Channel>, Error> {
        self.get_entity(key)
    }

    /// Iterate over the channels of `wallet_id`, or of every wallet
    fn iter_channels(&self, wallet_id: Option<&str>) -> Result<Vec<Channel>, Error> {
        match wallet_id {
            Some(wallet_id) => self.iter_entities(MapKey::Channels(wallet_id)),
            None => self.iter_entities(MapKey::Kind(EntityKind::Channel)),
        }
    }

    /// Get a lightning payment
    fn get_payment(&self, key: &PaymentKey) -> Result<Option<LightningPayment>, Error> {
        self.get_entity(key)
    }

    /// Iterate over the lightning payments of `wallet_id`
    fn iter_payments(&self, wallet_id: &str) -> Result<Vec<LightningPayment>, Error> {
        self.iter_entities(MapKey::Payments(wallet_id))
    }

    /// Get a blob by its full key
    fn get_arbitrary_data(&self, key: &str) -> Result<Option<ArbitraryData>, Error> {
        self.get_entity(&key.to_string())
    }

    /// Iterate over all the blobs
    fn iter_arbitrary_data(&self) -> Result<Vec<ArbitraryData>, Error> {
        self.iter_entities(MapKey::Kind(EntityKind::ArbitraryData))
    }
}

impl<T: Database> DatabaseUtils for T {}

#[derive(Debug, Clone)]
enum BatchOp {
    InsertWallet(Wallet),
    RaiseDerivationIndex {
        wallet_id: String,
        index: u32,
    },
    AddWalletAliases {
        wallet_id: String,
        aliases: Vec<String>,
    },
    InsertScript(ScriptRecord),
    InsertWalletScript(WalletScript),
    MergeWalletScript(WalletScript),
    UpsertTransaction(TransactionRecord),
    SetBlockHash {
        txid: Txid,
        block_hash: Option<BlockHash>,
    },
    RetractTransaction(Txid),
    InsertTransactionScript(TransactionScript),
    InsertCoin(Coin),
    MergeCoinSpend(Coin),
    UpsertChannel(Channel),
    AttachSpendableData {
        wallet_id: String,
        spending: OutPoint,
        data: Vec<u8>,
    },
    UpsertPayment(LightningPayment),
    UpdatePayment {
        key: PaymentKey,
        failed: bool,
        preimage: Option<String>,
    },
    PutArbitraryData(ArbitraryData),
    DeleteArbitraryData(String),
}

/// An ordered list of write operations, committed atomically
///
/// Operations are applied in the order they were added, each one observing the effects of the
/// previous ones.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    /// Whether the batch contains no operation
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of operations in the batch
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Insert a new wallet, failing with [`Error::WalletAlreadyExists`] if the id is taken
    pub fn insert_wallet(&mut self, wallet: Wallet) -> &mut Self {
        self.push(BatchOp::InsertWallet(wallet))
    }

    /// Set the wallet's last derivation index to `max(stored, index)`
    pub fn raise_derivation_index(&mut self, wallet_id: &str, index: u32) -> &mut Self {
        self.push(BatchOp::RaiseDerivationIndex {
            wallet_id: wallet_id.to_string(),
            index,
        })
    }

    /// Append the aliases that the wallet doesn't have yet
    pub fn add_wallet_aliases(&mut self, wallet_id: &str, aliases: Vec<String>) -> &mut Self {
        self.push(BatchOp::AddWalletAliases {
            wallet_id: wallet_id.to_string(),
            aliases,
        })
    }

    /// Insert a script if absent
    pub fn insert_script(&mut self, script: ScriptRecord) -> &mut Self {
        self.push(BatchOp::InsertScript(script))
    }

    /// Insert a wallet-script association if absent
    pub fn insert_wallet_script(&mut self, wallet_script: WalletScript) -> &mut Self {
        self.push(BatchOp::InsertWalletScript(wallet_script))
    }

    /// Insert a wallet-script association, or fill its derivation path if it's still unknown
    pub fn merge_wallet_script(&mut self, wallet_script: WalletScript) -> &mut Self {
        self.push(BatchOp::MergeWalletScript(wallet_script))
    }

    /// Insert a transaction, or update the block hash of an existing one
    pub fn upsert_transaction(&mut self, tx: TransactionRecord) -> &mut Self {
        self.push(BatchOp::UpsertTransaction(tx))
    }

    /// Update the block hash of a known transaction, ignored for unknown ones
    pub fn set_block_hash(&mut self, txid: Txid, block_hash: Option<BlockHash>) -> &mut Self {
        self.push(BatchOp::SetBlockHash { txid, block_hash })
    }

    /// Remove every trace of a replaced transaction
    ///
    /// Coins it created are deleted along with the channels they fund, its record and its
    /// script rows are deleted, and the coins it spent become unspent again.
    pub fn retract_transaction(&mut self, txid: Txid) -> &mut Self {
        self.push(BatchOp::RetractTransaction(txid))
    }

    /// Insert a transaction-script association if absent
    pub fn insert_transaction_script(&mut self, tx_script: TransactionScript) -> &mut Self {
        self.push(BatchOp::InsertTransactionScript(tx_script))
    }

    /// Insert a coin if absent
    pub fn insert_coin(&mut self, coin: Coin) -> &mut Self {
        self.push(BatchOp::InsertCoin(coin))
    }

    /// Insert a coin, or only update the spending input of an existing one
    pub fn merge_coin_spend(&mut self, coin: Coin) -> &mut Self {
        self.push(BatchOp::MergeCoinSpend(coin))
    }

    /// Insert a channel or replace its data, keeping any attached spendable data
    pub fn upsert_channel(&mut self, channel: Channel) -> &mut Self {
        self.push(BatchOp::UpsertChannel(channel))
    }

    /// Attach `data` to every channel of `wallet_id` whose funding coin is spent by `spending`
    pub fn attach_spendable_data(
        &mut self,
        wallet_id: &str,
        spending: OutPoint,
        data: Vec<u8>,
    ) -> &mut Self {
        self.push(BatchOp::AttachSpendableData {
            wallet_id: wallet_id.to_string(),
            spending,
            data,
        })
    }

    /// Insert or replace a lightning payment
    pub fn upsert_payment(&mut self, payment: LightningPayment) -> &mut Self {
        self.push(BatchOp::UpsertPayment(payment))
    }

    /// Mark a known payment as failed or complete
    ///
    /// Unknown payments are ignored, as are failures reported after completion. The preimage is
    /// only set if it wasn't known already.
    pub fn update_payment(
        &mut self,
        key: PaymentKey,
        failed: bool,
        preimage: Option<String>,
    ) -> &mut Self {
        self.push(BatchOp::UpdatePayment {
            key,
            failed,
            preimage,
        })
    }

    /// Insert or replace a blob
    pub fn put_arbitrary_data(&mut self, data: ArbitraryData) -> &mut Self {
        self.push(BatchOp::PutArbitraryData(data))
    }

    /// Delete a blob, no-op if it doesn't exist
    pub fn delete_arbitrary_data(&mut self, key: &str) -> &mut Self {
        self.push(BatchOp::DeleteArbitraryData(key.to_string()))
    }

    fn push(&mut self, op: BatchOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    /// Evaluate every operation against `db` and return the resulting changes
    ///
    /// Nothing is written to `db`: the caller must apply the changes atomically, and make sure no
    /// other commit happens on the same store between the staging and the apply.
    pub(crate) fn stage<D: Database>(self, db: &D) -> Result<Changes, Error> {
        let mut overlay = Overlay {
            base: db,
            changes: Changes::new(),
        };
        for op in self.ops {
            overlay.apply(op)?;
        }

        Ok(overlay.changes)
    }
}

/// Uncommitted changes layered on top of a database
#[derive(Debug)]
struct Overlay<'a, D: Database> {
    base: &'a D,
    changes: Changes,
}

impl<D: Database> Database for Overlay<'_, D> {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        match self.changes.get(key) {
            Some(value) => Ok(value.clone()),
            None => self.base.get_raw(key),
        }
    }

    fn iter_raw(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let mut merged = self
            .base
            .iter_raw(prefix)?
            .into_iter()
            .collect::<BTreeMap<_, _>>();
        for (key, value) in self
            .changes
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match value {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }

        Ok(merged.into_iter().collect())
    }
}

impl<D: Database> Overlay<'_, D> {
    fn put<E: Entity>(&mut self, entity: &E) -> Result<(), Error> {
        let key = MapKey::for_entity::<E>(&entity.key());
        self.changes.insert(key, Some(serde_json::to_vec(entity)?));
        Ok(())
    }

    fn insert_if_absent<E: Entity>(&mut self, entity: &E) -> Result<bool, Error> {
        if self.get_entity::<E>(&entity.key())?.is_some() {
            return Ok(false);
        }
        self.put(entity)?;
        Ok(true)
    }

    fn del<E: Entity>(&mut self, key: &E::Key) {
        self.changes.insert(MapKey::for_entity::<E>(key), None);
    }

    fn get_wallet_or_err(&self, wallet_id: &str) -> Result<Wallet, Error> {
        self.get_wallet(wallet_id)?
            .ok_or_else(|| Error::WalletNotFound(wallet_id.to_string()))
    }

    fn apply(&mut self, op: BatchOp) -> Result<(), Error> {
        match op {
            BatchOp::InsertWallet(wallet) => {
                if !self.insert_if_absent(&wallet)? {
                    return Err(Error::WalletAlreadyExists(wallet.id));
                }
            }
            BatchOp::RaiseDerivationIndex { wallet_id, index } => {
                let mut wallet = self.get_wallet_or_err(&wallet_id)?;
                if index > wallet.last_derivation_index {
                    wallet.last_derivation_index = index;
                    self.put(&wallet)?;
                }
            }
            BatchOp::AddWalletAliases { wallet_id, aliases } => {
                let mut wallet = self.get_wallet_or_err(&wallet_id)?;
                let before = wallet.aliases.len();
                for alias in aliases {
                    if !wallet.aliases.contains(&alias) {
                        wallet.aliases.push(alias);
                    }
                }
                if wallet.aliases.len() != before {
                    self.put(&wallet)?;
                }
            }
            BatchOp::InsertScript(script) => {
                self.insert_if_absent(&script)?;
            }
            BatchOp::InsertWalletScript(wallet_script) => {
                self.insert_if_absent(&wallet_script)?;
            }
            BatchOp::MergeWalletScript(wallet_script) => {
                match self.get_wallet_script(&wallet_script.key())? {
                    Some(mut existing) => {
                        if existing.derivation_path.is_none()
                            && wallet_script.derivation_path.is_some()
                        {
                            existing.derivation_path = wallet_script.derivation_path;
                            self.put(&existing)?;
                        }
                    }
                    None => self.put(&wallet_script)?,
                }
            }
            BatchOp::UpsertTransaction(tx) => match self.get_transaction(&tx.txid)? {
                Some(mut existing) => {
                    if existing.block_hash != tx.block_hash {
                        existing.block_hash = tx.block_hash;
                        self.put(&existing)?;
                    }
                }
                None => self.put(&tx)?,
            },
            BatchOp::SetBlockHash { txid, block_hash } => {
                if let Some(mut existing) = self.get_transaction(&txid)? {
                    existing.block_hash = block_hash;
                    self.put(&existing)?;
                }
            }
            BatchOp::RetractTransaction(txid) => self.retract(&txid)?,
            BatchOp::InsertTransactionScript(tx_script) => {
                self.insert_if_absent(&tx_script)?;
            }
            BatchOp::InsertCoin(coin) => {
                self.insert_if_absent(&coin)?;
            }
            BatchOp::MergeCoinSpend(coin) => match self.get_coin(&coin.outpoint)? {
                Some(mut existing) => {
                    if existing.spent_by != coin.spent_by {
                        existing.spent_by = coin.spent_by;
                        self.put(&existing)?;
                    }
                }
                None => self.put(&coin)?,
            },
            BatchOp::UpsertChannel(channel) => {
                let channel = match self.get_channel(&channel.key())? {
                    Some(existing) => Channel {
                        spendable_data: channel.spendable_data.or(existing.spendable_data),
                        ..channel
                    },
                    None => channel,
                };
                self.put(&channel)?;
            }
            BatchOp::AttachSpendableData {
                wallet_id,
                spending,
                data,
            } => {
                for mut channel in self.iter_channels(Some(&wallet_id))? {
                    let spent_by = self.get_coin(&channel.funding)?.and_then(|c| c.spent_by);
                    let matches = spent_by.map_or(false, |s| {
                        s.txid == spending.txid && s.input_index == spending.vout
                    });
                    if matches {
                        channel.spendable_data = Some(data.clone());
                        self.put(&channel)?;
                    }
                }
            }
            BatchOp::UpsertPayment(payment) => self.put(&payment)?,
            BatchOp::UpdatePayment {
                key,
                failed,
                preimage,
            } => {
                let mut payment = match self.get_payment(&key)? {
                    Some(payment) => payment,
                    None => return Ok(()),
                };
                if failed && payment.status == PaymentStatus::Complete {
                    return Ok(());
                }
                payment.status = if failed {
                    PaymentStatus::Failed
                } else {
                    PaymentStatus::Complete
                };
                if payment.preimage.is_none() {
                    payment.preimage = preimage;
                }
                self.put(&payment)?;
            }
            BatchOp::PutArbitraryData(data) => self.put(&data)?,
            BatchOp::DeleteArbitraryData(key) => self.del::<ArbitraryData>(&key),
        }

        Ok(())
    }

    fn retract(&mut self, txid: &Txid) -> Result<(), Error> {
        let funded = self.iter_coins_funded_by(txid)?;
        if !funded.is_empty() {
            for channel in self.iter_channels(None)? {
                if funded.iter().any(|c| c.outpoint == channel.funding) {
                    self.del::<Channel>(&channel.key());
                }
            }
        }
        for coin in &funded {
            self.del::<Coin>(&coin.outpoint);
        }

        for tx_script in self.iter_transaction_scripts(txid)? {
            self.del::<TransactionScript>(&tx_script.key());
        }
        self.del::<TransactionRecord>(txid);

        for mut coin in self.iter_coins()? {
            if coin.spent_by.map_or(false, |s| &s.txid == txid) {
                coin.spent_by = None;
                self.put(&coin)?;
            }
        }

        Ok(())
    }
}
