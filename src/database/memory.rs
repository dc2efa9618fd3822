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

//! In-memory ephemeral database
//!
//! This module defines an in-memory database type called [`MemoryDatabase`] that is based on a
//! [`BTreeMap`].

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use bitcoin::Txid;

use crate::database::{BatchDatabase, ConfigurableDatabase, Database};
use crate::error::Error;
use crate::types::*;

// wallet               w<wallet id> -> Wallet
// script               s<script> -> ScriptRecord
// wallet script        k<wallet id>\0<script> -> WalletScript
// transaction          t<txid> -> TransactionRecord
// transaction script   x<txid><script> -> TransactionScript
// coin                 u<txid><vout> -> Coin
// channel              c<wallet id>\0<txid><vout> -> Channel
// payment              l<wallet id>\0<hash>\0<inbound><payment id> -> LightningPayment
// arbitrary data       a<key> -> ArbitraryData

/// Key prefixes used to scan a database
#[derive(Debug, Clone, Copy)]
pub enum MapKey<'a> {
    /// Every entity of a kind
    Kind(EntityKind),
    /// Scripts associated with a wallet
    WalletScripts(&'a str),
    /// Scripts referenced by a transaction
    TransactionScripts(&'a Txid),
    /// Coins created by a transaction
    CoinsFundedBy(&'a Txid),
    /// Channels of a wallet
    Channels(&'a str),
    /// Lightning payments of a wallet
    Payments(&'a str),
}

impl MapKey<'_> {
    /// Serialize the prefix
    pub fn as_prefix(&self) -> Vec<u8> {
        let (kind, content) = match self {
            MapKey::Kind(kind) => (*kind, vec![]),
            MapKey::WalletScripts(wallet_id) => (EntityKind::WalletScript, str_prefix(wallet_id)),
            MapKey::TransactionScripts(txid) => (EntityKind::TransactionScript, txid.encode_key()),
            MapKey::CoinsFundedBy(txid) => (EntityKind::Coin, txid.encode_key()),
            MapKey::Channels(wallet_id) => (EntityKind::Channel, str_prefix(wallet_id)),
            MapKey::Payments(wallet_id) => (EntityKind::LightningPayment, str_prefix(wallet_id)),
        };

        let mut v = vec![kind.as_byte()];
        v.extend(content);
        v
    }

    /// Serialize the full key of an entity
    pub fn for_entity<E: Entity>(key: &E::Key) -> Vec<u8> {
        let mut v = vec![E::KIND.as_byte()];
        v.extend(key.encode_key());
        v
    }
}

fn str_prefix(s: &str) -> Vec<u8> {
    let mut v = Vec::with_capacity(s.len() + 1);
    push_str_component(&mut v, s);
    v
}

/// Read-only view of a map, used while a commit holds the write lock
#[derive(Debug)]
struct Snapshot<'a>(&'a BTreeMap<Vec<u8>, Vec<u8>>);

impl Database for Snapshot<'_> {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.0.get(key).cloned())
    }

    fn iter_raw(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        Ok(self
            .0
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// In-memory ephemeral database
///
/// This database can be used as a temporary storage for ledgers that are not kept permanently on
/// a device, or on platforms that don't provide a filesystem, like `wasm32`.
///
/// Once it's dropped its content will be lost.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDatabase {
    /// Create a new empty database
    pub fn new() -> Self {
        MemoryDatabase::default()
    }

    /// Number of raw entries stored
    pub fn len(&self) -> usize {
        self.map.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the database is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Database for MemoryDatabase {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        Snapshot(&*map).get_raw(key)
    }

    fn iter_raw(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        Snapshot(&*map).iter_raw(prefix)
    }
}

impl BatchDatabase for MemoryDatabase {
    fn commit_batch(&self, batch: crate::database::Batch) -> Result<(), Error> {
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        let changes = batch.stage(&Snapshot(&*map))?;

        for (key, value) in changes {
            match value {
                Some(value) => map.insert(key, value),
                None => map.remove(&key),
            };
        }

        Ok(())
    }
}

impl ConfigurableDatabase for MemoryDatabase {
    type Config = ();

    fn from_config(_config: &Self::Config) -> Result<Self, Error> {
        Ok(MemoryDatabase::default())
    }
}
