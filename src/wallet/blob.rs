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

//! Wallet-scoped blob store
//!
//! Opaque values stored on behalf of the lightning node, either globally or in the scope of a
//! wallet. Typed accessors encode the values as JSON.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Ledger;
use crate::database::{BatchDatabase, DatabaseUtils};
use crate::error::Error;
use crate::types::ArbitraryData;

impl<D: BatchDatabase> Ledger<D> {
    /// Store `value` under `name`, or delete the entry if `value` is `None`
    ///
    /// Deleting a missing entry is not an error.
    pub async fn put_arbitrary_data(
        &self,
        wallet_id: Option<&str>,
        name: &str,
        value: Option<&[u8]>,
    ) -> Result<(), Error> {
        let key = ArbitraryData::compose_key(wallet_id, name);

        let mut batch = self.database.begin_batch();
        match value {
            Some(value) => batch.put_arbitrary_data(ArbitraryData {
                key,
                wallet_id: wallet_id.map(str::to_string),
                value: value.to_vec(),
            }),
            None => batch.delete_arbitrary_data(&key),
        };
        self.database.commit_batch(batch)
    }

    /// Store the JSON encoding of `value` under `name`
    pub async fn put_arbitrary_value<T: Serialize>(
        &self,
        wallet_id: Option<&str>,
        name: &str,
        value: &T,
    ) -> Result<(), Error> {
        let value = serde_json::to_vec(value)?;
        self.put_arbitrary_data(wallet_id, name, Some(value.as_slice()))
            .await
    }

    /// Read and decode the value stored under `name`
    pub async fn get_arbitrary_data<T: DeserializeOwned>(
        &self,
        name: &str,
        wallet_id: Option<&str>,
    ) -> Result<Option<T>, Error> {
        self.get_arbitrary_bytes(name, wallet_id)
            .await?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
            .map_err(Error::from)
    }

    /// Read the raw value stored under `name`
    pub async fn get_arbitrary_bytes(
        &self,
        name: &str,
        wallet_id: Option<&str>,
    ) -> Result<Option<Vec<u8>>, Error> {
        let key = ArbitraryData::compose_key(wallet_id, name);
        Ok(self.database.get_arbitrary_data(&key)?.map(|d| d.value))
    }

    /// Every entry in the scope of `wallet_id`, by name
    ///
    /// With `None`, only the global entries are returned.
    pub async fn get_all_arbitrary_data(
        &self,
        wallet_id: Option<&str>,
    ) -> Result<BTreeMap<String, Vec<u8>>, Error> {
        Ok(self
            .database
            .iter_arbitrary_data()?
            .into_iter()
            .filter(|d| d.wallet_id.as_deref() == wallet_id)
            .map(|d| (d.name().to_string(), d.value))
            .collect())
    }
}
