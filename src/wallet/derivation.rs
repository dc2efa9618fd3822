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

//! Script derivation

use bitcoin::ScriptBuf;

#[allow(unused_imports)]
use log::{debug, error, info, trace};

use super::Ledger;
use crate::database::BatchDatabase;
use crate::error::Error;
use crate::keys::DerivedKey;
use crate::types::WalletScript;

impl<D: BatchDatabase> Ledger<D> {
    /// Derive the next P2WPKH script of a wallet
    ///
    /// Calls for the same wallet are serialized, so every call returns a different script. The
    /// new index, the script and its derivation path are committed together. The chain source,
    /// if any, is then asked to track the script.
    pub async fn derive_script(&self, wallet_id: &str) -> Result<ScriptBuf, Error> {
        let guard = self.derivation_locks.lock(&wallet_id.to_string()).await;

        let wallet = self.require_wallet(wallet_id)?;
        let index = wallet
            .last_derivation_index
            .checked_add(1)
            .ok_or_else(|| Error::DerivationIndexOverflow(wallet_id.to_string()))?;
        let path = wallet.derivation_path_for(index);

        let master = self.master_key(&wallet)?;
        let key = DerivedKey::derive(&master, &path, &self.secp)?;
        let script_pubkey = key.script_pubkey();

        let mut batch = self.database.begin_batch();
        batch
            .raise_derivation_index(wallet_id, index)
            .insert_script(script_pubkey.clone().into())
            .insert_wallet_script(WalletScript {
                wallet_id: wallet_id.to_string(),
                script_pubkey: script_pubkey.clone(),
                derivation_path: Some(path.clone()),
            });
        self.database.commit_batch(batch)?;
        drop(guard);

        debug!(
            "Derived script {} at {} for wallet {}",
            script_pubkey.as_script(),
            path,
            wallet_id
        );

        self.notify_chain(wallet_id, &script_pubkey).await?;
        Ok(script_pubkey)
    }
}
