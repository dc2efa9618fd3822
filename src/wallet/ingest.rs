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

//! Ledger ingestion
//!
//! Transactions reported by the chain indexer are folded into the ledger here. Every event is
//! translated into a single [`Batch`](crate::database::Batch), so a crash never leaves half an
//! event applied, and all the writes use either the insert-if-absent or the field-merge policy,
//! so replaying an event or processing events out of order converges to the same state.

use bitcoin::hashes::Hash;
use bitcoin::Txid;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use super::Ledger;
use crate::blockchain::{NewBlock, TrackedSource, TransactionObserved};
use crate::database::{BatchDatabase, DatabaseUtils};
use crate::error::Error;
use crate::types::*;

impl<D: BatchDatabase> Ledger<D> {
    /// Record a transaction touching scripts of `wallet` (an id or an alias)
    ///
    /// If the transaction replaces another one, everything the replaced transaction created is
    /// removed first and the coins it spent become spendable again.
    pub async fn on_transaction_observed(
        &self,
        wallet: &str,
        source: &TrackedSource,
        tx: &TransactionObserved,
    ) -> Result<(), Error> {
        let wallet = self
            .get_wallet(wallet)
            .await?
            .ok_or_else(|| Error::WalletNotFound(wallet.to_string()))?;

        let mut batch = self.database.begin_batch();
        batch.upsert_transaction(TransactionRecord {
            txid: tx.txid,
            block_hash: tx.block_hash,
        });

        if let Some(replaced) = replaced_txid(tx) {
            info!("Transaction {} replaces {}", tx.txid, replaced);
            batch.retract_transaction(replaced);
        }

        for script in tx.scripts() {
            batch.insert_script(script.to_owned().into());
        }

        let wallet_script = |script_pubkey: &bitcoin::ScriptBuf, key_path: &Option<String>| {
            WalletScript {
                wallet_id: wallet.id.clone(),
                script_pubkey: script_pubkey.clone(),
                derivation_path: key_path.as_ref().map(|p| wallet.derivation_path_for(p)),
            }
        };
        let mut wallet_scripts = tx
            .outputs
            .iter()
            .map(|o| wallet_script(&o.script_pubkey, &o.key_path))
            .collect::<Vec<_>>();
        if !source.is_deterministic() {
            wallet_scripts.extend(
                tx.inputs
                    .iter()
                    .map(|i| wallet_script(&i.script_pubkey, &i.key_path)),
            );
        }
        for ws in wallet_scripts {
            if source.is_deterministic() {
                batch.merge_wallet_script(ws);
            } else {
                batch.insert_wallet_script(ws);
            }
        }

        for input in &tx.inputs {
            batch.insert_transaction_script(TransactionScript {
                txid: tx.txid,
                script_pubkey: input.script_pubkey.clone(),
                spent: true,
            });
        }
        for output in &tx.outputs {
            batch.insert_transaction_script(TransactionScript {
                txid: tx.txid,
                script_pubkey: output.script_pubkey.clone(),
                spent: false,
            });
        }

        for output in &tx.outputs {
            batch.insert_coin(Coin {
                outpoint: bitcoin::OutPoint::new(tx.txid, output.index),
                script_pubkey: output.script_pubkey.clone(),
                value: output.value,
                spent_by: None,
            });
        }
        for input in &tx.inputs {
            batch.merge_coin_spend(Coin {
                outpoint: input.previous_output,
                script_pubkey: input.script_pubkey.clone(),
                value: input.value,
                spent_by: Some(SpentBy {
                    txid: tx.txid,
                    input_index: input.input_index,
                }),
            });
        }

        trace!(
            "Committing {} operations for transaction {} ({})",
            batch.len(),
            tx.txid,
            source.name()
        );
        self.database.commit_batch(batch)?;

        debug!(
            "Recorded transaction {} for wallet {}: {} inputs, {} outputs",
            tx.txid,
            wallet.id,
            tx.inputs.len(),
            tx.outputs.len()
        );
        Ok(())
    }

    /// Transactions not confirmed in a block yet
    pub async fn pending_transactions(&self) -> Result<Vec<TransactionRecord>, Error> {
        Ok(self
            .database
            .iter_transactions()?
            .into_iter()
            .filter(|tx| !tx.is_confirmed())
            .collect())
    }

    /// Refresh the confirmation status of the pending transactions
    ///
    /// Without a chain source this is a no-op. Transactions the chain source doesn't know are
    /// left untouched. Returns the number of transactions updated.
    pub async fn on_new_block(&self, block: &NewBlock) -> Result<usize, Error> {
        let chain = match &self.chain {
            Some(chain) => chain,
            None => return Ok(0),
        };

        let mut batch = self.database.begin_batch();
        for tx in self.pending_transactions().await? {
            match chain.get_tx_status(&tx.txid).await? {
                Some(status) if status.block_hash.is_some() => {
                    batch.set_block_hash(tx.txid, status.block_hash);
                }
                Some(_) => {}
                None => trace!("Transaction {} unknown to the chain source", tx.txid),
            }
        }

        let updated = batch.len();
        if !batch.is_empty() {
            self.database.commit_batch(batch)?;
        }
        debug!(
            "Block {} at height {}: {} transactions confirmed",
            block.hash, block.height, updated
        );

        Ok(updated)
    }
}

fn replaced_txid(tx: &TransactionObserved) -> Option<Txid> {
    tx.replaced_txid
        .filter(|replaced| *replaced != Txid::all_zeros() && *replaced != tx.txid)
}

#[cfg(test)]
mod test {
    use bitcoin::hashes::Hash;
    use bitcoin::{Amount, BlockHash, Network, OutPoint, ScriptBuf, WPubkeyHash};

    use super::*;
    use crate::blockchain::{ObservedInput, ObservedOutput};
    use crate::database::MemoryDatabase;

    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn txid(n: u8) -> Txid {
        Txid::from_byte_array([n; 32])
    }

    fn script(n: u8) -> ScriptBuf {
        ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([n; 20]))
    }

    async fn ledger() -> (Ledger<MemoryDatabase>, String) {
        let ledger = Ledger::new(MemoryDatabase::new(), Network::Regtest);
        let id = ledger
            .create_wallet(
                TEST_MNEMONIC,
                "test",
                "m/84'/1'/0'/*",
                BlockHash::all_zeros(),
                vec!["alias".to_string()],
            )
            .await
            .unwrap();
        (ledger, id)
    }

    fn receive(n: u8, key_path: Option<&str>) -> TransactionObserved {
        TransactionObserved {
            txid: txid(n),
            block_hash: None,
            replaced_txid: None,
            inputs: vec![],
            outputs: vec![ObservedOutput {
                index: 0,
                script_pubkey: script(n),
                value: Amount::from_sat(10_000),
                key_path: key_path.map(str::to_string),
            }],
        }
    }

    #[test]
    fn test_replaced_txid_filter() {
        let mut tx = receive(1, None);
        assert_eq!(replaced_txid(&tx), None);
        tx.replaced_txid = Some(Txid::all_zeros());
        assert_eq!(replaced_txid(&tx), None);
        tx.replaced_txid = Some(txid(1));
        assert_eq!(replaced_txid(&tx), None);
        tx.replaced_txid = Some(txid(2));
        assert_eq!(replaced_txid(&tx), Some(txid(2)));
    }

    #[tokio::test]
    async fn test_key_path_fills_template() {
        let (ledger, id) = ledger().await;
        let source = TrackedSource::DerivationScheme("scheme".to_string());
        ledger
            .on_transaction_observed("alias", &source, &receive(1, Some("0/5")))
            .await
            .unwrap();

        let ws = ledger.database().iter_wallet_scripts(&id).unwrap();
        assert_eq!(ws.len(), 1);
        assert_eq!(ws[0].derivation_path.as_deref(), Some("m/84'/1'/0'/0/5"));
        assert_eq!(
            ledger
                .transaction_scripts(&txid(1))
                .await
                .unwrap()
                .iter()
                .filter(|ts| !ts.spent)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_external_source_tracks_inputs() {
        let (ledger, id) = ledger().await;
        let source = TrackedSource::External("imported".to_string());
        let tx = TransactionObserved {
            txid: txid(2),
            block_hash: None,
            replaced_txid: None,
            inputs: vec![ObservedInput {
                input_index: 0,
                previous_output: OutPoint::new(txid(9), 1),
                script_pubkey: script(9),
                value: Amount::from_sat(20_000),
                key_path: None,
            }],
            outputs: vec![],
        };
        ledger.on_transaction_observed(&id, &source, &tx).await.unwrap();

        let ws = ledger.database().iter_wallet_scripts(&id).unwrap();
        assert_eq!(ws.len(), 1);
        assert_eq!(ws[0].script_pubkey, script(9));
        assert_eq!(ws[0].derivation_path, None);

        let coin = ledger.get_coin(&OutPoint::new(txid(9), 1)).await.unwrap().unwrap();
        assert_eq!(
            coin.spent_by,
            Some(SpentBy {
                txid: txid(2),
                input_index: 0
            })
        );
    }

    #[tokio::test]
    async fn test_deterministic_source_ignores_input_scripts() {
        let (ledger, id) = ledger().await;
        let source = TrackedSource::DerivationScheme("scheme".to_string());
        let tx = TransactionObserved {
            txid: txid(2),
            block_hash: None,
            replaced_txid: None,
            inputs: vec![ObservedInput {
                input_index: 0,
                previous_output: OutPoint::new(txid(9), 1),
                script_pubkey: script(9),
                value: Amount::from_sat(20_000),
                key_path: Some("0/1".to_string()),
            }],
            outputs: vec![],
        };
        ledger.on_transaction_observed(&id, &source, &tx).await.unwrap();

        assert!(ledger.database().iter_wallet_scripts(&id).unwrap().is_empty());
        assert!(ledger.database().get_script(&script(9)).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_wallet() {
        let (ledger, _) = ledger().await;
        let source = TrackedSource::External("imported".to_string());
        match ledger
            .on_transaction_observed("nobody", &source, &receive(1, None))
            .await
        {
            Err(Error::WalletNotFound(_)) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pending_transactions() {
        let (ledger, id) = ledger().await;
        let source = TrackedSource::External("imported".to_string());
        let mut confirmed = receive(2, None);
        confirmed.block_hash = Some(BlockHash::from_byte_array([7; 32]));
        ledger
            .on_transaction_observed(&id, &source, &receive(1, None))
            .await
            .unwrap();
        ledger
            .on_transaction_observed(&id, &source, &confirmed)
            .await
            .unwrap();

        let pending = ledger.pending_transactions().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].txid, txid(1));

        // without a chain source nothing changes
        let block = NewBlock {
            hash: BlockHash::from_byte_array([8; 32]),
            height: 100,
        };
        assert_eq!(ledger.on_new_block(&block).await.unwrap(), 0);
    }
}
