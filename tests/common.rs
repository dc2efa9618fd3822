#![allow(unused)]
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{Amount, BlockHash, Network, OutPoint, Script, ScriptBuf, Txid, WPubkeyHash};
use ln_ledger::blockchain::{
    ChainSource, ObservedInput, ObservedOutput, TrackedSource, TransactionObserved, TxStatus,
};
use ln_ledger::database::MemoryDatabase;
use ln_ledger::{Error, Ledger};

pub const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
pub const OTHER_MNEMONIC: &str =
    "legal winner thank year wave sausage worth useful legal winner thank yellow";
pub const TEST_TEMPLATE: &str = "m/84'/1'/0'/0/*";

pub fn txid(n: u8) -> Txid {
    Txid::from_byte_array([n; 32])
}

/// A P2WPKH script nobody in the tests owns
pub fn foreign_script(n: u8) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([n; 20]))
}

pub fn scheme() -> TrackedSource {
    TrackedSource::DerivationScheme("wpkh".to_string())
}

/// Return an empty ledger with one wallet created from [`TEST_MNEMONIC`]
pub async fn get_test_ledger() -> (Ledger<MemoryDatabase>, String) {
    let _ = env_logger::try_init();

    let ledger = Ledger::new(MemoryDatabase::new(), Network::Regtest);
    let wallet_id = add_wallet(&ledger, TEST_MNEMONIC, "main").await;
    (ledger, wallet_id)
}

pub async fn add_wallet(ledger: &Ledger<MemoryDatabase>, mnemonic: &str, name: &str) -> String {
    ledger
        .create_wallet(
            mnemonic,
            name,
            TEST_TEMPLATE,
            BlockHash::all_zeros(),
            vec![],
        )
        .await
        .unwrap()
}

/// An event for a transaction paying `sats` to `script`, derived at `index`
pub fn funding_event(n: u8, script: &Script, index: u32, sats: u64) -> TransactionObserved {
    TransactionObserved {
        txid: txid(n),
        block_hash: None,
        replaced_txid: None,
        inputs: vec![],
        outputs: vec![ObservedOutput {
            index: 0,
            script_pubkey: script.to_owned(),
            value: Amount::from_sat(sats),
            key_path: Some(index.to_string()),
        }],
    }
}

/// Derive a new script and fund it with a transaction, returning the new coin's outpoint
pub async fn get_funded_coin(
    ledger: &Ledger<MemoryDatabase>,
    wallet_id: &str,
    n: u8,
    sats: u64,
) -> OutPoint {
    let script = ledger.derive_script(wallet_id).await.unwrap();
    let index = ledger
        .get_wallet(wallet_id)
        .await
        .unwrap()
        .unwrap()
        .last_derivation_index;
    ledger
        .on_transaction_observed(
            wallet_id,
            &scheme(),
            &funding_event(n, &script, index, sats),
        )
        .await
        .unwrap();

    OutPoint::new(txid(n), 0)
}

/// An event for a transaction spending `coin` (of `script` and `sats`) to a foreign output
pub fn spending_event(
    n: u8,
    coin: OutPoint,
    script: &Script,
    sats: u64,
    replaced_txid: Option<Txid>,
) -> TransactionObserved {
    TransactionObserved {
        txid: txid(n),
        block_hash: None,
        replaced_txid,
        inputs: vec![ObservedInput {
            input_index: 0,
            previous_output: coin,
            script_pubkey: script.to_owned(),
            value: Amount::from_sat(sats),
            key_path: None,
        }],
        outputs: vec![],
    }
}

/// A chain source answering from a fixed table, recording the scripts it's asked to track
#[derive(Debug, Default)]
pub struct FakeChain {
    pub tracked: Mutex<Vec<(String, ScriptBuf)>>,
    pub statuses: Mutex<HashMap<Txid, TxStatus>>,
}

impl FakeChain {
    pub fn confirm(&self, txid: Txid, block_hash: BlockHash) {
        self.statuses.lock().unwrap().insert(
            txid,
            TxStatus {
                block_hash: Some(block_hash),
            },
        );
    }

    pub fn tracked_scripts(&self) -> Vec<(String, ScriptBuf)> {
        self.tracked.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainSource for FakeChain {
    async fn track_script(&self, wallet_id: &str, script: &Script) -> Result<(), Error> {
        self.tracked
            .lock()
            .unwrap()
            .push((wallet_id.to_string(), script.to_owned()));
        Ok(())
    }

    async fn get_tx_status(&self, txid: &Txid) -> Result<Option<TxStatus>, Error> {
        Ok(self.statuses.lock().unwrap().get(txid).copied())
    }
}
