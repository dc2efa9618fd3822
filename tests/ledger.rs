mod common;

use std::collections::HashSet;
use std::sync::Arc;

use bitcoin::hashes::Hash;
use bitcoin::{Amount, BlockHash, Network, OutPoint, TxOut};
use ln_ledger::blockchain::NewBlock;
use ln_ledger::database::{DatabaseUtils, MemoryDatabase};
use ln_ledger::{Error, FeeRate, Ledger, SpendableOutput, SpentBy, Utxo};

use common::*;

const ONE_BTC: u64 = 100_000_000;

#[tokio::test]
async fn test_funded_script_is_unspent() {
    let (ledger, wallet_id) = get_test_ledger().await;
    let outpoint = get_funded_coin(&ledger, &wallet_id, 1, ONE_BTC).await;

    let coins = ledger.get_unspent_coins(&wallet_id).await.unwrap();
    assert_eq!(coins.len(), 1);
    assert_eq!(coins[0].outpoint, outpoint);
    assert_eq!(coins[0].value, Amount::from_sat(ONE_BTC));

    let groups = ledger.spendable_groups(&wallet_id).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].derivation_path, "m/84'/1'/0'/0/1");
}

#[tokio::test]
async fn test_build_transaction_with_change() {
    let (ledger, wallet_id) = get_test_ledger().await;
    let funding = get_funded_coin(&ledger, &wallet_id, 1, ONE_BTC).await;

    let created = ledger
        .build_transaction(
            &wallet_id,
            vec![TxOut {
                value: Amount::from_sat(30_000_000),
                script_pubkey: foreign_script(0xaa),
            }],
            FeeRate::from_sat_per_vb(1.0),
            None,
        )
        .await
        .unwrap()
        .unwrap();

    let tx = &created.transaction;
    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.input[0].previous_output, funding);
    assert_eq!(tx.input[0].witness.len(), 2);
    assert_eq!(created.spent_coins.len(), 1);
    assert_eq!(created.spent_coins[0].outpoint, funding);

    assert_eq!(tx.output.len(), 2);
    assert_eq!(tx.output[0].value, Amount::from_sat(30_000_000));
    assert_eq!(tx.output[1].script_pubkey, created.change_script);
    assert_eq!(created.fee, 141);
    assert_eq!(
        tx.output[1].value,
        Amount::from_sat(70_000_000 - created.fee)
    );

    // the change script is a fresh script of the wallet
    let wallet = ledger.get_wallet(&wallet_id).await.unwrap().unwrap();
    assert_eq!(wallet.last_derivation_index, 2);
    let scripts = ledger
        .database()
        .iter_wallet_scripts(&wallet_id)
        .unwrap()
        .into_iter()
        .map(|ws| ws.script_pubkey)
        .collect::<Vec<_>>();
    assert!(scripts.contains(&created.change_script));
}

#[tokio::test]
async fn test_build_transaction_insufficient_funds() {
    let (ledger, wallet_id) = get_test_ledger().await;
    get_funded_coin(&ledger, &wallet_id, 1, 50_000).await;

    let res = ledger
        .build_transaction(
            &wallet_id,
            vec![TxOut {
                value: Amount::from_sat(60_000),
                script_pubkey: foreign_script(0xaa),
            }],
            FeeRate::from_sat_per_vb(1.0),
            None,
        )
        .await;
    match res {
        Err(Error::InsufficientFunds { available, .. }) => assert_eq!(available, 50_000),
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn test_build_transaction_no_recipients() {
    let (ledger, wallet_id) = get_test_ledger().await;
    get_funded_coin(&ledger, &wallet_id, 1, 50_000).await;

    let res = ledger
        .build_transaction(&wallet_id, vec![], FeeRate::default(), None)
        .await;
    assert!(matches!(res, Err(Error::NoRecipients)));
}

#[tokio::test]
async fn test_replacement_replaces_coin() {
    let (ledger, wallet_id) = get_test_ledger().await;
    let script = ledger.derive_script(&wallet_id).await.unwrap();
    ledger
        .on_transaction_observed(&wallet_id, &scheme(), &funding_event(1, &script, 1, ONE_BTC))
        .await
        .unwrap();

    let mut replacement = funding_event(2, &script, 1, ONE_BTC / 2);
    replacement.replaced_txid = Some(txid(1));
    ledger
        .on_transaction_observed(&wallet_id, &scheme(), &replacement)
        .await
        .unwrap();

    let coins = ledger.get_unspent_coins(&wallet_id).await.unwrap();
    assert_eq!(coins.len(), 1);
    assert_eq!(coins[0].outpoint, OutPoint::new(txid(2), 0));
    assert_eq!(coins[0].value, Amount::from_sat(ONE_BTC / 2));

    assert_eq!(ledger.get_coin(&OutPoint::new(txid(1), 0)).await.unwrap(), None);
    assert_eq!(ledger.get_transaction(&txid(1)).await.unwrap(), None);
    assert!(ledger.transaction_scripts(&txid(1)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_explicit_inputs_insufficient_returns_none() {
    let (ledger, wallet_id) = get_test_ledger().await;

    let explicit = Utxo {
        outpoint: OutPoint::new(txid(9), 0),
        txout: TxOut {
            value: Amount::from_sat(1_000),
            script_pubkey: foreign_script(9),
        },
    };
    let res = ledger
        .build_transaction(
            &wallet_id,
            vec![TxOut {
                value: Amount::from_sat(900),
                script_pubkey: foreign_script(0xaa),
            }],
            FeeRate::from_sat_per_vb(1.0),
            Some(vec![explicit]),
        )
        .await
        .unwrap();
    assert_eq!(res, None);
}

#[tokio::test]
async fn test_explicit_inputs_pull_from_pool() {
    let (ledger, wallet_id) = get_test_ledger().await;
    let small = get_funded_coin(&ledger, &wallet_id, 1, 10_000).await;
    let large = get_funded_coin(&ledger, &wallet_id, 2, 50_000).await;
    let explicit = ledger.get_coin(&small).await.unwrap().unwrap().as_utxo();

    let created = ledger
        .build_transaction(
            &wallet_id,
            vec![TxOut {
                value: Amount::from_sat(30_000),
                script_pubkey: foreign_script(0xaa),
            }],
            FeeRate::from_sat_per_vb(1.0),
            Some(vec![explicit]),
        )
        .await
        .unwrap()
        .unwrap();

    let inputs = created
        .transaction
        .input
        .iter()
        .map(|i| i.previous_output)
        .collect::<Vec<_>>();
    assert_eq!(inputs, vec![small, large]);
    assert!(created
        .transaction
        .input
        .iter()
        .all(|i| i.witness.len() == 2));

    let spent = created
        .spent_coins
        .iter()
        .map(|c| c.outpoint)
        .collect::<HashSet<_>>();
    assert_eq!(spent, vec![small, large].into_iter().collect());

    let total_out = created
        .transaction
        .output
        .iter()
        .map(|o| o.value.to_sat())
        .sum::<u64>();
    assert_eq!(total_out + created.fee, 60_000);
}

#[tokio::test]
async fn test_explicit_inputs_leave_foreign_inputs_unsigned() {
    let (ledger, wallet_id) = get_test_ledger().await;
    let ours = get_funded_coin(&ledger, &wallet_id, 1, 20_000).await;
    let ours = ledger.get_coin(&ours).await.unwrap().unwrap().as_utxo();
    let foreign = Utxo {
        outpoint: OutPoint::new(txid(9), 3),
        txout: TxOut {
            value: Amount::from_sat(30_000),
            script_pubkey: foreign_script(9),
        },
    };

    let created = ledger
        .build_transaction(
            &wallet_id,
            vec![TxOut {
                value: Amount::from_sat(40_000),
                script_pubkey: foreign_script(0xaa),
            }],
            FeeRate::from_sat_per_vb(2.0),
            Some(vec![ours.clone(), foreign.clone()]),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(created.transaction.input.len(), 2);
    for input in &created.transaction.input {
        if input.previous_output == ours.outpoint {
            assert_eq!(input.witness.len(), 2);
        } else {
            assert_eq!(input.previous_output, foreign.outpoint);
            assert!(input.witness.is_empty());
        }
    }
    assert_eq!(created.spent_coins.len(), 2);
}

#[tokio::test]
async fn test_sign_transaction() {
    let (ledger, wallet_id) = get_test_ledger().await;
    get_funded_coin(&ledger, &wallet_id, 1, 100_000).await;

    let created = ledger
        .build_transaction(
            &wallet_id,
            vec![TxOut {
                value: Amount::from_sat(50_000),
                script_pubkey: foreign_script(0xaa),
            }],
            FeeRate::from_sat_per_vb(1.0),
            None,
        )
        .await
        .unwrap()
        .unwrap();

    let mut unsigned = created.transaction.clone();
    for input in unsigned.input.iter_mut() {
        input.witness.clear();
    }
    let signed = ledger.sign_transaction(&wallet_id, unsigned).await.unwrap();
    // deterministic signatures
    assert_eq!(signed, created.transaction);
}

#[tokio::test]
async fn test_replay_is_idempotent() {
    let (ledger, wallet_id) = get_test_ledger().await;
    let script = ledger.derive_script(&wallet_id).await.unwrap();
    let funding = funding_event(1, &script, 1, 80_000);
    let spending = spending_event(2, OutPoint::new(txid(1), 0), &script, 80_000, None);

    for event in [&funding, &spending, &funding, &spending] {
        ledger
            .on_transaction_observed(&wallet_id, &scheme(), event)
            .await
            .unwrap();
    }
    let before = ledger.database().len();
    for event in [&spending, &funding] {
        ledger
            .on_transaction_observed(&wallet_id, &scheme(), event)
            .await
            .unwrap();
    }
    assert_eq!(ledger.database().len(), before);

    let coin = ledger
        .get_coin(&OutPoint::new(txid(1), 0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        coin.spent_by,
        Some(SpentBy {
            txid: txid(2),
            input_index: 0
        })
    );
    assert!(ledger.get_unspent_coins(&wallet_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_spend_before_funding_converges() {
    let (ledger, wallet_id) = get_test_ledger().await;
    let script = ledger.derive_script(&wallet_id).await.unwrap();
    let funding = funding_event(1, &script, 1, 80_000);
    let spending = spending_event(2, OutPoint::new(txid(1), 0), &script, 80_000, None);

    ledger
        .on_transaction_observed(&wallet_id, &scheme(), &spending)
        .await
        .unwrap();
    ledger
        .on_transaction_observed(&wallet_id, &scheme(), &funding)
        .await
        .unwrap();

    let coin = ledger
        .get_coin(&OutPoint::new(txid(1), 0))
        .await
        .unwrap()
        .unwrap();
    assert!(coin.is_spent());
    assert!(ledger.get_unspent_coins(&wallet_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_replaced_spend_releases_coin() {
    let (ledger, wallet_id) = get_test_ledger().await;
    let script = ledger.derive_script(&wallet_id).await.unwrap();
    let coin = OutPoint::new(txid(1), 0);
    ledger
        .on_transaction_observed(&wallet_id, &scheme(), &funding_event(1, &script, 1, 80_000))
        .await
        .unwrap();
    ledger
        .on_transaction_observed(
            &wallet_id,
            &scheme(),
            &spending_event(2, coin, &script, 80_000, None),
        )
        .await
        .unwrap();

    // a replacement that doesn't touch our coin
    let mut replacement = funding_event(3, &foreign_script(7), 0, 10_000);
    replacement.outputs.clear();
    replacement.replaced_txid = Some(txid(2));
    ledger
        .on_transaction_observed(&wallet_id, &scheme(), &replacement)
        .await
        .unwrap();

    let unspent = ledger.get_unspent_coins(&wallet_id).await.unwrap();
    assert_eq!(unspent.len(), 1);
    assert_eq!(unspent[0].outpoint, coin);

    // no coin points to a transaction that doesn't exist anymore
    for coin in ledger.database().iter_coins().unwrap() {
        if let Some(spent_by) = coin.spent_by {
            assert!(ledger
                .get_transaction(&spent_by.txid)
                .await
                .unwrap()
                .is_some());
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_derivation_is_unique() {
    let (ledger, wallet_id) = get_test_ledger().await;
    let ledger = Arc::new(ledger);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let ledger = Arc::clone(&ledger);
        let wallet_id = wallet_id.clone();
        handles.push(tokio::spawn(async move {
            ledger.derive_script(&wallet_id).await.unwrap()
        }));
    }

    let mut scripts = HashSet::new();
    for handle in handles {
        assert!(scripts.insert(handle.await.unwrap()));
    }
    assert_eq!(scripts.len(), 20);

    let wallet = ledger.get_wallet(&wallet_id).await.unwrap().unwrap();
    assert_eq!(wallet.last_derivation_index, 20);
    let paths = ledger
        .database()
        .iter_wallet_scripts(&wallet_id)
        .unwrap()
        .into_iter()
        .filter_map(|ws| ws.derivation_path)
        .collect::<HashSet<_>>();
    assert_eq!(paths.len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_wallets_are_isolated() {
    let (ledger, first) = get_test_ledger().await;
    let second = add_wallet(&ledger, OTHER_MNEMONIC, "other").await;
    assert_ne!(first, second);
    let ledger = Arc::new(ledger);

    let mut handles = Vec::new();
    for i in 0..10 {
        let ledger = Arc::clone(&ledger);
        let wallet_id = if i % 2 == 0 {
            first.clone()
        } else {
            second.clone()
        };
        handles.push(tokio::spawn(async move {
            ledger.derive_script(&wallet_id).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for wallet_id in [&first, &second] {
        let wallet = ledger.get_wallet(wallet_id).await.unwrap().unwrap();
        assert_eq!(wallet.last_derivation_index, 5);

        let scripts = ledger.database().iter_wallet_scripts(wallet_id).unwrap();
        assert_eq!(scripts.len(), 5);
        assert!(scripts.iter().all(|ws| &ws.wallet_id == wallet_id));
    }

    let first_scripts = ledger
        .database()
        .iter_wallet_scripts(&first)
        .unwrap()
        .into_iter()
        .map(|ws| ws.script_pubkey)
        .collect::<HashSet<_>>();
    assert!(ledger
        .database()
        .iter_wallet_scripts(&second)
        .unwrap()
        .iter()
        .all(|ws| !first_scripts.contains(&ws.script_pubkey)));
}

#[tokio::test]
async fn test_wallet_lookup() {
    let (ledger, wallet_id) = get_test_ledger().await;
    assert_eq!(wallet_id, "73c5da0a");

    ledger
        .add_wallet_aliases(&wallet_id, vec!["savings".to_string()])
        .await
        .unwrap();
    let wallet = ledger.get_wallet("savings").await.unwrap().unwrap();
    assert_eq!(wallet.id, wallet_id);
    assert_eq!(ledger.get_wallet("nobody").await.unwrap(), None);
    assert_eq!(ledger.get_all_wallets().await.unwrap().len(), 1);

    let res = ledger
        .create_wallet(
            TEST_MNEMONIC,
            "again",
            TEST_TEMPLATE,
            BlockHash::all_zeros(),
            vec![],
        )
        .await;
    assert!(matches!(res, Err(Error::WalletAlreadyExists(_))));

    let res = ledger
        .create_wallet(
            OTHER_MNEMONIC,
            "bad",
            "m/84'/1'/0'/0",
            BlockHash::all_zeros(),
            vec![],
        )
        .await;
    assert!(matches!(res, Err(Error::InvalidDerivationPath(_))));
}

#[tokio::test]
async fn test_chain_source_notifications() {
    let _ = env_logger::try_init();
    let chain = Arc::new(FakeChain::default());
    let ledger = Ledger::new(MemoryDatabase::new(), Network::Regtest)
        .with_chain_source(Arc::clone(&chain) as Arc<dyn ln_ledger::blockchain::ChainSource>);
    let wallet_id = add_wallet(&ledger, TEST_MNEMONIC, "main").await;

    let derived = ledger.derive_script(&wallet_id).await.unwrap();
    ledger
        .track_script(&wallet_id, &foreign_script(5))
        .await
        .unwrap();
    assert_eq!(
        chain.tracked_scripts(),
        vec![
            (wallet_id.clone(), derived.clone()),
            (wallet_id.clone(), foreign_script(5))
        ]
    );

    // the tracked script has no key, so its coins can't be spent
    ledger
        .on_transaction_observed(
            &wallet_id,
            &ln_ledger::blockchain::TrackedSource::External("addr".to_string()),
            &funding_event(1, &foreign_script(5), 0, 10_000),
        )
        .await
        .unwrap();
    ledger
        .on_transaction_observed(&wallet_id, &scheme(), &funding_event(2, &derived, 1, 20_000))
        .await
        .unwrap();
    assert_eq!(ledger.get_unspent_coins(&wallet_id).await.unwrap().len(), 2);
    let groups = ledger.spendable_groups(&wallet_id).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].coins[0].outpoint, OutPoint::new(txid(2), 0));

    // confirmations
    assert_eq!(ledger.pending_transactions().await.unwrap().len(), 2);
    let block = BlockHash::from_byte_array([42; 32]);
    chain.confirm(txid(2), block);
    let updated = ledger
        .on_new_block(&NewBlock {
            hash: block,
            height: 101,
        })
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let pending = ledger.pending_transactions().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].txid, txid(1));
    assert_eq!(
        ledger
            .get_transaction(&txid(2))
            .await
            .unwrap()
            .unwrap()
            .block_hash,
        Some(block)
    );
}

#[tokio::test]
async fn test_channel_close_attaches_spendable_output() {
    let (ledger, wallet_id) = get_test_ledger().await;
    let script = ledger.derive_script(&wallet_id).await.unwrap();
    let funding = OutPoint::new(txid(1), 0);
    ledger
        .on_transaction_observed(&wallet_id, &scheme(), &funding_event(1, &script, 1, 500_000))
        .await
        .unwrap();
    ledger
        .upsert_channel(&wallet_id, funding, b"monitor".to_vec())
        .await
        .unwrap();

    // the closing transaction spends the funding coin
    ledger
        .on_transaction_observed(
            &wallet_id,
            &scheme(),
            &spending_event(2, funding, &script, 500_000, None),
        )
        .await
        .unwrap();
    let sweep = SpendableOutput {
        outpoint: OutPoint::new(txid(2), 0),
        txout: TxOut {
            value: Amount::from_sat(499_000),
            script_pubkey: foreign_script(0x11),
        },
        data: b"descriptor".to_vec(),
    };
    ledger
        .attach_spendable_data(&wallet_id, &[sweep.clone()])
        .await
        .unwrap();

    let channels = ledger.channels(&wallet_id).await.unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].spendable_data, Some(b"descriptor".to_vec()));

    let unspent = ledger.get_unspent_coins(&wallet_id).await.unwrap();
    assert_eq!(unspent.len(), 1);
    assert_eq!(unspent[0].outpoint, sweep.outpoint);

    // a funding replacement drops the channel
    let mut replacement = funding_event(3, &script, 1, 400_000);
    replacement.replaced_txid = Some(txid(1));
    ledger
        .on_transaction_observed(&wallet_id, &scheme(), &replacement)
        .await
        .unwrap();
    assert!(ledger.channels(&wallet_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ledger_from_config() {
    let config = serde_json::from_str(r#"{"network":"regtest","database":{"Memory":null}}"#)
        .unwrap();
    let ledger = Ledger::from_config(&config).unwrap();
    assert_eq!(ledger.network(), Network::Regtest);
    assert!(ledger.get_all_wallets().await.unwrap().is_empty());
}
