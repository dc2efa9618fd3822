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

//! Ledger
//!
//! This module defines the [`Ledger`] structure, which keeps the on-chain state of a set of
//! wallets in a [`BatchDatabase`]: the scripts they own, the transactions touching them and the
//! resulting coins. It derives new scripts, builds and signs transactions, and stores the channel
//! and payment records and the opaque blobs of a lightning node running on top of the wallets.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use bitcoin::bip32::Xpriv;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{BlockHash, Network, OutPoint, Script, ScriptBuf, Transaction, TxOut, Txid};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

pub mod blob;
pub mod channel;
pub mod coin_selection;
pub mod derivation;
pub mod ingest;
pub mod payment;
pub mod signer;
pub mod tx_builder;
pub mod utils;

use signer::SigningKeys;
use tx_builder::{p2wpkh_weighted, TxBuilder};
use utils::{KeyedLock, SecpCtx};

use crate::blockchain::ChainSource;
use crate::config::LedgerConfig;
use crate::database::{AnyDatabase, BatchDatabase, ConfigurableDatabase, DatabaseUtils};
use crate::error::Error;
use crate::keys::{self, DerivedKey};
use crate::types::*;

pub use channel::SpendableOutput;

/// Unspent coins of a wallet that share the same derivation path, and so the same key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinGroup {
    /// Concrete derivation path of the coins' script
    pub derivation_path: String,
    /// The coins
    pub coins: Vec<Coin>,
}

/// A transaction built by [`Ledger::build_transaction`]
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedTransaction {
    /// The transaction, with the inputs owned by the wallet signed
    pub transaction: Transaction,
    /// Coins consumed by the transaction
    pub spent_coins: Vec<Coin>,
    /// Script derived to receive the change, even if no change output was needed
    pub change_script: ScriptBuf,
    /// Absolute fee in satoshi
    pub fee: u64,
}

/// The on-chain ledger of a set of wallets
///
/// All the operations take `&self`, so the ledger can be shared between tasks by wrapping it in
/// an [`Arc`].
pub struct Ledger<D> {
    database: D,
    network: Network,
    secp: SecpCtx,
    derivation_locks: KeyedLock<String>,
    master_keys: RwLock<HashMap<String, Xpriv>>,
    chain: Option<Arc<dyn ChainSource>>,
}

impl<D: std::fmt::Debug> std::fmt::Debug for Ledger<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("database", &self.database)
            .field("network", &self.network)
            .field("chain", &self.chain.is_some())
            .finish()
    }
}

impl Ledger<AnyDatabase> {
    /// Create a ledger with the database described by `config`
    pub fn from_config(config: &LedgerConfig) -> Result<Self, Error> {
        let database = AnyDatabase::from_config(&config.database)?;
        Ok(Ledger::new(database, config.network))
    }
}

impl<D: BatchDatabase> Ledger<D> {
    /// Create a new ledger on top of `database`
    pub fn new(database: D, network: Network) -> Self {
        Ledger {
            database,
            network,
            secp: Secp256k1::new(),
            derivation_locks: KeyedLock::new(),
            master_keys: RwLock::new(HashMap::new()),
            chain: None,
        }
    }

    /// Notify `chain` of every new script, and use it to refresh pending transactions
    pub fn with_chain_source(mut self, chain: Arc<dyn ChainSource>) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Return a reference to the internal database
    pub fn database(&self) -> &D {
        &self.database
    }

    /// Return the network the ledger operates on
    pub fn network(&self) -> Network {
        self.network
    }

    /// Return the secp256k1 context used to derive keys and sign
    pub fn secp_ctx(&self) -> &SecpCtx {
        &self.secp
    }

    /// Create a new wallet and return its id
    ///
    /// The id is the fingerprint of the mnemonic's master key, so the same mnemonic can't be
    /// added twice. `derivation_template` must contain exactly one `*`, which is replaced by the
    /// derivation index, like `m/84'/1'/0'/0/*`.
    pub async fn create_wallet(
        &self,
        mnemonic: &str,
        name: &str,
        derivation_template: &str,
        creation_block_hash: BlockHash,
        aliases: Vec<String>,
    ) -> Result<String, Error> {
        keys::check_path_template(derivation_template)?;
        let master = keys::master_key_from_mnemonic(mnemonic, self.network)?;
        let id = keys::wallet_id(&master, &self.secp);

        let mut batch = self.database.begin_batch();
        batch.insert_wallet(Wallet {
            id: id.clone(),
            name: name.to_string(),
            mnemonic: mnemonic.to_string(),
            derivation_path: derivation_template.to_string(),
            last_derivation_index: 0,
            creation_block_hash,
            aliases,
        });
        self.database.commit_batch(batch)?;
        self.cache_master_key(&id, master);

        info!("Created wallet {} ({})", id, name);
        Ok(id)
    }

    /// Add other names under which the wallet can be looked up
    pub async fn add_wallet_aliases(
        &self,
        wallet_id: &str,
        aliases: Vec<String>,
    ) -> Result<(), Error> {
        let mut batch = self.database.begin_batch();
        batch.add_wallet_aliases(wallet_id, aliases);
        self.database.commit_batch(batch)
    }

    /// Look a wallet up by id or by alias
    pub async fn get_wallet(&self, id_or_alias: &str) -> Result<Option<Wallet>, Error> {
        if let Some(wallet) = self.database.get_wallet(id_or_alias)? {
            return Ok(Some(wallet));
        }

        Ok(self
            .database
            .iter_wallets()?
            .into_iter()
            .find(|w| w.is_named(id_or_alias)))
    }

    /// List every wallet
    pub async fn get_all_wallets(&self) -> Result<Vec<Wallet>, Error> {
        self.database.iter_wallets()
    }

    /// Associate an externally provided script with a wallet
    ///
    /// Existing rows are left untouched. The chain source, if any, is asked to track the script.
    pub async fn track_script(&self, wallet_id: &str, script: &Script) -> Result<(), Error> {
        self.require_wallet(wallet_id)?;

        let mut batch = self.database.begin_batch();
        batch
            .insert_script(script.to_owned().into())
            .insert_wallet_script(WalletScript {
                wallet_id: wallet_id.to_string(),
                script_pubkey: script.to_owned(),
                derivation_path: None,
            });
        self.database.commit_batch(batch)?;

        self.notify_chain(wallet_id, script).await
    }

    /// Coins locked by one of the wallet's scripts that no known transaction spends
    pub async fn get_unspent_coins(&self, wallet_id: &str) -> Result<Vec<Coin>, Error> {
        let scripts = self
            .database
            .iter_wallet_scripts(wallet_id)?
            .into_iter()
            .map(|ws| ws.script_pubkey)
            .collect::<HashSet<_>>();

        Ok(self
            .database
            .iter_coins()?
            .into_iter()
            .filter(|c| !c.is_spent() && scripts.contains(&c.script_pubkey))
            .collect())
    }

    /// Get a transaction record
    pub async fn get_transaction(&self, txid: &Txid) -> Result<Option<TransactionRecord>, Error> {
        self.database.get_transaction(txid)
    }

    /// Get a coin by its funding outpoint
    pub async fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, Error> {
        self.database.get_coin(outpoint)
    }

    /// Scripts referenced by a transaction
    pub async fn transaction_scripts(&self, txid: &Txid) -> Result<Vec<TransactionScript>, Error> {
        self.database.iter_transaction_scripts(txid)
    }

    /// Build a transaction paying `outputs`, funded by the wallet's coins
    ///
    /// A new change script is always derived first.
    ///
    /// When `explicit_inputs` is empty or `None`, all the spendable coins of the wallet are
    /// offered to the coin selection, and [`Error::InsufficientFunds`] is returned if they are
    /// not enough.
    ///
    /// Otherwise the explicit inputs are always spent, and whatever is left after paying the
    /// outputs and the fee goes to the change. If they are not enough the wallet's coins are
    /// added one at a time, and `Ok(None)` is returned once there's nothing left to add.
    pub async fn build_transaction(
        &self,
        wallet_id: &str,
        outputs: Vec<TxOut>,
        fee_rate: FeeRate,
        explicit_inputs: Option<Vec<Utxo>>,
    ) -> Result<Option<CreatedTransaction>, Error> {
        let wallet = self.require_wallet(wallet_id)?;
        let explicit_inputs = explicit_inputs.unwrap_or_default();
        if outputs.is_empty() && explicit_inputs.is_empty() {
            return Err(Error::NoRecipients);
        }

        let change_script = self.derive_script(wallet_id).await?;
        let groups = self.spendable_groups(wallet_id)?;
        let master = self.master_key(&wallet)?;

        let mut known = groups
            .iter()
            .flat_map(|g| g.coins.iter())
            .map(|c| (c.outpoint, c.clone()))
            .collect::<HashMap<_, _>>();

        let built = if explicit_inputs.is_empty() {
            let mut keys = SigningKeys::new();
            for group in &groups {
                keys.add(DerivedKey::derive(&master, &group.derivation_path, &self.secp)?);
            }

            TxBuilder::with_recipients(outputs)
                .may_spend(
                    known
                        .values()
                        .map(|c| p2wpkh_weighted(c.as_utxo()))
                        .collect(),
                )
                .change_script(change_script.clone())
                .fee_rate(fee_rate)
                .signing_keys(keys)
                .finish(&self.secp)?
        } else {
            let explicit_outpoints = explicit_inputs
                .iter()
                .map(|u| u.outpoint)
                .collect::<HashSet<_>>();

            let mut keys = SigningKeys::new();
            let mut derived = HashSet::new();
            for group in &groups {
                if group
                    .coins
                    .iter()
                    .any(|c| explicit_outpoints.contains(&c.outpoint))
                {
                    keys.add(DerivedKey::derive(&master, &group.derivation_path, &self.secp)?);
                    derived.insert(group.derivation_path.as_str());
                }
            }

            let mut pool = groups
                .iter()
                .flat_map(|g| g.coins.iter().map(move |c| (g.derivation_path.as_str(), c)))
                .filter(|(_, c)| !explicit_outpoints.contains(&c.outpoint))
                .collect::<Vec<_>>()
                .into_iter();
            let mut required = explicit_inputs
                .iter()
                .cloned()
                .map(p2wpkh_weighted)
                .collect::<Vec<_>>();

            loop {
                let res = TxBuilder::with_recipients(outputs.clone())
                    .must_spend(required.clone())
                    .change_script(change_script.clone())
                    .fee_rate(fee_rate)
                    .signing_keys(keys.clone())
                    .finish(&self.secp);

                match res {
                    Ok(built) => break built,
                    Err(Error::InsufficientFunds { needed, available }) => {
                        let (path, coin) = match pool.next() {
                            Some(next) => next,
                            None => {
                                debug!(
                                    "Not enough funds for wallet {}: {} needed, {} available",
                                    wallet_id, needed, available
                                );
                                return Ok(None);
                            }
                        };
                        if derived.insert(path) {
                            keys.add(DerivedKey::derive(&master, path, &self.secp)?);
                        }
                        trace!("Adding coin {} to the explicit inputs", coin.outpoint);
                        required.push(p2wpkh_weighted(coin.as_utxo()));
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        for utxo in &explicit_inputs {
            known.entry(utxo.outpoint).or_insert_with(|| Coin {
                outpoint: utxo.outpoint,
                script_pubkey: utxo.txout.script_pubkey.clone(),
                value: utxo.txout.value,
                spent_by: None,
            });
        }
        let spent_coins = built
            .spent
            .iter()
            .filter_map(|u| known.get(&u.outpoint).cloned())
            .collect();

        debug!(
            "Built transaction {} for wallet {}, fee {} sat",
            built.transaction.compute_txid(),
            wallet_id,
            built.fee
        );

        Ok(Some(CreatedTransaction {
            transaction: built.transaction,
            spent_coins,
            change_script,
            fee: built.fee,
        }))
    }

    /// Sign the inputs of `tx` that spend unspent coins of the wallet
    ///
    /// Inputs spending other coins are left untouched.
    pub async fn sign_transaction(
        &self,
        wallet_id: &str,
        mut tx: Transaction,
    ) -> Result<Transaction, Error> {
        let wallet = self.require_wallet(wallet_id)?;
        let spent = tx
            .input
            .iter()
            .map(|i| i.previous_output)
            .collect::<HashSet<_>>();

        let master = self.master_key(&wallet)?;
        let mut keys = SigningKeys::new();
        let mut prevouts = HashMap::new();
        for group in self.spendable_groups(wallet_id)? {
            let coins = group
                .coins
                .iter()
                .filter(|c| spent.contains(&c.outpoint))
                .collect::<Vec<_>>();
            if coins.is_empty() {
                continue;
            }

            keys.add(DerivedKey::derive(&master, &group.derivation_path, &self.secp)?);
            prevouts.extend(coins.into_iter().map(|c| (c.outpoint, c.txout())));
        }

        keys.sign(&mut tx, &prevouts, &self.secp)?;
        Ok(tx)
    }

    /// Unspent coins of the wallet whose key is known, grouped by derivation path
    pub fn spendable_groups(&self, wallet_id: &str) -> Result<Vec<CoinGroup>, Error> {
        let paths = self
            .database
            .iter_wallet_scripts(wallet_id)?
            .into_iter()
            .filter_map(|ws| ws.derivation_path.map(|path| (ws.script_pubkey, path)))
            .collect::<HashMap<_, _>>();

        let mut groups: BTreeMap<String, Vec<Coin>> = BTreeMap::new();
        for coin in self.database.iter_coins()? {
            if coin.is_spent() {
                continue;
            }
            if let Some(path) = paths.get(&coin.script_pubkey) {
                groups.entry(path.clone()).or_default().push(coin);
            }
        }

        Ok(groups
            .into_iter()
            .map(|(derivation_path, coins)| CoinGroup {
                derivation_path,
                coins,
            })
            .collect())
    }

    pub(crate) fn require_wallet(&self, wallet_id: &str) -> Result<Wallet, Error> {
        self.database
            .get_wallet(wallet_id)?
            .ok_or_else(|| Error::WalletNotFound(wallet_id.to_string()))
    }

    pub(crate) fn master_key(&self, wallet: &Wallet) -> Result<Xpriv, Error> {
        {
            let cache = self
                .master_keys
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(master) = cache.get(&wallet.id) {
                return Ok(*master);
            }
        }

        let master = keys::master_key_from_mnemonic(&wallet.mnemonic, self.network)?;
        self.cache_master_key(&wallet.id, master);
        Ok(master)
    }

    fn cache_master_key(&self, wallet_id: &str, master: Xpriv) {
        self.master_keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(wallet_id.to_string(), master);
    }

    pub(crate) async fn notify_chain(&self, wallet_id: &str, script: &Script) -> Result<(), Error> {
        match &self.chain {
            Some(chain) => chain.track_script(wallet_id, script).await,
            None => Ok(()),
        }
    }
}
