// Bitcoin Dev Kit
//
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Persisted entities and their keys

use bitcoin::hashes::Hash;
use bitcoin::{Amount, BlockHash, OutPoint, Script, ScriptBuf, TxOut, Txid};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Every kind of entity stored by the ledger
///
/// This is the full schema of the store: each entity is listed exactly once and owns a distinct
/// key prefix.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// [`Wallet`]
    Wallet,
    /// [`ScriptRecord`]
    Script,
    /// [`WalletScript`]
    WalletScript,
    /// [`TransactionRecord`]
    Transaction,
    /// [`TransactionScript`]
    TransactionScript,
    /// [`Coin`]
    Coin,
    /// [`Channel`]
    Channel,
    /// [`LightningPayment`]
    LightningPayment,
    /// [`ArbitraryData`]
    ArbitraryData,
}

impl EntityKind {
    /// All the entity kinds, in prefix order
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Wallet,
        EntityKind::Script,
        EntityKind::WalletScript,
        EntityKind::Transaction,
        EntityKind::TransactionScript,
        EntityKind::Coin,
        EntityKind::Channel,
        EntityKind::LightningPayment,
        EntityKind::ArbitraryData,
    ];

    /// Return the key prefix used for this kind of entity
    pub fn as_byte(&self) -> u8 {
        match self {
            EntityKind::Wallet => b'w',
            EntityKind::Script => b's',
            EntityKind::WalletScript => b'k',
            EntityKind::Transaction => b't',
            EntityKind::TransactionScript => b'x',
            EntityKind::Coin => b'u',
            EntityKind::Channel => b'c',
            EntityKind::LightningPayment => b'l',
            EntityKind::ArbitraryData => b'a',
        }
    }
}

/// A value that can be turned into the content part of a database key
pub trait EntityKey {
    /// Serialize the key, without the entity prefix
    fn encode_key(&self) -> Vec<u8>;
}

/// A record stored by the ledger, addressed by a strongly typed key
pub trait Entity: Serialize + DeserializeOwned {
    /// Kind of the entity, which selects its key prefix
    const KIND: EntityKind;
    /// Identity of the entity
    type Key: EntityKey;

    /// Return the identity of this record
    fn key(&self) -> Self::Key;
}

pub(crate) fn push_str_component(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0x00);
}

impl EntityKey for String {
    fn encode_key(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl EntityKey for ScriptBuf {
    fn encode_key(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl EntityKey for Txid {
    fn encode_key(&self) -> Vec<u8> {
        self.to_byte_array().to_vec()
    }
}

impl EntityKey for OutPoint {
    fn encode_key(&self) -> Vec<u8> {
        let mut v = self.txid.encode_key();
        v.extend_from_slice(&self.vout.to_be_bytes());
        v
    }
}

/// A wallet: seed material plus a derivation path template
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    /// Fingerprint of the master key, hex encoded
    pub id: String,
    /// Human readable name
    pub name: String,
    /// BIP39 mnemonic the master key is derived from
    pub mnemonic: String,
    /// Derivation path template, the `*` is replaced with the derivation index
    pub derivation_path: String,
    /// Index used by the last derived script, `0` when nothing has been derived yet
    pub last_derivation_index: u32,
    /// Tip of the chain when the wallet was created
    pub creation_block_hash: BlockHash,
    /// Other tracked-source names this wallet owns
    pub aliases: Vec<String>,
}

impl Wallet {
    /// Whether `id_or_alias` is this wallet's id or one of its aliases
    pub fn is_named(&self, id_or_alias: &str) -> bool {
        self.id == id_or_alias || self.aliases.iter().any(|a| a == id_or_alias)
    }

    /// Replace the wildcard in the template with `index`
    pub fn derivation_path_for<I: ToString>(&self, index: I) -> String {
        self.derivation_path.replace('*', &index.to_string())
    }
}

impl Entity for Wallet {
    const KIND: EntityKind = EntityKind::Wallet;
    type Key = String;

    fn key(&self) -> String {
        self.id.clone()
    }
}

/// A script seen by the ledger, identified by its canonical bytes
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptRecord {
    /// The script itself
    pub script_pubkey: ScriptBuf,
}

impl ScriptRecord {
    /// Canonical hex encoding of the script
    pub fn id(&self) -> String {
        self.script_pubkey.to_hex_string()
    }
}

impl From<ScriptBuf> for ScriptRecord {
    fn from(script_pubkey: ScriptBuf) -> Self {
        ScriptRecord { script_pubkey }
    }
}

impl Entity for ScriptRecord {
    const KIND: EntityKind = EntityKind::Script;
    type Key = ScriptBuf;

    fn key(&self) -> ScriptBuf {
        self.script_pubkey.clone()
    }
}

/// Key of a [`WalletScript`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WalletScriptKey {
    /// Owning wallet
    pub wallet_id: String,
    /// Owned script
    pub script_pubkey: ScriptBuf,
}

impl EntityKey for WalletScriptKey {
    fn encode_key(&self) -> Vec<u8> {
        let mut v = Vec::new();
        push_str_component(&mut v, &self.wallet_id);
        v.extend_from_slice(self.script_pubkey.as_bytes());
        v
    }
}

/// Association of a script with a wallet
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WalletScript {
    /// Owning wallet
    pub wallet_id: String,
    /// Owned script
    pub script_pubkey: ScriptBuf,
    /// Concrete derivation path, `None` for scripts that were only associated externally
    pub derivation_path: Option<String>,
}

impl Entity for WalletScript {
    const KIND: EntityKind = EntityKind::WalletScript;
    type Key = WalletScriptKey;

    fn key(&self) -> WalletScriptKey {
        WalletScriptKey {
            wallet_id: self.wallet_id.clone(),
            script_pubkey: self.script_pubkey.clone(),
        }
    }
}

/// A transaction relevant to at least one wallet
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    /// Transaction id
    pub txid: Txid,
    /// Containing block, `None` while unconfirmed
    pub block_hash: Option<BlockHash>,
}

impl TransactionRecord {
    /// Whether the transaction is in a block
    pub fn is_confirmed(&self) -> bool {
        self.block_hash.is_some()
    }
}

impl Entity for TransactionRecord {
    const KIND: EntityKind = EntityKind::Transaction;
    type Key = Txid;

    fn key(&self) -> Txid {
        self.txid
    }
}

/// Key of a [`TransactionScript`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionScriptKey {
    /// Transaction id
    pub txid: Txid,
    /// Script referenced by the transaction
    pub script_pubkey: ScriptBuf,
}

impl EntityKey for TransactionScriptKey {
    fn encode_key(&self) -> Vec<u8> {
        let mut v = self.txid.encode_key();
        v.extend_from_slice(self.script_pubkey.as_bytes());
        v
    }
}

/// A script referenced by a transaction
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransactionScript {
    /// Transaction id
    pub txid: Txid,
    /// Script referenced by the transaction
    pub script_pubkey: ScriptBuf,
    /// `true` if the transaction spends a coin locked by the script, `false` if it creates one
    pub spent: bool,
}

impl Entity for TransactionScript {
    const KIND: EntityKind = EntityKind::TransactionScript;
    type Key = TransactionScriptKey;

    fn key(&self) -> TransactionScriptKey {
        TransactionScriptKey {
            txid: self.txid,
            script_pubkey: self.script_pubkey.clone(),
        }
    }
}

/// Input of a transaction that spends a [`Coin`]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpentBy {
    /// Spending transaction
    pub txid: Txid,
    /// Index of the spending input
    pub input_index: u32,
}

/// A transaction output tracked by the ledger
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    /// Funding outpoint
    pub outpoint: OutPoint,
    /// Script locking the output
    pub script_pubkey: ScriptBuf,
    /// Value of the output
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub value: Amount,
    /// Spending input, `None` while unspent
    pub spent_by: Option<SpentBy>,
}

impl Coin {
    /// Whether a known transaction spends this coin
    pub fn is_spent(&self) -> bool {
        self.spent_by.is_some()
    }

    /// The output this coin represents
    pub fn txout(&self) -> TxOut {
        TxOut {
            value: self.value,
            script_pubkey: self.script_pubkey.clone(),
        }
    }

    /// Convert into a spendable [`Utxo`]
    pub fn as_utxo(&self) -> Utxo {
        Utxo {
            outpoint: self.outpoint,
            txout: self.txout(),
        }
    }

    /// Whether this coin is locked by `script`
    pub fn is_locked_by(&self, script: &Script) -> bool {
        self.script_pubkey.as_script() == script
    }
}

impl Entity for Coin {
    const KIND: EntityKind = EntityKind::Coin;
    type Key = OutPoint;

    fn key(&self) -> OutPoint {
        self.outpoint
    }
}

/// Key of a [`Channel`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    /// Owning wallet
    pub wallet_id: String,
    /// Funding outpoint of the channel
    pub funding: OutPoint,
}

impl EntityKey for ChannelKey {
    fn encode_key(&self) -> Vec<u8> {
        let mut v = Vec::new();
        push_str_component(&mut v, &self.wallet_id);
        v.extend_from_slice(&self.funding.encode_key());
        v
    }
}

/// Opaque channel state, keyed by its funding outpoint
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Owning wallet
    pub wallet_id: String,
    /// Funding outpoint of the channel
    pub funding: OutPoint,
    /// Serialized channel state
    pub data: Vec<u8>,
    /// Serialized spendable output descriptor, attached once the channel's funds can be swept
    pub spendable_data: Option<Vec<u8>>,
}

impl Entity for Channel {
    const KIND: EntityKind = EntityKind::Channel;
    type Key = ChannelKey;

    fn key(&self) -> ChannelKey {
        ChannelKey {
            wallet_id: self.wallet_id.clone(),
            funding: self.funding,
        }
    }
}

/// Status of a [`LightningPayment`]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    /// In flight
    Pending,
    /// Settled
    Complete,
    /// Failed
    Failed,
}

/// Key of a [`LightningPayment`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaymentKey {
    /// Owning wallet
    pub wallet_id: String,
    /// Hex encoded payment hash
    pub payment_hash: String,
    /// `true` for received payments
    pub inbound: bool,
    /// Hex encoded payment id
    pub payment_id: String,
}

impl EntityKey for PaymentKey {
    fn encode_key(&self) -> Vec<u8> {
        let mut v = Vec::new();
        push_str_component(&mut v, &self.wallet_id);
        push_str_component(&mut v, &self.payment_hash);
        v.push(self.inbound as u8);
        v.extend_from_slice(self.payment_id.as_bytes());
        v
    }
}

/// A lightning payment made or received by a wallet
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LightningPayment {
    /// Owning wallet
    pub wallet_id: String,
    /// Hex encoded payment hash
    pub payment_hash: String,
    /// `true` for received payments
    pub inbound: bool,
    /// Hex encoded payment id
    pub payment_id: String,
    /// Hex encoded preimage, once known
    pub preimage: Option<String>,
    /// Hex encoded payment secret
    pub secret: Option<String>,
    /// Creation time, seconds since the unix epoch
    pub timestamp: u64,
    /// Amount in millisatoshi
    pub value_msat: u64,
    /// Current status
    pub status: PaymentStatus,
}

impl Entity for LightningPayment {
    const KIND: EntityKind = EntityKind::LightningPayment;
    type Key = PaymentKey;

    fn key(&self) -> PaymentKey {
        PaymentKey {
            wallet_id: self.wallet_id.clone(),
            payment_hash: self.payment_hash.clone(),
            inbound: self.inbound,
            payment_id: self.payment_id.clone(),
        }
    }
}

/// Opaque blob stored on behalf of the protocol engine
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ArbitraryData {
    /// Wallet scope followed by the logical name
    pub key: String,
    /// Wallet scope, `None` for global entries
    pub wallet_id: Option<String>,
    /// The blob
    pub value: Vec<u8>,
}

impl ArbitraryData {
    /// Build the composite key for `name` in the scope of `wallet_id`
    pub fn compose_key(wallet_id: Option<&str>, name: &str) -> String {
        format!("{}{}", wallet_id.unwrap_or_default(), name)
    }

    /// The logical name of the entry, without the wallet scope
    pub fn name(&self) -> &str {
        let scope = self.wallet_id.as_deref().unwrap_or_default();
        self.key.strip_prefix(scope).unwrap_or(&self.key)
    }
}

impl Entity for ArbitraryData {
    const KIND: EntityKind = EntityKind::ArbitraryData;
    type Key = String;

    fn key(&self) -> String {
        self.key.clone()
    }
}

/// Fee rate
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd)]
// Internally stored as satoshi/vbyte
pub struct FeeRate(f32);

impl FeeRate {
    /// Create a new instance of [`FeeRate`] given a float fee rate in btc/kvbytes
    pub fn from_btc_per_kvb(btc_per_kvb: f32) -> Self {
        FeeRate(btc_per_kvb * 1e5)
    }

    /// Create a new instance of [`FeeRate`] given a float fee rate in satoshi/vbyte
    pub const fn from_sat_per_vb(sat_per_vb: f32) -> Self {
        FeeRate(sat_per_vb)
    }

    /// Create a new [`FeeRate`] with the default min relay fee value
    pub const fn default_min_relay_fee() -> Self {
        FeeRate(1.0)
    }

    /// Return the value as satoshi/vbyte
    pub fn as_sat_vb(&self) -> f32 {
        self.0
    }

    /// Fee in satoshi for `wu` weight units, not rounded
    pub fn fee_wu(&self, wu: usize) -> f32 {
        (wu as f32) * self.0 / 4.0
    }
}

impl std::default::Default for FeeRate {
    fn default() -> Self {
        FeeRate::default_min_relay_fee()
    }
}

/// An unspent transaction output (UTXO)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Utxo {
    /// Reference to a transaction output
    pub outpoint: OutPoint,
    /// Transaction output
    pub txout: TxOut,
}

/// A [`Utxo`] with its `satisfaction_weight`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedUtxo {
    /// The weight of the witness data and `scriptSig` expressed in [weight units]. This is used to
    /// properly maintain the feerate when adding this input to a transaction during coin selection.
    ///
    /// [weight units]: https://en.bitcoin.it/wiki/Weight_units
    pub satisfaction_weight: usize,
    /// The UTXO
    pub utxo: Utxo,
}
