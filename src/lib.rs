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

// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

//! On-chain ledger for lightning-capable wallets
//!
//! This crate keeps the on-chain state of a set of HD wallets: the P2WPKH scripts derived from
//! their seeds, the transactions a chain indexer reports for them and the coins those
//! transactions create and spend. On top of that it builds and signs transactions, and persists
//! the channel records, payments and opaque blobs of the lightning node using the wallets.
//!
//! ## Example
//!
//! ```
//! use bitcoin::hashes::Hash;
//! use bitcoin::{BlockHash, Network};
//! use ln_ledger::database::MemoryDatabase;
//! use ln_ledger::Ledger;
//!
//! # tokio::runtime::Builder::new_current_thread().build()?.block_on(async {
//! let ledger = Ledger::new(MemoryDatabase::new(), Network::Regtest);
//! let wallet_id = ledger
//!     .create_wallet(
//!         "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
//!         "main",
//!         "m/84'/1'/0'/0/*",
//!         BlockHash::all_zeros(),
//!         vec![],
//!     )
//!     .await?;
//!
//! let script = ledger.derive_script(&wallet_id).await?;
//! println!("Send coins to {}", script.as_script());
//! # Ok::<_, ln_ledger::Error>(())
//! # })?;
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```
//!
//! # Feature flags
//!
//! * `key-value-db`: enables the [`sled`] backed database, on by default

pub extern crate bitcoin;
#[cfg(feature = "key-value-db")]
pub extern crate sled;

pub mod blockchain;
pub mod config;
pub mod database;
pub(crate) mod error;
pub mod keys;
pub mod types;
pub mod wallet;

pub use error::Error;
pub use types::*;
pub use wallet::signer;
pub use wallet::tx_builder::TxBuilder;
pub use wallet::{CoinGroup, CreatedTransaction, Ledger, SpendableOutput};
