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

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use bitcoin::secp256k1::{All, Secp256k1};
use tokio::sync::OwnedMutexGuard;

// De-facto standard "dust limit" (even though it should change based on the output type)
pub(crate) const DUST_LIMIT_SATOSHI: u64 = 546;

/// Trait to check if a value is below the dust limit
// we implement this trait to make sure we don't mess up the comparison with off-by-one like a <
// instead of a <= etc. The constant value for the dust limit is not public on purpose, to
// encourage the usage of this trait.
pub trait IsDust {
    /// Check whether or not a value is below dust limit
    fn is_dust(&self) -> bool;
}

impl IsDust for u64 {
    fn is_dust(&self) -> bool {
        *self <= DUST_LIMIT_SATOSHI
    }
}

impl IsDust for bitcoin::Amount {
    fn is_dust(&self) -> bool {
        self.to_sat().is_dust()
    }
}

/// Secp256k1 context able to sign and verify
pub type SecpCtx = Secp256k1<All>;

/// A set of async mutexes, one per key, created on first use
///
/// Holders of different keys never contend. Entries are never removed, which is fine as long as
/// the key space stays small (one entry per wallet).
#[derive(Debug)]
pub struct KeyedLock<K> {
    locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLock<K> {
    /// Create an empty set of locks
    pub fn new() -> Self {
        KeyedLock {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until the lock for `key` is free and take it
    ///
    /// The lock is released when the returned guard is dropped.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        mutex.lock_owned().await
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLock<K> {
    fn default() -> Self {
        Self::new()
    }
}
