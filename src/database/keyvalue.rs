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

//! Key-value database built on [`sled`]

use std::sync::{Mutex, PoisonError};

use sled::Tree;

use crate::database::{Batch, BatchDatabase, Database};
use crate::error::Error;

/// Persistent database stored in a [`sled::Tree`]
///
/// Commits are serialized by a lock owned by this handle, so a tree must be accessed through a
/// single `SledDatabase` (wrap it in an `Arc` to share it).
#[derive(Debug)]
pub struct SledDatabase {
    tree: Tree,
    commit_lock: Mutex<()>,
}

impl SledDatabase {
    /// Wrap an open tree
    pub fn new(tree: Tree) -> Self {
        SledDatabase {
            tree,
            commit_lock: Mutex::new(()),
        }
    }

    /// Flush the tree to disk, returning the number of bytes flushed
    pub fn flush(&self) -> Result<usize, Error> {
        Ok(self.tree.flush()?)
    }
}

impl From<Tree> for SledDatabase {
    fn from(tree: Tree) -> Self {
        SledDatabase::new(tree)
    }
}

impl Database for SledDatabase {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.tree.get(key)?.map(|ivec| ivec.to_vec()))
    }

    fn iter_raw(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        self.tree
            .scan_prefix(prefix)
            .map(|res| {
                res.map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .map_err(Error::from)
            })
            .collect()
    }
}

impl BatchDatabase for SledDatabase {
    fn commit_batch(&self, batch: Batch) -> Result<(), Error> {
        let _guard = self
            .commit_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let changes = batch.stage(self)?;
        if changes.is_empty() {
            return Ok(());
        }

        let mut sled_batch = sled::Batch::default();
        for (key, value) in changes {
            match value {
                Some(value) => sled_batch.insert(key, value),
                None => sled_batch.remove(key),
            }
        }

        Ok(self.tree.apply_batch(sled_batch)?)
    }
}
