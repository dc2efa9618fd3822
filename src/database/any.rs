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

//! Runtime-checked database types
//!
//! This module provides the implementation of [`AnyDatabase`] which allows switching the
//! inner [`Database`] type at runtime.
//!
//! ## Example
//!
//! When paired with the use of [`ConfigurableDatabase`], it allows creating ledgers with any
//! database supported using a single line of code:
//!
//! ```no_run
//! # use ln_ledger::database::*;
//! let config = serde_json::from_str("{\"Memory\":null}")?;
//! let database = AnyDatabase::from_config(&config)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use super::*;

macro_rules! impl_from {
    ( $from:ty, $to:ty, $variant:ident, $( $cfg:tt )* ) => {
        $( $cfg )*
        impl From<$from> for $to {
            fn from(inner: $from) -> Self {
                <$to>::$variant(inner)
            }
        }
    };
}

macro_rules! impl_inner_method {
    ( $enum_name:ident, $self:expr, $name:ident $(, $args:expr)* ) => {
        match $self {
            $enum_name::Memory(inner) => inner.$name( $($args, )* ),
            #[cfg(feature = "key-value-db")]
            $enum_name::Sled(inner) => inner.$name( $($args, )* ),
        }
    }
}

/// Trait for [`Database`] types that can be created given a configuration
pub trait ConfigurableDatabase: Database + Sized {
    /// Type that contains the configuration
    type Config: std::fmt::Debug;

    /// Create a new instance given a configuration
    fn from_config(config: &Self::Config) -> Result<Self, Error>;
}

/// Type that can contain any of the [`Database`] types defined by the library
///
/// It allows switching database type at runtime.
///
/// See [this module](crate::database::any)'s documentation for a usage example.
#[derive(Debug)]
pub enum AnyDatabase {
    /// In-memory ephemeral database
    Memory(memory::MemoryDatabase),
    #[cfg(feature = "key-value-db")]
    #[cfg_attr(docsrs, doc(cfg(feature = "key-value-db")))]
    /// Simple key-value embedded database based on [`sled`]
    Sled(keyvalue::SledDatabase),
}

impl_from!(memory::MemoryDatabase, AnyDatabase, Memory,);
impl_from!(keyvalue::SledDatabase, AnyDatabase, Sled, #[cfg(feature = "key-value-db")]);

impl Database for AnyDatabase {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        impl_inner_method!(AnyDatabase, self, get_raw, key)
    }

    fn iter_raw(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        impl_inner_method!(AnyDatabase, self, iter_raw, prefix)
    }
}

impl BatchDatabase for AnyDatabase {
    fn commit_batch(&self, batch: Batch) -> Result<(), Error> {
        impl_inner_method!(AnyDatabase, self, commit_batch, batch)
    }
}

/// Configuration type for a [`SledDatabase`](keyvalue::SledDatabase)
#[cfg(feature = "key-value-db")]
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SledDbConfiguration {
    /// Main directory of the db
    pub path: String,
    /// Name of the database tree, a separated namespace for the data
    pub tree_name: String,
}

#[cfg(feature = "key-value-db")]
impl ConfigurableDatabase for keyvalue::SledDatabase {
    type Config = SledDbConfiguration;

    fn from_config(config: &Self::Config) -> Result<Self, Error> {
        Ok(sled::open(&config.path)?
            .open_tree(&config.tree_name)?
            .into())
    }
}

/// Type that can contain any of the database configurations defined by the library
///
/// This allows storing a single configuration that can be loaded into an [`AnyDatabase`]
/// instance.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AnyDatabaseConfig {
    /// Memory database has no config
    Memory(()),
    #[cfg(feature = "key-value-db")]
    #[cfg_attr(docsrs, doc(cfg(feature = "key-value-db")))]
    /// Simple key-value embedded database based on [`sled`]
    Sled(SledDbConfiguration),
}

impl ConfigurableDatabase for AnyDatabase {
    type Config = AnyDatabaseConfig;

    fn from_config(config: &Self::Config) -> Result<Self, Error> {
        Ok(match config {
            AnyDatabaseConfig::Memory(inner) => {
                AnyDatabase::Memory(memory::MemoryDatabase::from_config(inner)?)
            }
            #[cfg(feature = "key-value-db")]
            AnyDatabaseConfig::Sled(inner) => {
                AnyDatabase::Sled(keyvalue::SledDatabase::from_config(inner)?)
            }
        })
    }
}

impl_from!((), AnyDatabaseConfig, Memory,);
impl_from!(SledDbConfiguration, AnyDatabaseConfig, Sled, #[cfg(feature = "key-value-db")]);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_memory_from_config() {
        let config: AnyDatabaseConfig = serde_json::from_str(r#"{"Memory":null}"#).unwrap();
        let db = AnyDatabase::from_config(&config).unwrap();
        assert!(matches!(db, AnyDatabase::Memory(_)));

        crate::database::test::test_retract_transaction(db);
    }

    #[cfg(feature = "key-value-db")]
    #[test]
    fn test_sled_from_config() {
        let dir = std::env::temp_dir().join(format!(
            "ln_ledger_any_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let config = AnyDatabaseConfig::from(SledDbConfiguration {
            path: dir.to_string_lossy().to_string(),
            tree_name: "ledger".to_string(),
        });
        let db = AnyDatabase::from_config(&config).unwrap();
        assert!(matches!(db, AnyDatabase::Sled(_)));

        crate::database::test::test_wallet(db);
        let _ = std::fs::remove_dir_all(dir);
    }
}
