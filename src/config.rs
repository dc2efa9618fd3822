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

//! Ledger configuration
//!
//! ## Example
//!
//! ```
//! # use ln_ledger::config::LedgerConfig;
//! # use ln_ledger::Ledger;
//! let config: LedgerConfig = serde_json::from_str(
//!     r#"{ "network": "regtest", "database": { "Memory": null } }"#,
//! )?;
//! let ledger = Ledger::from_config(&config)?;
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```

use bitcoin::Network;
use serde::{Deserialize, Serialize};

use crate::database::AnyDatabaseConfig;

/// Configuration of a [`Ledger`](crate::wallet::Ledger) built with
/// [`Ledger::from_config`](crate::wallet::Ledger::from_config)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Network the wallets' keys are derived for
    pub network: Network,
    /// Database backend
    pub database: AnyDatabaseConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            network: Network::Bitcoin,
            database: AnyDatabaseConfig::Memory(()),
        }
    }
}
