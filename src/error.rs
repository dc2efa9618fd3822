// Bitcoin Dev Kit
//
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::fmt;

use crate::wallet;

/// Errors that can be thrown by the [`Ledger`](crate::wallet::Ledger) and its database
#[derive(Debug)]
pub enum Error {
    /// Generic error
    Generic(String),
    /// No wallet is stored under the requested id
    WalletNotFound(String),
    /// A wallet with the same fingerprint has already been created
    WalletAlreadyExists(String),
    /// The derivation path (or path template) can't be used to derive keys
    InvalidDerivationPath(String),
    /// The wallet's derivation index can't be incremented anymore
    DerivationIndexOverflow(String),
    /// Cannot build a tx without recipients
    NoRecipients,
    /// Output created is under the dust limit, 546 satoshis
    OutputBelowDustLimit(usize),
    /// Wallet's UTXO set is not enough to cover recipient's requested plus fee
    InsufficientFunds {
        /// Sats needed for some transaction
        needed: u64,
        /// Sats available for spending
        available: u64,
    },
    /// Signing error
    Signer(wallet::signer::SignerError),
    /// BIP32 error
    Bip32(bitcoin::bip32::Error),
    /// BIP39 mnemonic error
    Bip39(bip39::Error),
    /// Encoding error
    Encode(bitcoin::consensus::encode::Error),
    /// Error serializing or deserializing JSON data
    Json(serde_json::Error),
    #[cfg(feature = "key-value-db")]
    /// Sled database error
    Sled(sled::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic(err) => write!(f, "Generic error: {}", err),
            Self::WalletNotFound(id) => write!(f, "Wallet not found: {}", id),
            Self::WalletAlreadyExists(id) => write!(f, "Wallet already exists: {}", id),
            Self::InvalidDerivationPath(path) => write!(f, "Invalid derivation path: {}", path),
            Self::DerivationIndexOverflow(id) => {
                write!(f, "Derivation index exhausted for wallet {}", id)
            }
            Self::NoRecipients => write!(f, "Cannot build tx without recipients"),
            Self::OutputBelowDustLimit(index) => {
                write!(f, "Output #{} is below the dust limit", index)
            }
            Self::InsufficientFunds { needed, available } => write!(
                f,
                "Insufficient funds: {} sat available of {} sat needed",
                available, needed
            ),
            Self::Signer(err) => write!(f, "Signer error: {}", err),
            Self::Bip32(err) => write!(f, "BIP32 error: {}", err),
            Self::Bip39(err) => write!(f, "BIP39 error: {}", err),
            Self::Encode(err) => write!(f, "Encoding error: {}", err),
            Self::Json(err) => write!(f, "Serialize/Deserialize JSON error: {}", err),
            #[cfg(feature = "key-value-db")]
            Self::Sled(err) => write!(f, "Sled database error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

macro_rules! impl_error {
    ( $from:ty, $to:ident ) => {
        impl_error!($from, $to, Error);
    };
    ( $from:ty, $to:ident, $impl_for:ty ) => {
        impl std::convert::From<$from> for $impl_for {
            fn from(err: $from) -> Self {
                <$impl_for>::$to(err)
            }
        }
    };
}

impl_error!(wallet::signer::SignerError, Signer);
impl_error!(bitcoin::bip32::Error, Bip32);
impl_error!(bip39::Error, Bip39);
impl_error!(bitcoin::consensus::encode::Error, Encode);
impl_error!(serde_json::Error, Json);

#[cfg(feature = "key-value-db")]
impl_error!(sled::Error, Sled);
