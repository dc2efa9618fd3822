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

//! Key formats
//!
//! Wallets are seeded by a BIP39 mnemonic, and every script they own is a P2WPKH script locked by
//! a key derived from the seed with a BIP32 path.

use std::str::FromStr;

use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::{CompressedPublicKey, Network, PrivateKey, ScriptBuf};

pub use bip39::{Language, Mnemonic};

use crate::error::Error;
use crate::wallet::utils::SecpCtx;

/// Wildcard replaced by the derivation index in a path template
pub const WILDCARD: char = '*';

/// Derive the BIP32 master key of a mnemonic, with an empty passphrase
pub fn master_key_from_mnemonic(mnemonic: &str, network: Network) -> Result<Xpriv, Error> {
    let mnemonic = Mnemonic::parse_in(Language::English, mnemonic)?;
    let seed = mnemonic.to_seed("");

    Ok(Xpriv::new_master(network, &seed)?)
}

/// Identifier of the wallet seeded by `master`: the hex encoded fingerprint of the master key
pub fn wallet_id(master: &Xpriv, secp: &SecpCtx) -> String {
    master.fingerprint(secp).to_string()
}

/// Parse a concrete derivation path
pub fn parse_derivation_path(path: &str) -> Result<DerivationPath, Error> {
    DerivationPath::from_str(path).map_err(|_| Error::InvalidDerivationPath(path.to_string()))
}

/// Check that `template` contains exactly one wildcard and is a valid path once it's replaced
pub fn check_path_template(template: &str) -> Result<(), Error> {
    if template.matches(WILDCARD).count() != 1 {
        return Err(Error::InvalidDerivationPath(template.to_string()));
    }
    parse_derivation_path(&template.replace(WILDCARD, "0"))
        .map(|_| ())
        .map_err(|_| Error::InvalidDerivationPath(template.to_string()))
}

/// A key derived from a wallet's master key
#[derive(Debug, Clone)]
pub struct DerivedKey {
    /// Path the key was derived at
    pub path: DerivationPath,
    /// The private key
    pub private_key: PrivateKey,
    /// The matching public key
    pub public_key: CompressedPublicKey,
}

impl DerivedKey {
    /// Derive the key at `path`
    pub fn derive(master: &Xpriv, path: &str, secp: &SecpCtx) -> Result<Self, Error> {
        let path = parse_derivation_path(path)?;
        let xpriv = master.derive_priv(secp, &path)?;
        let public_key = CompressedPublicKey(xpriv.private_key.public_key(secp));

        Ok(DerivedKey {
            path,
            private_key: xpriv.to_priv(),
            public_key,
        })
    }

    /// The P2WPKH script locked by this key
    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2wpkh(&self.public_key.wpubkey_hash())
    }
}
