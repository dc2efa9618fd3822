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

//! Transaction signing
//!
//! Every script a wallet owns is a P2WPKH script, so signing boils down to producing a
//! `SIGHASH_ALL` ECDSA signature for each input whose previous output is locked by one of the
//! known keys. Inputs locked by unknown scripts are left untouched.

use std::collections::HashMap;
use std::fmt;

use bitcoin::secp256k1::Message;
use bitcoin::sighash::SighashCache;
use bitcoin::{EcdsaSighashType, OutPoint, Script, ScriptBuf, Transaction, TxOut, Witness};

use crate::keys::DerivedKey;
use crate::wallet::utils::SecpCtx;

/// Signing error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// The previous output spent by the input at this index is unknown
    MissingPrevout(usize),
    /// Error while computing the hash to sign
    Sighash(String),
}

impl fmt::Display for SignerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPrevout(index) => write!(f, "Missing previous output for input #{}", index),
            Self::Sighash(err) => write!(f, "Error while computing the sighash: {}", err),
        }
    }
}

impl std::error::Error for SignerError {}

/// Keys able to sign for a set of scripts
#[derive(Debug, Clone, Default)]
pub struct SigningKeys {
    keys: HashMap<ScriptBuf, DerivedKey>,
}

impl SigningKeys {
    /// Create an empty set
    pub fn new() -> Self {
        SigningKeys::default()
    }

    /// Add a key, indexed by the P2WPKH script it locks
    pub fn add(&mut self, key: DerivedKey) {
        self.keys.insert(key.script_pubkey(), key);
    }

    /// Whether a key for `script` is known
    pub fn can_sign(&self, script: &Script) -> bool {
        self.keys.contains_key(script)
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Sign every input of `tx` that spends an output locked by one of the keys
    ///
    /// `prevouts` must contain the previous output of every input that should be signed. Returns
    /// the number of inputs signed.
    pub fn sign(
        &self,
        tx: &mut Transaction,
        prevouts: &HashMap<OutPoint, TxOut>,
        secp: &SecpCtx,
    ) -> Result<usize, SignerError> {
        let mut witnesses = Vec::new();
        {
            let mut sighash_cache = SighashCache::new(&*tx);
            for (index, txin) in tx.input.iter().enumerate() {
                let prevout = match prevouts.get(&txin.previous_output) {
                    Some(prevout) => prevout,
                    None => {
                        log::trace!("No prevout known for input #{}, skipping", index);
                        continue;
                    }
                };
                let key = match self.keys.get(&prevout.script_pubkey) {
                    Some(key) => key,
                    None => continue,
                };

                let sighash_type = EcdsaSighashType::All;
                let sighash = sighash_cache
                    .p2wpkh_signature_hash(
                        index,
                        &prevout.script_pubkey,
                        prevout.value,
                        sighash_type,
                    )
                    .map_err(|e| SignerError::Sighash(e.to_string()))?;
                let msg = Message::from_digest_slice(sighash.as_ref())
                    .map_err(|e| SignerError::Sighash(e.to_string()))?;

                let signature = secp.sign_ecdsa(&msg, &key.private_key.inner);
                let mut sig_serialized = signature.serialize_der().to_vec();
                sig_serialized.push(sighash_type as u8);

                witnesses.push((
                    index,
                    Witness::from(vec![sig_serialized, key.public_key.0.serialize().to_vec()]),
                ));
            }
        }

        let signed = witnesses.len();
        for (index, witness) in witnesses {
            tx.input[index].witness = witness;
        }
        log::debug!("Signed {} of {} inputs", signed, tx.input.len());

        Ok(signed)
    }

    /// Like [`SigningKeys::sign`], but fails if any input can't be signed
    pub fn sign_all(
        &self,
        tx: &mut Transaction,
        prevouts: &HashMap<OutPoint, TxOut>,
        secp: &SecpCtx,
    ) -> Result<(), SignerError> {
        for (index, txin) in tx.input.iter().enumerate() {
            match prevouts.get(&txin.previous_output) {
                Some(prevout) if self.can_sign(&prevout.script_pubkey) => {}
                _ => return Err(SignerError::MissingPrevout(index)),
            }
        }
        self.sign(tx, prevouts, secp).map(|_| ())
    }
}
