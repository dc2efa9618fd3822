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

//! Lightning payments

use super::Ledger;
use crate::database::{BatchDatabase, DatabaseUtils};
use crate::error::Error;
use crate::types::{LightningPayment, PaymentKey};

impl<D: BatchDatabase> Ledger<D> {
    /// Insert or replace a payment
    pub async fn record_payment(&self, payment: LightningPayment) -> Result<(), Error> {
        let mut batch = self.database.begin_batch();
        batch.upsert_payment(payment);
        self.database.commit_batch(batch)
    }

    /// Mark a payment as failed or complete
    ///
    /// Unknown payments are ignored, and so are failures of completed payments. `preimage` is
    /// only stored if the payment doesn't have one yet.
    pub async fn update_payment(
        &self,
        key: PaymentKey,
        failed: bool,
        preimage: Option<String>,
    ) -> Result<(), Error> {
        log::debug!(
            "Payment {} of wallet {} {}",
            key.payment_hash,
            key.wallet_id,
            if failed { "failed" } else { "completed" }
        );

        let mut batch = self.database.begin_batch();
        batch.update_payment(key, failed, preimage);
        self.database.commit_batch(batch)
    }

    /// Payments of a wallet
    pub async fn payments(&self, wallet_id: &str) -> Result<Vec<LightningPayment>, Error> {
        self.database.iter_payments(wallet_id)
    }
}
