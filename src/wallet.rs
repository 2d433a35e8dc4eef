// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wallet ledger.
//!
//! All balance changes flow through [`WalletLedger::adjust`]: one
//! immutable log entry followed by one atomic in-store increment.
//! Replay protection for log-only adjustments (admin adjust, manual
//! topup, force-cancel refund) is an explicit idempotency key enforced
//! by the conditional ledger insert itself, so concurrent duplicates
//! resolve at a single store statement; the financial request paths get
//! theirs from the guarded status transition instead.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::store::{NewWalletTransaction, Store, Wallet};

/// Outcome of a ledger adjustment.
#[derive(Debug, Clone)]
pub struct AdjustOutcome {
    /// True when an idempotency key matched an existing entry and
    /// nothing was changed.
    pub already_processed: bool,
    /// Balance after the adjustment (current balance on replay).
    pub new_balance: Decimal,
}

/// Ledger operations over the shared store.
pub struct WalletLedger {
    store: Arc<dyn Store>,
}

impl WalletLedger {
    /// Create a ledger over the shared store.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Fetch-or-create the wallet for an account.
    pub async fn ensure(&self, account_id: &str) -> Result<Wallet> {
        self.store.ensure_wallet(account_id).await
    }

    /// Append the ledger entry for a signed adjustment, then apply it to
    /// the account's wallet.
    ///
    /// The conditional ledger insert is the replay gate: of any number
    /// of concurrent duplicates sharing a key, exactly one appends the
    /// entry and goes on to move the balance. The crash window between
    /// append and increment leaves a reconcilable gap (ledger ahead of
    /// balance), never a double credit.
    pub async fn adjust(
        &self,
        account_id: &str,
        amount: Decimal,
        kind: &str,
        description: &str,
        idempotency_key: Option<&str>,
    ) -> Result<AdjustOutcome> {
        let wallet = self.store.ensure_wallet(account_id).await?;

        let inserted = self
            .store
            .insert_wallet_transaction(&NewWalletTransaction {
                wallet_id: wallet.wallet_id.clone(),
                amount,
                kind: kind.to_string(),
                description: description.to_string(),
                idempotency_key: idempotency_key.map(str::to_string),
            })
            .await?;
        if !inserted {
            let balance = self
                .store
                .get_wallet(account_id)
                .await?
                .map(|w| w.balance)
                .unwrap_or(Decimal::ZERO);
            info!(account_id, key = idempotency_key, "Duplicate wallet adjustment skipped");
            return Ok(AdjustOutcome {
                already_processed: true,
                new_balance: balance,
            });
        }

        let new_balance = self.store.credit_wallet(&wallet.wallet_id, amount).await?;

        info!(
            account_id,
            wallet_id = %wallet.wallet_id,
            amount = %amount,
            kind,
            "Wallet adjusted"
        );

        Ok(AdjustOutcome {
            already_processed: false,
            new_balance,
        })
    }
}
