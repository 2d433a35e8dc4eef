// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Best-effort notification fan-out.
//!
//! Rows missing a target, title or body are dropped; the remainder goes
//! to the store in one batched insert. Insert failures are logged and
//! swallowed so they never abort or reverse the mutation that produced
//! them.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::store::{NewNotification, Store};

/// Drop rows that cannot be delivered to anyone.
pub fn filter_valid(rows: Vec<NewNotification>) -> Vec<NewNotification> {
    rows.into_iter()
        .filter(|row| !row.user_id.is_empty() && !row.title.is_empty() && !row.body.is_empty())
        .collect()
}

/// Insert a batch of notifications, best-effort. Returns the number of
/// rows actually inserted (zero on failure).
pub async fn fan_out(store: &Arc<dyn Store>, rows: Vec<NewNotification>) -> u64 {
    let rows = filter_valid(rows);
    if rows.is_empty() {
        return 0;
    }

    match store.insert_notifications(&rows).await {
        Ok(inserted) => {
            debug!(count = inserted, "Notifications inserted");
            inserted
        }
        Err(e) => {
            warn!(error = %e, count = rows.len(), "Notification insert failed (ignored)");
            0
        }
    }
}
