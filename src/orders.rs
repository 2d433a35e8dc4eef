// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Order workflow: assignment, reassignment, cancellation, rebroadcast.
//!
//! Reassignment is the one transition with a domain precondition (no
//! self-reassignment); everything else is a direct admin override. The
//! force-cancel refund runs before the status transition — the store has
//! no cross-statement transactions, so a crash between the two steps
//! leaves a refunded-but-open booking for manual reconciliation.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use crate::error::{Error, Result};
use crate::notify;
use crate::store::{AssignmentUpdate, Booking, NewNotification, Store};
use crate::wallet::WalletLedger;

/// Status set on admin (re)assignment.
pub const STATUS_DRIVER_ACCEPTED: &str = "driver_accepted";
/// Terminal cancellation status.
pub const STATUS_CANCELLED: &str = "cancelled";

/// Whether a service type is fulfilled through a merchant.
pub fn is_merchant_fulfilled(service_type: &str) -> bool {
    matches!(service_type, "food" | "shop")
}

/// Whether a service type is dispatched directly to drivers.
pub fn is_driver_dispatched(service_type: &str) -> bool {
    matches!(service_type, "ride" | "parcel")
}

/// Initial "awaiting pickup" status for a rebroadcast booking.
pub fn rebroadcast_status(service_type: &str) -> &'static str {
    if is_merchant_fulfilled(service_type) {
        "pending_merchant"
    } else {
        "pending"
    }
}

/// Outcome of a force-cancel.
#[derive(Debug, Clone)]
pub struct ForceCancelOutcome {
    /// Whether a refund was credited.
    pub refunded: bool,
    /// Amount refunded, if any.
    pub refund_amount: Option<Decimal>,
}

/// Order workflow over the shared store.
pub struct OrderWorkflow {
    store: Arc<dyn Store>,
    ledger: WalletLedger,
}

impl OrderWorkflow {
    /// Create a workflow over the shared store.
    pub fn new(store: Arc<dyn Store>) -> Self {
        let ledger = WalletLedger::new(store.clone());
        Self { store, ledger }
    }

    async fn booking(&self, booking_id: &str) -> Result<Booking> {
        self.store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                entity: "booking",
                id: booking_id.to_string(),
            })
    }

    /// Direct admin assignment: overwrite driver and stamp the time.
    pub async fn assign(&self, booking_id: &str, driver_id: &str) -> Result<()> {
        self.booking(booking_id).await?;

        let now = Utc::now();
        self.store
            .assign_booking(
                booking_id,
                &AssignmentUpdate {
                    driver_id: driver_id.to_string(),
                    status: STATUS_DRIVER_ACCEPTED.to_string(),
                    vehicle_type: None,
                    price: None,
                },
                now,
            )
            .await?;

        info!(booking_id, driver_id, "Order assigned");

        notify::fan_out(
            &self.store,
            vec![NewNotification {
                user_id: driver_id.to_string(),
                title: "New job assigned".to_string(),
                body: format!("You have been assigned to order {booking_id}"),
                kind: "order_assigned".to_string(),
                data: Some(serde_json::json!({
                    "booking_id": booking_id,
                    "status": STATUS_DRIVER_ACCEPTED,
                })),
            }],
        )
        .await;

        Ok(())
    }

    /// Reassign to a different driver and notify every affected party.
    pub async fn reassign(
        &self,
        booking_id: &str,
        new_driver_id: &str,
        vehicle_type: Option<String>,
        price: Option<Decimal>,
    ) -> Result<()> {
        let booking = self.booking(booking_id).await?;

        if booking.driver_id.as_deref() == Some(new_driver_id) {
            return Err(Error::Validation(format!(
                "driver '{new_driver_id}' is already assigned to booking '{booking_id}'"
            )));
        }

        let old_driver = booking.driver_id.clone();
        let now = Utc::now();

        self.store
            .assign_booking(
                booking_id,
                &AssignmentUpdate {
                    driver_id: new_driver_id.to_string(),
                    status: STATUS_DRIVER_ACCEPTED.to_string(),
                    vehicle_type,
                    price,
                },
                now,
            )
            .await?;

        info!(
            booking_id,
            old_driver = old_driver.as_deref().unwrap_or("-"),
            new_driver = new_driver_id,
            "Order reassigned"
        );

        // Shared correlation payload; each row adds its role tag.
        let correlation = serde_json::json!({
            "booking_id": booking_id,
            "old_driver_id": old_driver,
            "new_driver_id": new_driver_id,
            "status": STATUS_DRIVER_ACCEPTED,
            "timestamp": now.to_rfc3339(),
        });
        let with_role = |role: &str| {
            let mut data = correlation.clone();
            data["role"] = serde_json::Value::String(role.to_string());
            Some(data)
        };

        let mut rows = vec![NewNotification {
            user_id: new_driver_id.to_string(),
            title: "New job assigned".to_string(),
            body: format!("You have been assigned to order {booking_id}"),
            kind: "order_reassigned".to_string(),
            data: with_role("driver"),
        }];

        if let Some(previous) = old_driver.filter(|d| d != new_driver_id) {
            rows.push(NewNotification {
                user_id: previous,
                title: "Job reassigned".to_string(),
                body: format!("Order {booking_id} has been reassigned to another driver"),
                kind: "order_reassigned".to_string(),
                data: with_role("previous_driver"),
            });
        }

        rows.push(NewNotification {
            user_id: booking.customer_id.clone(),
            title: "Driver updated".to_string(),
            body: format!("A new driver has been assigned to your order {booking_id}"),
            kind: "order_reassigned".to_string(),
            data: with_role("customer"),
        });

        if is_merchant_fulfilled(&booking.service_type)
            && let Some(merchant) = booking.merchant_id.clone()
        {
            rows.push(NewNotification {
                user_id: merchant,
                title: "Driver updated".to_string(),
                body: format!("A new driver has been assigned for order {booking_id}"),
                kind: "order_reassigned".to_string(),
                data: with_role("merchant"),
            });
        }

        notify::fan_out(&self.store, rows).await;

        Ok(())
    }

    /// Cancel a booking with a reason.
    pub async fn cancel(&self, booking_id: &str, reason: &str) -> Result<()> {
        self.booking(booking_id).await?;
        self.store
            .set_booking_status(booking_id, STATUS_CANCELLED, Some(reason))
            .await?;
        info!(booking_id, reason, "Order cancelled");
        Ok(())
    }

    /// Cancel with an opt-in refund of the booking price.
    ///
    /// Refund first, then the status transition (short saga).
    pub async fn force_cancel(
        &self,
        booking_id: &str,
        reason: &str,
        refund: bool,
        idempotency_key: Option<&str>,
    ) -> Result<ForceCancelOutcome> {
        let booking = self.booking(booking_id).await?;

        let mut outcome = ForceCancelOutcome {
            refunded: false,
            refund_amount: None,
        };

        if refund {
            match booking.price {
                Some(price) if price > Decimal::ZERO => {
                    let adjust = self
                        .ledger
                        .adjust(
                            &booking.customer_id,
                            price,
                            "refund",
                            &format!("Refund for force-cancelled order {booking_id}"),
                            idempotency_key,
                        )
                        .await?;
                    outcome.refunded = !adjust.already_processed;
                    outcome.refund_amount = Some(price);
                }
                _ => {
                    // Refund requested but there is nothing refundable.
                    info!(booking_id, "Force-cancel refund skipped: no positive price");
                }
            }
        }

        self.store
            .set_booking_status(booking_id, STATUS_CANCELLED, Some(reason))
            .await?;
        info!(booking_id, reason, refunded = outcome.refunded, "Order force-cancelled");

        Ok(outcome)
    }

    /// Clear the assignment and reopen the booking for a new cycle.
    pub async fn rebroadcast(&self, booking_id: &str) -> Result<&'static str> {
        let booking = self.booking(booking_id).await?;
        let status = rebroadcast_status(&booking.service_type);
        self.store
            .clear_booking_assignment(booking_id, status)
            .await?;
        info!(booking_id, status, "Order rebroadcast");
        Ok(status)
    }
}
