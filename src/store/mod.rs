// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interface and backends for fleetgate.
//!
//! The control plane never opens multi-statement transactions; every
//! exactly-once guarantee is expressed as a single conditional write
//! (guarded transition or sentinel stamp) that the backend applies
//! atomically per row.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryStore;
pub use self::postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::Result;

/// Account profile row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Profile {
    /// Identity-provider subject id.
    pub user_id: String,
    /// Role: customer, driver, merchant, admin.
    pub role: String,
    /// Contact email.
    pub email: Option<String>,
    /// Display name.
    pub display_name: Option<String>,
    /// Contact phone.
    pub phone: Option<String>,
    /// Approval status: pending, approved, rejected, suspended.
    pub approval_status: String,
    /// Reason recorded on rejection.
    pub rejection_reason: Option<String>,
    /// Whether the account is suspended.
    pub suspended: bool,
    /// Whether the user is currently online.
    pub is_online: bool,
    /// Whether a driver is accepting jobs.
    pub is_available: bool,
    /// Driver vehicle type (bike, car, van, ...).
    pub vehicle_type: Option<String>,
    /// Whether the user asked for account deletion.
    pub deletion_requested: bool,
    /// When the profile was created.
    pub created_at: DateTime<Utc>,
}

/// Fields for administrative user creation.
#[derive(Debug, Clone)]
pub struct NewProfile {
    /// Identity id for the new account.
    pub user_id: String,
    /// Role to create the account with.
    pub role: String,
    /// Contact email.
    pub email: Option<String>,
    /// Display name.
    pub display_name: Option<String>,
    /// Contact phone.
    pub phone: Option<String>,
}

/// Partial profile edit; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    /// New email.
    pub email: Option<String>,
    /// New display name.
    pub display_name: Option<String>,
    /// New phone.
    pub phone: Option<String>,
    /// New vehicle type (drivers).
    pub vehicle_type: Option<String>,
}

/// Wallet row, one per account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Wallet {
    /// Wallet identifier.
    pub wallet_id: String,
    /// Owning account.
    pub account_id: String,
    /// Running balance.
    pub balance: Decimal,
}

/// Immutable ledger entry to append.
#[derive(Debug, Clone)]
pub struct NewWalletTransaction {
    /// Wallet the entry belongs to.
    pub wallet_id: String,
    /// Signed amount.
    pub amount: Decimal,
    /// Entry kind: topup, refund, admin_adjustment, ...
    pub kind: String,
    /// Audit description.
    pub description: String,
    /// Optional replay-protection key; unique across the ledger.
    pub idempotency_key: Option<String>,
}

/// Ledger entry as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WalletTransaction {
    /// Database id.
    pub id: i64,
    /// Wallet the entry belongs to.
    pub wallet_id: String,
    /// Signed amount.
    pub amount: Decimal,
    /// Entry kind.
    pub kind: String,
    /// Audit description.
    pub description: String,
    /// Replay-protection key if one was supplied.
    pub idempotency_key: Option<String>,
    /// When the entry was appended.
    pub created_at: DateTime<Utc>,
}

/// Withdrawal or topup request.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FinanceRequest {
    /// Request identifier.
    pub request_id: String,
    /// Requesting account.
    pub requester_id: String,
    /// Request kind: withdrawal or topup.
    pub kind: String,
    /// Requested amount.
    pub amount: Decimal,
    /// Status: pending, completed, rejected.
    pub status: String,
    /// Admin note recorded on settlement.
    pub admin_note: Option<String>,
    /// When the request left pending.
    pub processed_at: Option<DateTime<Utc>>,
}

/// Booking (order) row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Booking {
    /// Booking identifier.
    pub booking_id: String,
    /// Customer account.
    pub customer_id: String,
    /// Merchant account for merchant-fulfilled service types.
    pub merchant_id: Option<String>,
    /// Assigned driver, if any.
    pub driver_id: Option<String>,
    /// Service type: ride, parcel, food, shop.
    pub service_type: String,
    /// Requested vehicle type for ride bookings.
    pub vehicle_type: Option<String>,
    /// Booking status.
    pub status: String,
    /// Order price, used for force-cancel refunds.
    pub price: Option<Decimal>,
    /// Cancellation reason, if cancelled.
    pub cancel_reason: Option<String>,
    /// Scheduled pickup/delivery time for time-bound bookings.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Sentinel stamp: reminder phase already handled this booking.
    pub scheduled_reminder_sent_at: Option<DateTime<Utc>>,
    /// Sentinel stamp: release phase already handled this booking.
    pub scheduled_release_processed_at: Option<DateTime<Utc>>,
    /// When the current driver was assigned.
    pub assigned_at: Option<DateTime<Utc>>,
}

/// Driver/status overwrite applied by assign and reassign.
#[derive(Debug, Clone)]
pub struct AssignmentUpdate {
    /// Driver to assign.
    pub driver_id: String,
    /// Status to set (driver_accepted for admin assignment).
    pub status: String,
    /// Optional admin-supplied vehicle type override.
    pub vehicle_type: Option<String>,
    /// Optional admin-supplied price override.
    pub price: Option<Decimal>,
}

/// Notification row to fan out.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NewNotification {
    /// Target user.
    pub user_id: String,
    /// Title line.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Notification type tag.
    pub kind: String,
    /// Structured payload.
    pub data: Option<serde_json::Value>,
}

/// Registered push token.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeviceToken {
    /// Owning user.
    pub user_id: String,
    /// Opaque push token.
    pub token: String,
}

/// Persistence interface used by all handlers and the scanner.
#[async_trait]
pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    /// Fetch a profile by user id.
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>>;

    /// Insert a profile created administratively.
    async fn insert_profile(&self, profile: &NewProfile) -> Result<()>;

    /// Set approval status and rejection reason. Returns whether a row changed.
    async fn set_approval_status(
        &self,
        user_id: &str,
        status: &str,
        reason: Option<&str>,
    ) -> Result<bool>;

    /// Set or clear the suspended flag.
    async fn set_suspended(&self, user_id: &str, suspended: bool) -> Result<bool>;

    /// Set the online flag.
    async fn set_online(&self, user_id: &str, online: bool) -> Result<bool>;

    /// Apply a partial profile edit.
    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<bool>;

    /// Set or clear the deletion-requested flag.
    async fn set_deletion_requested(&self, user_id: &str, requested: bool) -> Result<bool>;

    /// Delete a profile row.
    async fn delete_profile(&self, user_id: &str) -> Result<bool>;

    /// List account emails, optionally filtered by role.
    async fn list_user_emails(&self, role: Option<&str>) -> Result<Vec<String>>;

    /// Currently-online, available drivers, optionally filtered by
    /// vehicle type, capped at `limit`.
    async fn online_drivers(&self, vehicle_type: Option<&str>, limit: i64)
    -> Result<Vec<Profile>>;

    /// Push tokens registered for the given users.
    async fn device_tokens(&self, user_ids: &[String]) -> Result<Vec<DeviceToken>>;

    // ------------------------------------------------------------------
    // Wallet ledger
    // ------------------------------------------------------------------

    /// Fetch a wallet by owning account.
    async fn get_wallet(&self, account_id: &str) -> Result<Option<Wallet>>;

    /// Fetch-or-create the wallet for an account. Concurrent first use
    /// must resolve to a single wallet row.
    async fn ensure_wallet(&self, account_id: &str) -> Result<Wallet>;

    /// Atomically add `delta` to a wallet balance and return the new
    /// balance. This is a single in-store increment, not read-then-write.
    async fn credit_wallet(&self, wallet_id: &str, delta: Decimal) -> Result<Decimal>;

    /// Append an immutable ledger entry. When the entry carries an
    /// idempotency key that is already present, nothing is written and
    /// `false` is returned; this conditional insert is the replay gate,
    /// atomic at the store like every other guarded write.
    async fn insert_wallet_transaction(&self, tx: &NewWalletTransaction) -> Result<bool>;

    /// Ledger entries for a wallet, newest first.
    async fn list_wallet_transactions(
        &self,
        wallet_id: &str,
        limit: i64,
    ) -> Result<Vec<WalletTransaction>>;

    // ------------------------------------------------------------------
    // Finance requests
    // ------------------------------------------------------------------

    /// Fetch a withdrawal/topup request.
    async fn get_finance_request(&self, request_id: &str) -> Result<Option<FinanceRequest>>;

    /// Guarded transition pending -> terminal. Returns true when exactly
    /// one row changed; false means the request was already settled.
    async fn settle_finance_request(
        &self,
        request_id: &str,
        terminal_status: &str,
        admin_note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    // ------------------------------------------------------------------
    // Bookings
    // ------------------------------------------------------------------

    /// Fetch a booking by id.
    async fn get_booking(&self, booking_id: &str) -> Result<Option<Booking>>;

    /// Overwrite driver assignment, status and `assigned_at`.
    async fn assign_booking(
        &self,
        booking_id: &str,
        update: &AssignmentUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Clear driver and `assigned_at`, resetting status for a new
    /// assignment cycle.
    async fn clear_booking_assignment(&self, booking_id: &str, status: &str) -> Result<bool>;

    /// Set booking status, recording a cancellation reason if given.
    async fn set_booking_status(
        &self,
        booking_id: &str,
        status: &str,
        cancel_reason: Option<&str>,
    ) -> Result<bool>;

    /// Open scheduled bookings entering the reminder window:
    /// status in the upcoming set, no reminder stamp, and
    /// `scheduled_at` in `[now, window_end]`. Ordered by `scheduled_at`
    /// ascending, capped at `limit`.
    async fn reminder_candidates(
        &self,
        now: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Booking>>;

    /// Open scheduled bookings due for release: status in the upcoming
    /// set, no release stamp, `scheduled_at <= now`. Ordered by
    /// `scheduled_at` ascending, capped at `limit`.
    async fn release_candidates(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Booking>>;

    /// Stamp `scheduled_reminder_sent_at` on the given bookings in one
    /// batched update. Rows already stamped are skipped. Returns the
    /// number of rows stamped.
    async fn mark_reminders_sent(&self, booking_ids: &[String], now: DateTime<Utc>)
    -> Result<u64>;

    /// Stamp `scheduled_release_processed_at` on the given bookings in
    /// one batched update. Rows already stamped are skipped. Returns the
    /// number of rows stamped.
    async fn mark_releases_processed(
        &self,
        booking_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<u64>;

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Insert a batch of notification rows. Returns the number inserted.
    async fn insert_notifications(&self, rows: &[NewNotification]) -> Result<u64>;

    // ------------------------------------------------------------------
    // Platform records
    // ------------------------------------------------------------------

    /// Upsert a system configuration value.
    async fn upsert_system_config(&self, key: &str, value: &serde_json::Value) -> Result<()>;

    /// Update a support ticket's status and resolution.
    async fn update_ticket(
        &self,
        ticket_id: &str,
        status: &str,
        resolution: Option<&str>,
    ) -> Result<bool>;

    /// Upsert a catalog record (coupon, menu item, menu option, option
    /// group, banner).
    async fn put_catalog_record(
        &self,
        kind: &str,
        record_id: &str,
        merchant_id: Option<&str>,
        data: &serde_json::Value,
    ) -> Result<()>;

    /// Fetch a catalog record.
    async fn get_catalog_record(
        &self,
        kind: &str,
        record_id: &str,
    ) -> Result<Option<serde_json::Value>>;

    /// Delete a catalog record.
    async fn delete_catalog_record(&self, kind: &str, record_id: &str) -> Result<bool>;

    /// Delete an option group: detach its options, remove its item
    /// links, then delete the group record.
    async fn delete_option_group(&self, group_id: &str) -> Result<bool>;

    /// Create or remove an item <-> option-group link.
    async fn link_item_option_group(
        &self,
        item_id: &str,
        group_id: &str,
        linked: bool,
    ) -> Result<()>;

    /// Store connectivity check.
    async fn health_check(&self) -> Result<bool>;
}

/// Booking statuses the scanner treats as upcoming.
pub const UPCOMING_STATUSES: [&str; 3] = ["pending", "pending_merchant", "preparing"];

/// Whether a booking status is eligible for scanner phases.
pub fn is_upcoming_status(status: &str) -> bool {
    UPCOMING_STATUSES.contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upcoming_statuses() {
        assert!(is_upcoming_status("pending"));
        assert!(is_upcoming_status("pending_merchant"));
        assert!(is_upcoming_status("preparing"));
        assert!(!is_upcoming_status("driver_accepted"));
        assert!(!is_upcoming_status("cancelled"));
    }
}
