// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL backend for the fleetgate store.
//!
//! Every guarded transition is a single `UPDATE ... WHERE <expected
//! state>` whose `rows_affected` tells the caller whether the transition
//! actually happened. The sentinel stamps are written the same way, with
//! an `IS NULL` predicate, so overlapping scanner runs cannot double-mark.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;

use super::{
    AssignmentUpdate, Booking, DeviceToken, FinanceRequest, NewNotification, NewProfile,
    NewWalletTransaction, Profile, ProfileUpdate, Store, UPCOMING_STATUSES, Wallet,
    WalletTransaction,
};

/// Store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the schema (idempotent).
    pub async fn apply_schema(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/schema.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let profile = sqlx::query_as::<_, Profile>(
            r#"
            SELECT user_id, role, email, display_name, phone, approval_status,
                   rejection_reason, suspended, is_online, is_available,
                   vehicle_type, deletion_requested, created_at
            FROM profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(profile)
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO profiles (user_id, role, email, display_name, phone,
                                  approval_status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'approved', NOW(), NOW())
            "#,
        )
        .bind(&profile.user_id)
        .bind(&profile.role)
        .bind(&profile.email)
        .bind(&profile.display_name)
        .bind(&profile.phone)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_approval_status(
        &self,
        user_id: &str,
        status: &str,
        reason: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET approval_status = $2,
                rejection_reason = $3,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(status)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_suspended(&self, user_id: &str, suspended: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE profiles SET suspended = $2, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(suspended)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_online(&self, user_id: &str, online: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE profiles SET is_online = $2, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(online)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET email = COALESCE($2, email),
                display_name = COALESCE($3, display_name),
                phone = COALESCE($4, phone),
                vehicle_type = COALESCE($5, vehicle_type),
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(&update.email)
        .bind(&update.display_name)
        .bind(&update.phone)
        .bind(&update.vehicle_type)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_deletion_requested(&self, user_id: &str, requested: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE profiles SET deletion_requested = $2, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(requested)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_profile(&self, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM profiles WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_user_emails(&self, role: Option<&str>) -> Result<Vec<String>> {
        let emails = sqlx::query_scalar::<_, String>(
            r#"
            SELECT email FROM profiles
            WHERE email IS NOT NULL
              AND ($1::TEXT IS NULL OR role = $1)
            ORDER BY email
            "#,
        )
        .bind(role)
        .fetch_all(&self.pool)
        .await?;

        Ok(emails)
    }

    async fn online_drivers(
        &self,
        vehicle_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Profile>> {
        let drivers = sqlx::query_as::<_, Profile>(
            r#"
            SELECT user_id, role, email, display_name, phone, approval_status,
                   rejection_reason, suspended, is_online, is_available,
                   vehicle_type, deletion_requested, created_at
            FROM profiles
            WHERE role = 'driver'
              AND approval_status = 'approved'
              AND NOT suspended
              AND is_online
              AND is_available
              AND ($1::TEXT IS NULL OR vehicle_type = $1)
            ORDER BY user_id
            LIMIT $2
            "#,
        )
        .bind(vehicle_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(drivers)
    }

    async fn device_tokens(&self, user_ids: &[String]) -> Result<Vec<DeviceToken>> {
        let tokens = sqlx::query_as::<_, DeviceToken>(
            "SELECT user_id, token FROM device_tokens WHERE user_id = ANY($1)",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(tokens)
    }

    async fn get_wallet(&self, account_id: &str) -> Result<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(
            "SELECT wallet_id, account_id, balance FROM wallets WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn ensure_wallet(&self, account_id: &str) -> Result<Wallet> {
        // Conflict-free first use: two racing creators resolve to the
        // same row via the unique account constraint.
        sqlx::query(
            r#"
            INSERT INTO wallets (wallet_id, account_id, balance, created_at, updated_at)
            VALUES ($1, $2, 0, NOW(), NOW())
            ON CONFLICT (account_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        let wallet = sqlx::query_as::<_, Wallet>(
            "SELECT wallet_id, account_id, balance FROM wallets WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn credit_wallet(&self, wallet_id: &str, delta: Decimal) -> Result<Decimal> {
        // Single atomic increment; concurrent adjustments serialize at
        // the row and no delta is lost.
        let balance = sqlx::query_scalar::<_, Decimal>(
            r#"
            UPDATE wallets
            SET balance = balance + $2, updated_at = NOW()
            WHERE wallet_id = $1
            RETURNING balance
            "#,
        )
        .bind(wallet_id)
        .bind(delta)
        .fetch_one(&self.pool)
        .await?;

        Ok(balance)
    }

    async fn insert_wallet_transaction(&self, tx: &NewWalletTransaction) -> Result<bool> {
        // Concurrent duplicates race to this one statement; the unique
        // key lets exactly one of them insert. Entries without a key
        // never conflict.
        let result = sqlx::query(
            r#"
            INSERT INTO wallet_transactions (wallet_id, amount, kind, description,
                                             idempotency_key, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(&tx.wallet_id)
        .bind(tx.amount)
        .bind(&tx.kind)
        .bind(&tx.description)
        .bind(&tx.idempotency_key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_wallet_transactions(
        &self,
        wallet_id: &str,
        limit: i64,
    ) -> Result<Vec<WalletTransaction>> {
        let rows = sqlx::query_as::<_, WalletTransaction>(
            r#"
            SELECT id, wallet_id, amount, kind, description, idempotency_key, created_at
            FROM wallet_transactions
            WHERE wallet_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(wallet_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn get_finance_request(&self, request_id: &str) -> Result<Option<FinanceRequest>> {
        let request = sqlx::query_as::<_, FinanceRequest>(
            r#"
            SELECT request_id, requester_id, kind, amount, status, admin_note, processed_at
            FROM finance_requests
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(request)
    }

    async fn settle_finance_request(
        &self,
        request_id: &str,
        terminal_status: &str,
        admin_note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE finance_requests
            SET status = $2, admin_note = $3, processed_at = $4
            WHERE request_id = $1 AND status = 'pending'
            "#,
        )
        .bind(request_id)
        .bind(terminal_status)
        .bind(admin_note)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_booking(&self, booking_id: &str) -> Result<Option<Booking>> {
        let booking = sqlx::query_as::<_, Booking>(
            r#"
            SELECT booking_id, customer_id, merchant_id, driver_id, service_type,
                   vehicle_type, status, price, cancel_reason, scheduled_at,
                   scheduled_reminder_sent_at, scheduled_release_processed_at,
                   assigned_at
            FROM bookings
            WHERE booking_id = $1
            "#,
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(booking)
    }

    async fn assign_booking(
        &self,
        booking_id: &str,
        update: &AssignmentUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET driver_id = $2,
                status = $3,
                vehicle_type = COALESCE($4, vehicle_type),
                price = COALESCE($5, price),
                assigned_at = $6,
                updated_at = NOW()
            WHERE booking_id = $1
            "#,
        )
        .bind(booking_id)
        .bind(&update.driver_id)
        .bind(&update.status)
        .bind(&update.vehicle_type)
        .bind(update.price)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_booking_assignment(&self, booking_id: &str, status: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET driver_id = NULL,
                assigned_at = NULL,
                status = $2,
                updated_at = NOW()
            WHERE booking_id = $1
            "#,
        )
        .bind(booking_id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_booking_status(
        &self,
        booking_id: &str,
        status: &str,
        cancel_reason: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = $2,
                cancel_reason = COALESCE($3, cancel_reason),
                updated_at = NOW()
            WHERE booking_id = $1
            "#,
        )
        .bind(booking_id)
        .bind(status)
        .bind(cancel_reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reminder_candidates(
        &self,
        now: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Booking>> {
        let bookings = sqlx::query_as::<_, Booking>(
            r#"
            SELECT booking_id, customer_id, merchant_id, driver_id, service_type,
                   vehicle_type, status, price, cancel_reason, scheduled_at,
                   scheduled_reminder_sent_at, scheduled_release_processed_at,
                   assigned_at
            FROM bookings
            WHERE scheduled_at IS NOT NULL
              AND status = ANY($1)
              AND scheduled_reminder_sent_at IS NULL
              AND scheduled_at >= $2
              AND scheduled_at <= $3
            ORDER BY scheduled_at ASC
            LIMIT $4
            "#,
        )
        .bind(&UPCOMING_STATUSES[..])
        .bind(now)
        .bind(window_end)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(bookings)
    }

    async fn release_candidates(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Booking>> {
        let bookings = sqlx::query_as::<_, Booking>(
            r#"
            SELECT booking_id, customer_id, merchant_id, driver_id, service_type,
                   vehicle_type, status, price, cancel_reason, scheduled_at,
                   scheduled_reminder_sent_at, scheduled_release_processed_at,
                   assigned_at
            FROM bookings
            WHERE scheduled_at IS NOT NULL
              AND status = ANY($1)
              AND scheduled_release_processed_at IS NULL
              AND scheduled_at <= $2
            ORDER BY scheduled_at ASC
            LIMIT $3
            "#,
        )
        .bind(&UPCOMING_STATUSES[..])
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(bookings)
    }

    async fn mark_reminders_sent(
        &self,
        booking_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET scheduled_reminder_sent_at = $2, updated_at = NOW()
            WHERE booking_id = ANY($1)
              AND scheduled_reminder_sent_at IS NULL
            "#,
        )
        .bind(booking_ids)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_releases_processed(
        &self,
        booking_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET scheduled_release_processed_at = $2, updated_at = NOW()
            WHERE booking_id = ANY($1)
              AND scheduled_release_processed_at IS NULL
            "#,
        )
        .bind(booking_ids)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_notifications(&self, rows: &[NewNotification]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let user_ids: Vec<&str> = rows.iter().map(|r| r.user_id.as_str()).collect();
        let titles: Vec<&str> = rows.iter().map(|r| r.title.as_str()).collect();
        let bodies: Vec<&str> = rows.iter().map(|r| r.body.as_str()).collect();
        let kinds: Vec<&str> = rows.iter().map(|r| r.kind.as_str()).collect();
        let data: Vec<serde_json::Value> = rows
            .iter()
            .map(|r| r.data.clone().unwrap_or(serde_json::Value::Null))
            .collect();

        let result = sqlx::query(
            r#"
            INSERT INTO notifications (user_id, title, body, kind, data, created_at)
            SELECT user_id, title, body, kind, data, NOW()
            FROM UNNEST($1::TEXT[], $2::TEXT[], $3::TEXT[], $4::TEXT[], $5::JSONB[])
                AS t(user_id, title, body, kind, data)
            "#,
        )
        .bind(&user_ids)
        .bind(&titles)
        .bind(&bodies)
        .bind(&kinds)
        .bind(&data)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn upsert_system_config(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO system_config (config_key, config_value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (config_key) DO UPDATE SET
                config_value = $2,
                updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_ticket(
        &self,
        ticket_id: &str,
        status: &str,
        resolution: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE support_tickets
            SET status = $2,
                resolution = COALESCE($3, resolution),
                updated_at = NOW()
            WHERE ticket_id = $1
            "#,
        )
        .bind(ticket_id)
        .bind(status)
        .bind(resolution)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn put_catalog_record(
        &self,
        kind: &str,
        record_id: &str,
        merchant_id: Option<&str>,
        data: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO catalog_records (kind, record_id, merchant_id, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (kind, record_id) DO UPDATE SET
                merchant_id = COALESCE($3, catalog_records.merchant_id),
                data = $4,
                updated_at = NOW()
            "#,
        )
        .bind(kind)
        .bind(record_id)
        .bind(merchant_id)
        .bind(data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_catalog_record(
        &self,
        kind: &str,
        record_id: &str,
    ) -> Result<Option<serde_json::Value>> {
        let data = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT data FROM catalog_records WHERE kind = $1 AND record_id = $2",
        )
        .bind(kind)
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(data)
    }

    async fn delete_catalog_record(&self, kind: &str, record_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM catalog_records WHERE kind = $1 AND record_id = $2")
            .bind(kind)
            .bind(record_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_option_group(&self, group_id: &str) -> Result<bool> {
        // Detach first, then delete. Each statement is independent; a
        // failure mid-sequence leaves detached options, which is safe.
        sqlx::query(
            r#"
            UPDATE catalog_records
            SET data = jsonb_set(data, '{group_id}', 'null'), updated_at = NOW()
            WHERE kind = 'menu_option' AND data->>'group_id' = $1
            "#,
        )
        .bind(group_id)
        .execute(&self.pool)
        .await?;

        sqlx::query("DELETE FROM item_option_links WHERE group_id = $1")
            .bind(group_id)
            .execute(&self.pool)
            .await?;

        let result =
            sqlx::query("DELETE FROM catalog_records WHERE kind = 'option_group' AND record_id = $1")
                .bind(group_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn link_item_option_group(
        &self,
        item_id: &str,
        group_id: &str,
        linked: bool,
    ) -> Result<()> {
        if linked {
            sqlx::query(
                r#"
                INSERT INTO item_option_links (item_id, group_id)
                VALUES ($1, $2)
                ON CONFLICT (item_id, group_id) DO NOTHING
                "#,
            )
            .bind(item_id)
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query("DELETE FROM item_option_links WHERE item_id = $1 AND group_id = $2")
                .bind(item_id)
                .bind(group_id)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        let ok = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| true)?;

        Ok(ok)
    }
}
