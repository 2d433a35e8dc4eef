// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory store backend for tests.
//!
//! Mirrors the PostgreSQL backend's conditional-write semantics behind a
//! single mutex, and adds seeding helpers plus failure injection so
//! best-effort paths can be exercised.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::{
    AssignmentUpdate, Booking, DeviceToken, FinanceRequest, NewNotification, NewProfile,
    NewWalletTransaction, Profile, ProfileUpdate, Store, Wallet, WalletTransaction,
    is_upcoming_status,
};

/// Stored notification row with insertion order preserved.
#[derive(Debug, Clone)]
pub struct StoredNotification {
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

#[derive(Debug, Clone)]
struct Ticket {
    status: String,
    resolution: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    profiles: HashMap<String, Profile>,
    wallets: HashMap<String, Wallet>,
    wallet_txs: Vec<WalletTransaction>,
    next_tx_id: i64,
    finance_requests: HashMap<String, FinanceRequest>,
    bookings: HashMap<String, Booking>,
    notifications: Vec<StoredNotification>,
    device_tokens: Vec<DeviceToken>,
    system_config: HashMap<String, serde_json::Value>,
    tickets: HashMap<String, Ticket>,
    catalog: HashMap<(String, String), (Option<String>, serde_json::Value)>,
    item_links: HashSet<(String, String)>,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    /// When set, `insert_notifications` fails (best-effort path testing).
    pub fail_notifications: AtomicBool,
    /// When set, candidate reads fail (scanner abort testing).
    pub fail_candidate_reads: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a profile.
    pub async fn seed_profile(&self, profile: Profile) {
        let mut inner = self.inner.lock().await;
        inner.profiles.insert(profile.user_id.clone(), profile);
    }

    /// Seed a finance request.
    pub async fn seed_finance_request(&self, request: FinanceRequest) {
        let mut inner = self.inner.lock().await;
        inner
            .finance_requests
            .insert(request.request_id.clone(), request);
    }

    /// Seed a booking.
    pub async fn seed_booking(&self, booking: Booking) {
        let mut inner = self.inner.lock().await;
        inner.bookings.insert(booking.booking_id.clone(), booking);
    }

    /// Seed a support ticket.
    pub async fn seed_ticket(&self, ticket_id: &str, status: &str) {
        let mut inner = self.inner.lock().await;
        inner.tickets.insert(
            ticket_id.to_string(),
            Ticket {
                status: status.to_string(),
                resolution: None,
            },
        );
    }

    /// Seed a device token.
    pub async fn seed_device_token(&self, user_id: &str, token: &str) {
        let mut inner = self.inner.lock().await;
        inner.device_tokens.push(DeviceToken {
            user_id: user_id.to_string(),
            token: token.to_string(),
        });
    }

    /// Snapshot of inserted notifications, in insertion order.
    pub async fn notifications(&self) -> Vec<StoredNotification> {
        self.inner.lock().await.notifications.clone()
    }

    /// Snapshot of the full ledger, in insertion order.
    pub async fn ledger(&self) -> Vec<WalletTransaction> {
        self.inner.lock().await.wallet_txs.clone()
    }

    /// Ticket status/resolution for assertions.
    pub async fn ticket(&self, ticket_id: &str) -> Option<(String, Option<String>)> {
        self.inner
            .lock()
            .await
            .tickets
            .get(ticket_id)
            .map(|t| (t.status.clone(), t.resolution.clone()))
    }

    /// System config value for assertions.
    pub async fn system_config(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.lock().await.system_config.get(key).cloned()
    }

    /// Whether an item <-> option-group link exists.
    pub async fn has_item_link(&self, item_id: &str, group_id: &str) -> bool {
        self.inner
            .lock()
            .await
            .item_links
            .contains(&(item_id.to_string(), group_id.to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        Ok(self.inner.lock().await.profiles.get(user_id).cloned())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.profiles.insert(
            profile.user_id.clone(),
            Profile {
                user_id: profile.user_id.clone(),
                role: profile.role.clone(),
                email: profile.email.clone(),
                display_name: profile.display_name.clone(),
                phone: profile.phone.clone(),
                approval_status: "approved".to_string(),
                rejection_reason: None,
                suspended: false,
                is_online: false,
                is_available: false,
                vehicle_type: None,
                deletion_requested: false,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn set_approval_status(
        &self,
        user_id: &str,
        status: &str,
        reason: Option<&str>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.profiles.get_mut(user_id) {
            Some(profile) => {
                profile.approval_status = status.to_string();
                profile.rejection_reason = reason.map(str::to_string);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_suspended(&self, user_id: &str, suspended: bool) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.profiles.get_mut(user_id) {
            Some(profile) => {
                profile.suspended = suspended;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_online(&self, user_id: &str, online: bool) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.profiles.get_mut(user_id) {
            Some(profile) => {
                profile.is_online = online;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.profiles.get_mut(user_id) {
            Some(profile) => {
                if let Some(email) = &update.email {
                    profile.email = Some(email.clone());
                }
                if let Some(name) = &update.display_name {
                    profile.display_name = Some(name.clone());
                }
                if let Some(phone) = &update.phone {
                    profile.phone = Some(phone.clone());
                }
                if let Some(vehicle) = &update.vehicle_type {
                    profile.vehicle_type = Some(vehicle.clone());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_deletion_requested(&self, user_id: &str, requested: bool) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.profiles.get_mut(user_id) {
            Some(profile) => {
                profile.deletion_requested = requested;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_profile(&self, user_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner.profiles.remove(user_id).is_some())
    }

    async fn list_user_emails(&self, role: Option<&str>) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        let mut emails: Vec<String> = inner
            .profiles
            .values()
            .filter(|p| role.is_none_or(|r| p.role == r))
            .filter_map(|p| p.email.clone())
            .collect();
        emails.sort();
        Ok(emails)
    }

    async fn online_drivers(
        &self,
        vehicle_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Profile>> {
        let inner = self.inner.lock().await;
        let mut drivers: Vec<Profile> = inner
            .profiles
            .values()
            .filter(|p| {
                p.role == "driver"
                    && p.approval_status == "approved"
                    && !p.suspended
                    && p.is_online
                    && p.is_available
                    && vehicle_type.is_none_or(|v| p.vehicle_type.as_deref() == Some(v))
            })
            .cloned()
            .collect();
        drivers.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        drivers.truncate(limit as usize);
        Ok(drivers)
    }

    async fn device_tokens(&self, user_ids: &[String]) -> Result<Vec<DeviceToken>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .device_tokens
            .iter()
            .filter(|t| user_ids.contains(&t.user_id))
            .cloned()
            .collect())
    }

    async fn get_wallet(&self, account_id: &str) -> Result<Option<Wallet>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .wallets
            .values()
            .find(|w| w.account_id == account_id)
            .cloned())
    }

    async fn ensure_wallet(&self, account_id: &str) -> Result<Wallet> {
        let mut inner = self.inner.lock().await;
        if let Some(wallet) = inner.wallets.values().find(|w| w.account_id == account_id) {
            return Ok(wallet.clone());
        }
        let wallet = Wallet {
            wallet_id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            balance: Decimal::ZERO,
        };
        inner
            .wallets
            .insert(wallet.wallet_id.clone(), wallet.clone());
        Ok(wallet)
    }

    async fn credit_wallet(&self, wallet_id: &str, delta: Decimal) -> Result<Decimal> {
        let mut inner = self.inner.lock().await;
        let wallet = inner.wallets.get_mut(wallet_id).ok_or(Error::NotFound {
            entity: "wallet",
            id: wallet_id.to_string(),
        })?;
        wallet.balance += delta;
        Ok(wallet.balance)
    }

    async fn insert_wallet_transaction(&self, tx: &NewWalletTransaction) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        // Same conditional write as the unique-key insert on Postgres:
        // the duplicate check and the append happen under one lock.
        if let Some(key) = tx.idempotency_key.as_deref()
            && inner
                .wallet_txs
                .iter()
                .any(|existing| existing.idempotency_key.as_deref() == Some(key))
        {
            return Ok(false);
        }
        inner.next_tx_id += 1;
        let id = inner.next_tx_id;
        inner.wallet_txs.push(WalletTransaction {
            id,
            wallet_id: tx.wallet_id.clone(),
            amount: tx.amount,
            kind: tx.kind.clone(),
            description: tx.description.clone(),
            idempotency_key: tx.idempotency_key.clone(),
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn list_wallet_transactions(
        &self,
        wallet_id: &str,
        limit: i64,
    ) -> Result<Vec<WalletTransaction>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<WalletTransaction> = inner
            .wallet_txs
            .iter()
            .filter(|tx| tx.wallet_id == wallet_id)
            .cloned()
            .collect();
        rows.reverse();
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn get_finance_request(&self, request_id: &str) -> Result<Option<FinanceRequest>> {
        Ok(self
            .inner
            .lock()
            .await
            .finance_requests
            .get(request_id)
            .cloned())
    }

    async fn settle_finance_request(
        &self,
        request_id: &str,
        terminal_status: &str,
        admin_note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.finance_requests.get_mut(request_id) {
            Some(request) if request.status == "pending" => {
                request.status = terminal_status.to_string();
                request.admin_note = admin_note.map(str::to_string);
                request.processed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_booking(&self, booking_id: &str) -> Result<Option<Booking>> {
        Ok(self.inner.lock().await.bookings.get(booking_id).cloned())
    }

    async fn assign_booking(
        &self,
        booking_id: &str,
        update: &AssignmentUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.bookings.get_mut(booking_id) {
            Some(booking) => {
                booking.driver_id = Some(update.driver_id.clone());
                booking.status = update.status.clone();
                if let Some(vehicle) = &update.vehicle_type {
                    booking.vehicle_type = Some(vehicle.clone());
                }
                if let Some(price) = update.price {
                    booking.price = Some(price);
                }
                booking.assigned_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear_booking_assignment(&self, booking_id: &str, status: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.bookings.get_mut(booking_id) {
            Some(booking) => {
                booking.driver_id = None;
                booking.assigned_at = None;
                booking.status = status.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_booking_status(
        &self,
        booking_id: &str,
        status: &str,
        cancel_reason: Option<&str>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.bookings.get_mut(booking_id) {
            Some(booking) => {
                booking.status = status.to_string();
                if let Some(reason) = cancel_reason {
                    booking.cancel_reason = Some(reason.to_string());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reminder_candidates(
        &self,
        now: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Booking>> {
        if self.fail_candidate_reads.load(Ordering::SeqCst) {
            return Err(Error::Other("injected candidate read failure".to_string()));
        }
        let inner = self.inner.lock().await;
        let mut candidates: Vec<Booking> = inner
            .bookings
            .values()
            .filter(|b| {
                is_upcoming_status(&b.status)
                    && b.scheduled_reminder_sent_at.is_none()
                    && b.scheduled_at
                        .is_some_and(|at| at >= now && at <= window_end)
            })
            .cloned()
            .collect();
        candidates.sort_by_key(|b| b.scheduled_at);
        candidates.truncate(limit as usize);
        Ok(candidates)
    }

    async fn release_candidates(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Booking>> {
        if self.fail_candidate_reads.load(Ordering::SeqCst) {
            return Err(Error::Other("injected candidate read failure".to_string()));
        }
        let inner = self.inner.lock().await;
        let mut candidates: Vec<Booking> = inner
            .bookings
            .values()
            .filter(|b| {
                is_upcoming_status(&b.status)
                    && b.scheduled_release_processed_at.is_none()
                    && b.scheduled_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        candidates.sort_by_key(|b| b.scheduled_at);
        candidates.truncate(limit as usize);
        Ok(candidates)
    }

    async fn mark_reminders_sent(
        &self,
        booking_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut marked = 0;
        for id in booking_ids {
            if let Some(booking) = inner.bookings.get_mut(id)
                && booking.scheduled_reminder_sent_at.is_none()
            {
                booking.scheduled_reminder_sent_at = Some(now);
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn mark_releases_processed(
        &self,
        booking_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut marked = 0;
        for id in booking_ids {
            if let Some(booking) = inner.bookings.get_mut(id)
                && booking.scheduled_release_processed_at.is_none()
            {
                booking.scheduled_release_processed_at = Some(now);
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn insert_notifications(&self, rows: &[NewNotification]) -> Result<u64> {
        if self.fail_notifications.load(Ordering::SeqCst) {
            return Err(Error::Other(
                "injected notification insert failure".to_string(),
            ));
        }
        let mut inner = self.inner.lock().await;
        for row in rows {
            inner.notifications.push(StoredNotification {
                user_id: row.user_id.clone(),
                title: row.title.clone(),
                body: row.body.clone(),
                kind: row.kind.clone(),
                data: row.data.clone(),
            });
        }
        Ok(rows.len() as u64)
    }

    async fn upsert_system_config(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.system_config.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn update_ticket(
        &self,
        ticket_id: &str,
        status: &str,
        resolution: Option<&str>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.tickets.get_mut(ticket_id) {
            Some(ticket) => {
                ticket.status = status.to_string();
                if let Some(resolution) = resolution {
                    ticket.resolution = Some(resolution.to_string());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn put_catalog_record(
        &self,
        kind: &str,
        record_id: &str,
        merchant_id: Option<&str>,
        data: &serde_json::Value,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.catalog.insert(
            (kind.to_string(), record_id.to_string()),
            (merchant_id.map(str::to_string), data.clone()),
        );
        Ok(())
    }

    async fn get_catalog_record(
        &self,
        kind: &str,
        record_id: &str,
    ) -> Result<Option<serde_json::Value>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .catalog
            .get(&(kind.to_string(), record_id.to_string()))
            .map(|(_, data)| data.clone()))
    }

    async fn delete_catalog_record(&self, kind: &str, record_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .catalog
            .remove(&(kind.to_string(), record_id.to_string()))
            .is_some())
    }

    async fn delete_option_group(&self, group_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        for ((kind, _), (_, data)) in inner.catalog.iter_mut() {
            if kind == "menu_option" && data.get("group_id").and_then(|v| v.as_str()) == Some(group_id)
            {
                data["group_id"] = serde_json::Value::Null;
            }
        }
        inner.item_links.retain(|(_, g)| g != group_id);
        Ok(inner
            .catalog
            .remove(&("option_group".to_string(), group_id.to_string()))
            .is_some())
    }

    async fn link_item_option_group(
        &self,
        item_id: &str,
        group_id: &str,
        linked: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let key = (item_id.to_string(), group_id.to_string());
        if linked {
            inner.item_links.insert(key);
        } else {
            inner.item_links.remove(&key);
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
