// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scheduled dispatch scanner.
//!
//! Promotes time-bound bookings through two phases, each running scan,
//! notify, mark in that order:
//!
//! 1. Reminder: `scheduled_at` inside the upcoming window, customer and
//!    merchant get a heads-up.
//! 2. Release: `scheduled_at` has arrived, the booking enters live
//!    dispatch; for direct-dispatch service types online drivers are
//!    alerted as well.
//!
//! The sentinel stamps are the only idempotency mechanism. Marking after
//! notifying means a mark failure can replay notifications on the next
//! scan; the reverse order could silently drop a phase, which is worse.
//!
//! The scanner is stateless per invocation, so overlapping runs are
//! safe, and it never touches wallet or profile state.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::notify;
use crate::orders::is_driver_dispatched;
use crate::store::{Booking, NewNotification, Store};

/// Candidates fetched per phase per invocation.
const SCAN_BATCH: i64 = 300;
/// Driver alerts per released booking.
const DRIVER_NOTIFY_CAP: i64 = 120;

/// Per-invocation result counts.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DispatchSummary {
    /// Reminder candidates selected.
    pub reminders_scanned: u64,
    /// Reminder stamps written.
    pub reminders_marked: u64,
    /// Release candidates selected.
    pub releases_scanned: u64,
    /// Release stamps written.
    pub releases_marked: u64,
    /// Notification rows inserted across both phases.
    pub notifications_inserted: u64,
}

/// Scanner over the shared store.
pub struct DispatchScanner {
    store: Arc<dyn Store>,
    reminder_window: Duration,
    local_offset: FixedOffset,
}

impl DispatchScanner {
    /// Create a scanner with the given reminder window. Scheduled times
    /// in notification text are rendered in `local_offset`.
    pub fn new(
        store: Arc<dyn Store>,
        reminder_window_minutes: i64,
        local_offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            reminder_window: Duration::minutes(reminder_window_minutes),
            local_offset,
        }
    }

    /// Run both phases once.
    pub async fn run_once(&self) -> Result<DispatchSummary> {
        self.run_at(Utc::now()).await
    }

    async fn run_at(&self, now: DateTime<Utc>) -> Result<DispatchSummary> {
        let mut summary = DispatchSummary::default();
        self.reminder_phase(now, &mut summary).await?;
        self.release_phase(now, &mut summary).await?;

        info!(
            reminders_scanned = summary.reminders_scanned,
            reminders_marked = summary.reminders_marked,
            releases_scanned = summary.releases_scanned,
            releases_marked = summary.releases_marked,
            notifications = summary.notifications_inserted,
            "Dispatch scan complete"
        );
        Ok(summary)
    }

    async fn reminder_phase(
        &self,
        now: DateTime<Utc>,
        summary: &mut DispatchSummary,
    ) -> Result<()> {
        let window_end = now + self.reminder_window;
        let candidates = self
            .store
            .reminder_candidates(now, window_end, SCAN_BATCH)
            .await?;
        summary.reminders_scanned = candidates.len() as u64;
        if candidates.is_empty() {
            debug!("No reminder candidates");
            return Ok(());
        }

        for booking in &candidates {
            summary.notifications_inserted +=
                notify::fan_out(&self.store, reminder_rows(booking, self.local_offset)).await;
        }

        let ids: Vec<String> = candidates.iter().map(|b| b.booking_id.clone()).collect();
        summary.reminders_marked = self.store.mark_reminders_sent(&ids, now).await?;
        Ok(())
    }

    async fn release_phase(
        &self,
        now: DateTime<Utc>,
        summary: &mut DispatchSummary,
    ) -> Result<()> {
        let candidates = self.store.release_candidates(now, SCAN_BATCH).await?;
        summary.releases_scanned = candidates.len() as u64;
        if candidates.is_empty() {
            debug!("No release candidates");
            return Ok(());
        }

        for booking in &candidates {
            let mut rows = release_rows(booking);
            if is_driver_dispatched(&booking.service_type) {
                // Ride bookings filter by the requested vehicle type;
                // parcel takes any online driver.
                let vehicle = if booking.service_type == "ride" {
                    booking.vehicle_type.as_deref()
                } else {
                    None
                };
                match self.store.online_drivers(vehicle, DRIVER_NOTIFY_CAP).await {
                    Ok(drivers) => {
                        for driver in drivers {
                            rows.push(NewNotification {
                                user_id: driver.user_id,
                                title: "Scheduled job available".to_string(),
                                body: format!(
                                    "A scheduled {} order is ready for pickup now.",
                                    booking.service_type
                                ),
                                kind: "scheduled_release".to_string(),
                                data: Some(serde_json::json!({
                                    "booking_id": booking.booking_id,
                                    "service_type": booking.service_type,
                                })),
                            });
                        }
                    }
                    Err(e) => {
                        error!(
                            booking_id = %booking.booking_id,
                            error = %e,
                            "Driver lookup failed, releasing without driver alerts"
                        );
                    }
                }
            }
            summary.notifications_inserted += notify::fan_out(&self.store, rows).await;
        }

        let ids: Vec<String> = candidates.iter().map(|b| b.booking_id.clone()).collect();
        summary.releases_marked = self.store.mark_releases_processed(&ids, now).await?;
        Ok(())
    }
}

fn scheduled_time_label(booking: &Booking, offset: FixedOffset) -> String {
    booking
        .scheduled_at
        .map(|at| at.with_timezone(&offset).format("%H:%M").to_string())
        .unwrap_or_else(|| "soon".to_string())
}

fn reminder_rows(booking: &Booking, offset: FixedOffset) -> Vec<NewNotification> {
    let time = scheduled_time_label(booking, offset);
    let data = Some(serde_json::json!({
        "booking_id": booking.booking_id,
        "scheduled_at": booking.scheduled_at,
    }));

    let mut rows = vec![NewNotification {
        user_id: booking.customer_id.clone(),
        title: "Upcoming scheduled order".to_string(),
        body: format!("Your scheduled order is coming up at {time}."),
        kind: "scheduled_reminder".to_string(),
        data: data.clone(),
    }];
    if let Some(merchant) = booking.merchant_id.clone() {
        rows.push(NewNotification {
            user_id: merchant,
            title: "Upcoming scheduled order".to_string(),
            body: format!("A scheduled order is due at {time}. Please start preparing."),
            kind: "scheduled_reminder".to_string(),
            data,
        });
    }
    rows
}

fn release_rows(booking: &Booking) -> Vec<NewNotification> {
    let data = Some(serde_json::json!({
        "booking_id": booking.booking_id,
        "scheduled_at": booking.scheduled_at,
    }));

    let mut rows = vec![NewNotification {
        user_id: booking.customer_id.clone(),
        title: "Scheduled order started".to_string(),
        body: "Your scheduled order is now being dispatched.".to_string(),
        kind: "scheduled_release".to_string(),
        data: data.clone(),
    }];
    if let Some(merchant) = booking.merchant_id.clone() {
        rows.push(NewNotification {
            user_id: merchant,
            title: "Scheduled order started".to_string(),
            body: "A scheduled order is due now.".to_string(),
            kind: "scheduled_release".to_string(),
            data,
        });
    }
    rows
}

/// Background poll loop in front of the scanner. Disabled when
/// `interval_secs` is zero; cron-style HTTP triggering still works.
pub fn spawn_poll_loop(
    scanner: Arc<DispatchScanner>,
    interval_secs: u64,
    shutdown: Arc<Notify>,
) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }

    let interval = std::time::Duration::from_secs(interval_secs);
    Some(tokio::spawn(async move {
        info!(interval_secs, "Dispatch scan loop started");
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    info!("Dispatch scan loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = scanner.run_once().await {
                        error!(error = %e, "Dispatch scan failed");
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::Ordering;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn scheduled_booking(id: &str, service_type: &str, scheduled_at: DateTime<Utc>) -> Booking {
        Booking {
            booking_id: id.to_string(),
            customer_id: "cust-1".to_string(),
            merchant_id: if service_type == "food" {
                Some("mer-1".to_string())
            } else {
                None
            },
            driver_id: None,
            service_type: service_type.to_string(),
            vehicle_type: None,
            status: "pending".to_string(),
            price: None,
            cancel_reason: None,
            scheduled_at: Some(scheduled_at),
            scheduled_reminder_sent_at: None,
            scheduled_release_processed_at: None,
            assigned_at: None,
        }
    }

    #[tokio::test]
    async fn test_reminder_second_scan_selects_nothing() {
        let memory = Arc::new(MemoryStore::new());
        let now = Utc::now();
        memory
            .seed_booking(scheduled_booking("bk-1", "food", now + Duration::minutes(10)))
            .await;
        let scanner = DispatchScanner::new(memory.clone(), 15, utc());

        let first = scanner.run_at(now).await.unwrap();
        assert_eq!(first.reminders_scanned, 1);
        assert_eq!(first.reminders_marked, 1);
        // Customer + merchant.
        assert_eq!(first.notifications_inserted, 2);

        let second = scanner.run_at(now).await.unwrap();
        assert_eq!(second.reminders_scanned, 0);
        assert_eq!(second.notifications_inserted, 0);
    }

    #[tokio::test]
    async fn test_release_boundary() {
        let memory = Arc::new(MemoryStore::new());
        let now = Utc::now();
        memory
            .seed_booking(scheduled_booking("bk-past", "ride", now - Duration::seconds(1)))
            .await;
        memory
            .seed_booking(scheduled_booking("bk-future", "ride", now + Duration::seconds(1)))
            .await;
        let scanner = DispatchScanner::new(memory.clone(), 15, utc());

        let summary = scanner.run_at(now).await.unwrap();
        assert_eq!(summary.releases_scanned, 1);
        assert_eq!(summary.releases_marked, 1);

        let past = memory.get_booking("bk-past").await.unwrap().unwrap();
        assert!(past.scheduled_release_processed_at.is_some());
        let future = memory.get_booking("bk-future").await.unwrap().unwrap();
        assert!(future.scheduled_release_processed_at.is_none());
    }

    #[tokio::test]
    async fn test_release_alerts_online_drivers_for_ride() {
        let memory = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let mut booking = scheduled_booking("bk-1", "ride", now - Duration::seconds(5));
        booking.vehicle_type = Some("car".to_string());
        memory.seed_booking(booking).await;

        for (id, vehicle, online) in [
            ("drv-car", "car", true),
            ("drv-bike", "bike", true),
            ("drv-offline", "car", false),
        ] {
            memory
                .seed_profile(crate::store::Profile {
                    user_id: id.to_string(),
                    role: "driver".to_string(),
                    email: None,
                    display_name: None,
                    phone: None,
                    approval_status: "approved".to_string(),
                    rejection_reason: None,
                    suspended: false,
                    is_online: online,
                    is_available: online,
                    vehicle_type: Some(vehicle.to_string()),
                    deletion_requested: false,
                    created_at: now,
                })
                .await;
        }

        let scanner = DispatchScanner::new(memory.clone(), 15, utc());
        scanner.run_at(now).await.unwrap();

        let rows = memory.notifications().await;
        let driver_rows: Vec<_> = rows
            .iter()
            .filter(|r| r.user_id.starts_with("drv-"))
            .collect();
        assert_eq!(driver_rows.len(), 1);
        assert_eq!(driver_rows[0].user_id, "drv-car");
    }

    #[tokio::test]
    async fn test_reminder_window_excludes_distant_bookings() {
        let memory = Arc::new(MemoryStore::new());
        let now = Utc::now();
        memory
            .seed_booking(scheduled_booking("bk-near", "ride", now + Duration::minutes(10)))
            .await;
        memory
            .seed_booking(scheduled_booking("bk-far", "ride", now + Duration::minutes(45)))
            .await;
        let scanner = DispatchScanner::new(memory.clone(), 15, utc());

        let summary = scanner.run_at(now).await.unwrap();
        assert_eq!(summary.reminders_scanned, 1);

        let far = memory.get_booking("bk-far").await.unwrap().unwrap();
        assert!(far.scheduled_reminder_sent_at.is_none());
    }

    #[tokio::test]
    async fn test_candidate_read_failure_fails_invocation() {
        let memory = Arc::new(MemoryStore::new());
        memory.fail_candidate_reads.store(true, Ordering::SeqCst);
        let scanner = DispatchScanner::new(memory, 15, utc());

        assert!(scanner.run_once().await.is_err());
    }

    #[tokio::test]
    async fn test_notify_failure_still_marks() {
        let memory = Arc::new(MemoryStore::new());
        let now = Utc::now();
        memory
            .seed_booking(scheduled_booking("bk-1", "ride", now - Duration::seconds(5)))
            .await;
        memory.fail_notifications.store(true, Ordering::SeqCst);
        let scanner = DispatchScanner::new(memory.clone(), 15, utc());

        let summary = scanner.run_at(now).await.unwrap();
        assert_eq!(summary.notifications_inserted, 0);
        assert_eq!(summary.releases_marked, 1);
    }

    #[tokio::test]
    async fn test_non_upcoming_statuses_skipped() {
        let memory = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let mut booking = scheduled_booking("bk-1", "ride", now - Duration::seconds(5));
        booking.status = "cancelled".to_string();
        memory.seed_booking(booking).await;
        let scanner = DispatchScanner::new(memory, 15, utc());

        let summary = scanner.run_at(now).await.unwrap();
        assert_eq!(summary.releases_scanned, 0);
    }

    #[tokio::test]
    async fn test_reminder_label_uses_configured_offset() {
        let memory = Arc::new(MemoryStore::new());
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 20, 0).unwrap();
        memory
            .seed_booking(scheduled_booking("bk-1", "food", now + Duration::minutes(10)))
            .await;
        // UTC+02:00; 10:30 UTC reads 12:30 on the customer's clock.
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let scanner = DispatchScanner::new(memory.clone(), 15, offset);

        scanner.run_at(now).await.unwrap();

        let rows = memory.notifications().await;
        let customer = rows.iter().find(|r| r.user_id == "cust-1").unwrap();
        assert!(customer.body.contains("12:30"), "body: {}", customer.body);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_drives_shared_scanner_until_shutdown() {
        let memory = Arc::new(MemoryStore::new());
        let now = Utc::now();
        memory
            .seed_booking(scheduled_booking("bk-1", "ride", now - Duration::seconds(5)))
            .await;
        let scanner = Arc::new(DispatchScanner::new(memory.clone(), 15, utc()));
        let shutdown = Arc::new(Notify::new());
        let handle = spawn_poll_loop(scanner, 30, shutdown.clone()).unwrap();

        // Paused time auto-advances past the first interval tick.
        tokio::time::sleep(std::time::Duration::from_secs(31)).await;
        let booking = memory.get_booking("bk-1").await.unwrap().unwrap();
        assert!(booking.scheduled_release_processed_at.is_some());

        shutdown.notify_waiters();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_poll_loop_disabled_at_zero_interval() {
        let memory = Arc::new(MemoryStore::new());
        let scanner = Arc::new(DispatchScanner::new(memory, 15, utc()));
        let shutdown = Arc::new(Notify::new());

        assert!(spawn_poll_loop(scanner, 0, shutdown).is_none());
    }
}
