// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-caller request throttle.
//!
//! Fixed-window counters local to one serving process, reset on restart.
//! This is abuse damping, not a correctness guarantee; there is no
//! cross-process coordination.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    window_reset_at: Instant,
}

/// In-process throttle, constructed once and injected into the request
/// layer.
pub struct Throttle {
    counts: DashMap<String, WindowEntry>,
    max: u32,
    window: Duration,
}

impl Throttle {
    /// Create a throttle allowing `max` operations per `window`.
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            counts: DashMap::new(),
            max,
            window,
        }
    }

    /// Record one call for `caller_id` and decide whether it may
    /// proceed. Rejected calls still count toward the window.
    pub fn check(&self, caller_id: &str) -> Result<()> {
        self.check_at(caller_id, Instant::now())
    }

    fn check_at(&self, caller_id: &str, now: Instant) -> Result<()> {
        let mut entry = self
            .counts
            .entry(caller_id.to_string())
            .or_insert(WindowEntry {
                count: 0,
                window_reset_at: now + self.window,
            });

        if now >= entry.window_reset_at {
            entry.count = 0;
            entry.window_reset_at = now + self.window;
        }

        entry.count += 1;
        if entry.count > self.max {
            return Err(Error::RateLimited);
        }

        Ok(())
    }

    /// Current count for a caller, for observability.
    pub fn current_count(&self, caller_id: &str) -> u32 {
        self.counts.get(caller_id).map(|e| e.count).unwrap_or(0)
    }
}
