// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleetgate: administrative control plane and scheduled-dispatch engine
//! for the delivery platform.
//!
//! The service exposes a single privileged action endpoint for platform
//! operators, a trigger endpoint for the scheduled-order scanner, and a
//! push relay. State mutations lean on two store-level patterns instead
//! of multi-statement transactions:
//!
//! - guarded transitions: conditional single-row writes where changing
//!   zero rows means "already processed", reported as success;
//! - sentinel stamps: per-phase timestamps that make scanner phases
//!   fire at most once per booking.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`config`] | Environment configuration |
//! | [`error`] | Error taxonomy and HTTP mapping |
//! | [`store`] | Persistence interface, PostgreSQL and in-memory backends |
//! | [`auth`] | Credential verification (admin, user, scanner) |
//! | [`throttle`] | Per-caller fixed-window throttle |
//! | [`wallet`] | Wallet ledger: atomic balance adjustment + immutable log |
//! | [`notify`] | Best-effort notification fan-out |
//! | [`orders`] | Assignment, reassignment, cancellation, rebroadcast |
//! | [`actions`] | Typed admin command set |
//! | [`handlers`] | Admin command dispatch |
//! | [`scheduler`] | Scheduled dispatch scanner and poll loop |
//! | [`push`] | Push relay with cached gateway token |
//! | [`server`] | axum router and application state |

#![deny(missing_docs)]

pub mod actions;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod orders;
pub mod push;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod throttle;
pub mod wallet;

pub use config::Config;
pub use error::{Error, Result};
