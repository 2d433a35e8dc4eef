// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for fleetgate.

use chrono::FixedOffset;
use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// HTTP bind address for the admin API.
    pub http_addr: SocketAddr,
    /// Identity-provider signing secret used to verify bearer JWTs.
    pub jwt_secret: String,
    /// Shared secret accepted by the scheduled-dispatch endpoint.
    pub cron_secret: String,
    /// How far ahead the reminder phase looks for scheduled bookings.
    pub reminder_window: Duration,
    /// Max privileged operations per caller per throttle window.
    pub throttle_max: u32,
    /// Throttle window length.
    pub throttle_window: Duration,
    /// In-process scanner poll interval; zero disables the poll loop
    /// (the HTTP trigger remains available either way).
    pub scan_interval: Duration,
    /// Offset applied when rendering scheduled times in notification
    /// text. Defaults to UTC.
    pub local_offset: FixedOffset,
    /// Push gateway project identifier.
    pub push_project_id: Option<String>,
    /// Service-account key material for the push token exchange.
    pub push_service_account_key: Option<String>,
    /// Token exchange endpoint for the push gateway.
    pub push_token_url: Option<String>,
    /// Outbound email provider key (used by operational tooling only).
    pub email_api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("FLEETGATE_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("FLEETGATE_DATABASE_URL"))?;

        let port: u16 = std::env::var("FLEETGATE_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;
        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let jwt_secret = std::env::var("FLEETGATE_JWT_SECRET")
            .map_err(|_| ConfigError::MissingEnvVar("FLEETGATE_JWT_SECRET"))?;

        let cron_secret = std::env::var("FLEETGATE_CRON_SECRET")
            .map_err(|_| ConfigError::MissingEnvVar("FLEETGATE_CRON_SECRET"))?;

        let reminder_minutes = parse_var("FLEETGATE_REMINDER_WINDOW_MINUTES", 15u64)?;
        let throttle_max = parse_var("FLEETGATE_THROTTLE_MAX", 60u32)?;
        let throttle_secs = parse_var("FLEETGATE_THROTTLE_WINDOW_SECS", 60u64)?;
        let scan_interval_secs = parse_var("FLEETGATE_SCAN_INTERVAL_SECS", 0u64)?;
        let offset_minutes = parse_var("FLEETGATE_UTC_OFFSET_MINUTES", 0i32)?;
        let local_offset = FixedOffset::east_opt(offset_minutes * 60)
            .ok_or(ConfigError::InvalidValue("FLEETGATE_UTC_OFFSET_MINUTES"))?;

        Ok(Self {
            database_url,
            http_addr,
            jwt_secret,
            cron_secret,
            reminder_window: Duration::from_secs(reminder_minutes * 60),
            throttle_max,
            throttle_window: Duration::from_secs(throttle_secs),
            scan_interval: Duration::from_secs(scan_interval_secs),
            local_offset,
            push_project_id: std::env::var("FLEETGATE_PUSH_PROJECT_ID").ok(),
            push_service_account_key: std::env::var("FLEETGATE_PUSH_SERVICE_ACCOUNT_KEY").ok(),
            push_token_url: std::env::var("FLEETGATE_PUSH_TOKEN_URL").ok(),
            email_api_key: std::env::var("FLEETGATE_EMAIL_API_KEY").ok(),
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// A numeric environment variable failed to parse.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_default_when_unset() {
        let value: u64 = parse_var("FLEETGATE_TEST_UNSET_VAR", 15).unwrap();
        assert_eq!(value, 15);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingEnvVar("FLEETGATE_DATABASE_URL");
        assert_eq!(
            err.to_string(),
            "Missing required environment variable: FLEETGATE_DATABASE_URL"
        );
    }
}
