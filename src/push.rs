// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Push notification relay.
//!
//! Resolves device tokens for the requested users and dispatches one
//! push per token through the external gateway. The gateway wants a
//! short-lived access token obtained from a service-account exchange
//! endpoint; the relay caches it until shortly before expiry. Delivery
//! is best-effort: per-token failures are reported in the response, not
//! raised.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::Store;

/// Relay request body.
#[derive(Debug, Deserialize)]
pub struct PushRequest {
    /// Target users; tokens are resolved per user.
    pub user_ids: Vec<String>,
    /// Push title.
    pub title: String,
    /// Push body.
    pub message: String,
    /// Optional structured payload.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Per-invocation delivery counts.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PushSummary {
    /// Device tokens resolved for the requested users.
    pub tokens_resolved: usize,
    /// Pushes accepted by the gateway.
    pub delivered: usize,
    /// Pushes the gateway rejected or that failed in transit.
    pub failed: usize,
}

#[derive(Debug, Deserialize)]
struct TokenExchangeResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Push gateway client with a cached access token.
pub struct PushRelay {
    client: reqwest::Client,
    project_id: String,
    service_account_key: String,
    token_url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl PushRelay {
    /// Build a relay from configuration; `None` when the push gateway is
    /// not configured.
    pub fn from_config(config: &crate::config::Config) -> Option<Self> {
        match (
            config.push_project_id.clone(),
            config.push_service_account_key.clone(),
            config.push_token_url.clone(),
        ) {
            (Some(project_id), Some(service_account_key), Some(token_url)) => Some(Self {
                client: reqwest::Client::new(),
                project_id,
                service_account_key,
                token_url,
                cached: Mutex::new(None),
            }),
            _ => None,
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Utc::now()
        {
            return Ok(token.access_token.clone());
        }

        let response = self
            .client
            .post(&self.token_url)
            .json(&serde_json::json!({
                "grant_type": "service_account",
                "key": self.service_account_key,
            }))
            .send()
            .await
            .map_err(|e| Error::Push(format!("token exchange failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Push(format!(
                "token exchange returned {}",
                response.status()
            )));
        }
        let exchange: TokenExchangeResponse = response
            .json()
            .await
            .map_err(|e| Error::Push(format!("token exchange body: {e}")))?;

        // Refresh one minute early so in-flight sends never race expiry.
        let expires_at = Utc::now() + Duration::seconds(exchange.expires_in.max(60) - 60);
        *cached = Some(CachedToken {
            access_token: exchange.access_token.clone(),
            expires_at,
        });
        Ok(exchange.access_token)
    }

    async fn send_one(
        &self,
        access_token: &str,
        device_token: &str,
        request: &PushRequest,
    ) -> Result<()> {
        let url = format!(
            "https://fcm.googleapis.com/v1/projects/{}/messages:send",
            self.project_id
        );
        let payload = serde_json::json!({
            "message": {
                "token": device_token,
                "notification": {
                    "title": request.title,
                    "body": request.message,
                },
                "data": request.data,
            }
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Push(format!("push send failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Push(format!(
                "push gateway returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Resolve tokens and dispatch one push per token.
    pub async fn relay(
        &self,
        store: &Arc<dyn Store>,
        request: &PushRequest,
    ) -> Result<PushSummary> {
        if request.user_ids.is_empty() {
            return Err(Error::Validation("user_ids must not be empty".to_string()));
        }
        if request.title.is_empty() || request.message.is_empty() {
            return Err(Error::Validation(
                "title and message are required".to_string(),
            ));
        }

        let tokens = store.device_tokens(&request.user_ids).await?;
        let mut summary = PushSummary {
            tokens_resolved: tokens.len(),
            ..Default::default()
        };
        if tokens.is_empty() {
            debug!("No device tokens for requested users");
            return Ok(summary);
        }

        let access_token = self.access_token().await?;
        for token in &tokens {
            match self.send_one(&access_token, &token.token, request).await {
                Ok(()) => summary.delivered += 1,
                Err(e) => {
                    warn!(user_id = %token.user_id, error = %e, "Push delivery failed");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn relay() -> PushRelay {
        PushRelay {
            client: reqwest::Client::new(),
            project_id: "proj".to_string(),
            service_account_key: "key".to_string(),
            token_url: "http://127.0.0.1:1/token".to_string(),
            cached: Mutex::new(None),
        }
    }

    #[tokio::test]
    async fn test_relay_rejects_empty_targets() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let request = PushRequest {
            user_ids: vec![],
            title: "Hi".to_string(),
            message: "There".to_string(),
            data: None,
        };

        let err = relay().relay(&store, &request).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_relay_without_tokens_skips_gateway() {
        // The token URL is unreachable, so reaching the gateway would fail;
        // zero resolved tokens must return before that.
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn Store> = memory.clone();
        let request = PushRequest {
            user_ids: vec!["u-1".to_string()],
            title: "Hi".to_string(),
            message: "There".to_string(),
            data: None,
        };

        let summary = relay().relay(&store, &request).await.unwrap();
        assert_eq!(summary.tokens_resolved, 0);
        assert_eq!(summary.delivered, 0);
    }

    #[tokio::test]
    async fn test_cached_token_is_reused_until_expiry() {
        let push = relay();
        {
            let mut cached = push.cached.lock().await;
            *cached = Some(CachedToken {
                access_token: "cached-token".to_string(),
                expires_at: Utc::now() + Duration::minutes(10),
            });
        }
        assert_eq!(push.access_token().await.unwrap(), "cached-token");
    }

    #[tokio::test]
    async fn test_expired_token_triggers_exchange() {
        let push = relay();
        {
            let mut cached = push.cached.lock().await;
            *cached = Some(CachedToken {
                access_token: "stale-token".to_string(),
                expires_at: Utc::now() - Duration::minutes(1),
            });
        }
        // Exchange endpoint unreachable, so the refresh surfaces as Push.
        let err = push.access_token().await.unwrap_err();
        assert!(matches!(err, Error::Push(_)));
    }
}
