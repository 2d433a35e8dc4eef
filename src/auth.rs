// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Credential verification.
//!
//! The control plane never issues credentials; it only verifies a bearer
//! JWT signed by the identity provider, resolves the subject's profile
//! and checks the role attribute. The scanner endpoint has its own
//! authorization path (shared secret or service credential) that never
//! accepts ordinary user tokens.

use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::store::Store;

/// Claims carried by identity-provider tokens.
#[derive(Debug, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    pub sub: String,
    /// Token-level role; only "service" is meaningful to this core.
    #[serde(default)]
    pub role: Option<String>,
    /// Expiry (validated by the JWT library).
    pub exp: usize,
}

/// Verified caller identity handed to operation handlers.
#[derive(Debug, Clone)]
pub struct CallerContext {
    /// Resolved caller id.
    pub caller_id: String,
}

/// Credential verifier bound to the identity provider's signing secret.
pub struct CredentialVerifier {
    decoding_key: DecodingKey,
    cron_secret: String,
}

impl CredentialVerifier {
    /// Create a verifier from the shared signing secret and the scanner
    /// secret.
    pub fn new(jwt_secret: &str, cron_secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            cron_secret: cron_secret.to_string(),
        }
    }

    fn decode_claims(&self, token: &str) -> Result<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| Error::Auth(format!("invalid credential: {e}")))?;
        Ok(data.claims)
    }

    /// Verify an admin request: valid token, resolvable profile,
    /// role = admin. Fails before any mutation is attempted.
    pub async fn verify_admin(
        &self,
        headers: &HeaderMap,
        store: &Arc<dyn Store>,
    ) -> Result<CallerContext> {
        let token = bearer_token(headers)?;
        let claims = self.decode_claims(token)?;

        let profile = store
            .get_profile(&claims.sub)
            .await?
            .ok_or_else(|| Error::Auth(format!("unknown subject '{}'", claims.sub)))?;

        if profile.role != "admin" {
            return Err(Error::Forbidden("admin role required".to_string()));
        }

        Ok(CallerContext {
            caller_id: profile.user_id,
        })
    }

    /// Verify a relay request: any valid token resolving to a profile.
    pub async fn verify_user(
        &self,
        headers: &HeaderMap,
        store: &Arc<dyn Store>,
    ) -> Result<CallerContext> {
        let token = bearer_token(headers)?;
        let claims = self.decode_claims(token)?;

        let profile = store
            .get_profile(&claims.sub)
            .await?
            .ok_or_else(|| Error::Auth(format!("unknown subject '{}'", claims.sub)))?;

        Ok(CallerContext {
            caller_id: profile.user_id,
        })
    }

    /// Verify a scanner trigger: shared secret header, or a service
    /// credential (token-level role "service"). User tokens are rejected
    /// regardless of the profile behind them.
    pub fn verify_scanner(&self, headers: &HeaderMap) -> Result<()> {
        if let Some(secret) = headers.get("x-cron-secret").and_then(|v| v.to_str().ok())
            && secret == self.cron_secret
        {
            return Ok(());
        }

        let token = bearer_token(headers)
            .map_err(|_| Error::Auth("scanner secret or service credential required".to_string()))?;
        let claims = self.decode_claims(token)?;

        if claims.role.as_deref() == Some("service") {
            return Ok(());
        }

        Err(Error::Forbidden(
            "service credential required".to_string(),
        ))
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| Error::Auth("missing bearer token".to_string()))
}
