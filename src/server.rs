// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP surface.
//!
//! Four routes: the admin action endpoint, the scanner trigger, the push
//! relay and a health probe. Authorization and throttling happen inside
//! the handlers so every failure maps through the one error taxonomy;
//! CORS preflight is handled by the permissive layer.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::CredentialVerifier;
use crate::error::{Error, Result};
use crate::handlers::AdminHandlers;
use crate::push::{PushRelay, PushRequest};
use crate::scheduler::DispatchScanner;
use crate::store::Store;
use crate::throttle::Throttle;

/// Shared state behind every route.
pub struct AppState {
    /// Persistence backend.
    pub store: Arc<dyn Store>,
    /// Credential verifier for all three authorization paths.
    pub verifier: CredentialVerifier,
    /// Per-caller admin throttle.
    pub throttle: Throttle,
    /// Admin command dispatcher.
    pub handlers: AdminHandlers,
    /// Scheduled dispatch scanner, shared with the background poll loop.
    pub scanner: Arc<DispatchScanner>,
    /// Push relay; `None` when the gateway is not configured.
    pub relay: Option<PushRelay>,
}

impl AppState {
    /// Assemble the application state from configuration and a store.
    pub fn new(config: &crate::config::Config, store: Arc<dyn Store>) -> Self {
        Self {
            verifier: CredentialVerifier::new(&config.jwt_secret, &config.cron_secret),
            throttle: Throttle::new(config.throttle_max, config.throttle_window),
            handlers: AdminHandlers::new(store.clone()),
            scanner: Arc::new(DispatchScanner::new(
                store.clone(),
                (config.reminder_window.as_secs() / 60) as i64,
                config.local_offset,
            )),
            relay: PushRelay::from_config(config),
            store,
        }
    }
}

/// Build the router over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/admin/actions", post(admin_actions))
        .route("/scheduler/run", post(scheduler_run))
        .route("/notifications/push", post(notifications_push))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn admin_actions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>> {
    let ctx = state.verifier.verify_admin(&headers, &state.store).await?;
    state.throttle.check(&ctx.caller_id)?;

    let action = crate::actions::parse_action(body)?;
    let response = state.handlers.dispatch(&ctx, action).await?;
    Ok(Json(response))
}

async fn scheduler_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    state.verifier.verify_scanner(&headers)?;
    let summary = state.scanner.run_once().await?;
    Ok(Json(serde_json::to_value(summary)?))
}

async fn notifications_push(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<PushRequest>,
) -> Result<Json<Value>> {
    state.verifier.verify_user(&headers, &state.store).await?;

    let relay = state
        .relay
        .as_ref()
        .ok_or_else(|| Error::Push("push gateway not configured".to_string()))?;
    let summary = relay.relay(&state.store, &request).await?;
    Ok(Json(serde_json::to_value(summary)?))
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    state.store.health_check().await?;
    Ok(Json(json!({"status": "ok"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header::AUTHORIZATION};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";
    const CRON: &str = "cron-secret";

    fn test_state(memory: Arc<MemoryStore>) -> Arc<AppState> {
        let store: Arc<dyn Store> = memory;
        Arc::new(AppState {
            verifier: CredentialVerifier::new(SECRET, CRON),
            throttle: Throttle::new(60, std::time::Duration::from_secs(60)),
            handlers: AdminHandlers::new(store.clone()),
            scanner: Arc::new(DispatchScanner::new(
                store.clone(),
                15,
                chrono::FixedOffset::east_opt(0).unwrap(),
            )),
            relay: None,
            store,
        })
    }

    fn token_for(sub: &str) -> String {
        let claims = serde_json::json!({
            "sub": sub,
            "exp": (Utc::now().timestamp() + 3600) as usize,
        });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    async fn seed_admin(memory: &MemoryStore) {
        memory
            .seed_profile(crate::store::Profile {
                user_id: "adm-1".to_string(),
                role: "admin".to_string(),
                email: None,
                display_name: None,
                phone: None,
                approval_status: "approved".to_string(),
                rejection_reason: None,
                suspended: false,
                is_online: false,
                is_available: false,
                vehicle_type: None,
                deletion_requested: false,
                created_at: Utc::now(),
            })
            .await;
    }

    fn admin_request(token: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/admin/actions")
            .header("content-type", "application/json")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_admin_endpoint_requires_credential() {
        let memory = Arc::new(MemoryStore::new());
        let app = router(test_state(memory));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/actions")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"action":"get_user_emails"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_action_is_400_naming_it() {
        let memory = Arc::new(MemoryStore::new());
        seed_admin(&memory).await;
        let app = router(test_state(memory.clone()));

        let response = app
            .oneshot(admin_request(
                &token_for("adm-1"),
                json!({"action": "reticulate_splines"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(
            body["error"]
                .as_str()
                .unwrap()
                .contains("reticulate_splines")
        );
        // No store mutation happened.
        assert!(memory.notifications().await.is_empty());
        assert!(memory.ledger().await.is_empty());
    }

    #[tokio::test]
    async fn test_admin_action_round_trip() {
        let memory = Arc::new(MemoryStore::new());
        seed_admin(&memory).await;
        let app = router(test_state(memory.clone()));

        let response = app
            .oneshot(admin_request(
                &token_for("adm-1"),
                json!({
                    "action": "add_user",
                    "user_id": "cust-7",
                    "role": "customer",
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert!(memory.get_profile("cust-7").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_throttle_returns_429() {
        let memory = Arc::new(MemoryStore::new());
        seed_admin(&memory).await;
        let store: Arc<dyn Store> = memory.clone();
        let state = Arc::new(AppState {
            verifier: CredentialVerifier::new(SECRET, CRON),
            throttle: Throttle::new(1, std::time::Duration::from_secs(60)),
            handlers: AdminHandlers::new(store.clone()),
            scanner: Arc::new(DispatchScanner::new(
                store.clone(),
                15,
                chrono::FixedOffset::east_opt(0).unwrap(),
            )),
            relay: None,
            store,
        });
        let app = router(state);

        let token = token_for("adm-1");
        let first = app
            .clone()
            .oneshot(admin_request(&token, json!({"action": "get_user_emails"})))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(admin_request(&token, json!({"action": "get_user_emails"})))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_scheduler_accepts_cron_secret() {
        let memory = Arc::new(MemoryStore::new());
        let app = router(test_state(memory));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/scheduler/run")
                    .header("x-cron-secret", CRON)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["reminders_scanned"], 0);
        assert_eq!(body["releases_scanned"], 0);
    }

    #[tokio::test]
    async fn test_scheduler_rejects_user_token() {
        let memory = Arc::new(MemoryStore::new());
        seed_admin(&memory).await;
        let app = router(test_state(memory));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/scheduler/run")
                    .header(AUTHORIZATION, format!("Bearer {}", token_for("adm-1")))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_health_is_open() {
        let memory = Arc::new(MemoryStore::new());
        let app = router(test_state(memory));

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
