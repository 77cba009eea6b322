//! Health/readiness endpoint: `/health` is always 200 once the process is
//! up; `/ready` is 200 once the DB pool is connected and the working-set
//! producer has enqueued at least one item, else 503. Uses a cheap
//! in-process flag rather than a per-request DB round trip so checking
//! readiness never adds load to the pool it is reporting on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

/// Readiness state shared between the scheduler and the health endpoint.
/// An `Arc<AtomicBool>` rather than a bare global — every reader observes
/// the same value with no cross-task synchronization beyond the atomic
/// itself.
#[derive(Debug, Clone, Default)]
pub struct Readiness {
    db_connected: Arc<AtomicBool>,
    enqueued_at_least_once: Arc<AtomicBool>,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_db_connected(&self) {
        self.db_connected.store(true, Ordering::Relaxed);
    }

    pub fn mark_enqueued(&self) {
        self.enqueued_at_least_once.store(true, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.db_connected.load(Ordering::Relaxed) && self.enqueued_at_least_once.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
struct HealthState {
    readiness: Readiness,
    bearer_token: Option<String>,
}

pub fn router(readiness: Readiness, bearer_token: Option<String>) -> Router {
    let state = HealthState { readiness, bearer_token };
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<HealthState>, headers: HeaderMap) -> StatusCode {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED;
    }
    StatusCode::OK
}

async fn ready_handler(State(state): State<HealthState>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if !authorized(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"status": "unauthorized"})));
    }
    if state.readiness.is_ready() {
        (StatusCode::OK, Json(json!({"status": "ready"})))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"status": "not_ready"})))
    }
}

fn authorized(state: &HealthState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.bearer_token else {
        return true;
    };
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token == expected)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_until_both_flags_set() {
        let readiness = Readiness::new();
        assert!(!readiness.is_ready());
        readiness.mark_db_connected();
        assert!(!readiness.is_ready());
        readiness.mark_enqueued();
        assert!(readiness.is_ready());
    }
}
