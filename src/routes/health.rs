//! Health check endpoint
//!
//! Reports whether the session store answers. Without it no chunk can be
//! accepted, so an unreachable store turns the check into a 503.

use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Bound on the store round trip made by the check
const STORE_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub version: &'static str,
}

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = state.uploads().registry().store();
    let reachable = match tokio::time::timeout(STORE_CHECK_TIMEOUT, store.exists("health")).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Session store check failed");
            false
        }
        Err(_) => {
            tracing::warn!(timeout = ?STORE_CHECK_TIMEOUT, "Session store check timed out");
            false
        }
    };

    let (status, body) = if reachable {
        (StatusCode::OK, ("healthy", "ok"))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, ("degraded", "unavailable"))
    };

    (
        status,
        Json(HealthResponse {
            status: body.0,
            store: body.1,
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}
