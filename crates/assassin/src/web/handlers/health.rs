//! Health check handler

use axum::{extract::State, response::IntoResponse};
use chrono::Utc;
use serde_json::json;

use crate::web::{AppState, responses::ok};

/// Database connectivity plus the drain state of this instance
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let connected = state.database.ping().await;
    let drain_state = state.drain.state();

    let status = if connected && !state.drain.is_draining() {
        "healthy"
    } else {
        "unhealthy"
    };

    ok(json!({
        "status": status,
        "database": if connected { "connected" } else { "disconnected" },
        "drain_state": drain_state.as_str(),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
