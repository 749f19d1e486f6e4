//! `/stats/*` — connection and room introspection, modeled on
//! `broz-gateway`'s health route shape.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use relay_shared::types::api::{HealthCheck, HealthResponse, HealthStatus};
use relay_shared::types::auth::AuthedUser;
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stats/connections", get(connections))
        .route("/stats/rooms", get(rooms))
        .route("/stats/health", get(health))
}

#[derive(Debug, Serialize)]
struct ConnectionStats {
    total: usize,
    authenticated: usize,
}

async fn connections(State(state): State<Arc<AppState>>, _auth_user: AuthedUser) -> Json<ConnectionStats> {
    Json(ConnectionStats {
        total: state.registry.connection_count(),
        authenticated: state.registry.authenticated_count(),
    })
}

async fn rooms(State(state): State<Arc<AppState>>, _auth_user: AuthedUser) -> Json<std::collections::HashMap<String, usize>> {
    Json(state.registry.room_counts())
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let redis_check = match state.redis.exists("health:probe").await {
        Ok(_) => HealthCheck {
            name: "redis".to_string(),
            status: HealthStatus::Healthy,
            message: None,
        },
        Err(e) => HealthCheck {
            name: "redis".to_string(),
            status: HealthStatus::Unhealthy,
            message: Some(e.to_string()),
        },
    };

    let bus_check = HealthCheck {
        name: "bus".to_string(),
        status: if state.bus.is_degraded() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        },
        message: None,
    };

    let response = HealthResponse::healthy("relay-core", env!("CARGO_PKG_VERSION")).with_checks(vec![redis_check, bus_check]);

    let status = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => axum::http::StatusCode::OK,
        HealthStatus::Unhealthy => axum::http::StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(response)).into_response()
}
