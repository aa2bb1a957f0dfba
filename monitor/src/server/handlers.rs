//! HTTP request handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;

use crate::models::server::ServerStatus;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub servers: usize,
}

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "servmon".to_string(),
        version: version.version,
        servers: state.orchestrator.servers().len(),
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Servers response
#[derive(Debug, Serialize)]
pub struct ServersResponse {
    pub servers: BTreeMap<String, ServerStatus>,
    pub pending_tasks: usize,
}

/// Server status handler
pub async fn servers_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(ServersResponse {
        servers: state.orchestrator.status(),
        pending_tasks: state.orchestrator.pending_count(),
    })
}
