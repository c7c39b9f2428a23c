//! Health check endpoints

use super::{ApiResponse, ApiState};
use axum::{extract::State, response::Json};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
    /// Configured network
    pub network: String,
    /// Lightning backend mode
    pub lightning_mode: String,
    /// Database reachability
    pub database_connected: bool,
}

/// Health check endpoint
pub async fn health_check(State(state): State<ApiState>) -> Json<ApiResponse<HealthResponse>> {
    // A trivial query proves the connection is live
    let database_connected = {
        let conn = state.app.db.conn();
        let conn = conn.lock().await;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    };

    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        network: state.app.config.marketplace.network.clone(),
        lightning_mode: state.app.config.lightning.mode.clone(),
        database_connected,
    };

    Json(ApiResponse::success(response))
}
