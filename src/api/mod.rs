//! HTTP API for the payment core
//!
//! This module provides a RESTful API for:
//! - Creating jobs and driving their lifecycle
//! - Creating and confirming payments
//! - Submitting and reviewing payment proofs
//! - Invoice issuance and pre-flight validation
//! - An HMAC-authenticated webhook for payment notifications

use crate::{PayApp, PayError};
use axum::{
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;

mod health;
mod jobs;
mod payments;
mod webhook;

pub use health::*;
pub use jobs::*;
pub use payments::*;
pub use webhook::*;

/// API state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    /// The payment core application
    pub app: PayApp,
}

/// Build the API router
fn build_router(app: PayApp) -> Router {
    let state = ApiState { app };

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Job lifecycle
        .route("/v1/jobs", post(create_job))
        .route("/v1/jobs/:job_id", get(get_job))
        .route("/v1/jobs/:job_id/accept", post(accept_job))
        .route("/v1/jobs/:job_id/start", post(start_job))
        .route("/v1/jobs/:job_id/complete", post(complete_job))
        .route("/v1/jobs/:job_id/cancel", post(cancel_job))
        .route("/v1/jobs/:job_id/dispute", post(dispute_job))
        .route("/v1/jobs/:job_id/invoice", post(create_job_invoice))
        // Payments
        .route("/v1/payments", post(create_payment))
        .route("/v1/payments/verify", post(verify_payment))
        .route("/v1/payments/:payment_id", get(get_payment))
        .route("/v1/payments/:payment_id/confirm", post(confirm_payment))
        .route("/v1/payments/:payment_id/review", post(review_payment))
        // Invoice pre-flight validation
        .route("/v1/invoices/validate", post(validate_invoice))
        // Payment webhook
        .route("/v1/webhook/payment", post(handle_payment_webhook))
        // Add state
        .with_state(state)
}

/// Start the HTTP API server
pub async fn serve(app: PayApp) -> anyhow::Result<()> {
    serve_with_shutdown(app, tokio::sync::oneshot::channel().1).await
}

/// Start the HTTP API server with graceful shutdown
pub async fn serve_with_shutdown(
    app: PayApp,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let config = app.config.clone();

    // Build the router
    let router = build_router(app);

    // Add CORS if enabled
    let router = if config.api.enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };

    // Parse bind address
    let addr: std::net::SocketAddr = config
        .api
        .bind_address
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address: {}", e))?;

    info!("Starting HTTP API server on {}", addr);

    // Start the server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
            info!("Received shutdown signal, stopping API server...");
        })
        .await?;

    info!("API server stopped gracefully");
    Ok(())
}

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (only present if success is true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message (only present if success is false)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable machine-readable error code (only present for guard conflicts)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            code: None,
        }
    }
}

/// Convert PayError to HTTP status code
pub fn error_to_status_code(err: &PayError) -> StatusCode {
    match err {
        PayError::Validation(_) => StatusCode::BAD_REQUEST,
        PayError::NotFound(_) => StatusCode::NOT_FOUND,
        PayError::Conflict { .. } => StatusCode::CONFLICT,
        PayError::Node(_) => StatusCode::SERVICE_UNAVAILABLE,
        PayError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        PayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Build the failure response for an error, attaching the machine-readable
/// code when the error carries one
pub fn error_response<T>(err: &PayError) -> (StatusCode, Json<ApiResponse<T>>) {
    let status = error_to_status_code(err);
    let mut response = match err {
        PayError::Conflict { code, message } => {
            let mut r = ApiResponse::error(message.clone());
            r.code = Some(code.as_str().to_string());
            r
        }
        other => ApiResponse::error(other.to_string()),
    };
    // Don't leak internals on 500s
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        response.error = Some("Internal server error".to_string());
    }
    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConflictCode;

    #[test]
    fn test_error_response_carries_conflict_code() {
        let err = PayError::conflict(ConflictCode::PaymentExists, "job 1 already has a payment");
        let (status, Json(body)) = error_response::<()>(&err);
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.code.as_deref(), Some("PAYMENT_EXISTS"));
        assert_eq!(body.error.as_deref(), Some("job 1 already has a payment"));
    }

    #[test]
    fn test_error_response_masks_database_errors() {
        let err = PayError::Database("unique constraint on payments.job_id".to_string());
        let (status, Json(body)) = error_response::<()>(&err);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.as_deref(), Some("Internal server error"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            error_to_status_code(&PayError::Validation("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_to_status_code(&PayError::NotFound("missing".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_to_status_code(&PayError::Node("down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
