//! Payment API endpoints

use super::{error_response, ApiResponse, ApiState};
use crate::db::{PaymentQueries, PaymentRecord};
use crate::payment::preimage::hash_prefix;
use crate::payment::VerificationMethod;
use crate::PayError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Payment representation returned by the API
///
/// Preimages are settlement proofs, not public data; they are omitted here
/// and the verification level stands in for them.
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    /// Payment ID
    pub id: i64,
    /// Job this payment settles
    pub job_id: i64,
    /// Payment hash (hex)
    pub payment_hash: Option<String>,
    /// Amount in satoshis
    pub amount_sats: i64,
    /// Verification level, once a proof has been processed
    pub verification_level: Option<String>,
    /// Whether the payment is confirmed
    pub confirmed: bool,
    /// Settlement time (ISO 8601)
    pub paid_at: Option<String>,
    /// Row creation time (ISO 8601)
    pub created_at: String,
}

impl From<PaymentRecord> for PaymentResponse {
    fn from(payment: PaymentRecord) -> Self {
        Self {
            id: payment.id,
            job_id: payment.job_id,
            payment_hash: payment.payment_hash.clone(),
            amount_sats: payment.amount_sats,
            verification_level: payment.verification_level.map(|l| l.to_string()),
            confirmed: payment.is_confirmed(),
            paid_at: payment.paid_at.map(|t| t.to_rfc3339()),
            created_at: payment.created_at.to_rfc3339(),
        }
    }
}

/// Create a payment record
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    /// Job the payment settles
    pub job_id: i64,
    /// Amount in satoshis
    pub amount_sats: i64,
    /// Payment hash (hex), if an invoice already exists
    pub payment_hash: Option<String>,
}

/// Create a payment record for a completed job
pub async fn create_payment(
    State(state): State<ApiState>,
    Json(req): Json<CreatePaymentRequest>,
) -> impl IntoResponse {
    info!(
        "API: Create payment for job {}: amount={} sats",
        req.job_id, req.amount_sats
    );

    match state
        .app
        .payments
        .create_payment(req.job_id, req.amount_sats, req.payment_hash.as_deref())
        .await
    {
        Ok(payment) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(PaymentResponse::from(payment))),
        ),
        Err(e) => error_response(&e),
    }
}

/// Get a payment
pub async fn get_payment(
    State(state): State<ApiState>,
    Path(payment_id): Path<i64>,
) -> impl IntoResponse {
    let ledger = PaymentQueries::new(&state.app.db);
    match ledger.get_by_id(payment_id).await {
        Ok(Some(payment)) => (
            StatusCode::OK,
            Json(ApiResponse::success(PaymentResponse::from(payment))),
        ),
        Ok(None) => error_response(&PayError::NotFound(format!(
            "payment {payment_id} not found"
        ))),
        Err(e) => error_response(&e),
    }
}

/// Confirm a payment with its preimage
#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    /// Settlement preimage (hex)
    pub preimage: String,
}

/// Confirm a payment with its settlement preimage
pub async fn confirm_payment(
    State(state): State<ApiState>,
    Path(payment_id): Path<i64>,
    Json(req): Json<ConfirmPaymentRequest>,
) -> impl IntoResponse {
    info!("API: Confirm payment {}", payment_id);

    match state
        .app
        .payments
        .confirm_payment(payment_id, &req.preimage)
        .await
    {
        Ok(payment) => (
            StatusCode::OK,
            Json(ApiResponse::success(PaymentResponse::from(payment))),
        ),
        Err(e) => error_response(&e),
    }
}

/// Submit a payment proof
#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    /// Payment hash (hex) identifying the payment
    pub payment_hash: String,
    /// The proof: a preimage for cryptographic methods, an opaque blob
    /// reference for manual ones
    pub proof: String,
    /// How the proof was obtained
    pub method: VerificationMethod,
    /// Submitting user
    pub user_id: String,
}

/// Process a submitted payment proof
pub async fn verify_payment(
    State(state): State<ApiState>,
    Json(req): Json<VerifyPaymentRequest>,
) -> impl IntoResponse {
    info!(
        "API: Verify payment: hash={}, method={:?}, user_id={}",
        hash_prefix(&req.payment_hash),
        req.method,
        req.user_id
    );

    match state
        .app
        .payments
        .verify_payment(&req.payment_hash, &req.proof, req.method, &req.user_id)
        .await
    {
        Ok(payment) => (
            StatusCode::OK,
            Json(ApiResponse::success(PaymentResponse::from(payment))),
        ),
        Err(e) => error_response(&e),
    }
}

/// Resolve a manual review
#[derive(Debug, Deserialize)]
pub struct ReviewPaymentRequest {
    /// Whether the proof is accepted
    pub approve: bool,
    /// Reviewing user
    pub user_id: String,
    /// Whether the reviewer has admin privileges
    #[serde(default)]
    pub is_admin: bool,
}

/// Resolve a payment awaiting manual review
pub async fn review_payment(
    State(state): State<ApiState>,
    Path(payment_id): Path<i64>,
    Json(req): Json<ReviewPaymentRequest>,
) -> impl IntoResponse {
    info!(
        "API: Review payment {}: approve={}, user_id={}",
        payment_id, req.approve, req.user_id
    );

    match state
        .app
        .payments
        .review_manual_payment(payment_id, req.approve, &req.user_id, req.is_admin)
        .await
    {
        Ok(payment) => (
            StatusCode::OK,
            Json(ApiResponse::success(PaymentResponse::from(payment))),
        ),
        Err(e) => error_response(&e),
    }
}

/// Pre-flight validation of a BOLT11 invoice
#[derive(Debug, Deserialize)]
pub struct ValidateInvoiceRequest {
    /// The BOLT11 payment request
    pub bolt11: String,
    /// Amount the invoice is expected to carry, in satoshis
    pub expected_amount_sats: u64,
}

/// Invoice validation response
#[derive(Debug, Serialize)]
pub struct ValidateInvoiceResponse {
    /// Whether the invoice may be accepted
    pub is_valid: bool,
    /// Failure reason when invalid
    pub error: Option<String>,
    /// Payment hash of the decoded invoice (hex)
    pub payment_hash: Option<String>,
    /// Decoded amount in satoshis
    pub amount_sats: Option<u64>,
    /// Expiry instant (ISO 8601)
    pub expires_at: Option<String>,
}

/// Validate an invoice without recording anything
pub async fn validate_invoice(
    State(state): State<ApiState>,
    Json(req): Json<ValidateInvoiceRequest>,
) -> impl IntoResponse {
    match state
        .app
        .payments
        .validate_invoice(&req.bolt11, req.expected_amount_sats)
        .await
    {
        Ok(result) => {
            let response = ValidateInvoiceResponse {
                is_valid: result.is_valid,
                error: result.error,
                payment_hash: result.invoice.as_ref().map(|i| i.payment_hash.clone()),
                amount_sats: result.invoice.as_ref().and_then(|i| i.amount_sats),
                expires_at: result.invoice.as_ref().map(|i| i.expires_at.to_rfc3339()),
            };
            (StatusCode::OK, Json(ApiResponse::success(response)))
        }
        Err(e) => error_response(&e),
    }
}
