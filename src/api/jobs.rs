//! Job lifecycle API endpoints

use super::{error_response, ApiResponse, ApiState};
use crate::db::{JobQueries, JobRecord};
use crate::jobs::{JobEvent, JobLifecycle};
use crate::payment::invoice::LightningInvoice;
use crate::PayError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Create a job
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// Client posting the job
    pub client_id: String,
    /// Short description, used in invoice memos
    pub description: String,
    /// Agreed price in satoshis
    pub amount_sats: i64,
}

/// Job representation returned by the API
#[derive(Debug, Serialize)]
pub struct JobResponse {
    /// Job ID
    pub id: i64,
    /// Client who posted the job
    pub client_id: String,
    /// Assigned runner, once accepted
    pub runner_id: Option<String>,
    /// Job description
    pub description: String,
    /// Agreed price in satoshis
    pub amount_sats: i64,
    /// Current lifecycle status
    pub status: String,
    /// When the job was posted (ISO 8601)
    pub requested_at: String,
    /// When a runner accepted
    pub accepted_at: Option<String>,
    /// When work started
    pub started_at: Option<String>,
    /// When work was marked done
    pub completed_at: Option<String>,
    /// When payment was confirmed
    pub payment_confirmed_at: Option<String>,
    /// When the job was cancelled
    pub cancelled_at: Option<String>,
}

impl From<JobRecord> for JobResponse {
    fn from(job: JobRecord) -> Self {
        Self {
            id: job.id,
            client_id: job.client_id,
            runner_id: job.runner_id,
            description: job.description,
            amount_sats: job.amount_sats,
            status: job.status.to_string(),
            requested_at: job.requested_at.to_rfc3339(),
            accepted_at: job.accepted_at.map(|t| t.to_rfc3339()),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
            payment_confirmed_at: job.payment_confirmed_at.map(|t| t.to_rfc3339()),
            cancelled_at: job.cancelled_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Create a new job posting
pub async fn create_job(
    State(state): State<ApiState>,
    Json(req): Json<CreateJobRequest>,
) -> impl IntoResponse {
    info!(
        "API: Create job request from client_id={}, amount={} sats",
        req.client_id, req.amount_sats
    );

    if req.client_id.is_empty() {
        return error_response(&PayError::Validation("client_id is required".to_string()));
    }
    if req.description.trim().is_empty() {
        return error_response(&PayError::Validation("description is required".to_string()));
    }
    if req.amount_sats <= 0 {
        return error_response(&PayError::Validation(
            "amount_sats must be positive".to_string(),
        ));
    }

    let jobs = JobQueries::new(&state.app.db);
    match jobs
        .insert(&req.client_id, req.description.trim(), req.amount_sats)
        .await
    {
        Ok(job) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(JobResponse::from(job))),
        ),
        Err(e) => error_response(&e),
    }
}

/// Get a job
pub async fn get_job(
    State(state): State<ApiState>,
    Path(job_id): Path<i64>,
) -> impl IntoResponse {
    let jobs = JobQueries::new(&state.app.db);
    match jobs.get_by_id(job_id).await {
        Ok(Some(job)) => (
            StatusCode::OK,
            Json(ApiResponse::success(JobResponse::from(job))),
        ),
        Ok(None) => error_response(&PayError::NotFound(format!("job {job_id} not found"))),
        Err(e) => error_response(&e),
    }
}

/// Identify the acting user on a lifecycle endpoint
#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    /// Acting user
    pub user_id: String,
    /// Whether the actor has admin privileges
    #[serde(default)]
    pub is_admin: bool,
}

async fn apply_event(
    state: &ApiState,
    job_id: i64,
    event: JobEvent<'_>,
) -> (StatusCode, Json<ApiResponse<JobResponse>>) {
    let lifecycle = JobLifecycle::new(&state.app.db);
    match lifecycle.apply(job_id, event).await {
        Ok(job) => (
            StatusCode::OK,
            Json(ApiResponse::success(JobResponse::from(job))),
        ),
        Err(e) => error_response(&e),
    }
}

/// Accept an open job as its runner
pub async fn accept_job(
    State(state): State<ApiState>,
    Path(job_id): Path<i64>,
    Json(req): Json<ActorRequest>,
) -> impl IntoResponse {
    info!("API: Accept job {}: runner_id={}", job_id, req.user_id);
    apply_event(
        &state,
        job_id,
        JobEvent::Accept {
            runner_id: &req.user_id,
        },
    )
    .await
}

/// Start work on an accepted job
pub async fn start_job(
    State(state): State<ApiState>,
    Path(job_id): Path<i64>,
    Json(req): Json<ActorRequest>,
) -> impl IntoResponse {
    info!("API: Start job {}: user_id={}", job_id, req.user_id);
    apply_event(
        &state,
        job_id,
        JobEvent::Start {
            caller_id: &req.user_id,
        },
    )
    .await
}

/// Mark an in-progress job as completed
pub async fn complete_job(
    State(state): State<ApiState>,
    Path(job_id): Path<i64>,
    Json(req): Json<ActorRequest>,
) -> impl IntoResponse {
    info!("API: Complete job {}: user_id={}", job_id, req.user_id);
    apply_event(
        &state,
        job_id,
        JobEvent::Complete {
            caller_id: &req.user_id,
        },
    )
    .await
}

/// Cancel a job before work starts
pub async fn cancel_job(
    State(state): State<ApiState>,
    Path(job_id): Path<i64>,
    Json(req): Json<ActorRequest>,
) -> impl IntoResponse {
    info!("API: Cancel job {}: user_id={}", job_id, req.user_id);
    apply_event(
        &state,
        job_id,
        JobEvent::Cancel {
            actor_id: &req.user_id,
        },
    )
    .await
}

/// Raise a dispute on a job
pub async fn dispute_job(
    State(state): State<ApiState>,
    Path(job_id): Path<i64>,
    Json(req): Json<ActorRequest>,
) -> impl IntoResponse {
    info!(
        "API: Dispute job {}: user_id={}, admin={}",
        job_id, req.user_id, req.is_admin
    );
    apply_event(
        &state,
        job_id,
        JobEvent::Dispute {
            actor_id: &req.user_id,
            is_admin: req.is_admin,
        },
    )
    .await
}

/// Request an invoice for a completed job
#[derive(Debug, Deserialize)]
pub struct JobInvoiceRequest {
    /// Requesting user; must be the job's client
    pub user_id: String,
    /// Invoice amount in satoshis
    pub amount_sats: i64,
}

/// Invoice response
#[derive(Debug, Serialize)]
pub struct JobInvoiceResponse {
    /// The BOLT11 payment request
    pub bolt11: String,
    /// Payment hash (hex)
    pub payment_hash: String,
    /// Amount in satoshis
    pub amount_sats: Option<u64>,
    /// Expiry instant (ISO 8601)
    pub expires_at: String,
}

impl From<LightningInvoice> for JobInvoiceResponse {
    fn from(invoice: LightningInvoice) -> Self {
        Self {
            bolt11: invoice.bolt11,
            payment_hash: invoice.payment_hash,
            amount_sats: invoice.amount_sats,
            expires_at: invoice.expires_at.to_rfc3339(),
        }
    }
}

/// Create a Lightning invoice for a job's payment
pub async fn create_job_invoice(
    State(state): State<ApiState>,
    Path(job_id): Path<i64>,
    Json(req): Json<JobInvoiceRequest>,
) -> impl IntoResponse {
    info!(
        "API: Invoice request for job {}: user_id={}, amount={} sats",
        job_id, req.user_id, req.amount_sats
    );

    match state
        .app
        .payments
        .create_invoice_for_job(job_id, req.amount_sats, &req.user_id)
        .await
    {
        Ok(invoice) => (
            StatusCode::OK,
            Json(ApiResponse::success(JobInvoiceResponse::from(invoice))),
        ),
        Err(e) => error_response(&e),
    }
}
