//! errand-pay: payment verification and job lifecycle core for a
//! Lightning-settled errand marketplace
//!
//! Clients post errands, runners fulfill them, and settlement happens over
//! Bitcoin Lightning micropayments. This crate is the one subsystem with real
//! correctness obligations:
//!
//! - **Payment proof verification**: preimage-against-hash checks, BOLT11
//!   invoice decoding/validation, double-spend prevention
//! - **Job lifecycle enforcement**: the status state machine that gates when
//!   payments may be created, confirmed, or disputed
//! - **HTTP API**: the inbound contract consumed by the marketplace
//!   controllers, plus an HMAC-authenticated payment webhook
//!
//! # Architecture
//!
//! 1. Controllers call [`payment::PaymentService`] with a job id and a proof
//! 2. The service consults the job state machine ([`jobs`]) and the payment
//!    ledger ([`db::PaymentQueries`]) before any mutation
//! 3. Lightning concerns go through the [`lightning::LightningBackend`]
//!    abstraction so tests and single-node deployments can run the mock
//!
#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod db;
pub mod jobs;
pub mod lightning;
pub mod payment;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

pub use config::Config;
use db::Database;
use lightning::{LightningBackend, MockLightning};
use payment::PaymentService;

/// The main application state
#[derive(Clone)]
pub struct PayApp {
    /// Application configuration
    pub config: Arc<Config>,
    /// Database connection
    pub db: Arc<Database>,
    /// Lightning backend abstraction
    pub lightning: Arc<dyn LightningBackend>,
    /// Payment orchestration service
    pub payments: Arc<PaymentService>,
}

impl PayApp {
    /// Create a new application instance
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing errand-pay application...");

        let config = Arc::new(config);

        // Initialize the database
        let db_url = config.resolve_database_url();
        info!("Connecting to database at: {}", db_url);
        let db = Database::connect(&db_url).await?;
        let db = Arc::new(db);
        info!("Database connected successfully");

        // Initialize the Lightning backend
        let lightning: Arc<dyn LightningBackend> = match config.lightning.mode.as_str() {
            "mock" => {
                let seed = config.lightning.mock_seed.as_deref().unwrap_or("errand-pay-dev");
                Arc::new(MockLightning::new(seed, config.lightning.invoice_expiry_seconds))
            }
            other => {
                // Remote gateway support lands with a real node deployment
                anyhow::bail!("Unsupported lightning mode: {}", other);
            }
        };

        let payments = Arc::new(PaymentService::new(
            config.clone(),
            db.clone(),
            lightning.clone(),
        ));

        info!("errand-pay application initialized successfully");

        Ok(Self {
            config,
            db,
            lightning,
            payments,
        })
    }

    /// Start the application
    pub async fn run(&self) -> Result<()> {
        self.run_with_shutdown(tokio::sync::oneshot::channel().1).await
    }

    /// Start the application with a shutdown signal
    pub async fn run_with_shutdown(
        &self,
        shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<()> {
        info!(
            "errand-pay running. API available at http://{}",
            self.config.api_bind_address()
        );

        api::serve_with_shutdown(self.clone(), shutdown_rx).await
    }

    /// Shutdown the application gracefully
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down errand-pay application...");
        self.db.close().await;
        info!("Shutdown complete");
        Ok(())
    }
}

/// Error types for payment and job lifecycle operations
#[derive(thiserror::Error, Debug)]
pub enum PayError {
    /// Malformed input the client can correct (HTTP 400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown job or payment (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Guard violation with a stable machine-readable code (HTTP 409)
    #[error("{code}: {message}")]
    Conflict {
        /// Stable machine-readable conflict code
        code: ConflictCode,
        /// Human-readable detail
        message: String,
    },

    /// Lightning backend unavailable or timed out (HTTP 503)
    #[error("Lightning backend error: {0}")]
    Node(String),

    /// Persistence failure (HTTP 500)
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PayError {
    /// Shorthand for building a conflict error
    pub fn conflict(code: ConflictCode, message: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            message: message.into(),
        }
    }
}

/// Stable machine-readable codes for guard violations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ConflictCode {
    JobNotCompleted,
    JobNotAvailable,
    JobNotCancellable,
    NotJobRunner,
    NotJobOwner,
    NotJobParticipant,
    PaymentExists,
    PaymentAlreadyConfirmed,
    PaymentNotConfirmable,
    PreimageMismatch,
    InvoiceAlreadyUsed,
    InvalidTransition,
}

impl ConflictCode {
    /// The wire representation of this code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobNotCompleted => "JOB_NOT_COMPLETED",
            Self::JobNotAvailable => "JOB_NOT_AVAILABLE",
            Self::JobNotCancellable => "JOB_NOT_CANCELLABLE",
            Self::NotJobRunner => "NOT_JOB_RUNNER",
            Self::NotJobOwner => "NOT_JOB_OWNER",
            Self::NotJobParticipant => "NOT_JOB_PARTICIPANT",
            Self::PaymentExists => "PAYMENT_EXISTS",
            Self::PaymentAlreadyConfirmed => "PAYMENT_ALREADY_CONFIRMED",
            Self::PaymentNotConfirmable => "PAYMENT_NOT_CONFIRMABLE",
            Self::PreimageMismatch => "PREIMAGE_MISMATCH",
            Self::InvoiceAlreadyUsed => "INVOICE_ALREADY_USED",
            Self::InvalidTransition => "INVALID_TRANSITION",
        }
    }
}

impl std::fmt::Display for ConflictCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias for payment core operations
pub type PayResult<T> = std::result::Result<T, PayError>;
