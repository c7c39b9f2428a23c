//! Payment orchestration
//!
//! `PaymentService` ties the pieces together: it consults the job state
//! machine before any payment mutation, the payment ledger for duplicate and
//! replay prevention, and the preimage/invoice verifiers for proof checks,
//! then drives the job lifecycle as a side effect of payment events.
//!
//! Creating a payment never advances the job; only a verified proof
//! (cryptographic or accepted manual review) moves a job to
//! `payment_confirmed`.

pub mod invoice;
pub mod preimage;

use crate::config::Config;
use crate::db::{
    Database, JobQueries, JobRecord, JobStatus, PaymentQueries, PaymentRecord, VerificationLevel,
};
use crate::jobs::{JobEvent, JobLifecycle};
use crate::lightning::LightningBackend;
use crate::{ConflictCode, PayError, PayResult};
use invoice::{LightningInvoice, ValidationResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How a payment proof was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMethod {
    /// Browser WebLN flow; proof is a preimage
    Webln,
    /// Manually supplied preimage
    Manual,
    /// Screenshot/scan of a paid QR code; needs human review
    Qr,
    /// Uploaded receipt; needs human review
    Upload,
}

impl VerificationMethod {
    /// Whether this method carries a cryptographically checkable preimage
    pub fn is_cryptographic(&self) -> bool {
        matches!(self, Self::Webln | Self::Manual)
    }
}

/// Payment orchestration service
pub struct PaymentService {
    config: Arc<Config>,
    db: Arc<Database>,
    lightning: Arc<dyn LightningBackend>,
}

impl PaymentService {
    /// Create a new payment service
    pub fn new(
        config: Arc<Config>,
        db: Arc<Database>,
        lightning: Arc<dyn LightningBackend>,
    ) -> Self {
        Self {
            config,
            db,
            lightning,
        }
    }

    /// Create a payment record for a completed job
    ///
    /// The job must be `completed` and must not already have a payment.
    /// An amount differing from the job's agreed price is logged as a
    /// warning but accepted. The job status is not advanced here.
    pub async fn create_payment(
        &self,
        job_id: i64,
        amount_sats: i64,
        payment_hash: Option<&str>,
    ) -> PayResult<PaymentRecord> {
        if amount_sats <= 0 {
            return Err(PayError::Validation(
                "payment amount must be positive".to_string(),
            ));
        }
        let payment_hash = match payment_hash {
            Some(hash) => {
                preimage::require_hex32(hash, "payment_hash")?;
                Some(hash.to_ascii_lowercase())
            }
            None => None,
        };

        let job = self.require_job(job_id).await?;
        if job.status != JobStatus::Completed {
            return Err(PayError::conflict(
                ConflictCode::JobNotCompleted,
                format!("job {job_id} is {} — payments require a completed job", job.status),
            ));
        }
        if amount_sats != job.amount_sats {
            warn!(
                "Payment amount {} sats differs from agreed price {} sats for job {}",
                amount_sats, job.amount_sats, job_id
            );
        }

        let ledger = PaymentQueries::new(&self.db);
        let record = ledger
            .create(job_id, amount_sats, payment_hash.as_deref())
            .await?;

        info!(
            "Created payment {} for job {} ({} sats)",
            record.id, job_id, amount_sats
        );
        Ok(record)
    }

    /// Confirm a payment with its preimage
    ///
    /// On success the verification level becomes `cryptographic` and the job
    /// advances to `payment_confirmed`.
    pub async fn confirm_payment(
        &self,
        payment_id: i64,
        preimage_hex: &str,
    ) -> PayResult<PaymentRecord> {
        preimage::require_hex32(preimage_hex, "preimage")?;

        let ledger = PaymentQueries::new(&self.db);
        let payment = ledger
            .get_by_id(payment_id)
            .await?
            .ok_or_else(|| PayError::NotFound(format!("payment {payment_id} not found")))?;

        self.confirm_loaded(&ledger, payment, preimage_hex).await
    }

    /// Confirm a payment located by its payment hash (webhook path)
    pub async fn confirm_payment_by_hash(
        &self,
        payment_hash: &str,
        preimage_hex: &str,
    ) -> PayResult<PaymentRecord> {
        preimage::require_hex32(payment_hash, "payment_hash")?;
        preimage::require_hex32(preimage_hex, "preimage")?;

        let ledger = PaymentQueries::new(&self.db);
        let payment = ledger
            .find_by_payment_hash(&payment_hash.to_ascii_lowercase())
            .await?
            .ok_or_else(|| {
                PayError::NotFound(format!(
                    "no payment with hash {}",
                    preimage::hash_prefix(payment_hash)
                ))
            })?;

        self.confirm_loaded(&ledger, payment, preimage_hex).await
    }

    async fn confirm_loaded(
        &self,
        ledger: &PaymentQueries<'_>,
        payment: PaymentRecord,
        preimage_hex: &str,
    ) -> PayResult<PaymentRecord> {
        if payment.is_confirmed() {
            return Err(PayError::conflict(
                ConflictCode::PaymentAlreadyConfirmed,
                format!("payment {} is already confirmed", payment.id),
            ));
        }
        let stored_hash = payment.payment_hash.as_deref().ok_or_else(|| {
            PayError::conflict(
                ConflictCode::PaymentNotConfirmable,
                format!("payment {} has no payment hash registered", payment.id),
            )
        })?;

        if !preimage::verify(stored_hash, preimage_hex) {
            warn!(
                "Preimage mismatch for payment {}: hash={}",
                payment.id,
                preimage::hash_prefix(stored_hash)
            );
            return Err(PayError::conflict(
                ConflictCode::PreimageMismatch,
                format!("preimage does not match payment hash for payment {}", payment.id),
            ));
        }

        let record = ledger
            .confirm(
                payment.id,
                &preimage_hex.to_ascii_lowercase(),
                VerificationLevel::Cryptographic,
            )
            .await?;

        // Verification gates the job transition; a concurrent dispute or
        // cancellation surfaces here as the lifecycle conflict.
        let lifecycle = JobLifecycle::new(&self.db);
        let job = lifecycle.apply(payment.job_id, JobEvent::ConfirmPayment).await?;

        info!(
            "Payment {} confirmed cryptographically, job {} is {}",
            record.id, job.id, job.status
        );
        Ok(record)
    }

    /// Create a Lightning invoice for a job's payment
    ///
    /// Only the job's client may request an invoice, and only once the job
    /// is completed. The resulting payment hash is registered in the ledger
    /// (creating the payment record if it does not exist yet).
    pub async fn create_invoice_for_job(
        &self,
        job_id: i64,
        amount_sats: i64,
        requesting_user_id: &str,
    ) -> PayResult<LightningInvoice> {
        if amount_sats <= 0 {
            return Err(PayError::Validation(
                "invoice amount must be positive".to_string(),
            ));
        }

        let job = self.require_job(job_id).await?;
        if job.client_id != requesting_user_id {
            return Err(PayError::conflict(
                ConflictCode::NotJobOwner,
                format!("user {requesting_user_id} is not the client of job {job_id}"),
            ));
        }
        if job.status != JobStatus::Completed {
            return Err(PayError::conflict(
                ConflictCode::JobNotCompleted,
                format!("job {job_id} is {} — invoices require a completed job", job.status),
            ));
        }
        if amount_sats != job.amount_sats {
            warn!(
                "Invoice amount {} sats differs from agreed price {} sats for job {}",
                amount_sats, job.amount_sats, job_id
            );
        }

        let ledger = PaymentQueries::new(&self.db);
        let existing = ledger.find_by_job_id(job_id).await?;
        if let Some(ref payment) = existing {
            if payment.payment_hash.is_some() {
                return Err(PayError::conflict(
                    ConflictCode::PaymentExists,
                    format!("job {job_id} already has an invoice registered"),
                ));
            }
        }

        let memo = format!(
            "{} job #{}: {}",
            self.config.marketplace.name, job.id, job.description
        );
        let invoice = self
            .with_timeout(self.lightning.create_invoice(amount_sats as u64, &memo))
            .await?;

        match existing {
            Some(payment) => {
                ledger
                    .set_payment_hash(payment.id, &invoice.payment_hash)
                    .await?;
            }
            None => {
                ledger
                    .create(job_id, amount_sats, Some(invoice.payment_hash.as_str()))
                    .await?;
            }
        }

        info!(
            "Issued invoice for job {}: hash={}, amount={} sats",
            job_id,
            preimage::hash_prefix(&invoice.payment_hash),
            amount_sats
        );
        Ok(invoice)
    }

    /// Process a submitted payment proof
    ///
    /// Cryptographic methods (webln, manual) carry a preimage: a match
    /// confirms the payment and advances the job; a mismatch marks the
    /// payment `disputed` and escalates the job. Non-cryptographic methods
    /// (qr, upload) store the proof at `pending_manual` for human review.
    pub async fn verify_payment(
        &self,
        payment_hash: &str,
        proof: &str,
        method: VerificationMethod,
        actor_id: &str,
    ) -> PayResult<PaymentRecord> {
        preimage::require_hex32(payment_hash, "payment_hash")?;
        if proof.is_empty() {
            return Err(PayError::Validation("proof must not be empty".to_string()));
        }

        let ledger = PaymentQueries::new(&self.db);
        let payment = ledger
            .find_by_payment_hash(&payment_hash.to_ascii_lowercase())
            .await?
            .ok_or_else(|| {
                PayError::NotFound(format!(
                    "no payment with hash {}",
                    preimage::hash_prefix(payment_hash)
                ))
            })?;

        if payment.is_confirmed() {
            return Err(PayError::conflict(
                ConflictCode::PaymentAlreadyConfirmed,
                format!("payment {} is already confirmed", payment.id),
            ));
        }

        if !method.is_cryptographic() {
            let record = ledger
                .set_verification(payment.id, VerificationLevel::PendingManual, Some(proof))
                .await?;
            info!(
                "Stored manual proof for payment {} (hash={}), awaiting review",
                payment.id,
                preimage::hash_prefix(payment_hash)
            );
            return Ok(record);
        }

        // Cryptographic path: the proof is a preimage
        preimage::require_hex32(proof, "preimage")?;
        if preimage::verify(payment_hash, proof) {
            let payment_id = payment.id;
            let job_id = payment.job_id;
            let record = self.confirm_loaded(&ledger, payment, proof).await?;
            info!(
                "Verified payment {} cryptographically for job {}",
                payment_id, job_id
            );
            Ok(record)
        } else {
            warn!(
                "Payment proof failed verification: payment={}, hash={}",
                payment.id,
                preimage::hash_prefix(payment_hash)
            );
            // The lifecycle guard runs first so an unauthorized actor cannot
            // leave the record disputed
            let lifecycle = JobLifecycle::new(&self.db);
            lifecycle
                .apply(
                    payment.job_id,
                    JobEvent::Dispute {
                        actor_id,
                        is_admin: false,
                    },
                )
                .await?;
            let record = ledger
                .set_verification(payment.id, VerificationLevel::Disputed, Some(proof))
                .await?;
            Ok(record)
        }
    }

    /// Resolve a payment that is awaiting manual review
    ///
    /// Approval requires the job's runner (or an admin) and settles the
    /// payment at `verified_manual`; rejection requires a participant (or
    /// admin) and escalates payment and job to `disputed`.
    pub async fn review_manual_payment(
        &self,
        payment_id: i64,
        approve: bool,
        actor_id: &str,
        is_admin: bool,
    ) -> PayResult<PaymentRecord> {
        let ledger = PaymentQueries::new(&self.db);
        let payment = ledger
            .get_by_id(payment_id)
            .await?
            .ok_or_else(|| PayError::NotFound(format!("payment {payment_id} not found")))?;

        if payment.verification_level != Some(VerificationLevel::PendingManual) {
            return Err(PayError::conflict(
                ConflictCode::PaymentNotConfirmable,
                format!("payment {payment_id} is not awaiting manual review"),
            ));
        }

        let job = self.require_job(payment.job_id).await?;
        let lifecycle = JobLifecycle::new(&self.db);

        if approve {
            if !is_admin && job.runner_id.as_deref() != Some(actor_id) {
                return Err(PayError::conflict(
                    ConflictCode::NotJobRunner,
                    format!("user {actor_id} may not approve payment for job {}", job.id),
                ));
            }
            let record = ledger
                .set_verification(payment_id, VerificationLevel::VerifiedManual, None)
                .await?;
            lifecycle.apply(job.id, JobEvent::ConfirmPayment).await?;
            info!(
                "Payment {} verified manually by {}, job {} confirmed",
                payment_id, actor_id, job.id
            );
            Ok(record)
        } else {
            lifecycle
                .apply(job.id, JobEvent::Dispute { actor_id, is_admin })
                .await?;
            let record = ledger
                .set_verification(payment_id, VerificationLevel::Disputed, None)
                .await?;
            warn!(
                "Payment {} rejected in manual review by {}, job {} disputed",
                payment_id, actor_id, job.id
            );
            Ok(record)
        }
    }

    /// Pre-flight validation of an invoice against the ledger
    pub async fn validate_invoice(
        &self,
        bolt11: &str,
        expected_amount_sats: u64,
    ) -> PayResult<ValidationResult> {
        let ledger = PaymentQueries::new(&self.db);
        invoice::validate(bolt11, expected_amount_sats, &ledger).await
    }

    /// Poll the Lightning backend for settlement and confirm if paid
    pub async fn poll_and_confirm(&self, payment_hash: &str) -> PayResult<Option<PaymentRecord>> {
        preimage::require_hex32(payment_hash, "payment_hash")?;
        let probe = self
            .with_timeout(self.lightning.check_payment_status(payment_hash))
            .await?;

        match probe.preimage {
            Some(preimage_hex) if probe.paid => {
                let record = self
                    .confirm_payment_by_hash(payment_hash, &preimage_hex)
                    .await?;
                Ok(Some(record))
            }
            _ => Ok(None),
        }
    }

    async fn require_job(&self, job_id: i64) -> PayResult<JobRecord> {
        JobQueries::new(&self.db)
            .get_by_id(job_id)
            .await?
            .ok_or_else(|| PayError::NotFound(format!("job {job_id} not found")))
    }

    /// Bound a backend call so a slow Lightning node cannot stall the
    /// request handler indefinitely
    async fn with_timeout<T>(&self, fut: impl Future<Output = PayResult<T>>) -> PayResult<T> {
        let limit = Duration::from_secs(self.config.lightning.timeout_seconds);
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| PayError::Node("lightning backend call timed out".to_string()))?
    }
}
