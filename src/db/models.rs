//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Posted by a client, no runner assigned
    Requested,
    /// A runner accepted the job
    Accepted,
    /// The assigned runner started work
    InProgress,
    /// The runner marked the work done; the job is now payable
    Completed,
    /// A verified payment settled the job (terminal)
    PaymentConfirmed,
    /// Either party cancelled before completion (terminal)
    Cancelled,
    /// A payment proof failed review after completion (terminal once escalated)
    Disputed,
}

impl JobStatus {
    /// The stored representation of this status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Accepted => "accepted",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::PaymentConfirmed => "payment_confirmed",
            Self::Cancelled => "cancelled",
            Self::Disputed => "disputed",
        }
    }

    /// Parse a stored status value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requested" => Some(Self::Requested),
            "accepted" => Some(Self::Accepted),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "payment_confirmed" => Some(Self::PaymentConfirmed),
            "cancelled" => Some(Self::Cancelled),
            "disputed" => Some(Self::Disputed),
            _ => None,
        }
    }

    /// Whether no further transitions are allowed from this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::PaymentConfirmed | Self::Cancelled | Self::Disputed
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a payment was (or is being) verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationLevel {
    /// Preimage verified against the payment hash
    Cryptographic,
    /// A non-cryptographic proof was submitted and awaits human review
    PendingManual,
    /// A human reviewer accepted the submitted proof
    VerifiedManual,
    /// Proof failed verification or review
    Disputed,
}

impl VerificationLevel {
    /// The stored representation of this level
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cryptographic => "cryptographic",
            Self::PendingManual => "pending_manual",
            Self::VerifiedManual => "verified_manual",
            Self::Disputed => "disputed",
        }
    }

    /// Parse a stored level value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cryptographic" => Some(Self::Cryptographic),
            "pending_manual" => Some(Self::PendingManual),
            "verified_manual" => Some(Self::VerifiedManual),
            "disputed" => Some(Self::Disputed),
            _ => None,
        }
    }

    /// Whether this level counts as a settled, trusted payment
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Cryptographic | Self::VerifiedManual)
    }
}

impl std::fmt::Display for VerificationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job database model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job ID
    pub id: i64,
    /// Client who posted the job
    pub client_id: String,
    /// Assigned runner (None until accepted)
    pub runner_id: Option<String>,
    /// Short description, used in invoice memos
    pub description: String,
    /// Agreed price in satoshis
    pub amount_sats: i64,
    /// Current lifecycle status
    pub status: JobStatus,
    /// When the job was posted
    pub requested_at: DateTime<Utc>,
    /// When a runner accepted
    pub accepted_at: Option<DateTime<Utc>>,
    /// When work started
    pub started_at: Option<DateTime<Utc>>,
    /// When work was marked done
    pub completed_at: Option<DateTime<Utc>>,
    /// When payment was confirmed
    pub payment_confirmed_at: Option<DateTime<Utc>>,
    /// When the job was cancelled
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Whether the given user is the client or the assigned runner
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.client_id == user_id || self.runner_id.as_deref() == Some(user_id)
    }
}

/// Payment ledger row
///
/// Invariant: when `preimage` is set it SHA-256-hashes to `payment_hash`,
/// and `verification_level` is then cryptographic or verified_manual.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Payment ID
    pub id: i64,
    /// Job this payment settles (unique: one payment per job)
    pub job_id: i64,
    /// Payment hash (hex, unique when present)
    pub payment_hash: Option<String>,
    /// Payment preimage (hex, set on confirmation)
    pub preimage: Option<String>,
    /// Amount in satoshis
    pub amount_sats: i64,
    /// Verification level (None until a proof is processed)
    pub verification_level: Option<VerificationLevel>,
    /// Submitted manual-review proof payload, if any
    pub proof: Option<String>,
    /// Settlement time
    pub paid_at: Option<DateTime<Utc>>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Whether this payment has been confirmed (preimage recorded)
    pub fn is_confirmed(&self) -> bool {
        self.preimage.is_some()
    }
}
