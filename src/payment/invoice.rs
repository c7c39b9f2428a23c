//! BOLT11 invoice decoding and pre-flight validation
//!
//! Decoding turns an invoice string into the structured fields the payment
//! core needs; validation layers expiry, amount-tolerance and anti-replay
//! checks on top. Validation reads the payment ledger but never writes —
//! it is a pre-flight check run before invoice acceptance, separate from
//! final confirmation.

use crate::db::PaymentQueries;
use crate::{PayError, PayResult};
use chrono::{DateTime, TimeZone, Utc};
use lightning_invoice::{Bolt11Invoice, Bolt11InvoiceDescription};
use tracing::{debug, warn};

/// A decoded BOLT11 invoice (transient, never persisted as its own row)
#[derive(Debug, Clone, serde::Serialize)]
pub struct LightningInvoice {
    /// The raw payment request string
    pub bolt11: String,
    /// Payment hash (hex)
    pub payment_hash: String,
    /// Amount in satoshis (None for amountless invoices)
    pub amount_sats: Option<u64>,
    /// Invoice description/memo
    pub description: String,
    /// When the invoice was issued
    pub issued_at: DateTime<Utc>,
    /// Expiry duration in seconds
    pub expiry_seconds: u64,
    /// Derived expiry instant
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a pre-flight invoice validation
#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationResult {
    /// Whether the invoice may be accepted
    pub is_valid: bool,
    /// Failure reason when invalid
    pub error: Option<String>,
    /// The decoded invoice when valid
    pub invoice: Option<LightningInvoice>,
}

impl ValidationResult {
    fn valid(invoice: LightningInvoice) -> Self {
        Self {
            is_valid: true,
            error: None,
            invoice: Some(invoice),
        }
    }

    fn invalid(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(error.into()),
            invoice: None,
        }
    }
}

/// Decode a BOLT11 invoice string
///
/// Fails with a `Validation` error if the string does not parse as BOLT11.
/// The payment hash is a mandatory BOLT11 field, so a successful parse
/// always yields one.
pub fn decode(bolt11: &str) -> PayResult<LightningInvoice> {
    let parsed = bolt11
        .parse::<Bolt11Invoice>()
        .map_err(|e| PayError::Validation(format!("Invalid invoice: {e}")))?;

    // payment_hash() is a sha256::Hash; Display renders it as hex
    let payment_hash = parsed.payment_hash().to_string();
    let amount_sats = parsed.amount_milli_satoshis().map(|msat| msat / 1000);
    let description = match parsed.description() {
        Bolt11InvoiceDescription::Direct(d) => d.to_string(),
        Bolt11InvoiceDescription::Hash(_) => String::new(),
    };

    let issued_secs = parsed.duration_since_epoch().as_secs();
    let issued_at = Utc
        .timestamp_opt(issued_secs as i64, 0)
        .single()
        .ok_or_else(|| PayError::Validation("Invalid invoice: bad timestamp".to_string()))?;
    let expiry_seconds = parsed.expiry_time().as_secs();
    let expires_at = issued_at + chrono::Duration::seconds(expiry_seconds as i64);

    debug!(
        "Decoded invoice: hash={}, amount={:?} sats, expiry={}s",
        crate::payment::preimage::hash_prefix(&payment_hash),
        amount_sats,
        expiry_seconds
    );

    Ok(LightningInvoice {
        bolt11: bolt11.to_string(),
        payment_hash,
        amount_sats,
        description,
        issued_at,
        expiry_seconds,
        expires_at,
    })
}

/// Pre-flight validation of an invoice against an expected amount and the
/// payment ledger
///
/// Checks, in order: parseability, expiry, amount tolerance (1%, minimum
/// 1 sat, absorbing millisat-to-sat rounding), and ledger replay (a payment
/// hash already recorded means the invoice settles some other job).
pub async fn validate(
    bolt11: &str,
    expected_amount_sats: u64,
    ledger: &PaymentQueries<'_>,
) -> PayResult<ValidationResult> {
    validate_at(bolt11, expected_amount_sats, ledger, Utc::now()).await
}

async fn validate_at(
    bolt11: &str,
    expected_amount_sats: u64,
    ledger: &PaymentQueries<'_>,
    now: DateTime<Utc>,
) -> PayResult<ValidationResult> {
    let invoice = match decode(bolt11) {
        Ok(invoice) => invoice,
        Err(_) => return Ok(ValidationResult::invalid("Invalid invoice")),
    };

    if now > invoice.expires_at {
        warn!(
            "Rejected expired invoice: hash={}, expired_at={}",
            crate::payment::preimage::hash_prefix(&invoice.payment_hash),
            invoice.expires_at
        );
        return Ok(ValidationResult::invalid("Invoice expired"));
    }

    if let Some(amount_sats) = invoice.amount_sats {
        let tolerance = (expected_amount_sats / 100).max(1);
        if amount_sats.abs_diff(expected_amount_sats) > tolerance {
            warn!(
                "Rejected invoice amount mismatch: hash={}, invoice={} sats, expected={} sats",
                crate::payment::preimage::hash_prefix(&invoice.payment_hash),
                amount_sats,
                expected_amount_sats
            );
            return Ok(ValidationResult::invalid("Invoice amount mismatch"));
        }
    }

    if ledger
        .find_by_payment_hash(&invoice.payment_hash)
        .await?
        .is_some()
    {
        warn!(
            "Rejected replayed invoice: hash={} already recorded in the ledger",
            crate::payment::preimage::hash_prefix(&invoice.payment_hash)
        );
        return Ok(ValidationResult::invalid("Invoice already used"));
    }

    Ok(ValidationResult::valid(invoice))
}
