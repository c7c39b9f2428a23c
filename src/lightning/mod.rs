//! Lightning backend abstraction
//!
//! The payment core never talks to a Lightning node directly; it goes
//! through [`LightningBackend`] so deployments can plug in a real node
//! gateway while tests and single-node development use [`MockLightning`].
//! The mock is held to the same contract as production: every invoice it
//! issues satisfies `SHA256(preimage) == payment_hash`.

use crate::payment::invoice::LightningInvoice;
use crate::PayResult;
use async_trait::async_trait;

mod mock;

pub use mock::MockLightning;

/// Result of polling a payment's settlement status
#[derive(Debug, Clone)]
pub struct PaymentProbe {
    /// Whether the payment has settled
    pub paid: bool,
    /// The settlement preimage (hex), present once paid
    pub preimage: Option<String>,
}

/// Result of an outbound payment
#[derive(Debug, Clone)]
pub struct SettledPayment {
    /// Payment hash of the settled invoice (hex)
    pub payment_hash: String,
    /// Settlement preimage (hex)
    pub preimage: String,
}

/// Abstraction over Lightning node backends
#[async_trait]
pub trait LightningBackend: Send + Sync {
    /// Create an invoice for receiving a payment
    async fn create_invoice(&self, amount_sats: u64, memo: &str) -> PayResult<LightningInvoice>;

    /// Check whether a payment to the given hash has settled
    async fn check_payment_status(&self, payment_hash: &str) -> PayResult<PaymentProbe>;

    /// Pay a BOLT11 invoice
    async fn send_payment(&self, bolt11: &str) -> PayResult<SettledPayment>;
}
