//! Deterministic mock Lightning backend
//!
//! Issues genuinely signed BOLT11 invoices whose preimages are derived from
//! a configured seed, so the decode and preimage-verification paths run
//! identically to production. Settlement state lives in an in-memory store
//! owned by the instance — scoped to the run, no process-wide globals.

use super::{LightningBackend, PaymentProbe, SettledPayment};
use crate::payment::invoice::{self, LightningInvoice};
use crate::{PayError, PayResult};
use async_trait::async_trait;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use lightning_invoice::{Currency, InvoiceBuilder, PaymentSecret};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

struct MockEntry {
    preimage: String,
    amount_sats: u64,
    paid: bool,
}

/// In-process Lightning backend with deterministic settlement
pub struct MockLightning {
    signing_key: SecretKey,
    key_material: [u8; 32],
    invoice_expiry_seconds: u64,
    counter: AtomicU64,
    /// Settlement store keyed by payment hash (hex)
    store: Mutex<HashMap<String, MockEntry>>,
}

impl MockLightning {
    /// Create a mock backend with preimages derived from `seed`
    pub fn new(seed: &str, invoice_expiry_seconds: u64) -> Self {
        let key_material: [u8; 32] = Sha256::digest(seed.as_bytes()).into();
        let signing_key = derive_signing_key(&key_material);

        Self {
            signing_key,
            key_material,
            invoice_expiry_seconds,
            counter: AtomicU64::new(0),
            store: Mutex::new(HashMap::new()),
        }
    }

    /// Derive the next preimage from the seed material and a counter
    fn next_preimage(&self) -> [u8; 32] {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(self.key_material);
        hasher.update(b"preimage");
        hasher.update(n.to_be_bytes());
        hasher.finalize().into()
    }

    /// Mark an invoice issued by this backend as settled
    ///
    /// Stands in for the Lightning node observing the payment; webhook and
    /// polling tests drive settlement through this.
    pub fn settle(&self, payment_hash: &str) -> PayResult<String> {
        let mut store = lock_store(&self.store)?;
        let entry = store
            .get_mut(payment_hash)
            .ok_or_else(|| PayError::Node(format!("unknown payment hash: {payment_hash}")))?;
        entry.paid = true;
        info!(
            "Mock backend settled payment: hash={}",
            crate::payment::preimage::hash_prefix(payment_hash)
        );
        Ok(entry.preimage.clone())
    }
}

fn lock_store<'a>(
    store: &'a Mutex<HashMap<String, MockEntry>>,
) -> PayResult<std::sync::MutexGuard<'a, HashMap<String, MockEntry>>> {
    store
        .lock()
        .map_err(|_| PayError::Node("mock settlement store poisoned".to_string()))
}

/// Hash the key material until it lands in the secp256k1 scalar range.
/// Practically this never iterates more than once.
fn derive_signing_key(material: &[u8; 32]) -> SecretKey {
    let mut candidate = *material;
    loop {
        if let Ok(key) = SecretKey::from_slice(&candidate) {
            return key;
        }
        candidate = Sha256::digest(candidate).into();
    }
}

#[async_trait]
impl LightningBackend for MockLightning {
    async fn create_invoice(&self, amount_sats: u64, memo: &str) -> PayResult<LightningInvoice> {
        let amount_msat = amount_sats.checked_mul(1000).ok_or_else(|| {
            PayError::Validation(format!(
                "invoice amount overflows millisatoshis: {amount_sats} sats"
            ))
        })?;
        let preimage = self.next_preimage();
        let payment_hash = sha256::Hash::hash(&preimage);

        let issued_at = chrono::Utc::now().timestamp().max(0) as u64;
        let bolt11 = InvoiceBuilder::new(Currency::Regtest)
            .description(memo.to_string())
            .payment_hash(payment_hash)
            .payment_secret(PaymentSecret(self.next_preimage()))
            .duration_since_epoch(Duration::from_secs(issued_at))
            .expiry_time(Duration::from_secs(self.invoice_expiry_seconds))
            .min_final_cltv_expiry_delta(144)
            .amount_milli_satoshis(amount_msat)
            .build_signed(|msg| Secp256k1::new().sign_ecdsa_recoverable(msg, &self.signing_key))
            .map_err(|e| PayError::Node(format!("failed to build invoice: {e}")))?
            .to_string();

        let hash_hex = payment_hash.to_string();
        {
            let mut store = lock_store(&self.store)?;
            store.insert(
                hash_hex.clone(),
                MockEntry {
                    preimage: hex::encode(preimage),
                    amount_sats,
                    paid: false,
                },
            );
        }

        debug!(
            "Mock backend issued invoice: hash={}, amount={} sats",
            crate::payment::preimage::hash_prefix(&hash_hex),
            amount_sats
        );

        // Run the decode path exactly as a production invoice would
        invoice::decode(&bolt11)
    }

    async fn check_payment_status(&self, payment_hash: &str) -> PayResult<PaymentProbe> {
        let store = lock_store(&self.store)?;
        match store.get(payment_hash) {
            Some(entry) if entry.paid => Ok(PaymentProbe {
                paid: true,
                preimage: Some(entry.preimage.clone()),
            }),
            Some(_) => Ok(PaymentProbe {
                paid: false,
                preimage: None,
            }),
            None => Err(PayError::Node(format!(
                "unknown payment hash: {payment_hash}"
            ))),
        }
    }

    async fn send_payment(&self, bolt11: &str) -> PayResult<SettledPayment> {
        let decoded = invoice::decode(bolt11)?;
        let mut store = lock_store(&self.store)?;
        let entry = store.get_mut(&decoded.payment_hash).ok_or_else(|| {
            PayError::Node("cannot pay an invoice issued by another node".to_string())
        })?;
        entry.paid = true;

        info!(
            "Mock backend paid invoice: hash={}, amount={} sats",
            crate::payment::preimage::hash_prefix(&decoded.payment_hash),
            entry.amount_sats
        );

        Ok(SettledPayment {
            payment_hash: decoded.payment_hash.clone(),
            preimage: entry.preimage.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::preimage;

    #[tokio::test]
    async fn test_invoice_preimage_matches_hash() {
        let backend = MockLightning::new("test-seed", 3600);
        let invoice = backend.create_invoice(1500, "walk the dog").await.unwrap();

        let settled = backend.send_payment(&invoice.bolt11).await.unwrap();
        assert_eq!(settled.payment_hash, invoice.payment_hash);
        assert!(preimage::verify(&settled.payment_hash, &settled.preimage));
    }

    #[tokio::test]
    async fn test_invoice_fields() {
        let backend = MockLightning::new("test-seed", 1800);
        let invoice = backend.create_invoice(2500, "groceries").await.unwrap();
        assert_eq!(invoice.amount_sats, Some(2500));
        assert_eq!(invoice.description, "groceries");
        assert_eq!(invoice.expiry_seconds, 1800);
    }

    #[tokio::test]
    async fn test_check_payment_status_lifecycle() {
        let backend = MockLightning::new("test-seed", 3600);
        let invoice = backend.create_invoice(900, "courier").await.unwrap();

        let probe = backend
            .check_payment_status(&invoice.payment_hash)
            .await
            .unwrap();
        assert!(!probe.paid);
        assert!(probe.preimage.is_none());

        backend.settle(&invoice.payment_hash).unwrap();

        let probe = backend
            .check_payment_status(&invoice.payment_hash)
            .await
            .unwrap();
        assert!(probe.paid);
        let preimage_hex = probe.preimage.unwrap();
        assert!(preimage::verify(&invoice.payment_hash, &preimage_hex));
    }

    #[tokio::test]
    async fn test_unknown_hash_is_backend_error() {
        let backend = MockLightning::new("test-seed", 3600);
        let err = backend
            .check_payment_status(&"ee".repeat(32))
            .await
            .unwrap_err();
        assert!(matches!(err, PayError::Node(_)));
    }

    #[tokio::test]
    async fn test_amount_overflow_rejected() {
        let backend = MockLightning::new("test-seed", 3600);
        let err = backend
            .create_invoice(u64::MAX, "too much")
            .await
            .unwrap_err();
        assert!(matches!(err, PayError::Validation(_)));
    }

    #[tokio::test]
    async fn test_distinct_invoices_get_distinct_hashes() {
        let backend = MockLightning::new("test-seed", 3600);
        let a = backend.create_invoice(100, "a").await.unwrap();
        let b = backend.create_invoice(100, "b").await.unwrap();
        assert_ne!(a.payment_hash, b.payment_hash);
    }

    #[tokio::test]
    async fn test_separate_instances_do_not_share_state() {
        // Settlement state is per-instance, not process-global
        let a = MockLightning::new("seed-a", 3600);
        let b = MockLightning::new("seed-a", 3600);
        let invoice = a.create_invoice(100, "a").await.unwrap();
        assert!(b.check_payment_status(&invoice.payment_hash).await.is_err());
    }
}
