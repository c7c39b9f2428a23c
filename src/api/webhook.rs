//! Payment webhook handler
//!
//! The webhook is how an external payment processor notifies the service of
//! settlements. It is a trust boundary: every request must carry an
//! HMAC-SHA256 signature over `"{timestamp}.{body}"` keyed with the shared
//! secret, plus a timestamp within the configured freshness window. The
//! signature is checked before the body is parsed.

use super::{error_response, ApiResponse, ApiState, PaymentResponse};
use crate::payment::preimage::hash_prefix;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Signature header carried by webhook requests (hex HMAC-SHA256)
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
/// Timestamp header carried by webhook requests (unix seconds)
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

/// Payment webhook payload
#[derive(Debug, Deserialize)]
pub struct PaymentWebhookRequest {
    /// Payment hash (hex)
    pub payment_hash: String,
    /// Payment status reported by the processor
    pub status: String,
    /// Settlement preimage (hex), present for settled payments
    pub preimage: Option<String>,
}

/// Payment webhook response
#[derive(Debug, Serialize)]
pub struct PaymentWebhookResponse {
    /// Whether the notification changed any state
    pub processed: bool,
    /// Message
    pub message: String,
}

/// Check a webhook signature against the shared secret
///
/// The signed message is `"{timestamp}.{body}"`; comparison happens inside
/// `verify_slice`, which is constant-time.
fn verify_signature(secret: &str, timestamp: &str, body: &str, signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    mac.verify_slice(&signature).is_ok()
}

/// Check that a webhook timestamp is within the freshness window of `now`
fn is_fresh(timestamp: &str, now_secs: i64, window_secs: i64) -> bool {
    match timestamp.parse::<i64>() {
        Ok(ts) => (now_secs - ts).abs() <= window_secs,
        Err(_) => false,
    }
}

fn unauthorized(message: &str) -> (StatusCode, Json<ApiResponse<PaymentWebhookResponse>>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::error(message.to_string())),
    )
}

/// Handle a payment notification from the payment processor
///
/// Signature and timestamp are validated before anything else; a settled
/// notification then runs the full preimage verification path, so a forged
/// preimage still fails even with a valid signature.
pub async fn handle_payment_webhook(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let secret = &state.app.config.webhook.shared_secret;
    if secret.is_empty() {
        warn!("Rejected webhook: no shared secret configured");
        return unauthorized("Webhook is not configured");
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let timestamp = headers
        .get(TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !is_fresh(
        timestamp,
        Utc::now().timestamp(),
        state.app.config.webhook.freshness_window_seconds,
    ) {
        warn!("Rejected webhook: stale or missing timestamp");
        return unauthorized("Stale or missing timestamp");
    }

    if !verify_signature(secret, timestamp, &body, signature) {
        warn!("Rejected webhook: invalid signature");
        return unauthorized("Invalid signature");
    }

    let req: PaymentWebhookRequest = match serde_json::from_str(&body) {
        Ok(req) => req,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(format!("Invalid payload: {e}"))),
            );
        }
    };

    info!(
        "Received payment webhook: hash={}, status={}",
        hash_prefix(&req.payment_hash),
        req.status
    );

    if req.status != "settled" {
        // Pending/failed notifications are acknowledged but change nothing
        let response = PaymentWebhookResponse {
            processed: false,
            message: format!("Ignored status: {}", req.status),
        };
        return (StatusCode::OK, Json(ApiResponse::success(response)));
    }

    let Some(preimage) = req.preimage.as_deref() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(
                "Settled notification without a preimage",
            )),
        );
    };

    match state
        .app
        .payments
        .confirm_payment_by_hash(&req.payment_hash, preimage)
        .await
    {
        Ok(payment) => {
            let response = PaymentWebhookResponse {
                processed: true,
                message: format!("Payment {} confirmed", payment.id),
            };
            (StatusCode::OK, Json(ApiResponse::success(response)))
        }
        Err(e) => {
            let (status, Json(body)) = error_response::<PaymentResponse>(&e);
            let mut response = ApiResponse::error(body.error.unwrap_or_default());
            response.code = body.code;
            (status, Json(response))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: &str, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_signature_round_trip() {
        let body = r#"{"payment_hash":"aa","status":"settled"}"#;
        let sig = sign("secret", "1700000000", body);
        assert!(verify_signature("secret", "1700000000", body, &sig));
    }

    #[test]
    fn test_signature_rejects_tampering() {
        let body = r#"{"payment_hash":"aa","status":"settled"}"#;
        let sig = sign("secret", "1700000000", body);

        // Wrong key
        assert!(!verify_signature("other", "1700000000", body, &sig));
        // Body changed after signing
        assert!(!verify_signature("secret", "1700000000", "tampered", &sig));
        // Timestamp moved to defeat the freshness check
        assert!(!verify_signature("secret", "1700009999", body, &sig));
        // Garbage signature
        assert!(!verify_signature("secret", "1700000000", body, "zz-not-hex"));
    }

    #[test]
    fn test_freshness_window() {
        let now = 1_700_000_000;
        assert!(is_fresh("1700000000", now, 300));
        assert!(is_fresh("1699999701", now, 300));
        // Future timestamps get the same bound
        assert!(is_fresh("1700000299", now, 300));
        assert!(!is_fresh("1699999600", now, 300));
        assert!(!is_fresh("1700000400", now, 300));
        assert!(!is_fresh("not-a-number", now, 300));
        assert!(!is_fresh("", now, 300));
    }
}
