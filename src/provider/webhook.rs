//! Webhook events and signature verification.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Header carrying the hex HMAC-SHA256 of the raw request body.
pub const SIGNATURE_HEADER: &str = "x-processor-signature";

/// Asynchronous status change delivered by the processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorEvent {
    PaymentAuthorized {
        session_id: String,
        amount: i64,
    },
    PaymentCaptured {
        session_id: String,
        amount: i64,
    },
    PaymentFailed {
        session_id: String,
        #[serde(default)]
        error: Option<String>,
    },
    PaymentCanceled {
        session_id: String,
    },
    #[serde(other)]
    Unknown,
}

/// Verify the webhook signature: hex(HMAC-SHA256(body, secret)).
///
/// A missing or wrong signature must reject the delivery; there is no
/// bypass path.
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    let Some(expected) = compute_signature(body, secret) else {
        return false;
    };
    expected == signature
}

pub fn parse_event(body: &[u8]) -> Result<ProcessorEvent, serde_json::Error> {
    serde_json::from_slice(body)
}

fn compute_signature(body: &[u8], secret: &str) -> Option<String> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}
