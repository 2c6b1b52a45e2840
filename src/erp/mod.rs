//! ERP (fulfillment and accounting backend) seam and the callback contract it uses.

use crate::errors::ServiceError;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

pub mod http;

type HmacSha256 = Hmac<Sha256>;

/// What the ERP returns when it accepts a settlement record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErpAck {
    #[serde(default)]
    pub reference: Option<String>,
}

#[async_trait]
pub trait ErpClient: Send + Sync {
    async fn push_settlement(&self, endpoint: &str, payload: &Value) -> Result<ErpAck, ServiceError>;
}

/// Body the ERP posts back when lines ship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentCallback {
    pub purchase_reference: String,
    #[serde(default)]
    pub shipped_line_refs: Vec<String>,
    #[serde(default)]
    pub other_line_refs: Vec<String>,
}

/// `hex(HMAC-SHA256(secret, "{timestamp}.{body}"))`.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length
        Err(_) => return String::new(),
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks an `x-timestamp`/`x-signature` pair, rejecting stale timestamps.
pub fn verify_signature(
    secret: &str,
    timestamp: &str,
    signature: &str,
    body: &[u8],
    tolerance_secs: u64,
    now_secs: i64,
) -> bool {
    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    if (now_secs - ts).unsigned_abs() > tolerance_secs {
        return false;
    }
    constant_time_eq(&sign(secret, timestamp, body), signature)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
