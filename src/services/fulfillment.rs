use crate::{entities::PurchaseStatus, environment::Environment, errors::ServiceError, metrics};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ShipmentStatus {
    Shipped,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentOutcome {
    pub status: ShipmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fulfillment_ack: Option<String>,
}

/// `FUL-<millis>-<8 hex of sha256(sorted keys)>-<8 hex random>`.
pub fn fulfillment_ack(line_keys: &[Uuid], millis: i64) -> String {
    let mut sorted: Vec<String> = line_keys.iter().map(|k| k.to_string()).collect();
    sorted.sort();
    let digest = hex::encode(Sha256::digest(sorted.join(",").as_bytes()));
    let nonce: u32 = rand::thread_rng().gen();
    format!("FUL-{}-{}-{:08x}", millis, &digest[..8], nonce)
}

fn parse_refs(refs: &[String], what: &str) -> Result<Vec<Uuid>, ServiceError> {
    refs.iter()
        .map(|r| {
            Uuid::parse_str(r.trim())
                .map_err(|_| ServiceError::ValidationError(format!("invalid {} reference {}", what, r)))
        })
        .collect()
}

/// Applies "shipped" callbacks from the ERP; repeats are harmless.
pub struct FulfillmentHandler<'a> {
    env: &'a Environment,
}

impl<'a> FulfillmentHandler<'a> {
    pub fn new(env: &'a Environment) -> Self {
        Self { env }
    }

    #[instrument(skip(self, shipped_line_refs, other_line_refs), fields(shipped = shipped_line_refs.len()))]
    pub async fn apply_shipment(
        &self,
        purchase_reference: &str,
        shipped_line_refs: &[String],
        other_line_refs: &[String],
    ) -> Result<ShipmentOutcome, ServiceError> {
        if shipped_line_refs.is_empty() {
            return Err(ServiceError::ValidationError(
                "shippedLineRefs must not be empty".to_string(),
            ));
        }
        let purchase_key = Uuid::parse_str(purchase_reference.trim()).map_err(|_| {
            ServiceError::ValidationError(format!("invalid purchase reference {}", purchase_reference))
        })?;
        let shipped = parse_refs(shipped_line_refs, "line")?;

        let purchase = self
            .env
            .repository
            .find_purchase(purchase_key)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase {} not found", purchase_key)))?;

        if purchase.status != PurchaseStatus::Succeeded {
            metrics::SHIPMENTS_APPLIED.with_label_values(&["rejected"]).inc();
            return Err(ServiceError::InvalidStatus(format!(
                "Purchase {} is {} and cannot ship",
                purchase.key, purchase.status
            )));
        }

        if !other_line_refs.is_empty() {
            info!(purchase_key = %purchase.key, other = ?other_line_refs, "lines reported without shipment");
        }

        let now = Utc::now();
        let changed = self
            .env
            .repository
            .mark_lines_shipped(purchase.key, &shipped, now)
            .await?;

        if changed == 0 {
            metrics::SHIPMENTS_APPLIED.with_label_values(&["unchanged"]).inc();
            info!(purchase_key = %purchase.key, "shipment already applied");
            return Ok(ShipmentOutcome {
                status: ShipmentStatus::Unchanged,
                fulfillment_ack: None,
            });
        }

        let ack = fulfillment_ack(&shipped, now.timestamp_millis());
        metrics::SHIPMENTS_APPLIED.with_label_values(&["shipped"]).inc();
        info!(purchase_key = %purchase.key, lines = changed, ack = %ack, "lines shipped");
        Ok(ShipmentOutcome {
            status: ShipmentStatus::Shipped,
            fulfillment_ack: Some(ack),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_shape() {
        let keys = vec![Uuid::new_v4(), Uuid::new_v4()];
        let ack = fulfillment_ack(&keys, 1700000000123);
        let parts: Vec<&str> = ack.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "FUL");
        assert_eq!(parts[1], "1700000000123");
        assert_eq!(parts[2].len(), 8);
        assert_eq!(parts[3].len(), 8);
        assert!(parts[2..].iter().all(|p| p.chars().all(|c| c.is_ascii_hexdigit())));
    }

    #[test]
    fn ack_digest_ignores_key_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let first = fulfillment_ack(&[a, b], 1);
        let second = fulfillment_ack(&[b, a], 1);
        assert_eq!(first.split('-').nth(2), second.split('-').nth(2));
    }

    #[test]
    fn invalid_refs_are_validation_errors() {
        assert!(matches!(
            parse_refs(&["nope".to_string()], "line"),
            Err(ServiceError::ValidationError(_))
        ));
    }
}
