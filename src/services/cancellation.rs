use crate::{
    entities::{Purchase, PurchaseStatus},
    environment::Environment,
    errors::ServiceError,
    metrics,
    payments::RefundReason,
    settlement::deletion_replay,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub status: PurchaseStatus,
    /// Gateway refund id when money was returned by this call
    pub refund_id: Option<String>,
}

/// Reverses a settled purchase locally, at the ERP and at the gateway.
pub struct CancellationEngine<'a> {
    env: &'a Environment,
}

impl<'a> CancellationEngine<'a> {
    pub fn new(env: &'a Environment) -> Self {
        Self { env }
    }

    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        purchase_key: Uuid,
        customer_key: Uuid,
    ) -> Result<CancelOutcome, ServiceError> {
        let purchase = self
            .env
            .repository
            .find_purchase(purchase_key)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase {} not found", purchase_key)))?;
        if !purchase.is_owned_by(customer_key) {
            return Err(ServiceError::Forbidden(format!(
                "Purchase {} belongs to another customer",
                purchase_key
            )));
        }

        match purchase.status {
            PurchaseStatus::Canceled => {
                return Ok(CancelOutcome {
                    status: PurchaseStatus::Canceled,
                    refund_id: None,
                })
            }
            PurchaseStatus::Created => {
                return Err(ServiceError::InvalidStatus(format!(
                    "Purchase {} was never settled",
                    purchase_key
                )))
            }
            PurchaseStatus::Succeeded => {}
        }

        let refund_time = self.env.policy.stamps_refund_time().then(Utc::now);
        if !self
            .env
            .repository
            .cancel_purchase(purchase_key, refund_time)
            .await?
        {
            info!(purchase_key = %purchase_key, "purchase canceled concurrently");
            return Ok(CancelOutcome {
                status: PurchaseStatus::Canceled,
                refund_id: None,
            });
        }
        metrics::CANCELLATIONS.inc();
        info!(purchase_key = %purchase_key, "purchase canceled");

        self.replay_deletion(&purchase).await;

        let refund_id = self.refund(&purchase).await?;
        Ok(CancelOutcome {
            status: PurchaseStatus::Canceled,
            refund_id,
        })
    }

    /// Re-sends the stored settlement record flagged as deleted.
    async fn replay_deletion(&self, purchase: &Purchase) {
        let Some(snapshot) = purchase.settlement_snapshot.as_deref() else {
            warn!(purchase_key = %purchase.key, "no settlement snapshot to replay");
            return;
        };

        let result = match deletion_replay(snapshot) {
            Ok(payload) => {
                self.env
                    .erp
                    .push_settlement(&self.env.policy.erp_endpoint, &payload)
                    .await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(ack) => {
                info!(purchase_key = %purchase.key, reference = ?ack.reference, "deletion pushed")
            }
            Err(e) => {
                metrics::ERP_PUSH_FAILURES.with_label_values(&["cancel"]).inc();
                error!(
                    purchase_key = %purchase.key,
                    error = %e,
                    "erp deletion push failed; purchase needs reconciliation"
                );
            }
        }
    }

    async fn refund(&self, purchase: &Purchase) -> Result<Option<String>, ServiceError> {
        if purchase.payable() == 0 {
            return Ok(None);
        }
        match self
            .env
            .gateway
            .refund(&purchase.payment_intent_id, RefundReason::RequestedByCustomer)
            .await
        {
            Ok(refund) => {
                metrics::REFUNDS.with_label_values(&["succeeded"]).inc();
                info!(purchase_key = %purchase.key, refund_id = %refund.id, "refund issued");
                Ok(Some(refund.id))
            }
            Err(e) => {
                metrics::REFUNDS.with_label_values(&["failed"]).inc();
                error!(purchase_key = %purchase.key, error = %e, "refund failed");
                Err(match e {
                    ServiceError::PaymentFailed(msg) => ServiceError::PaymentFailed(msg),
                    other => ServiceError::PaymentFailed(other.to_string()),
                })
            }
        }
    }
}
