use crate::{
    entities::{Purchase, PurchaseStatus},
    environment::Environment,
    errors::ServiceError,
    metrics,
    repositories::SettleTransition,
    services::{addresses::resolve_fallback_address, pricing::compute_total},
    settlement::SettlementPayload,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FinalizeRequest {
    pub intent_id: String,
    pub customer_key: Uuid,
    pub email: String,
    pub billing_address_key: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeOutcome {
    pub status: PurchaseStatus,
    /// True only for the call that moved the purchase to `succeeded`.
    pub transitioned: bool,
}

impl FinalizeOutcome {
    fn current(status: PurchaseStatus) -> Self {
        Self {
            status,
            transitioned: false,
        }
    }
}

/// Reconciles gateway state with the local purchase, settling it at most once.
pub struct FinalizationEngine<'a> {
    env: &'a Environment,
}

impl<'a> FinalizationEngine<'a> {
    pub fn new(env: &'a Environment) -> Self {
        Self { env }
    }

    #[instrument(skip(self, request), fields(intent_id = %request.intent_id, customer_key = %request.customer_key))]
    pub async fn finalize(&self, request: FinalizeRequest) -> Result<FinalizeOutcome, ServiceError> {
        let repo = &self.env.repository;
        let purchase = repo
            .find_purchase_by_intent(&request.intent_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Intent {} not found", request.intent_id))
            })?;

        if matches!(purchase.customer_key, Some(owner) if owner != request.customer_key) {
            return Err(ServiceError::Forbidden(format!(
                "Purchase {} belongs to another customer",
                purchase.key
            )));
        }
        if purchase.status != PurchaseStatus::Created {
            metrics::FINALIZATIONS.with_label_values(&["duplicate"]).inc();
            return Ok(FinalizeOutcome::current(purchase.status));
        }

        self.ensure_lines_match(&purchase).await?;

        let payable = purchase.payable();
        let settled = if payable == 0 {
            true
        } else {
            let status = self.env.gateway.get_intent(&request.intent_id).await?;
            info!(gateway_status = %status, "gateway intent status");
            status.settles()
        };
        if !settled {
            metrics::FINALIZATIONS.with_label_values(&["pending"]).inc();
            return Ok(FinalizeOutcome::current(PurchaseStatus::Created));
        }

        let addresses = repo.customer_addresses(request.customer_key).await?;
        let fallback = resolve_fallback_address(request.billing_address_key, &addresses)?;

        let transition = SettleTransition {
            customer_key: request.customer_key,
            email: request.email.clone(),
            address_key: fallback.key,
            purchase_time: Utc::now(),
        };
        if !repo.mark_succeeded(&request.intent_id, &transition).await? {
            metrics::FINALIZATIONS.with_label_values(&["duplicate"]).inc();
            let current = repo
                .find_purchase(purchase.key)
                .await?
                .map(|p| p.status)
                .unwrap_or(purchase.status);
            return Ok(FinalizeOutcome::current(current));
        }

        metrics::FINALIZATIONS.with_label_values(&["settled"]).inc();
        info!(purchase_key = %purchase.key, payable, "purchase settled");

        // The purchase is settled from here on; later failures only need reconciliation.
        if let Err(e) = self
            .complete_settlement(purchase.key, fallback.key, &request.email)
            .await
        {
            metrics::FINALIZATIONS.with_label_values(&["unpublished"]).inc();
            error!(
                purchase_key = %purchase.key,
                error = %e,
                "settled purchase not published; needs reconciliation"
            );
        }

        Ok(FinalizeOutcome {
            status: PurchaseStatus::Succeeded,
            transitioned: true,
        })
    }

    /// Refuses to settle a purchase whose bound lines no longer add up to its amount.
    async fn ensure_lines_match(&self, purchase: &Purchase) -> Result<(), ServiceError> {
        let lines = self.env.repository.purchase_line_items(purchase.key).await?;
        let total = compute_total(&lines, None)?.total;
        if lines.is_empty() || total != purchase.amount {
            metrics::FINALIZATIONS.with_label_values(&["mismatch"]).inc();
            warn!(
                purchase_key = %purchase.key,
                lines = lines.len(),
                lines_total = total,
                amount = purchase.amount,
                "purchase lines do not match its amount"
            );
            return Err(ServiceError::Conflict(format!(
                "Purchase {} no longer matches its cart; start a new checkout",
                purchase.key
            )));
        }
        Ok(())
    }

    async fn complete_settlement(
        &self,
        purchase_key: Uuid,
        fallback_key: Uuid,
        email: &str,
    ) -> Result<(), ServiceError> {
        let assigned = self
            .env
            .repository
            .assign_fallback_address(purchase_key, fallback_key)
            .await?;
        if assigned > 0 {
            info!(purchase_key = %purchase_key, lines = assigned, "fallback address assigned");
        }
        self.publish_settlement(purchase_key, email).await
    }

    /// Pushes the settlement record, stores its snapshot and confirms to the customer.
    async fn publish_settlement(&self, purchase_key: Uuid, email: &str) -> Result<(), ServiceError> {
        let repo = &self.env.repository;
        let purchase: Purchase = repo
            .find_purchase(purchase_key)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase {} not found", purchase_key)))?;
        let lines = repo.purchase_line_items(purchase_key).await?;

        let mut product_keys: Vec<Uuid> = lines.iter().map(|l| l.product_key).collect();
        product_keys.sort();
        product_keys.dedup();
        let products = repo.find_products(&product_keys).await?;

        let mut address_keys: Vec<Uuid> = lines.iter().filter_map(|l| l.address_key).collect();
        address_keys.sort();
        address_keys.dedup();
        let addresses = repo.find_addresses(&address_keys).await?;

        let payload = SettlementPayload::builder(&purchase)
            .lines(&lines)
            .products(&products)
            .addresses(&addresses)
            .build()?;
        let snapshot = payload.to_snapshot()?;

        let pushed_at = match self
            .env
            .erp
            .push_settlement(&self.env.policy.erp_endpoint, &payload.to_value()?)
            .await
        {
            Ok(ack) => {
                info!(purchase_key = %purchase_key, reference = ?ack.reference, "settlement pushed");
                Some(Utc::now())
            }
            Err(e) => {
                metrics::ERP_PUSH_FAILURES.with_label_values(&["settle"]).inc();
                error!(
                    purchase_key = %purchase_key,
                    error = %e,
                    "erp push failed; purchase needs reconciliation"
                );
                None
            }
        };

        if !repo
            .store_settlement_snapshot(purchase_key, snapshot, pushed_at)
            .await?
        {
            warn!(purchase_key = %purchase_key, "settlement snapshot already stored");
        }

        if let Err(e) = self
            .env
            .notifier
            .send_order_confirmation(email, &purchase, &lines, &products)
            .await
        {
            metrics::NOTIFICATION_FAILURES.inc();
            warn!(purchase_key = %purchase_key, error = %e, "order confirmation not sent");
        }

        Ok(())
    }
}
