use crate::{
    entities::{LineItem, Purchase, PurchaseStatus},
    environment::Environment,
    errors::ServiceError,
    identity::Caller,
    metrics,
    payments::IntentMetadata,
    repositories::{Destination, LineSplit},
    services::{
        cart::{bound_purchase_statuses, is_in_cart},
        pricing::{compute_total, ensure_chargeable, PricedCart, PricingEngine},
    },
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Prefix of intent ids minted locally for orders that charge nothing.
pub const LOCAL_INTENT_PREFIX: &str = "local_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressAssignment {
    pub line_key: Uuid,
    pub destinations: Vec<Destination>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentCreated {
    pub client_secret: String,
    pub intent_id: String,
    pub purchase_key: Uuid,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentUpdated {
    pub total: i64,
    pub discount: i64,
    pub payable: i64,
}

pub fn is_local_intent(intent_id: &str) -> bool {
    intent_id.starts_with(LOCAL_INTENT_PREFIX)
}

fn intent_metadata(purchase_key: Uuid) -> IntentMetadata {
    let mut metadata = IntentMetadata::new();
    metadata.insert("purchase_key".to_string(), purchase_key.to_string());
    metadata
}

/// Checks assignments against the submitted lines and turns them into splits.
fn plan_splits(
    lines: &[LineItem],
    assignments: &[AddressAssignment],
) -> Result<Vec<LineSplit>, ServiceError> {
    let by_key: HashMap<Uuid, &LineItem> = lines.iter().map(|l| (l.key, l)).collect();
    let mut seen_lines = HashSet::new();
    let mut splits = Vec::with_capacity(assignments.len());

    for assignment in assignments {
        let line = by_key.get(&assignment.line_key).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "assignment targets line {} which is not part of this checkout",
                assignment.line_key
            ))
        })?;
        if !seen_lines.insert(assignment.line_key) {
            return Err(ServiceError::ValidationError(format!(
                "line {} is assigned more than once",
                assignment.line_key
            )));
        }
        if assignment.destinations.is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "line {} has no destinations",
                assignment.line_key
            )));
        }

        let mut addresses = HashSet::new();
        let mut quantity: i64 = 0;
        for dest in &assignment.destinations {
            if dest.quantity < 1 {
                return Err(ServiceError::ValidationError(
                    "destination quantity must be at least 1".to_string(),
                ));
            }
            if !addresses.insert(dest.address_key) {
                return Err(ServiceError::ValidationError(format!(
                    "address {} appears twice for line {}",
                    dest.address_key, assignment.line_key
                )));
            }
            quantity += dest.quantity as i64;
        }
        if quantity != line.quantity as i64 {
            return Err(ServiceError::ValidationError(format!(
                "destinations for line {} cover {} units, line has {}",
                assignment.line_key, quantity, line.quantity
            )));
        }

        splits.push(LineSplit {
            line_key: assignment.line_key,
            destinations: assignment.destinations.clone(),
        });
    }

    Ok(splits)
}

pub struct IntentCoordinator<'a> {
    env: &'a Environment,
}

impl<'a> IntentCoordinator<'a> {
    pub fn new(env: &'a Environment) -> Self {
        Self { env }
    }

    async fn load_cart_lines(&self, line_keys: &[Uuid]) -> Result<Vec<LineItem>, ServiceError> {
        if line_keys.is_empty() {
            return Err(ServiceError::ValidationError(
                "at least one line is required".to_string(),
            ));
        }
        let unique: HashSet<Uuid> = line_keys.iter().copied().collect();
        if unique.len() != line_keys.len() {
            return Err(ServiceError::ValidationError(
                "line keys must be unique".to_string(),
            ));
        }

        let lines = self.env.repository.find_line_items(line_keys).await?;
        if lines.len() != line_keys.len() {
            let found: HashSet<Uuid> = lines.iter().map(|l| l.key).collect();
            let missing = line_keys.iter().find(|k| !found.contains(k));
            return Err(ServiceError::ValidationError(format!(
                "unknown line {}",
                missing.map(|k| k.to_string()).unwrap_or_default()
            )));
        }

        let statuses = bound_purchase_statuses(self.env, &lines).await?;
        if let Some(line) = lines.iter().find(|l| !is_in_cart(l, &statuses)) {
            return Err(ServiceError::Conflict(format!(
                "Line item {} has already been purchased",
                line.key
            )));
        }
        Ok(lines)
    }

    /// Ownership of lines and destination addresses; guests own only unowned records.
    async fn check_ownership(
        &self,
        customer_key: Option<Uuid>,
        lines: &[LineItem],
        splits: &[LineSplit],
    ) -> Result<(), ServiceError> {
        if let Some(line) = lines.iter().find(|l| l.customer_key != customer_key) {
            return Err(ServiceError::Forbidden(format!(
                "Line item {} belongs to another customer",
                line.key
            )));
        }

        let mut address_keys: Vec<Uuid> = splits
            .iter()
            .flat_map(|s| s.destinations.iter().map(|d| d.address_key))
            .collect();
        address_keys.sort();
        address_keys.dedup();

        let addresses = self.env.repository.find_addresses(&address_keys).await?;
        for key in &address_keys {
            let address = addresses
                .iter()
                .find(|a| a.key == *key)
                .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", key)))?;
            if address.customer_key != customer_key {
                return Err(ServiceError::Forbidden(format!(
                    "Address {} belongs to another customer",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Opens a charge for the submitted cart lines and binds them to a new purchase.
    #[instrument(skip(self, caller, assignments), fields(lines = line_keys.len()))]
    pub async fn create_intent(
        &self,
        line_keys: &[Uuid],
        assignments: &[AddressAssignment],
        caller: &Caller,
    ) -> Result<IntentCreated, ServiceError> {
        let lines = self.load_cart_lines(line_keys).await?;
        let splits = plan_splits(&lines, assignments)?;
        let quote = compute_total(&lines, None)?;
        let payable = quote.payable();
        ensure_chargeable(payable, self.env.policy.minimum_charge)?;

        let purchase_key = Uuid::new_v4();
        let (intent_id, client_secret) = if payable == 0 {
            (
                format!("{}{}", LOCAL_INTENT_PREFIX, Uuid::new_v4()),
                String::new(),
            )
        } else {
            let intent = self
                .env
                .gateway
                .create_intent(payable, &self.env.policy.currency, &intent_metadata(purchase_key))
                .await?;
            (intent.id, intent.client_secret)
        };

        // The intent may already exist at the gateway; failures past this point orphan it.
        let customer_key = match caller {
            Caller::Guest => None,
            Caller::Authenticated(credentials) => {
                let key = self.env.identity.validate(credentials).await.map_err(|e| {
                    warn!(intent_id = %intent_id, "identity rejected after intent creation");
                    e
                })?;
                Some(key)
            }
        };
        self.check_ownership(customer_key, &lines, &splits).await?;

        let purchase = Purchase {
            key: purchase_key,
            customer_key,
            payment_intent_id: intent_id.clone(),
            amount: quote.total,
            coupon_discount: 0,
            coupon_code_hash: None,
            currency: self.env.policy.currency.clone(),
            status: PurchaseStatus::Created,
            email: None,
            address_key: None,
            creation_time: Utc::now(),
            purchase_time: None,
            refund_time: None,
            settlement_snapshot: None,
            settlement_pushed_at: None,
        };
        let purchase = self
            .env
            .repository
            .create_purchase(purchase, line_keys, &splits)
            .await?;

        let kind = if payable == 0 { "local" } else { "gateway" };
        metrics::INTENTS_CREATED.with_label_values(&[kind]).inc();
        info!(
            purchase_key = %purchase.key,
            intent_id = %intent_id,
            amount = payable,
            "purchase bound to intent"
        );

        Ok(IntentCreated {
            client_secret,
            intent_id,
            purchase_key: purchase.key,
            amount: payable,
        })
    }

    /// Reprices the purchase behind `intent_id`, optionally with a coupon, and
    /// moves the gateway charge to the new payable amount.
    #[instrument(skip(self, line_keys, coupon_code))]
    pub async fn update_intent(
        &self,
        intent_id: &str,
        line_keys: Option<&[Uuid]>,
        coupon_code: Option<&str>,
    ) -> Result<IntentUpdated, ServiceError> {
        let purchase = self
            .env
            .repository
            .find_purchase_by_intent(intent_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Intent {} not found", intent_id)))?;
        if purchase.status != PurchaseStatus::Created {
            return Err(ServiceError::Conflict(format!(
                "Purchase {} is already {}",
                purchase.key, purchase.status
            )));
        }

        let lines = self.env.repository.purchase_line_items(purchase.key).await?;
        if let Some(keys) = line_keys {
            let bound: HashSet<Uuid> = lines.iter().map(|l| l.key).collect();
            if let Some(stray) = keys.iter().find(|k| !bound.contains(k)) {
                return Err(ServiceError::ValidationError(format!(
                    "line {} is not part of this checkout",
                    stray
                )));
            }
        }

        let priced = PricingEngine::new(self.env).price(&lines, coupon_code).await?;
        self.check_reprice(&purchase, &priced)?;
        self.commit_reprice(&purchase, &priced).await
    }

    /// Rejects a new quote the purchase's intent cannot carry.
    pub(crate) fn check_reprice(
        &self,
        purchase: &Purchase,
        priced: &PricedCart,
    ) -> Result<(), ServiceError> {
        let payable = priced.quote.payable();
        ensure_chargeable(payable, self.env.policy.minimum_charge)?;
        if payable > 0 && is_local_intent(&purchase.payment_intent_id) {
            return Err(ServiceError::Conflict(format!(
                "Intent {} was opened without a charge; start a new checkout",
                purchase.payment_intent_id
            )));
        }
        Ok(())
    }

    /// Stores a checked quote and moves the gateway charge to its payable amount.
    pub(crate) async fn commit_reprice(
        &self,
        purchase: &Purchase,
        priced: &PricedCart,
    ) -> Result<IntentUpdated, ServiceError> {
        let payable = priced.quote.payable();
        self.env
            .repository
            .apply_quote(
                purchase.key,
                priced.quote.total,
                priced.quote.discount,
                priced.coupon_code_hash.clone(),
            )
            .await?;

        if payable > 0 {
            self.env
                .gateway
                .update_intent(
                    &purchase.payment_intent_id,
                    payable,
                    &intent_metadata(purchase.key),
                )
                .await?;
        }

        info!(
            purchase_key = %purchase.key,
            total = priced.quote.total,
            discount = priced.quote.discount,
            "intent repriced"
        );
        Ok(IntentUpdated {
            total: priced.quote.total,
            discount: priced.quote.discount,
            payable,
        })
    }
}
