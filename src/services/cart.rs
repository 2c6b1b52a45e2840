use crate::{
    entities::{LineItem, Purchase, PurchaseStatus, ShippingStatus},
    environment::Environment,
    errors::ServiceError,
    metrics,
    services::{
        intents::IntentCoordinator,
        pricing::{PricedCart, PricingEngine},
    },
};
use chrono::Utc;
use std::collections::HashMap;
use tracing::{info, instrument};
use uuid::Uuid;

/// Status of every purchase the given lines are bound to.
pub(crate) async fn bound_purchase_statuses(
    env: &Environment,
    lines: &[LineItem],
) -> Result<HashMap<Uuid, PurchaseStatus>, ServiceError> {
    let mut keys: Vec<Uuid> = lines.iter().filter_map(|l| l.purchase_key).collect();
    keys.sort();
    keys.dedup();
    Ok(env
        .repository
        .find_purchases(&keys)
        .await?
        .into_iter()
        .map(|p| (p.key, p.status))
        .collect())
}

/// A line is in the cart while unbound or bound to a purchase that is still `created`.
pub(crate) fn is_in_cart(line: &LineItem, statuses: &HashMap<Uuid, PurchaseStatus>) -> bool {
    match line.purchase_key {
        None => true,
        Some(key) => statuses.get(&key) == Some(&PurchaseStatus::Created),
    }
}

pub struct CartService<'a> {
    env: &'a Environment,
}

impl<'a> CartService<'a> {
    pub fn new(env: &'a Environment) -> Self {
        Self { env }
    }

    /// Adds a line with the product's current price and tax frozen into it.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        owner: Option<Uuid>,
        product_key: Uuid,
        quantity: i32,
    ) -> Result<LineItem, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }
        let product = self
            .env
            .repository
            .find_product(product_key)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_key)))?;

        let now = Utc::now();
        let line = LineItem {
            key: Uuid::new_v4(),
            customer_key: owner,
            product_key,
            purchase_key: None,
            unit_price: product.unit_price,
            tax_rate_bps: product.tax_rate_bps,
            quantity,
            address_key: None,
            shipping_status: ShippingStatus::Unshipped,
            created_at: now,
            updated_at: now,
            shipped_at: None,
        };
        let line = self.env.repository.insert_line_item(line).await?;

        metrics::CART_LINES_ADDED.inc();
        info!(line_key = %line.key, sku = %product.sku, "line added to cart");
        Ok(line)
    }

    pub async fn list_cart(&self, customer_key: Uuid) -> Result<Vec<LineItem>, ServiceError> {
        let lines = self.env.repository.customer_line_items(customer_key).await?;
        let statuses = bound_purchase_statuses(self.env, &lines).await?;
        Ok(lines
            .into_iter()
            .filter(|l| is_in_cart(l, &statuses))
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        owner: Option<Uuid>,
        line_key: Uuid,
        quantity: i32,
    ) -> Result<LineItem, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }
        let line = self.editable_line(owner, line_key).await?;
        let requote = self.requote_open_purchase(&line, Some(quantity)).await?;
        let line = self
            .env
            .repository
            .update_line_quantity(line_key, quantity)
            .await?;
        self.commit_requote(requote).await?;
        Ok(line)
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, owner: Option<Uuid>, line_key: Uuid) -> Result<(), ServiceError> {
        let line = self.editable_line(owner, line_key).await?;
        let requote = self.requote_open_purchase(&line, None).await?;
        self.env.repository.delete_line_item(line_key).await?;
        self.commit_requote(requote).await
    }

    /// Prices the open purchase `line` is bound to as it will be after the edit,
    /// with `None` meaning the line is removed. Checked before anything is written.
    async fn requote_open_purchase(
        &self,
        line: &LineItem,
        quantity: Option<i32>,
    ) -> Result<Option<(Purchase, PricedCart)>, ServiceError> {
        let Some(purchase_key) = line.purchase_key else {
            return Ok(None);
        };
        let repo = &self.env.repository;
        let purchase = repo
            .find_purchase(purchase_key)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase {} not found", purchase_key)))?;

        let mut lines = repo.purchase_line_items(purchase_key).await?;
        match quantity {
            Some(quantity) => lines
                .iter_mut()
                .filter(|l| l.key == line.key)
                .for_each(|l| l.quantity = quantity),
            None => lines.retain(|l| l.key != line.key),
        }

        let priced = PricingEngine::new(self.env)
            .price_with_hash(&lines, purchase.coupon_code_hash.as_deref())
            .await?;
        IntentCoordinator::new(self.env).check_reprice(&purchase, &priced)?;
        Ok(Some((purchase, priced)))
    }

    async fn commit_requote(
        &self,
        requote: Option<(Purchase, PricedCart)>,
    ) -> Result<(), ServiceError> {
        if let Some((purchase, priced)) = requote {
            IntentCoordinator::new(self.env)
                .commit_reprice(&purchase, &priced)
                .await?;
        }
        Ok(())
    }

    async fn editable_line(
        &self,
        owner: Option<Uuid>,
        line_key: Uuid,
    ) -> Result<LineItem, ServiceError> {
        let line = self
            .env
            .repository
            .find_line_item(line_key)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Line item {} not found", line_key)))?;

        if line.customer_key != owner {
            return Err(ServiceError::Forbidden(format!(
                "Line item {} belongs to another cart",
                line_key
            )));
        }

        let statuses = bound_purchase_statuses(self.env, std::slice::from_ref(&line)).await?;
        if !is_in_cart(&line, &statuses) {
            return Err(ServiceError::Conflict(format!(
                "Line item {} has already been purchased",
                line_key
            )));
        }
        Ok(line)
    }
}
