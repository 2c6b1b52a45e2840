//! Storage seam for the settlement pipeline.
//!
//! Every method that touches more than one row is a single unit of work: the
//! implementation either applies all of it or none of it.

use crate::entities::{Address, Coupon, Customer, LineItem, Product, Purchase};
use crate::errors::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod memory;
pub mod sea_orm_repository;

pub use memory::InMemoryRepository;
pub use sea_orm_repository::SeaOrmRepository;

/// One shipping destination for (part of) a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub address_key: Uuid,
    pub quantity: i32,
}

/// How one submitted line is spread over its destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSplit {
    pub line_key: Uuid,
    pub destinations: Vec<Destination>,
}

/// Fields written by the settle transition.
#[derive(Debug, Clone)]
pub struct SettleTransition {
    pub customer_key: Uuid,
    pub email: String,
    pub address_key: Uuid,
    pub purchase_time: DateTime<Utc>,
}

#[async_trait]
pub trait SettlementRepository: Send + Sync {
    async fn find_customer(&self, key: Uuid) -> Result<Option<Customer>, ServiceError>;

    /// Addresses owned by the customer, oldest first.
    async fn customer_addresses(&self, customer_key: Uuid) -> Result<Vec<Address>, ServiceError>;

    async fn find_addresses(&self, keys: &[Uuid]) -> Result<Vec<Address>, ServiceError>;

    async fn find_product(&self, key: Uuid) -> Result<Option<Product>, ServiceError>;

    async fn find_products(&self, keys: &[Uuid]) -> Result<Vec<Product>, ServiceError>;

    async fn find_coupon_by_hash(&self, code_hash: &str) -> Result<Option<Coupon>, ServiceError>;

    /// Succeeded purchases that redeemed the coupon with this hash.
    async fn count_coupon_redemptions(&self, code_hash: &str) -> Result<u64, ServiceError>;

    async fn insert_line_item(&self, line: LineItem) -> Result<LineItem, ServiceError>;

    async fn find_line_item(&self, key: Uuid) -> Result<Option<LineItem>, ServiceError>;

    async fn find_line_items(&self, keys: &[Uuid]) -> Result<Vec<LineItem>, ServiceError>;

    /// Every line the customer owns, in creation order, regardless of purchase state.
    async fn customer_line_items(&self, customer_key: Uuid) -> Result<Vec<LineItem>, ServiceError>;

    async fn update_line_quantity(
        &self,
        line_key: Uuid,
        quantity: i32,
    ) -> Result<LineItem, ServiceError>;

    async fn delete_line_item(&self, line_key: Uuid) -> Result<(), ServiceError>;

    async fn find_purchase(&self, key: Uuid) -> Result<Option<Purchase>, ServiceError>;

    async fn find_purchases(&self, keys: &[Uuid]) -> Result<Vec<Purchase>, ServiceError>;

    async fn find_purchase_by_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Purchase>, ServiceError>;

    /// Lines bound to the purchase, in creation order.
    async fn purchase_line_items(&self, purchase_key: Uuid) -> Result<Vec<LineItem>, ServiceError>;

    /// Inserts the purchase, binds `line_keys` to it and applies `splits`.
    ///
    /// After a split the lines derived from the origin must match the number of
    /// destinations exactly, otherwise nothing is kept.
    async fn create_purchase(
        &self,
        purchase: Purchase,
        line_keys: &[Uuid],
        splits: &[LineSplit],
    ) -> Result<Purchase, ServiceError>;

    /// Records a repriced total and its coupon outcome on a purchase that is still `created`.
    async fn apply_quote(
        &self,
        purchase_key: Uuid,
        amount: i64,
        discount: i64,
        code_hash: Option<String>,
    ) -> Result<Purchase, ServiceError>;

    /// `created -> succeeded` for the intent. Returns false when another call won.
    async fn mark_succeeded(
        &self,
        payment_intent_id: &str,
        transition: &SettleTransition,
    ) -> Result<bool, ServiceError>;

    /// Gives every bound line without an address the fallback address.
    async fn assign_fallback_address(
        &self,
        purchase_key: Uuid,
        address_key: Uuid,
    ) -> Result<u64, ServiceError>;

    /// Stores the settlement payload once; later calls leave the first snapshot intact.
    async fn store_settlement_snapshot(
        &self,
        purchase_key: Uuid,
        snapshot: String,
        pushed_at: Option<DateTime<Utc>>,
    ) -> Result<bool, ServiceError>;

    /// Cancels every line and moves the purchase `succeeded -> canceled`.
    /// Returns false (and changes nothing) when the purchase was no longer `succeeded`.
    async fn cancel_purchase(
        &self,
        purchase_key: Uuid,
        refund_time: Option<DateTime<Utc>>,
    ) -> Result<bool, ServiceError>;

    /// Marks unshipped lines of the purchase as shipped; returns the number changed.
    async fn mark_lines_shipped(
        &self,
        purchase_key: Uuid,
        line_keys: &[Uuid],
        shipped_at: DateTime<Utc>,
    ) -> Result<u64, ServiceError>;
}

/// Checks the lines derived from a split origin against its destinations.
pub(crate) fn verify_split(
    split: &LineSplit,
    derived: &[LineItem],
) -> Result<(), ServiceError> {
    if derived.len() != split.destinations.len() {
        return Err(ServiceError::InternalError(format!(
            "line {} split into {} lines, expected {}",
            split.line_key,
            derived.len(),
            split.destinations.len()
        )));
    }
    Ok(())
}
