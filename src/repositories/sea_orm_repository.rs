use super::{verify_split, LineSplit, SettleTransition, SettlementRepository};
use crate::{
    db::{commit_or_rollback, DbPool},
    entities::{
        address, coupon, customer, line_item, product, purchase, Address, Coupon, Customer,
        LineItem, Product, Purchase, PurchaseStatus, ShippingStatus,
    },
    errors::ServiceError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::{Expr, Query, SelectStatement},
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Postgres/SQLite storage through sea-orm.
#[derive(Clone)]
pub struct SeaOrmRepository {
    db: Arc<DbPool>,
}

impl SeaOrmRepository {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }
}

fn line_active(line: &LineItem) -> line_item::ActiveModel {
    line_item::ActiveModel {
        key: Set(line.key),
        customer_key: Set(line.customer_key),
        product_key: Set(line.product_key),
        purchase_key: Set(line.purchase_key),
        unit_price: Set(line.unit_price),
        tax_rate_bps: Set(line.tax_rate_bps),
        quantity: Set(line.quantity),
        address_key: Set(line.address_key),
        shipping_status: Set(line.shipping_status),
        created_at: Set(line.created_at),
        updated_at: Set(line.updated_at),
        shipped_at: Set(line.shipped_at),
    }
}

fn purchase_active(p: &Purchase) -> purchase::ActiveModel {
    purchase::ActiveModel {
        key: Set(p.key),
        customer_key: Set(p.customer_key),
        payment_intent_id: Set(p.payment_intent_id.clone()),
        amount: Set(p.amount),
        coupon_discount: Set(p.coupon_discount),
        coupon_code_hash: Set(p.coupon_code_hash.clone()),
        currency: Set(p.currency.clone()),
        status: Set(p.status),
        email: Set(p.email.clone()),
        address_key: Set(p.address_key),
        creation_time: Set(p.creation_time),
        purchase_time: Set(p.purchase_time),
        refund_time: Set(p.refund_time),
        settlement_snapshot: Set(p.settlement_snapshot.clone()),
        settlement_pushed_at: Set(p.settlement_pushed_at),
    }
}

/// Keys of purchases still awaiting payment; lines bound to them may be rebound.
fn open_purchase_keys() -> SelectStatement {
    Query::select()
        .column(purchase::Column::Key)
        .from(purchase::Entity)
        .and_where(purchase::Column::Status.eq(PurchaseStatus::Created))
        .to_owned()
}

async fn insert_purchase_with_lines<C: ConnectionTrait>(
    conn: &C,
    purchase: &Purchase,
    line_keys: &[Uuid],
    splits: &[LineSplit],
) -> Result<Purchase, ServiceError> {
    let now = Utc::now();
    let inserted = purchase_active(purchase).insert(conn).await?;

    let bound = line_item::Entity::update_many()
        .col_expr(line_item::Column::PurchaseKey, Expr::value(Some(inserted.key)))
        .col_expr(line_item::Column::UpdatedAt, Expr::value(now))
        .filter(line_item::Column::Key.is_in(line_keys.to_vec()))
        .filter(
            Condition::any()
                .add(line_item::Column::PurchaseKey.is_null())
                .add(line_item::Column::PurchaseKey.in_subquery(open_purchase_keys())),
        )
        .exec(conn)
        .await?;
    if bound.rows_affected != line_keys.len() as u64 {
        return Err(ServiceError::Conflict(format!(
            "bound {} of {} cart lines",
            bound.rows_affected,
            line_keys.len()
        )));
    }

    for split in splits {
        let Some((first, extra)) = split.destinations.split_first() else {
            continue;
        };
        let origin = line_item::Entity::find_by_id(split.line_key)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Line item {} not found", split.line_key))
            })?;

        let mut derived_keys = vec![origin.key];
        for dest in extra {
            let clone = origin.clone_for_destination(dest.quantity, dest.address_key);
            derived_keys.push(clone.key);
            line_active(&clone).insert(conn).await?;
        }

        line_item::Entity::update_many()
            .col_expr(line_item::Column::Quantity, Expr::value(first.quantity))
            .col_expr(
                line_item::Column::AddressKey,
                Expr::value(Some(first.address_key)),
            )
            .col_expr(line_item::Column::UpdatedAt, Expr::value(now))
            .filter(line_item::Column::Key.eq(origin.key))
            .exec(conn)
            .await?;

        let derived = line_item::Entity::find()
            .filter(line_item::Column::Key.is_in(derived_keys))
            .filter(line_item::Column::PurchaseKey.eq(inserted.key))
            .all(conn)
            .await?;
        verify_split(split, &derived)?;
    }

    Ok(inserted)
}

async fn cancel_purchase_rows<C: ConnectionTrait>(
    conn: &C,
    purchase_key: Uuid,
    refund_time: Option<DateTime<Utc>>,
) -> Result<bool, ServiceError> {
    let now = Utc::now();
    let mut update = purchase::Entity::update_many()
        .col_expr(purchase::Column::Status, Expr::value(PurchaseStatus::Canceled))
        .filter(purchase::Column::Key.eq(purchase_key))
        .filter(purchase::Column::Status.eq(PurchaseStatus::Succeeded));
    if let Some(at) = refund_time {
        update = update.col_expr(purchase::Column::RefundTime, Expr::value(Some(at)));
    }
    let result = update.exec(conn).await?;
    if result.rows_affected == 0 {
        return Ok(false);
    }

    line_item::Entity::update_many()
        .col_expr(
            line_item::Column::ShippingStatus,
            Expr::value(ShippingStatus::Canceled),
        )
        .col_expr(line_item::Column::UpdatedAt, Expr::value(now))
        .filter(line_item::Column::PurchaseKey.eq(purchase_key))
        .exec(conn)
        .await?;

    Ok(true)
}

#[async_trait]
impl SettlementRepository for SeaOrmRepository {
    async fn find_customer(&self, key: Uuid) -> Result<Option<Customer>, ServiceError> {
        Ok(customer::Entity::find_by_id(key).one(&*self.db).await?)
    }

    async fn customer_addresses(&self, customer_key: Uuid) -> Result<Vec<Address>, ServiceError> {
        Ok(address::Entity::find()
            .filter(address::Column::CustomerKey.eq(customer_key))
            .order_by_asc(address::Column::CreatedAt)
            .order_by_asc(address::Column::Key)
            .all(&*self.db)
            .await?)
    }

    async fn find_addresses(&self, keys: &[Uuid]) -> Result<Vec<Address>, ServiceError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        Ok(address::Entity::find()
            .filter(address::Column::Key.is_in(keys.to_vec()))
            .all(&*self.db)
            .await?)
    }

    async fn find_product(&self, key: Uuid) -> Result<Option<Product>, ServiceError> {
        Ok(product::Entity::find_by_id(key).one(&*self.db).await?)
    }

    async fn find_products(&self, keys: &[Uuid]) -> Result<Vec<Product>, ServiceError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        Ok(product::Entity::find()
            .filter(product::Column::Key.is_in(keys.to_vec()))
            .all(&*self.db)
            .await?)
    }

    async fn find_coupon_by_hash(&self, code_hash: &str) -> Result<Option<Coupon>, ServiceError> {
        Ok(coupon::Entity::find()
            .filter(coupon::Column::CodeHash.eq(code_hash))
            .one(&*self.db)
            .await?)
    }

    async fn count_coupon_redemptions(&self, code_hash: &str) -> Result<u64, ServiceError> {
        Ok(purchase::Entity::find()
            .filter(purchase::Column::CouponCodeHash.eq(code_hash))
            .filter(purchase::Column::Status.eq(PurchaseStatus::Succeeded))
            .count(&*self.db)
            .await?)
    }

    async fn insert_line_item(&self, line: LineItem) -> Result<LineItem, ServiceError> {
        Ok(line_active(&line).insert(&*self.db).await?)
    }

    async fn find_line_item(&self, key: Uuid) -> Result<Option<LineItem>, ServiceError> {
        Ok(line_item::Entity::find_by_id(key).one(&*self.db).await?)
    }

    async fn find_line_items(&self, keys: &[Uuid]) -> Result<Vec<LineItem>, ServiceError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        Ok(line_item::Entity::find()
            .filter(line_item::Column::Key.is_in(keys.to_vec()))
            .order_by_asc(line_item::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    async fn customer_line_items(&self, customer_key: Uuid) -> Result<Vec<LineItem>, ServiceError> {
        Ok(line_item::Entity::find()
            .filter(line_item::Column::CustomerKey.eq(customer_key))
            .order_by_asc(line_item::Column::CreatedAt)
            .order_by_asc(line_item::Column::Key)
            .all(&*self.db)
            .await?)
    }

    async fn update_line_quantity(
        &self,
        line_key: Uuid,
        quantity: i32,
    ) -> Result<LineItem, ServiceError> {
        let line = line_item::Entity::find_by_id(line_key)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Line item {} not found", line_key)))?;

        let mut active: line_item::ActiveModel = line.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    async fn delete_line_item(&self, line_key: Uuid) -> Result<(), ServiceError> {
        let result = line_item::Entity::delete_by_id(line_key)
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Line item {} not found",
                line_key
            )));
        }
        Ok(())
    }

    async fn find_purchase(&self, key: Uuid) -> Result<Option<Purchase>, ServiceError> {
        Ok(purchase::Entity::find_by_id(key).one(&*self.db).await?)
    }

    async fn find_purchases(&self, keys: &[Uuid]) -> Result<Vec<Purchase>, ServiceError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        Ok(purchase::Entity::find()
            .filter(purchase::Column::Key.is_in(keys.to_vec()))
            .all(&*self.db)
            .await?)
    }

    async fn find_purchase_by_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Purchase>, ServiceError> {
        Ok(purchase::Entity::find()
            .filter(purchase::Column::PaymentIntentId.eq(payment_intent_id))
            .one(&*self.db)
            .await?)
    }

    async fn purchase_line_items(&self, purchase_key: Uuid) -> Result<Vec<LineItem>, ServiceError> {
        Ok(line_item::Entity::find()
            .filter(line_item::Column::PurchaseKey.eq(purchase_key))
            .order_by_asc(line_item::Column::CreatedAt)
            .order_by_asc(line_item::Column::Key)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self, purchase, line_keys, splits), fields(purchase_key = %purchase.key))]
    async fn create_purchase(
        &self,
        purchase: Purchase,
        line_keys: &[Uuid],
        splits: &[LineSplit],
    ) -> Result<Purchase, ServiceError> {
        let txn = self.db.begin().await?;
        let result = insert_purchase_with_lines(&txn, &purchase, line_keys, splits).await;
        commit_or_rollback(txn, result).await
    }

    async fn apply_quote(
        &self,
        purchase_key: Uuid,
        amount: i64,
        discount: i64,
        code_hash: Option<String>,
    ) -> Result<Purchase, ServiceError> {
        let result = purchase::Entity::update_many()
            .col_expr(purchase::Column::Amount, Expr::value(amount))
            .col_expr(purchase::Column::CouponDiscount, Expr::value(discount))
            .col_expr(purchase::Column::CouponCodeHash, Expr::value(code_hash))
            .filter(purchase::Column::Key.eq(purchase_key))
            .filter(purchase::Column::Status.eq(PurchaseStatus::Created))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "Purchase {} is no longer open",
                purchase_key
            )));
        }

        self.find_purchase(purchase_key)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase {} not found", purchase_key)))
    }

    async fn mark_succeeded(
        &self,
        payment_intent_id: &str,
        transition: &SettleTransition,
    ) -> Result<bool, ServiceError> {
        let result = purchase::Entity::update_many()
            .col_expr(purchase::Column::Status, Expr::value(PurchaseStatus::Succeeded))
            .col_expr(
                purchase::Column::PurchaseTime,
                Expr::value(Some(transition.purchase_time)),
            )
            .col_expr(
                purchase::Column::Email,
                Expr::value(Some(transition.email.clone())),
            )
            .col_expr(
                purchase::Column::CustomerKey,
                Expr::value(Some(transition.customer_key)),
            )
            .col_expr(
                purchase::Column::AddressKey,
                Expr::value(Some(transition.address_key)),
            )
            .filter(purchase::Column::PaymentIntentId.eq(payment_intent_id))
            .filter(purchase::Column::Status.eq(PurchaseStatus::Created))
            .exec(&*self.db)
            .await?;
        debug!(rows = result.rows_affected, "settle transition applied");
        Ok(result.rows_affected == 1)
    }

    async fn assign_fallback_address(
        &self,
        purchase_key: Uuid,
        address_key: Uuid,
    ) -> Result<u64, ServiceError> {
        let txn = self.db.begin().await?;
        let result = line_item::Entity::update_many()
            .col_expr(line_item::Column::AddressKey, Expr::value(Some(address_key)))
            .col_expr(line_item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(line_item::Column::PurchaseKey.eq(purchase_key))
            .filter(line_item::Column::AddressKey.is_null())
            .exec(&txn)
            .await
            .map(|r| r.rows_affected)
            .map_err(ServiceError::from);
        commit_or_rollback(txn, result).await
    }

    async fn store_settlement_snapshot(
        &self,
        purchase_key: Uuid,
        snapshot: String,
        pushed_at: Option<DateTime<Utc>>,
    ) -> Result<bool, ServiceError> {
        let result = purchase::Entity::update_many()
            .col_expr(purchase::Column::SettlementSnapshot, Expr::value(Some(snapshot)))
            .col_expr(purchase::Column::SettlementPushedAt, Expr::value(pushed_at))
            .filter(purchase::Column::Key.eq(purchase_key))
            .filter(purchase::Column::SettlementSnapshot.is_null())
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    #[instrument(skip(self))]
    async fn cancel_purchase(
        &self,
        purchase_key: Uuid,
        refund_time: Option<DateTime<Utc>>,
    ) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await?;
        let result = cancel_purchase_rows(&txn, purchase_key, refund_time).await;
        commit_or_rollback(txn, result).await
    }

    async fn mark_lines_shipped(
        &self,
        purchase_key: Uuid,
        line_keys: &[Uuid],
        shipped_at: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        if line_keys.is_empty() {
            return Ok(0);
        }
        let result = line_item::Entity::update_many()
            .col_expr(
                line_item::Column::ShippingStatus,
                Expr::value(ShippingStatus::Shipped),
            )
            .col_expr(line_item::Column::ShippedAt, Expr::value(Some(shipped_at)))
            .col_expr(line_item::Column::UpdatedAt, Expr::value(shipped_at))
            .filter(line_item::Column::PurchaseKey.eq(purchase_key))
            .filter(line_item::Column::Key.is_in(line_keys.to_vec()))
            .filter(line_item::Column::ShippingStatus.eq(ShippingStatus::Unshipped))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
