use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PurchaseStatus {
    #[sea_orm(string_value = "created")]
    Created,
    #[sea_orm(string_value = "succeeded")]
    Succeeded,
    #[sea_orm(string_value = "canceled")]
    Canceled,
}

/// A purchase bound to exactly one gateway intent.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchases")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: Uuid,
    #[sea_orm(nullable)]
    pub customer_key: Option<Uuid>,
    #[sea_orm(unique)]
    pub payment_intent_id: String,
    /// Pre-discount total in minor units
    pub amount: i64,
    pub coupon_discount: i64,
    #[sea_orm(nullable)]
    pub coupon_code_hash: Option<String>,
    pub currency: String,
    pub status: PurchaseStatus,
    #[sea_orm(nullable)]
    pub email: Option<String>,
    /// Billing address, also the fallback for unassigned lines
    #[sea_orm(nullable)]
    pub address_key: Option<Uuid>,
    pub creation_time: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub purchase_time: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub refund_time: Option<DateTime<Utc>>,
    /// Exact JSON pushed to the ERP on settlement
    #[sea_orm(column_type = "Text", nullable)]
    pub settlement_snapshot: Option<String>,
    #[sea_orm(nullable)]
    pub settlement_pushed_at: Option<DateTime<Utc>>,
}

impl Model {
    /// Amount actually charged, never negative.
    pub fn payable(&self) -> i64 {
        (self.amount - self.coupon_discount).max(0)
    }

    pub fn is_owned_by(&self, customer_key: Uuid) -> bool {
        self.customer_key == Some(customer_key)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerKey",
        to = "super::customer::Column::Key"
    )]
    Customer,
    #[sea_orm(has_many = "super::line_item::Entity")]
    LineItem,
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl Related<super::line_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LineItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
