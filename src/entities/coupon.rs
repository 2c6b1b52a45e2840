use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CouponKind {
    /// Flat reward once the order total reaches `target`
    #[sea_orm(string_value = "threshold_flat")]
    ThresholdFlat,
    /// Percent-of-total reward once the order total reaches `target`
    #[sea_orm(string_value = "threshold_percent")]
    ThresholdPercent,
    /// Flat reward once `target` units of `product_key` are in the cart
    #[sea_orm(string_value = "product_quantity_flat")]
    ProductQuantityFlat,
    /// Percent-of-total reward once `target` units of `product_key` are in the cart
    #[sea_orm(string_value = "product_quantity_percent")]
    ProductQuantityPercent,
}

impl CouponKind {
    pub fn is_product_scoped(self) -> bool {
        matches!(
            self,
            CouponKind::ProductQuantityFlat | CouponKind::ProductQuantityPercent
        )
    }
}

/// Discount rule. The plain code is never stored; lookups go through `code_hash`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: Uuid,
    #[sea_orm(unique)]
    pub code_hash: String,
    pub kind: CouponKind,
    #[sea_orm(nullable)]
    pub product_key: Option<Uuid>,
    pub target: i64,
    pub reward: i64,
    #[sea_orm(nullable)]
    pub max_uses: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
