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
pub enum ShippingStatus {
    #[sea_orm(string_value = "none")]
    #[serde(rename = "none")]
    #[strum(serialize = "none")]
    Unshipped,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "canceled")]
    Canceled,
}

/// A cart line. Price and tax are frozen when the line is created.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "line_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: Uuid,
    #[sea_orm(nullable)]
    pub customer_key: Option<Uuid>,
    pub product_key: Uuid,
    #[sea_orm(nullable)]
    pub purchase_key: Option<Uuid>,
    pub unit_price: i64,
    pub tax_rate_bps: i32,
    pub quantity: i32,
    #[sea_orm(nullable)]
    pub address_key: Option<Uuid>,
    pub shipping_status: ShippingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub shipped_at: Option<DateTime<Utc>>,
}

impl Model {
    /// Copy of this line for another destination: same product, price and tax.
    pub fn clone_for_destination(&self, quantity: i32, address_key: Uuid) -> Self {
        let now = Utc::now();
        Self {
            key: Uuid::new_v4(),
            quantity,
            address_key: Some(address_key),
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::purchase::Entity",
        from = "Column::PurchaseKey",
        to = "super::purchase::Column::Key"
    )]
    Purchase,
}

impl Related<super::purchase::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Purchase.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
