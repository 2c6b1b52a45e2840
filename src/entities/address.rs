use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Postal/contact record. At most one per customer carries `is_default`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "addresses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: Uuid,
    #[sea_orm(nullable)]
    pub customer_key: Option<Uuid>,
    pub recipient: String,
    pub line1: String,
    #[sea_orm(nullable)]
    pub line2: Option<String>,
    pub city: String,
    #[sea_orm(nullable)]
    pub region: Option<String>,
    pub postal_code: String,
    pub country: String,
    #[sea_orm(nullable)]
    pub phone: Option<String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl Model {
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
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
