//! Payment gateway seam.

use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod http;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IntentStatus {
    Created,
    RequiresAction,
    Processing,
    Succeeded,
    Canceled,
}

impl IntentStatus {
    /// Only `succeeded` settles a purchase; everything else leaves it open.
    pub fn settles(self) -> bool {
        self == IntentStatus::Succeeded
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub client_secret: String,
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    pub status: IntentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RefundReason {
    RequestedByCustomer,
    Duplicate,
    Fraudulent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    #[serde(default)]
    pub status: String,
}

pub type IntentMetadata = BTreeMap<String, String>;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens an intent for `amount` minor units. Nothing is captured yet.
    async fn create_intent(
        &self,
        amount: i64,
        currency: &str,
        metadata: &IntentMetadata,
    ) -> Result<PaymentIntent, ServiceError>;

    async fn update_intent(
        &self,
        intent_id: &str,
        amount: i64,
        metadata: &IntentMetadata,
    ) -> Result<PaymentIntent, ServiceError>;

    async fn get_intent(&self, intent_id: &str) -> Result<IntentStatus, ServiceError>;

    async fn refund(&self, intent_id: &str, reason: RefundReason) -> Result<Refund, ServiceError>;
}
