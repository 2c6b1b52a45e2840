use super::{IntentMetadata, IntentStatus, PaymentGateway, PaymentIntent, Refund, RefundReason};
use crate::errors::ServiceError;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// JSON-over-HTTP gateway client authenticated with a bearer secret key.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    secret_key: String,
}

#[derive(Serialize)]
struct CreateIntentBody<'a> {
    amount: i64,
    currency: &'a str,
    metadata: &'a IntentMetadata,
}

#[derive(Serialize)]
struct UpdateIntentBody<'a> {
    amount: i64,
    metadata: &'a IntentMetadata,
}

#[derive(Serialize)]
struct RefundBody<'a> {
    payment_intent: &'a str,
    reason: RefundReason,
}

impl HttpPaymentGateway {
    pub fn new(base_url: String, secret_key: String, timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("gateway client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    async fn read<T: DeserializeOwned>(response: Response, action: &str) -> Result<T, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, action, body = %body, "gateway rejected request");
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway {} failed with status {}",
                action, status
            )));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, metadata))]
    async fn create_intent(
        &self,
        amount: i64,
        currency: &str,
        metadata: &IntentMetadata,
    ) -> Result<PaymentIntent, ServiceError> {
        let response = self
            .client
            .post(self.url("payment_intents"))
            .bearer_auth(&self.secret_key)
            .json(&CreateIntentBody {
                amount,
                currency,
                metadata,
            })
            .send()
            .await?;
        let intent: PaymentIntent = Self::read(response, "create_intent").await?;
        info!(intent_id = %intent.id, amount, "payment intent created");
        Ok(intent)
    }

    #[instrument(skip(self, metadata))]
    async fn update_intent(
        &self,
        intent_id: &str,
        amount: i64,
        metadata: &IntentMetadata,
    ) -> Result<PaymentIntent, ServiceError> {
        let response = self
            .client
            .post(self.url(&format!("payment_intents/{}", intent_id)))
            .bearer_auth(&self.secret_key)
            .json(&UpdateIntentBody { amount, metadata })
            .send()
            .await?;
        Self::read(response, "update_intent").await
    }

    #[instrument(skip(self))]
    async fn get_intent(&self, intent_id: &str) -> Result<IntentStatus, ServiceError> {
        let response = self
            .client
            .get(self.url(&format!("payment_intents/{}", intent_id)))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        let intent: PaymentIntent = Self::read(response, "get_intent").await?;
        Ok(intent.status)
    }

    #[instrument(skip(self))]
    async fn refund(&self, intent_id: &str, reason: RefundReason) -> Result<Refund, ServiceError> {
        let response = self
            .client
            .post(self.url("refunds"))
            .bearer_auth(&self.secret_key)
            .json(&RefundBody {
                payment_intent: intent_id,
                reason,
            })
            .send()
            .await
            .map_err(|e| ServiceError::PaymentFailed(format!("refund request failed: {}", e)))?;

        Self::read(response, "refund").await.map_err(|e| match e {
            ServiceError::ExternalServiceError(msg) => ServiceError::PaymentFailed(msg),
            other => other,
        })
    }
}
