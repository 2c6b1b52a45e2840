//! Order confirmation delivery.

use crate::{
    entities::{LineItem, Product, Purchase},
    erp::sign,
    errors::ServiceError,
    metrics,
    services::pricing::line_amount,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationLine {
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub amount: i64,
}

/// Everything a confirmation message needs, already rendered to plain values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub email: String,
    pub purchase_key: Uuid,
    pub currency: String,
    pub total: i64,
    pub discount: i64,
    pub payable: i64,
    pub lines: Vec<ConfirmationLine>,
}

impl OrderConfirmation {
    pub fn new(
        email: &str,
        purchase: &Purchase,
        lines: &[LineItem],
        products: &[Product],
    ) -> Result<Self, ServiceError> {
        let by_key: HashMap<Uuid, &Product> = products.iter().map(|p| (p.key, p)).collect();
        let lines = lines
            .iter()
            .map(|line| {
                let (sku, name) = by_key
                    .get(&line.product_key)
                    .map(|p| (p.sku.clone(), p.name.clone()))
                    .unwrap_or_default();
                Ok(ConfirmationLine {
                    sku,
                    name,
                    quantity: line.quantity,
                    amount: line_amount(line.unit_price, line.tax_rate_bps, line.quantity)?,
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        Ok(Self {
            email: email.to_string(),
            purchase_key: purchase.key,
            currency: purchase.currency.clone(),
            total: purchase.amount,
            discount: purchase.coupon_discount,
            payable: purchase.payable(),
            lines,
        })
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_order_confirmation(
        &self,
        email: &str,
        purchase: &Purchase,
        lines: &[LineItem],
        products: &[Product],
    ) -> Result<(), ServiceError>;
}

/// Logs confirmations instead of delivering them.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send_order_confirmation(
        &self,
        email: &str,
        purchase: &Purchase,
        lines: &[LineItem],
        products: &[Product],
    ) -> Result<(), ServiceError> {
        let message = OrderConfirmation::new(email, purchase, lines, products)?;
        info!(
            purchase_key = %message.purchase_key,
            email = %message.email,
            lines = message.lines.len(),
            payable = message.payable,
            "order confirmation"
        );
        Ok(())
    }
}

/// Posts signed confirmation events to a webhook, retrying with exponential backoff.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
    max_retries: u32,
    base_backoff: Duration,
}

impl WebhookNotifier {
    pub fn new(url: String, secret: Option<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("notification client: {}", e)))?;
        Ok(Self {
            client,
            url,
            secret,
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
        })
    }

    pub fn with_retry_policy(mut self, max_retries: u32, base_backoff: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.base_backoff = base_backoff;
        self
    }

    #[instrument(skip(self, body))]
    async fn deliver(&self, body: Vec<u8>) -> Result<(), ServiceError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self
            .secret
            .as_deref()
            .map(|secret| sign(secret, &timestamp, &body));

        for attempt in 1..=self.max_retries {
            let mut request = self
                .client
                .post(&self.url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header("x-timestamp", &timestamp)
                .body(body.clone());
            if let Some(sig) = &signature {
                request = request.header("x-signature", sig);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    info!(attempt, "confirmation webhook delivered");
                    return Ok(());
                }
                Ok(response) => {
                    warn!(
                        status = %response.status(),
                        attempt,
                        max = self.max_retries,
                        "confirmation webhook rejected"
                    );
                }
                Err(e) => {
                    warn!(error = %e, attempt, max = self.max_retries, "confirmation webhook failed");
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(self.base_backoff * 2_u32.pow(attempt - 1)).await;
            }
        }

        error!(attempts = self.max_retries, "confirmation webhook undeliverable");
        Err(ServiceError::ExternalServiceError(format!(
            "confirmation webhook failed after {} attempts",
            self.max_retries
        )))
    }
}

#[derive(Serialize)]
struct WebhookEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: &'a OrderConfirmation,
}

impl WebhookNotifier {
    /// Delivers one confirmation and waits for the outcome, retries included.
    pub async fn deliver_confirmation(
        &self,
        email: &str,
        purchase: &Purchase,
        lines: &[LineItem],
        products: &[Product],
    ) -> Result<(), ServiceError> {
        self.deliver(confirmation_body(email, purchase, lines, products)?)
            .await
    }
}

fn confirmation_body(
    email: &str,
    purchase: &Purchase,
    lines: &[LineItem],
    products: &[Product],
) -> Result<Vec<u8>, ServiceError> {
    let message = OrderConfirmation::new(email, purchase, lines, products)?;
    Ok(serde_json::to_vec(&WebhookEnvelope {
        kind: "order_confirmation",
        data: &message,
    })?)
}

/// Hands delivery to a background task; retries never hold up the caller.
#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_order_confirmation(
        &self,
        email: &str,
        purchase: &Purchase,
        lines: &[LineItem],
        products: &[Product],
    ) -> Result<(), ServiceError> {
        let body = confirmation_body(email, purchase, lines, products)?;
        let notifier = self.clone();
        let purchase_key = purchase.key;
        tokio::spawn(async move {
            if let Err(e) = notifier.deliver(body).await {
                metrics::NOTIFICATION_FAILURES.inc();
                error!(purchase_key = %purchase_key, error = %e, "order confirmation not delivered");
            }
        });
        Ok(())
    }
}
