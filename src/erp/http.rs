use super::{sign, ErpAck, ErpClient};
use crate::errors::ServiceError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Posts settlement records to `{base_url}/{endpoint}`.
#[derive(Clone)]
pub struct HttpErpClient {
    client: Client,
    base_url: String,
    api_key: String,
    signing_secret: Option<String>,
}

impl HttpErpClient {
    pub fn new(
        base_url: String,
        api_key: String,
        signing_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("erp client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            signing_secret,
        })
    }
}

#[async_trait]
impl ErpClient for HttpErpClient {
    #[instrument(skip(self, payload))]
    async fn push_settlement(&self, endpoint: &str, payload: &Value) -> Result<ErpAck, ServiceError> {
        let body = serde_json::to_vec(payload)?;
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));

        let mut request = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.signing_secret {
            let timestamp = chrono::Utc::now().timestamp().to_string();
            request = request
                .header(SIGNATURE_HEADER, sign(secret, &timestamp, &body))
                .header(TIMESTAMP_HEADER, timestamp);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(%status, detail = %detail, "erp rejected settlement record");
            return Err(ServiceError::ExternalServiceError(format!(
                "erp push to {} failed with status {}",
                endpoint, status
            )));
        }

        let text = response.text().await?;
        let ack = if text.trim().is_empty() {
            ErpAck::default()
        } else {
            serde_json::from_str(&text)?
        };
        info!(reference = ?ack.reference, "erp accepted settlement record");
        Ok(ack)
    }
}
