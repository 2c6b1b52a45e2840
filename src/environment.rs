//! Collaborators and policy shared by every settlement operation.

use crate::{
    config::AppConfig,
    db::DbPool,
    erp::{http::HttpErpClient, ErpClient},
    errors::ServiceError,
    identity::{IdentityValidator, JwtIdentityValidator},
    notifications::{Notifier, TracingNotifier, WebhookNotifier},
    payments::{http::HttpPaymentGateway, PaymentGateway},
    repositories::{sea_orm_repository::SeaOrmRepository, SettlementRepository},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeploymentStage {
    Production,
    Staging,
}

/// Knobs that change settlement behaviour without changing collaborators.
#[derive(Debug, Clone)]
pub struct SettlementPolicy {
    pub currency: String,
    /// Smallest nonzero amount the gateway will charge
    pub minimum_charge: i64,
    pub stage: DeploymentStage,
    /// ERP endpoint settlement records are pushed to
    pub erp_endpoint: String,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            currency: "usd".to_string(),
            minimum_charge: 50,
            stage: DeploymentStage::Staging,
            erp_endpoint: "orders".to_string(),
        }
    }
}

impl SettlementPolicy {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            currency: cfg.currency.to_lowercase(),
            minimum_charge: cfg.minimum_charge,
            stage: cfg.stage(),
            erp_endpoint: cfg.erp_settlement_endpoint.clone(),
        }
    }

    /// Staging stamps `refund_time` on cancellation; production leaves it to the gateway.
    pub fn stamps_refund_time(&self) -> bool {
        self.stage == DeploymentStage::Staging
    }
}

#[derive(Clone)]
pub struct Environment {
    pub repository: Arc<dyn SettlementRepository>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub erp: Arc<dyn ErpClient>,
    pub notifier: Arc<dyn Notifier>,
    pub identity: Arc<dyn IdentityValidator>,
    pub policy: SettlementPolicy,
}

impl Environment {
    /// Wires the HTTP adapters and the database-backed repository from configuration.
    pub fn from_config(cfg: &AppConfig, db: Arc<DbPool>) -> Result<Self, ServiceError> {
        let timeout = cfg.external_timeout();

        let gateway = HttpPaymentGateway::new(
            cfg.gateway_base_url.clone(),
            cfg.gateway_secret_key.clone(),
            timeout,
        )?;
        let erp = HttpErpClient::new(
            cfg.erp_base_url.clone(),
            cfg.erp_api_key.clone(),
            cfg.erp_signing_secret.clone(),
            timeout,
        )?;
        let notifier: Arc<dyn Notifier> = match &cfg.notification_webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(
                url.clone(),
                cfg.notification_webhook_secret.clone(),
                timeout,
            )?),
            None => Arc::new(TracingNotifier),
        };

        Ok(Self {
            repository: Arc::new(SeaOrmRepository::new(db)),
            gateway: Arc::new(gateway),
            erp: Arc::new(erp),
            notifier,
            identity: Arc::new(JwtIdentityValidator::new(&cfg.jwt_secret)),
            policy: SettlementPolicy::from_config(cfg),
        })
    }
}
