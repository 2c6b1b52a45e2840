#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use chrono::{Duration, Utc};
use order_settlement::{
    app_router,
    config::AppConfig,
    entities::{
        Address, Coupon, CouponKind, Customer, LineItem, Product, Purchase, ShippingStatus,
    },
    environment::{Environment, SettlementPolicy},
    erp::{ErpAck, ErpClient},
    errors::ServiceError,
    identity::{Caller, Credentials, JwtIdentityValidator},
    notifications::Notifier,
    payments::{IntentMetadata, IntentStatus, PaymentGateway, PaymentIntent, Refund, RefundReason},
    repositories::{InMemoryRepository, SettlementRepository},
    services::{pricing::hash_coupon_code, CartService},
    AppState,
};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// Gateway double that records every call and answers with a configurable status.
pub struct RecordingGateway {
    status: Mutex<IntentStatus>,
    fail_refunds: AtomicBool,
    next_id: AtomicUsize,
    pub created: Mutex<Vec<i64>>,
    pub updated: Mutex<Vec<(String, i64)>>,
    pub lookups: AtomicUsize,
    pub refunds: Mutex<Vec<String>>,
}

impl Default for RecordingGateway {
    fn default() -> Self {
        Self {
            status: Mutex::new(IntentStatus::Succeeded),
            fail_refunds: AtomicBool::new(false),
            next_id: AtomicUsize::new(1),
            created: Mutex::new(Vec::new()),
            updated: Mutex::new(Vec::new()),
            lookups: AtomicUsize::new(0),
            refunds: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingGateway {
    pub fn set_status(&self, status: IntentStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn fail_refunds(&self) {
        self.fail_refunds.store(true, Ordering::SeqCst);
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn create_intent(
        &self,
        amount: i64,
        currency: &str,
        _metadata: &IntentMetadata,
    ) -> Result<PaymentIntent, ServiceError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.created.lock().unwrap().push(amount);
        Ok(PaymentIntent {
            id: format!("pi_test_{n}"),
            client_secret: format!("pi_test_{n}_secret"),
            amount,
            currency: currency.to_string(),
            status: IntentStatus::Created,
        })
    }

    async fn update_intent(
        &self,
        intent_id: &str,
        amount: i64,
        _metadata: &IntentMetadata,
    ) -> Result<PaymentIntent, ServiceError> {
        self.updated
            .lock()
            .unwrap()
            .push((intent_id.to_string(), amount));
        Ok(PaymentIntent {
            id: intent_id.to_string(),
            client_secret: format!("{intent_id}_secret"),
            amount,
            currency: "usd".to_string(),
            status: IntentStatus::Created,
        })
    }

    async fn get_intent(&self, _intent_id: &str) -> Result<IntentStatus, ServiceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(*self.status.lock().unwrap())
    }

    async fn refund(&self, intent_id: &str, _reason: RefundReason) -> Result<Refund, ServiceError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "gateway unavailable".to_string(),
            ));
        }
        self.refunds.lock().unwrap().push(intent_id.to_string());
        Ok(Refund {
            id: format!("re_{intent_id}"),
            status: "succeeded".to_string(),
        })
    }
}

#[derive(Default)]
pub struct RecordingErp {
    fail: AtomicBool,
    pub pushes: Mutex<Vec<(String, Value)>>,
}

impl RecordingErp {
    pub fn fail_pushes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn pushes(&self) -> Vec<(String, Value)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ErpClient for RecordingErp {
    async fn push_settlement(&self, endpoint: &str, payload: &Value) -> Result<ErpAck, ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError("erp down".to_string()));
        }
        self.pushes
            .lock()
            .unwrap()
            .push((endpoint.to_string(), payload.clone()));
        Ok(ErpAck {
            reference: Some("ERP-1".to_string()),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, Uuid)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, Uuid)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_order_confirmation(
        &self,
        email: &str,
        purchase: &Purchase,
        _lines: &[LineItem],
        _products: &[Product],
    ) -> Result<(), ServiceError> {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), purchase.key));
        Ok(())
    }
}

/// In-memory settlement environment with recording collaborators.
pub struct Harness {
    pub repo: Arc<InMemoryRepository>,
    pub gateway: Arc<RecordingGateway>,
    pub erp: Arc<RecordingErp>,
    pub notifier: Arc<RecordingNotifier>,
    pub identity: Arc<JwtIdentityValidator>,
    pub env: Environment,
    clock: AtomicI64,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(SettlementPolicy::default())
    }

    pub fn with_policy(policy: SettlementPolicy) -> Self {
        let repo = Arc::new(InMemoryRepository::new());
        let gateway = Arc::new(RecordingGateway::default());
        let erp = Arc::new(RecordingErp::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let identity = Arc::new(JwtIdentityValidator::new(JWT_SECRET));
        let env = Environment {
            repository: repo.clone(),
            gateway: gateway.clone(),
            erp: erp.clone(),
            notifier: notifier.clone(),
            identity: identity.clone(),
            policy,
        };
        Self {
            repo,
            gateway,
            erp,
            notifier,
            identity,
            env,
            clock: AtomicI64::new(0),
        }
    }

    /// Strictly increasing timestamps so "oldest first" orderings are deterministic.
    fn tick(&self) -> chrono::DateTime<Utc> {
        let n = self.clock.fetch_add(1, Ordering::SeqCst);
        Utc::now() - Duration::hours(1) + Duration::seconds(n)
    }

    pub fn customer(&self, email: &str) -> Customer {
        let customer = Customer {
            key: Uuid::new_v4(),
            email: email.to_string(),
            name: "Test Customer".to_string(),
            created_at: self.tick(),
        };
        self.repo.insert_customer(customer.clone());
        customer
    }

    pub fn address(&self, customer_key: Option<Uuid>, is_default: bool) -> Address {
        let address = Address {
            key: Uuid::new_v4(),
            customer_key,
            recipient: "Ada Lovelace".to_string(),
            line1: "12 Analytical Way".to_string(),
            line2: None,
            city: "London".to_string(),
            region: None,
            postal_code: "N1 9GU".to_string(),
            country: "GB".to_string(),
            phone: None,
            is_default,
            created_at: self.tick(),
        };
        self.repo.insert_address(address.clone());
        address
    }

    pub fn product(&self, sku: &str, unit_price: i64, tax_rate_bps: i32) -> Product {
        let product = Product {
            key: Uuid::new_v4(),
            sku: sku.to_string(),
            name: format!("Product {sku}"),
            unit_price,
            tax_rate_bps,
        };
        self.repo.insert_product(product.clone());
        product
    }

    pub fn coupon(
        &self,
        code: &str,
        kind: CouponKind,
        target: i64,
        reward: i64,
        product_key: Option<Uuid>,
        max_uses: Option<i32>,
    ) -> Coupon {
        let coupon = Coupon {
            key: Uuid::new_v4(),
            code_hash: hash_coupon_code(code).expect("valid coupon code"),
            kind,
            product_key,
            target,
            reward,
            max_uses,
            created_at: self.tick(),
        };
        self.repo.insert_coupon(coupon.clone());
        coupon
    }

    pub async fn add_line(&self, owner: Option<Uuid>, product: &Product, quantity: i32) -> LineItem {
        CartService::new(&self.env)
            .add_item(owner, product.key, quantity)
            .await
            .expect("line added")
    }

    /// Cart line pointing at a product that is not in the catalog.
    pub async fn line_without_product(&self, owner: Option<Uuid>, unit_price: i64) -> LineItem {
        let now = self.tick();
        self.repo
            .insert_line_item(LineItem {
                key: Uuid::new_v4(),
                customer_key: owner,
                product_key: Uuid::new_v4(),
                purchase_key: None,
                unit_price,
                tax_rate_bps: 0,
                quantity: 1,
                address_key: None,
                shipping_status: ShippingStatus::Unshipped,
                created_at: now,
                updated_at: now,
                shipped_at: None,
            })
            .await
            .expect("line inserted")
    }

    pub fn token(&self, customer_key: Uuid) -> String {
        self.identity
            .issue(customer_key, Duration::hours(1))
            .expect("token issued")
    }

    pub fn caller(&self, customer_key: Uuid) -> Caller {
        Caller::Authenticated(Credentials::bearer(self.token(customer_key)))
    }

    pub async fn purchase(&self, key: Uuid) -> Purchase {
        self.repo
            .find_purchase(key)
            .await
            .expect("repository read")
            .expect("purchase exists")
    }

    pub fn lines_of(&self, purchase_key: Uuid) -> Vec<LineItem> {
        self.repo
            .all_line_items()
            .into_iter()
            .filter(|l| l.purchase_key == Some(purchase_key))
            .collect()
    }

    pub fn config(&self) -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "test".to_string(),
        )
    }

    pub fn router(&self) -> Router {
        self.router_with_config(self.config())
    }

    pub fn router_with_config(&self, config: AppConfig) -> Router {
        app_router(AppState::new(self.env.clone(), config))
    }
}

/// Sends one request through the router; `token` becomes a bearer header.
pub async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    router.clone().oneshot(request).await.unwrap()
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
