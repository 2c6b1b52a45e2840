//! `SeaOrmRepository` against a migrated in-memory SQLite database.

mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::{RecordingErp, RecordingGateway, RecordingNotifier, JWT_SECRET};
use order_settlement::{
    db::{self, DbConfig},
    entities::{address, customer, product, PurchaseStatus, ShippingStatus},
    environment::{Environment, SettlementPolicy},
    errors::ServiceError,
    identity::{Caller, Credentials, JwtIdentityValidator},
    repositories::{Destination, SeaOrmRepository, SettlementRepository},
    services::{
        AddressAssignment, CancellationEngine, CartService, FinalizationEngine, FinalizeRequest,
        FulfillmentHandler, IntentCoordinator, ShipmentStatus,
    },
};
use sea_orm::{ActiveModelTrait, DatabaseConnection};
use std::sync::Arc;
use uuid::Uuid;

struct SqliteHarness {
    db: Arc<DatabaseConnection>,
    repo: Arc<SeaOrmRepository>,
    erp: Arc<RecordingErp>,
    identity: Arc<JwtIdentityValidator>,
    env: Environment,
}

impl SqliteHarness {
    async fn new() -> Self {
        let config = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..DbConfig::default()
        };
        let pool = db::establish_connection_with_config(&config)
            .await
            .expect("sqlite connection");
        db::run_migrations(&pool).await.expect("migrations");

        let db = Arc::new(pool);
        let repo = Arc::new(SeaOrmRepository::new(db.clone()));
        let erp = Arc::new(RecordingErp::default());
        let identity = Arc::new(JwtIdentityValidator::new(JWT_SECRET));
        let env = Environment {
            repository: repo.clone(),
            gateway: Arc::new(RecordingGateway::default()),
            erp: erp.clone(),
            notifier: Arc::new(RecordingNotifier::default()),
            identity: identity.clone(),
            policy: SettlementPolicy::default(),
        };
        Self {
            db,
            repo,
            erp,
            identity,
            env,
        }
    }

    async fn customer(&self, email: &str) -> customer::Model {
        customer::ActiveModel::from(customer::Model {
            key: Uuid::new_v4(),
            email: email.to_string(),
            name: "Sqlite Customer".to_string(),
            created_at: Utc::now(),
        })
        .insert(&*self.db)
        .await
        .expect("customer inserted")
    }

    async fn address(&self, customer_key: Uuid, is_default: bool, age_secs: i64) -> address::Model {
        address::ActiveModel::from(address::Model {
            key: Uuid::new_v4(),
            customer_key: Some(customer_key),
            recipient: "Grace Hopper".to_string(),
            line1: "1 Harbor Rd".to_string(),
            line2: Some("Suite 2".to_string()),
            city: "Arlington".to_string(),
            region: Some("VA".to_string()),
            postal_code: "22201".to_string(),
            country: "US".to_string(),
            phone: None,
            is_default,
            created_at: Utc::now() - Duration::seconds(age_secs),
        })
        .insert(&*self.db)
        .await
        .expect("address inserted")
    }

    async fn product(&self, unit_price: i64, tax_rate_bps: i32) -> product::Model {
        product::ActiveModel::from(product::Model {
            key: Uuid::new_v4(),
            sku: format!("SKU-{}", &Uuid::new_v4().simple().to_string()[..6]),
            name: "Widget".to_string(),
            unit_price,
            tax_rate_bps,
        })
        .insert(&*self.db)
        .await
        .expect("product inserted")
    }

    fn caller(&self, customer_key: Uuid) -> Caller {
        let token = self
            .identity
            .issue(customer_key, Duration::hours(1))
            .expect("token");
        Caller::Authenticated(Credentials::bearer(token))
    }
}

#[tokio::test]
async fn split_checkout_settles_ships_and_cancels() {
    let h = SqliteHarness::new().await;
    let customer = h.customer("grace@example.com").await;
    let home = h.address(customer.key, true, 60).await;
    let office = h.address(customer.key, false, 30).await;
    let product = h.product(1000, 1000).await;

    let cart = CartService::new(&h.env);
    let split_line = cart.add_item(Some(customer.key), product.key, 3).await.unwrap();
    let plain_line = cart.add_item(Some(customer.key), product.key, 1).await.unwrap();

    let created = IntentCoordinator::new(&h.env)
        .create_intent(
            &[split_line.key, plain_line.key],
            &[AddressAssignment {
                line_key: split_line.key,
                destinations: vec![
                    Destination { address_key: home.key, quantity: 1 },
                    Destination { address_key: office.key, quantity: 2 },
                ],
            }],
            &h.caller(customer.key),
        )
        .await
        .unwrap();
    assert_eq!(created.amount, 4400);

    let lines = h.repo.purchase_line_items(created.purchase_key).await.unwrap();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines.iter().map(|l| l.quantity).sum::<i32>(), 4);
    assert!(cart.list_cart(customer.key).await.unwrap().len() == 3);

    let outcome = FinalizationEngine::new(&h.env)
        .finalize(FinalizeRequest {
            intent_id: created.intent_id.clone(),
            customer_key: customer.key,
            email: "grace@example.com".to_string(),
            billing_address_key: None,
        })
        .await
        .unwrap();
    assert!(outcome.transitioned);
    assert!(cart.list_cart(customer.key).await.unwrap().is_empty());

    let purchase = h.repo.find_purchase(created.purchase_key).await.unwrap().unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Succeeded);
    assert_eq!(purchase.address_key, Some(home.key));
    assert!(purchase.settlement_pushed_at.is_some());
    let plain = h.repo.find_line_item(plain_line.key).await.unwrap().unwrap();
    assert_eq!(plain.address_key, Some(home.key));

    let payload = &h.erp.pushes()[0].1;
    assert_eq!(payload["shipments"].as_array().unwrap().len(), 2);

    // Snapshot is write-once.
    assert!(!h
        .repo
        .store_settlement_snapshot(purchase.key, "{}".to_string(), None)
        .await
        .unwrap());

    let shipped = FulfillmentHandler::new(&h.env)
        .apply_shipment(
            &purchase.key.to_string(),
            &[plain_line.key.to_string()],
            &[split_line.key.to_string()],
        )
        .await
        .unwrap();
    assert_eq!(shipped.status, ShipmentStatus::Shipped);
    let plain = h.repo.find_line_item(plain_line.key).await.unwrap().unwrap();
    assert_eq!(plain.shipping_status, ShippingStatus::Shipped);
    assert!(plain.shipped_at.is_some());

    let canceled = CancellationEngine::new(&h.env)
        .cancel(purchase.key, customer.key)
        .await
        .unwrap();
    assert_eq!(canceled.status, PurchaseStatus::Canceled);
    assert!(canceled.refund_id.is_some());

    let purchase = h.repo.find_purchase(purchase.key).await.unwrap().unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Canceled);
    assert!(purchase.refund_time.is_some());
    let lines = h.repo.purchase_line_items(purchase.key).await.unwrap();
    assert!(lines
        .iter()
        .all(|l| l.shipping_status == ShippingStatus::Canceled));
    assert_eq!(h.erp.pushes()[1].1["deleted"], true);
}

#[tokio::test]
async fn failed_purchase_creation_rolls_back() {
    let h = SqliteHarness::new().await;
    let customer = h.customer("rollback@example.com").await;
    let product = h.product(500, 0).await;
    let line = CartService::new(&h.env)
        .add_item(Some(customer.key), product.key, 1)
        .await
        .unwrap();

    let purchase = order_settlement::entities::Purchase {
        key: Uuid::new_v4(),
        customer_key: Some(customer.key),
        payment_intent_id: "pi_rollback".to_string(),
        amount: 500,
        coupon_discount: 0,
        coupon_code_hash: None,
        currency: "usd".to_string(),
        status: PurchaseStatus::Created,
        email: None,
        address_key: None,
        creation_time: Utc::now(),
        purchase_time: None,
        refund_time: None,
        settlement_snapshot: None,
        settlement_pushed_at: None,
    };

    let err = h
        .repo
        .create_purchase(purchase.clone(), &[line.key, Uuid::new_v4()], &[])
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    assert!(h.repo.find_purchase(purchase.key).await.unwrap().is_none());
    let line = h.repo.find_line_item(line.key).await.unwrap().unwrap();
    assert_eq!(line.purchase_key, None);
}

#[tokio::test]
async fn settle_transition_applies_once() {
    let h = SqliteHarness::new().await;
    let customer = h.customer("once@example.com").await;
    h.address(customer.key, true, 10).await;
    let product = h.product(1000, 0).await;
    let line = CartService::new(&h.env)
        .add_item(Some(customer.key), product.key, 1)
        .await
        .unwrap();
    let created = IntentCoordinator::new(&h.env)
        .create_intent(&[line.key], &[], &h.caller(customer.key))
        .await
        .unwrap();

    let transition = order_settlement::repositories::SettleTransition {
        customer_key: customer.key,
        email: "once@example.com".to_string(),
        address_key: Uuid::new_v4(),
        purchase_time: Utc::now(),
    };
    assert!(h.repo.mark_succeeded(&created.intent_id, &transition).await.unwrap());
    assert!(!h.repo.mark_succeeded(&created.intent_id, &transition).await.unwrap());

    let err = h
        .repo
        .apply_quote(created.purchase_key, 1000, 100, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn settled_lines_are_not_rebound() {
    let h = SqliteHarness::new().await;
    let customer = h.customer("rebind@example.com").await;
    let product = h.product(800, 0).await;
    let line = CartService::new(&h.env)
        .add_item(Some(customer.key), product.key, 1)
        .await
        .unwrap();
    let first = IntentCoordinator::new(&h.env)
        .create_intent(&[line.key], &[], &h.caller(customer.key))
        .await
        .unwrap();

    let fresh_purchase = |intent: &str| order_settlement::entities::Purchase {
        key: Uuid::new_v4(),
        customer_key: Some(customer.key),
        payment_intent_id: intent.to_string(),
        amount: 800,
        coupon_discount: 0,
        coupon_code_hash: None,
        currency: "usd".to_string(),
        status: PurchaseStatus::Created,
        email: None,
        address_key: None,
        creation_time: Utc::now(),
        purchase_time: None,
        refund_time: None,
        settlement_snapshot: None,
        settlement_pushed_at: None,
    };

    // Still open: the line moves to the newer checkout.
    let second = h
        .repo
        .create_purchase(fresh_purchase("pi_second"), &[line.key], &[])
        .await
        .unwrap();
    let bound = h.repo.find_line_item(line.key).await.unwrap().unwrap();
    assert_eq!(bound.purchase_key, Some(second.key));
    assert!(h
        .repo
        .purchase_line_items(first.purchase_key)
        .await
        .unwrap()
        .is_empty());

    let transition = order_settlement::repositories::SettleTransition {
        customer_key: customer.key,
        email: "rebind@example.com".to_string(),
        address_key: Uuid::new_v4(),
        purchase_time: Utc::now(),
    };
    assert!(h.repo.mark_succeeded("pi_second", &transition).await.unwrap());

    let third = fresh_purchase("pi_third");
    let err = h
        .repo
        .create_purchase(third.clone(), &[line.key], &[])
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
    assert!(h.repo.find_purchase(third.key).await.unwrap().is_none());
    let bound = h.repo.find_line_item(line.key).await.unwrap().unwrap();
    assert_eq!(bound.purchase_key, Some(second.key));
}
