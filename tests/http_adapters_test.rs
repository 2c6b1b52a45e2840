//! HTTP adapters against a local mock server.

use assert_matches::assert_matches;
use chrono::Utc;
use order_settlement::{
    entities::{Purchase, PurchaseStatus},
    erp::{http::HttpErpClient, verify_signature, ErpClient},
    errors::ServiceError,
    notifications::{Notifier, WebhookNotifier},
    payments::{http::HttpPaymentGateway, IntentMetadata, IntentStatus, PaymentGateway, RefundReason},
};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;
use wiremock::{
    matchers::{body_json, header, header_exists, method, path},
    Mock, MockServer, ResponseTemplate,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn gateway(server: &MockServer) -> HttpPaymentGateway {
    HttpPaymentGateway::new(format!("{}/", server.uri()), "sk_test_123".to_string(), TIMEOUT)
        .expect("gateway client")
}

fn purchase() -> Purchase {
    Purchase {
        key: Uuid::new_v4(),
        customer_key: None,
        payment_intent_id: "pi_1".to_string(),
        amount: 2200,
        coupon_discount: 300,
        coupon_code_hash: None,
        currency: "usd".to_string(),
        status: PurchaseStatus::Succeeded,
        email: Some("ada@example.com".to_string()),
        address_key: None,
        creation_time: Utc::now(),
        purchase_time: Some(Utc::now()),
        refund_time: None,
        settlement_snapshot: None,
        settlement_pushed_at: None,
    }
}

#[tokio::test]
async fn create_intent_posts_amount_with_bearer_key() {
    let server = MockServer::start().await;
    let mut metadata = IntentMetadata::new();
    metadata.insert("purchase_key".to_string(), "p-1".to_string());

    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(header("authorization", "Bearer sk_test_123"))
        .and(body_json(json!({
            "amount": 1900,
            "currency": "usd",
            "metadata": {"purchase_key": "p-1"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_abc",
            "client_secret": "pi_abc_secret",
            "amount": 1900,
            "currency": "usd",
            "status": "requires_action"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let intent = gateway(&server)
        .create_intent(1900, "usd", &metadata)
        .await
        .unwrap();

    assert_eq!(intent.id, "pi_abc");
    assert_eq!(intent.client_secret, "pi_abc_secret");
    assert_eq!(intent.status, IntentStatus::RequiresAction);
}

#[tokio::test]
async fn get_intent_reads_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_abc",
            "amount": 1900,
            "status": "succeeded"
        })))
        .mount(&server)
        .await;

    let status = gateway(&server).get_intent("pi_abc").await.unwrap();
    assert!(status.settles());
}

#[tokio::test]
async fn gateway_error_status_is_upstream_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents/pi_abc"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .update_intent("pi_abc", 100, &IntentMetadata::new())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ExternalServiceError(_));
}

#[tokio::test]
async fn refund_rejection_is_payment_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .and(body_json(json!({
            "payment_intent": "pi_abc",
            "reason": "requested_by_customer"
        })))
        .respond_with(ResponseTemplate::new(402))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .refund("pi_abc", RefundReason::RequestedByCustomer)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PaymentFailed(_));
}

#[tokio::test]
async fn erp_push_is_signed_and_tolerates_empty_ack() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(header("x-api-key", "erp-key"))
        .and(header_exists("x-signature"))
        .and(header_exists("x-timestamp"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpErpClient::new(
        server.uri(),
        "erp-key".to_string(),
        Some("erp-secret".to_string()),
        TIMEOUT,
    )
    .unwrap();
    let ack = client
        .push_settlement("/orders", &json!({"schemaVersion": 1, "deleted": false}))
        .await
        .unwrap();
    assert_eq!(ack.reference, None);

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let header_str = |name: &str| {
        request
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string()
    };
    assert!(verify_signature(
        "erp-secret",
        &header_str("x-timestamp"),
        &header_str("x-signature"),
        &request.body,
        300,
        Utc::now().timestamp(),
    ));
}

#[tokio::test]
async fn erp_rejection_is_upstream_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = HttpErpClient::new(server.uri(), "erp-key".to_string(), None, TIMEOUT).unwrap();
    let err = client
        .push_settlement("orders", &json!({}))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ExternalServiceError(_));
}

#[tokio::test]
async fn webhook_notifier_retries_until_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/orders"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hooks/orders"))
        .and(header_exists("x-signature"))
        .respond_with(ResponseTemplate::new(200))
        .with_priority(2)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(
        format!("{}/hooks/orders", server.uri()),
        Some("hook-secret".to_string()),
        TIMEOUT,
    )
    .unwrap()
    .with_retry_policy(3, Duration::from_millis(10));

    notifier
        .deliver_confirmation("ada@example.com", &purchase(), &[], &[])
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let body: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(body["type"], "order_confirmation");
    assert_eq!(body["data"]["email"], "ada@example.com");
    assert_eq!(body["data"]["payable"], 1900);
}

#[tokio::test]
async fn webhook_notifier_gives_up_after_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(server.uri(), None, TIMEOUT)
        .unwrap()
        .with_retry_policy(2, Duration::from_millis(5));

    let err = notifier
        .deliver_confirmation("ada@example.com", &purchase(), &[], &[])
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ExternalServiceError(_));
}

#[tokio::test]
async fn webhook_confirmation_is_sent_in_the_background() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/orders"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(format!("{}/hooks/orders", server.uri()), None, TIMEOUT)
        .unwrap()
        .with_retry_policy(3, Duration::from_secs(1));

    let started = std::time::Instant::now();
    notifier
        .send_order_confirmation("ada@example.com", &purchase(), &[], &[])
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(400));

    let mut delivered = 0;
    for _ in 0..50 {
        delivered = server.received_requests().await.unwrap().len();
        if delivered > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(delivered, 1);
}
