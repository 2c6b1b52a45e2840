//! Prometheus counters for the settlement pipeline.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref CART_LINES_ADDED: IntCounter = IntCounter::new(
        "settlement_cart_lines_added_total",
        "Lines added to carts"
    )
    .expect("metric can be created");
    pub static ref INTENTS_CREATED: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "settlement_intents_created_total",
            "Purchases bound to a payment intent"
        ),
        &["kind"]
    )
    .expect("metric can be created");
    pub static ref FINALIZATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "settlement_finalizations_total",
            "Finalize calls by outcome"
        ),
        &["outcome"]
    )
    .expect("metric can be created");
    pub static ref ERP_PUSH_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "settlement_erp_push_failures_total",
            "Settlement records the ERP did not acknowledge"
        ),
        &["operation"]
    )
    .expect("metric can be created");
    pub static ref NOTIFICATION_FAILURES: IntCounter = IntCounter::new(
        "settlement_notification_failures_total",
        "Order confirmations that could not be sent"
    )
    .expect("metric can be created");
    pub static ref CANCELLATIONS: IntCounter = IntCounter::new(
        "settlement_cancellations_total",
        "Purchases moved to canceled"
    )
    .expect("metric can be created");
    pub static ref REFUNDS: IntCounterVec = IntCounterVec::new(
        Opts::new("settlement_refunds_total", "Gateway refunds by outcome"),
        &["outcome"]
    )
    .expect("metric can be created");
    pub static ref SHIPMENTS_APPLIED: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "settlement_shipments_applied_total",
            "Fulfillment callbacks by outcome"
        ),
        &["outcome"]
    )
    .expect("metric can be created");
    static ref REGISTERED: bool = register_all();
}

fn register_all() -> bool {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(CART_LINES_ADDED.clone()),
        Box::new(INTENTS_CREATED.clone()),
        Box::new(FINALIZATIONS.clone()),
        Box::new(ERP_PUSH_FAILURES.clone()),
        Box::new(NOTIFICATION_FAILURES.clone()),
        Box::new(CANCELLATIONS.clone()),
        Box::new(REFUNDS.clone()),
        Box::new(SHIPMENTS_APPLIED.clone()),
    ];
    collectors
        .into_iter()
        .all(|c| REGISTRY.register(c).is_ok())
}

/// Text exposition of every settlement counter.
pub fn render() -> String {
    if !*REGISTERED {
        tracing::warn!("some settlement metrics failed to register");
    }
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
