use super::require_customer;
use crate::{
    entities::{LineItem, PurchaseStatus},
    errors::ServiceError,
    services::{CancelOutcome, CancellationEngine},
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Customer-facing view of a purchase; the settlement snapshot stays internal.
#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseView {
    pub key: Uuid,
    pub payment_intent_id: String,
    pub status: PurchaseStatus,
    pub currency: String,
    pub amount: i64,
    pub coupon_discount: i64,
    pub payable: i64,
    pub email: Option<String>,
    pub address_key: Option<Uuid>,
    pub creation_time: DateTime<Utc>,
    pub purchase_time: Option<DateTime<Utc>>,
    pub refund_time: Option<DateTime<Utc>>,
    pub settled_with_erp: bool,
    pub lines: Vec<LineItem>,
}

/// GET /api/v1/purchases/:purchase_key
pub async fn get_purchase(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(purchase_key): Path<Uuid>,
) -> ApiResult<PurchaseView> {
    let customer = require_customer(&state, &headers).await?;
    let purchase = state
        .env
        .repository
        .find_purchase(purchase_key)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Purchase {} not found", purchase_key)))?;
    if !purchase.is_owned_by(customer) {
        return Err(ServiceError::Forbidden(format!(
            "Purchase {} belongs to another customer",
            purchase_key
        )));
    }
    let lines = state.env.repository.purchase_line_items(purchase_key).await?;

    Ok(Json(ApiResponse::success(PurchaseView {
        key: purchase.key,
        payable: purchase.payable(),
        payment_intent_id: purchase.payment_intent_id,
        status: purchase.status,
        currency: purchase.currency,
        amount: purchase.amount,
        coupon_discount: purchase.coupon_discount,
        email: purchase.email,
        address_key: purchase.address_key,
        creation_time: purchase.creation_time,
        purchase_time: purchase.purchase_time,
        refund_time: purchase.refund_time,
        settled_with_erp: purchase.settlement_pushed_at.is_some(),
        lines,
    })))
}

/// POST /api/v1/purchases/:purchase_key/cancel
pub async fn cancel_purchase(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(purchase_key): Path<Uuid>,
) -> ApiResult<CancelOutcome> {
    let customer = require_customer(&state, &headers).await?;
    let outcome = CancellationEngine::new(&state.env)
        .cancel(purchase_key, customer)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}
