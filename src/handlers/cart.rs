use super::{optional_customer, require_customer, validate_input};
use crate::{
    entities::LineItem, errors::ServiceError, services::CartService, ApiResponse, ApiResult,
    AppState,
};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct AddItemRequest {
    pub product_key: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct UpdateQuantityRequest {
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

/// GET /api/v1/cart
pub async fn list_cart(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<LineItem>> {
    let customer = require_customer(&state, &headers).await?;
    let lines = CartService::new(&state.env).list_cart(customer).await?;
    Ok(Json(ApiResponse::success(lines)))
}

/// POST /api/v1/cart/items
pub async fn add_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<ApiResponse<LineItem>>), ServiceError> {
    validate_input(&payload)?;
    let owner = optional_customer(&state, &headers).await?;
    let line = CartService::new(&state.env)
        .add_item(owner, payload.product_key, payload.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(line))))
}

/// PUT /api/v1/cart/items/:line_key
pub async fn update_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(line_key): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> ApiResult<LineItem> {
    validate_input(&payload)?;
    let owner = optional_customer(&state, &headers).await?;
    let line = CartService::new(&state.env)
        .update_quantity(owner, line_key, payload.quantity)
        .await?;
    Ok(Json(ApiResponse::success(line)))
}

/// DELETE /api/v1/cart/items/:line_key
pub async fn remove_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(line_key): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    let owner = optional_customer(&state, &headers).await?;
    CartService::new(&state.env).remove_item(owner, line_key).await?;
    Ok(StatusCode::NO_CONTENT)
}
