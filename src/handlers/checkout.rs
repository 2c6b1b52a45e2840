use super::{caller, require_customer, validate_input};
use crate::{
    errors::ServiceError,
    repositories::Destination,
    services::{
        AddressAssignment, FinalizationEngine, FinalizeOutcome, FinalizeRequest,
        IntentCoordinator, IntentCreated, IntentUpdated,
    },
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DestinationDto {
    pub address_key: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssignmentDto {
    pub line_key: Uuid,
    pub destinations: Vec<DestinationDto>,
}

impl From<AssignmentDto> for AddressAssignment {
    fn from(dto: AssignmentDto) -> Self {
        Self {
            line_key: dto.line_key,
            destinations: dto
                .destinations
                .into_iter()
                .map(|d| Destination {
                    address_key: d.address_key,
                    quantity: d.quantity,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct CreateIntentRequest {
    #[validate(length(min = 1, message = "At least one line is required"))]
    pub line_keys: Vec<Uuid>,
    #[serde(default)]
    pub assignments: Vec<AssignmentDto>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct UpdateIntentRequest {
    #[serde(default)]
    pub line_keys: Option<Vec<Uuid>>,
    #[validate(length(max = 64, message = "Coupon code is too long"))]
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct FinalizeIntentRequest {
    #[validate(email)]
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub billing_address_key: Option<Uuid>,
}

/// POST /api/v1/checkout/intents
pub async fn create_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateIntentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<IntentCreated>>), ServiceError> {
    validate_input(&payload)?;
    let assignments: Vec<AddressAssignment> =
        payload.assignments.into_iter().map(Into::into).collect();
    let created = IntentCoordinator::new(&state.env)
        .create_intent(&payload.line_keys, &assignments, &caller(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

/// PUT /api/v1/checkout/intents/:intent_id
///
/// Not identity-gated: knowing the intent id is enough to reprice it.
pub async fn update_intent(
    State(state): State<AppState>,
    Path(intent_id): Path<String>,
    Json(payload): Json<UpdateIntentRequest>,
) -> ApiResult<IntentUpdated> {
    validate_input(&payload)?;
    let updated = IntentCoordinator::new(&state.env)
        .update_intent(
            &intent_id,
            payload.line_keys.as_deref(),
            payload.coupon_code.as_deref(),
        )
        .await?;
    Ok(Json(ApiResponse::success(updated)))
}

/// POST /api/v1/checkout/intents/:intent_id/finalize
pub async fn finalize_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(intent_id): Path<String>,
    Json(payload): Json<FinalizeIntentRequest>,
) -> ApiResult<FinalizeOutcome> {
    validate_input(&payload)?;
    let customer_key = require_customer(&state, &headers).await?;

    let email = match payload.email {
        Some(email) => email,
        None => state
            .env
            .repository
            .find_customer(customer_key)
            .await?
            .map(|c| c.email)
            .ok_or_else(|| ServiceError::ValidationError("email is required".to_string()))?,
    };

    let outcome = FinalizationEngine::new(&state.env)
        .finalize(FinalizeRequest {
            intent_id,
            customer_key,
            email,
            billing_address_key: payload.billing_address_key,
        })
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}
