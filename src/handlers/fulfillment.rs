use crate::{
    erp::{
        http::{SIGNATURE_HEADER, TIMESTAMP_HEADER},
        verify_signature, FulfillmentCallback,
    },
    errors::ServiceError,
    services::{FulfillmentHandler, ShipmentOutcome},
    AppState,
};
use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use tracing::warn;

/// POST /api/v1/fulfillment/callback
///
/// Called by the ERP. Answers with the bare `{status, fulfillmentAck}` body it expects.
pub async fn shipment_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ShipmentOutcome>, ServiceError> {
    if let Some(secret) = state.config.erp_callback_secret.as_deref() {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        let ok = verify_signature(
            secret,
            &header(TIMESTAMP_HEADER),
            &header(SIGNATURE_HEADER),
            &body,
            state.config.erp_callback_tolerance_secs,
            chrono::Utc::now().timestamp(),
        );
        if !ok {
            warn!("fulfillment callback signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid callback signature".to_string(),
            ));
        }
    }

    let callback: FulfillmentCallback = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::ValidationError(format!("invalid callback body: {}", e)))?;

    let outcome = FulfillmentHandler::new(&state.env)
        .apply_shipment(
            &callback.purchase_reference,
            &callback.shipped_line_refs,
            &callback.other_line_refs,
        )
        .await?;
    Ok(Json(outcome))
}
