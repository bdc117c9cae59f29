//! PayPal checkout endpoints. Both return flat bodies the storefront's PayPal buttons consume
//! directly; errors still use the standard envelope.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use super::common::JsonBody;
use crate::{
    errors::ServiceError,
    services::checkout::{CaptureResult, PayPalOrderCreated, PayPalOrderRequest},
    AppState,
};

/// Create a PayPal order
#[utoipa::path(
    post,
    path = "/api/v1/paypal/orders",
    tag = "PayPal",
    request_body = PayPalOrderRequest,
    responses(
        (status = 201, description = "PayPal order created", body = PayPalOrderCreated),
        (status = 400, description = "Invalid order data or amount mismatch", body = crate::errors::ErrorResponse),
        (status = 502, description = "PayPal rejected the order", body = crate::errors::ErrorResponse),
    )
)]
pub async fn create_paypal_order(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<PayPalOrderRequest>,
) -> Result<(StatusCode, Json<PayPalOrderCreated>), ServiceError> {
    let created = state.services.checkout.create_paypal_order(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Capture an approved PayPal order
#[utoipa::path(
    post,
    path = "/api/v1/paypal/orders/{token}/capture",
    tag = "PayPal",
    params(("token" = String, Path, description = "PayPal order id returned at creation")),
    responses(
        (status = 200, description = "Payment captured", body = CaptureResult),
        (status = 400, description = "Order already paid through another checkout", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown PayPal order", body = crate::errors::ErrorResponse),
        (status = 502, description = "Capture failed or not completed", body = crate::errors::ErrorResponse),
    )
)]
pub async fn capture_paypal_order(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<CaptureResult>, ServiceError> {
    let result = state.services.checkout.capture(&token).await?;
    Ok(Json(result))
}
