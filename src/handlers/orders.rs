use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use super::common::{created_response, success_response, ApiQuery, JsonBody, ValidatedJson};
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::orders::{
        CreateOrderRequest, OrderListQuery, OrderSummary, OrderView, TransitionRequest,
        UpdateStatusRequest,
    },
    ApiResponse, AppState, PaginatedResponse,
};

/// Accepts either the order uuid or its public number.
async fn resolve_order_id(state: &AppState, reference: &str) -> Result<Uuid, ServiceError> {
    if let Ok(id) = Uuid::parse_str(reference) {
        return Ok(id);
    }
    Ok(state.services.orders.get_order_by_number(reference).await?.id)
}

/// Place an order
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    tag = "Orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderView>),
        (status = 400, description = "Invalid request or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
    )
)]
pub async fn create_order(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderView>>), ServiceError> {
    let order = state.services.orders.create_order(request).await?;
    Ok(created_response(order))
}

/// List orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    tag = "Orders",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Page of orders", body = ApiResponse<PaginatedResponse<OrderSummary>>),
        (status = 400, description = "Invalid filter", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_orders(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<OrderListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderSummary>>>, ServiceError> {
    let page = state.services.orders.list_orders(query).await?;
    Ok(success_response(PaginatedResponse::new(
        page.orders,
        page.total,
        page.page,
        page.limit,
    )))
}

/// Get an order by id or order number
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    tag = "Orders",
    params(("id" = String, Path, description = "Order uuid or order number")),
    responses(
        (status = 200, description = "Order with items and status history", body = ApiResponse<OrderView>),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<OrderView>>, ServiceError> {
    let order = state.services.orders.get_order(&id).await?;
    Ok(success_response(order))
}

/// Change order and/or payment status
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    tag = "Orders",
    params(("id" = String, Path, description = "Order uuid or order number")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Updated order", body = ApiResponse<OrderView>),
        (status = 400, description = "Illegal value or transition", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    JsonBody(request): JsonBody<UpdateStatusRequest>,
) -> Result<Json<ApiResponse<OrderView>>, ServiceError> {
    let id = resolve_order_id(&state, &id).await?;
    let order = state
        .services
        .orders
        .update_status(id, request, &user.actor())
        .await?;
    Ok(success_response(order))
}

/// Confirm a pending order
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/confirm",
    tag = "Orders",
    params(("id" = String, Path, description = "Order uuid or order number")),
    responses(
        (status = 200, description = "Confirmed order", body = ApiResponse<OrderView>),
        (status = 400, description = "Order is not pending", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn confirm_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<OrderView>>, ServiceError> {
    let id = resolve_order_id(&state, &id).await?;
    let order = state.services.orders.confirm(id, &user.actor()).await?;
    Ok(success_response(order))
}

/// Cancel an order and restock its items
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/cancel",
    tag = "Orders",
    params(("id" = String, Path, description = "Order uuid or order number")),
    request_body(content = TransitionRequest, description = "Optional reason"),
    responses(
        (status = 200, description = "Cancelled order", body = ApiResponse<OrderView>),
        (status = 400, description = "Delivered or already cancelled", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    body: Option<Json<TransitionRequest>>,
) -> Result<Json<ApiResponse<OrderView>>, ServiceError> {
    let id = resolve_order_id(&state, &id).await?;
    let reason = body.and_then(|Json(b)| b.reason);
    let order = state
        .services
        .orders
        .cancel(id, &user.actor(), reason.as_deref())
        .await?;
    Ok(success_response(order))
}

/// Refund a completed payment
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/refund",
    tag = "Orders",
    params(("id" = String, Path, description = "Order uuid or order number")),
    request_body(content = TransitionRequest, description = "Optional reason"),
    responses(
        (status = 200, description = "Refunded order", body = ApiResponse<OrderView>),
        (status = 400, description = "Payment is not completed", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn refund_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    body: Option<Json<TransitionRequest>>,
) -> Result<Json<ApiResponse<OrderView>>, ServiceError> {
    let id = resolve_order_id(&state, &id).await?;
    let reason = body.and_then(|Json(b)| b.reason);
    let order = state
        .services
        .orders
        .refund(id, &user.actor(), reason.as_deref())
        .await?;
    Ok(success_response(order))
}
