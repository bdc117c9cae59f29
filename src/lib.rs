//! Parfum API
//!
//! Order, payment and customer-intake backend for a luxury perfume storefront.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod middleware_helpers;
pub mod openapi;
pub mod rate_limiter;
pub mod services;
pub mod tracing;

use axum::{
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use utoipa::ToSchema;

use crate::auth::consts as perm;
use crate::auth::{AuthRouterExt, AuthService};
use crate::rate_limiter::{RateLimitLayer, RateLimiter};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
    pub auth_service: Arc<AuthService>,
    /// Limiter shared by the public write routes
    pub rate_limiter: RateLimiter,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    pub(crate) fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Success envelope: `{success: true, data, meta}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub meta: ResponseMeta,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
            meta: ResponseMeta::capture(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
        Self {
            items,
            total,
            page,
            limit,
            total_pages,
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<axum::Json<ApiResponse<T>>, errors::ServiceError>;

/// Every route under `/api/v1`.
pub fn api_v1_routes(rate_limiter: RateLimiter) -> Router<AppState> {
    use handlers::{catalog, intake, orders, paypal};

    // Storefront writes: anonymous, limited per client IP
    let public_writes = Router::new()
        .route("/orders", post(orders::create_order))
        .route("/paypal/orders", post(paypal::create_paypal_order))
        .route(
            "/paypal/orders/:token/capture",
            post(paypal::capture_paypal_order),
        )
        .route("/contact", post(intake::submit_contact))
        .route("/samples/request", post(intake::submit_sample))
        .layer(RateLimitLayer::from_limiter(rate_limiter));

    let public_reads = Router::new()
        .route("/products", get(catalog::list_products))
        .route("/products/:id", get(catalog::get_product))
        .route("/payment-methods", get(catalog::list_payment_methods));

    let orders_read = Router::new()
        .route("/orders", get(orders::list_orders))
        .route("/orders/:id", get(orders::get_order))
        .with_permission(perm::ORDERS_READ);

    let orders_update = Router::new()
        .route("/orders/:id/status", put(orders::update_order_status))
        .route("/orders/:id/confirm", put(orders::confirm_order))
        .route("/orders/:id/cancel", put(orders::cancel_order))
        .with_permission(perm::ORDERS_UPDATE);

    let orders_refund = Router::new()
        .route("/orders/:id/refund", put(orders::refund_order))
        .with_permission(perm::ORDERS_REFUND);

    let submissions = Router::new()
        .route("/admin/contact-messages", get(intake::list_contact_messages))
        .route(
            "/admin/contact-messages/:id",
            get(intake::get_contact_message),
        )
        .route(
            "/admin/contact-messages/:id/status",
            put(intake::transition_contact_message),
        )
        .route(
            "/admin/contact-messages/:id/notes",
            post(intake::add_contact_note),
        )
        .route(
            "/admin/contact-messages/:id/assign",
            put(intake::assign_contact_message),
        )
        .route(
            "/admin/contact-messages/:id/response",
            post(intake::respond_to_contact_message),
        )
        .route("/admin/sample-requests", get(intake::list_sample_requests))
        .route(
            "/admin/sample-requests/:id",
            get(intake::get_sample_request),
        )
        .route(
            "/admin/sample-requests/:id/status",
            put(intake::transition_sample_request),
        )
        .route(
            "/admin/sample-requests/:id/notes",
            post(intake::add_sample_note),
        )
        .route(
            "/admin/sample-requests/:id/assign",
            put(intake::assign_sample_request),
        )
        .route(
            "/admin/sample-requests/:id/response",
            post(intake::respond_to_sample_request),
        )
        .with_permission(perm::SUBMISSIONS_MANAGE);

    Router::new()
        .merge(public_writes)
        .merge(public_reads)
        .merge(orders_read)
        .merge(orders_update)
        .merge(orders_refund)
        .merge(submissions)
}

/// The complete application: API, health, metrics and docs, with the shared middleware stack.
/// CORS and compression are added by the binary.
pub fn app_router(state: AppState) -> Router {
    let auth_service = state.auth_service.clone();
    let timeout = Duration::from_secs(state.config.request_timeout_secs.max(1));

    Router::<AppState>::new()
        .route("/health", get(handlers::health::health))
        .route("/metrics", get(handlers::health::metrics))
        .nest("/api/v1", api_v1_routes(state.rate_limiter.clone()))
        .merge(openapi::swagger_ui())
        .layer(TimeoutLayer::new(timeout))
        .layer(crate::tracing::configure_http_tracing())
        // Inject AuthService into request extensions for auth middleware
        .layer(axum::middleware::from_fn_with_state(
            auth_service,
            |axum::extract::State(auth): axum::extract::State<Arc<AuthService>>,
             mut req: axum::extract::Request,
             next: axum::middleware::Next| async move {
                req.extensions_mut().insert(auth);
                next.run(req).await
            },
        ))
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        assert!(response.success);
        assert_eq!(response.meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&response.meta.timestamp).unwrap();
    }

    #[test]
    fn meta_serializes_camel_case() {
        let meta = ResponseMeta {
            request_id: Some("r-1".into()),
            timestamp: "2026-03-01T10:00:00Z".into(),
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["requestId"], "r-1");
    }

    #[test]
    fn pagination_rounds_pages_up() {
        let page = PaginatedResponse::new(vec![1, 2, 3], 41, 1, 20);
        assert_eq!(page.total_pages, 3);
        assert_eq!(PaginatedResponse::<u8>::new(vec![], 0, 1, 20).total_pages, 0);
    }
}
