use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use super::common::{parse_uuid, success_response, ApiQuery};
use crate::{
    entities::product::ProductCategory,
    errors::ServiceError,
    services::{catalog::ProductView, payment_methods::PaymentMethodView},
    ApiResponse, AppState,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProductFilter {
    /// `women`, `men` or `unisex`
    pub category: Option<ProductCategory>,
}

/// List the catalog
#[utoipa::path(
    get,
    path = "/api/v1/products",
    tag = "Catalog",
    params(ProductFilter),
    responses((status = 200, description = "Products", body = ApiResponse<Vec<ProductView>>))
)]
pub async fn list_products(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<ProductFilter>,
) -> Result<Json<ApiResponse<Vec<ProductView>>>, ServiceError> {
    let products = state.services.catalog.list_products(filter.category).await?;
    Ok(success_response(products))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    tag = "Catalog",
    params(("id" = String, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product", body = ApiResponse<ProductView>),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse),
    )
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ProductView>>, ServiceError> {
    let id = parse_uuid(&id, "product")?;
    let product = state.services.catalog.get_product(id).await?;
    Ok(success_response(product))
}

/// Payment methods offered at checkout, in display order
#[utoipa::path(
    get,
    path = "/api/v1/payment-methods",
    tag = "Catalog",
    responses((status = 200, description = "Active payment methods", body = ApiResponse<Vec<PaymentMethodView>>))
)]
pub async fn list_payment_methods(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<PaymentMethodView>>>, ServiceError> {
    let methods = state.services.payment_methods.list_active().await?;
    Ok(success_response(methods))
}
