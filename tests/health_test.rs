mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use rust_decimal_macros::dec;

#[tokio::test]
async fn health_reports_database_up() {
    let app = TestApp::new().await;

    let (status, body) = app.call(Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");
    assert_eq!(body["database"]["status"], "up");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["database"].get("error").is_none());
}

#[tokio::test]
async fn metrics_are_exposed_as_prometheus_text() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/metrics", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/plain"), "{content_type}");

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("parfum_rate_limit_denied_total"));
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new().await;

    let (status, doc) = app.call(Method::GET, "/api-docs/openapi.json", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["info"]["title"], "Parfum API");
    assert!(doc["paths"]["/api/v1/orders"].is_object());
    assert!(doc["paths"]["/api/v1/contact"]["post"].is_object());
}

#[tokio::test]
async fn catalog_lists_products_by_category() {
    let app = TestApp::new().await;
    let rose = app.seed_product("ROSE-50", dec!(850.00), 4).await;
    app.seed_product("OUD-100", dec!(1200.00), 0).await;

    let (status, all) = app.call(Method::GET, "/api/v1/products", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["data"].as_array().unwrap().len(), 2);

    let (_, women) = app
        .call(Method::GET, "/api/v1/products?category=women", None)
        .await;
    assert!(women["data"].as_array().unwrap().is_empty());

    let (_, one) = app
        .call(Method::GET, &format!("/api/v1/products/{}", rose), None)
        .await;
    assert_eq!(one["data"]["sku"], "ROSE-50");
    assert_eq!(one["data"]["inStock"], true);

    let (status, missing) = app
        .call(
            Method::GET,
            &format!("/api/v1/products/{}", uuid::Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing["success"], false);

    let (status, _) = app
        .call(Method::GET, "/api/v1/products/not-a-uuid", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn payment_methods_are_listed_in_display_order() {
    let app = TestApp::new().await;

    let (status, body) = app.call(Method::GET, "/api/v1/payment-methods", None).await;

    assert_eq!(status, StatusCode::OK);
    let methods: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["method"].as_str().unwrap())
        .collect();
    assert_eq!(
        methods,
        vec![
            "paypal",
            "card",
            "bank_transfer",
            "cash_on_delivery",
            "mobile_wallet"
        ]
    );
}
