#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use parfum_api::{
    app_router,
    auth::{self, AuthConfig, AuthService, TokenRequest},
    config::AppConfig,
    db,
    entities::product::ProductCategory,
    events::{self, EventSender},
    handlers::AppServices,
    rate_limiter::{RateLimitConfig, RateLimiter},
    services::catalog::NewProduct,
    AppState,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str =
    "parfum-test-secret-0123456789-abcdefghijklmnopqrstuvwxyz-ABCDEFGHIJKL";

/// Full application over a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    token: String,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds the app after letting the caller adjust the configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir");
        let db_path = db_dir.path().join("parfum_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "redis://127.0.0.1:6379".to_string(),
            TEST_JWT_SECRET.to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.rate_limit_requests_per_window = 1_000;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let auth_service = Arc::new(AuthService::new(AuthConfig::from(&cfg)));
        let services = AppServices::new(db_arc.clone(), event_sender.clone(), &cfg, None);
        let rate_limiter = RateLimiter::in_memory(RateLimitConfig::from(&cfg));

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
            auth_service,
            rate_limiter,
        };

        let token = issue(&state, vec![auth::ADMIN_ROLE.to_string()], vec![]);
        let router = app_router(state.clone());

        Self {
            router,
            state,
            token,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// Bearer token carrying the admin role.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Bearer token with exactly the given permissions and no role.
    pub fn token_with_permissions(&self, permissions: &[&str]) -> String {
        issue(
            &self.state,
            vec![],
            permissions.iter().map(|p| p.to_string()).collect(),
        )
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        self.request_with_headers(method, uri, body, token, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router error during test request")
    }

    /// Anonymous JSON call returning status and parsed body.
    pub async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        read_json(self.request(method, uri, body, None).await).await
    }

    /// Admin JSON call returning status and parsed body.
    pub async fn call_admin(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        read_json(self.request(method, uri, body, Some(self.token())).await).await
    }

    pub async fn seed_product(&self, sku: &str, price: Decimal, stock: i32) -> Uuid {
        self.state
            .services
            .catalog
            .create_product(NewProduct {
                sku: sku.to_string(),
                name_en: format!("Test {}", sku),
                name_fr: format!("Essai {}", sku),
                description_en: None,
                description_fr: None,
                category: ProductCategory::Unisex,
                price,
                stock,
            })
            .await
            .expect("seed product for tests")
            .id
    }

    pub async fn stock_of(&self, product: Uuid) -> i64 {
        let (_, body) = self
            .call(Method::GET, &format!("/api/v1/products/{}", product), None)
            .await;
        body["data"]["stock"].as_i64().expect("stock in product view")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

fn issue(state: &AppState, roles: Vec<String>, permissions: Vec<String>) -> String {
    state
        .auth_service
        .issue_token(TokenRequest {
            subject: "staff-amal".to_string(),
            name: Some("Amal".to_string()),
            email: Some("amal@parfum.test".to_string()),
            roles,
            permissions,
            ttl: None,
        })
        .expect("issue test token")
        .access_token
}

pub async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Storefront order payload for `product` x `quantity`.
pub fn order_payload(product: Uuid, quantity: i32, payment_method: &str) -> Value {
    serde_json::json!({
        "items": [{"product": product, "quantity": quantity}],
        "customerInfo": {
            "name": "Yasmine Benali",
            "email": "yasmine@example.ma",
            "phone": "+212 661 234 567",
            "address": "12 Rue des Orangers",
            "city": "Marrakech",
            "postalCode": "40000"
        },
        "paymentMethod": payment_method,
        "language": "fr"
    })
}
