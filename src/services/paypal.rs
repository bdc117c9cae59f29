//! PayPal Orders v2 REST client.
//!
//! Only the two calls the checkout flow needs are implemented: order creation with
//! `intent = CAPTURE` and capture of an approved order. Calls use a fixed timeout and
//! are never retried; a failed call surfaces as a [`ProviderFailure`].

use crate::{config::PayPalConfig, errors::ProviderFailure, metrics};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// Capture status PayPal reports for a settled payment.
pub const STATUS_COMPLETED: &str = "COMPLETED";

/// Refresh the OAuth token this long before PayPal says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// What we ask the provider to charge.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderOrderRequest {
    /// Local order number, echoed back by PayPal as `reference_id`.
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderOrder {
    pub id: String,
    pub status: String,
    pub approve_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCapture {
    pub provider_order_id: String,
    pub status: String,
    pub capture_id: Option<String>,
}

/// Seam between the checkout flow and the payment provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_order(
        &self,
        request: ProviderOrderRequest,
    ) -> Result<ProviderOrder, ProviderFailure>;

    async fn capture_order(&self, provider_order_id: &str)
        -> Result<ProviderCapture, ProviderFailure>;
}

// Wire types -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    intent: &'static str,
    purchase_units: Vec<PurchaseUnit<'a>>,
    application_context: ApplicationContext<'a>,
}

#[derive(Debug, Serialize)]
struct PurchaseUnit<'a> {
    reference_id: &'a str,
    description: &'a str,
    amount: Amount,
}

#[derive(Debug, Serialize)]
struct Amount {
    currency_code: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct ApplicationContext<'a> {
    brand_name: &'a str,
    return_url: &'a str,
    cancel_url: &'a str,
    user_action: &'static str,
    shipping_preference: &'static str,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    id: String,
    status: String,
    #[serde(default)]
    purchase_units: Vec<CapturedUnit>,
}

#[derive(Debug, Default, Deserialize)]
struct CapturedUnit {
    #[serde(default)]
    payments: Option<Payments>,
}

#[derive(Debug, Default, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct Capture {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    debug_id: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    issue: Option<String>,
}

// Client ---------------------------------------------------------------------

struct CachedToken {
    value: String,
    expires_at: Instant,
}

struct PayPalClientInner {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    brand_name: String,
    return_url: String,
    cancel_url: String,
    token: RwLock<Option<CachedToken>>,
}

/// [`PaymentProvider`] backed by the PayPal REST API.
#[derive(Clone)]
pub struct PayPalClient {
    inner: Arc<PayPalClientInner>,
}

impl PayPalClient {
    pub fn new(config: &PayPalConfig, brand_name: &str) -> Result<Self, ProviderFailure> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderFailure::new(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(PayPalClientInner {
                http,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                client_id: config.client_id.clone().unwrap_or_default(),
                client_secret: config.client_secret.clone().unwrap_or_default(),
                brand_name: brand_name.to_string(),
                return_url: config.return_url.clone(),
                cancel_url: config.cancel_url.clone(),
                token: RwLock::new(None),
            }),
        })
    }

    async fn access_token(&self) -> Result<String, ProviderFailure> {
        {
            let cached = self.inner.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.value.clone());
                }
            }
        }

        let mut slot = self.inner.token.write().await;
        if let Some(token) = slot.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }
        debug!("requesting PayPal access token");
        let response = self
            .inner
            .http
            .post(format!("{}/v1/oauth2/token", self.inner.base_url))
            .basic_auth(&self.inner.client_id, Some(&self.inner.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| transport_failure("token", e))?;

        if !response.status().is_success() {
            return Err(failure_from_response("token", response).await);
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderFailure::new(format!("Unreadable PayPal token response: {}", e)))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *slot = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }
}

#[async_trait]
impl PaymentProvider for PayPalClient {
    #[instrument(skip(self, request), fields(reference = %request.reference, amount = %request.amount))]
    async fn create_order(
        &self,
        request: ProviderOrderRequest,
    ) -> Result<ProviderOrder, ProviderFailure> {
        let result = async {
            let token = self.access_token().await?;
            let body = CreateOrderBody {
                intent: "CAPTURE",
                purchase_units: vec![PurchaseUnit {
                    reference_id: &request.reference,
                    description: &request.description,
                    amount: Amount {
                        currency_code: request.currency.clone(),
                        value: format_amount(request.amount),
                    },
                }],
                application_context: ApplicationContext {
                    brand_name: &self.inner.brand_name,
                    return_url: &self.inner.return_url,
                    cancel_url: &self.inner.cancel_url,
                    user_action: "PAY_NOW",
                    shipping_preference: "NO_SHIPPING",
                },
            };

            let response = self
                .inner
                .http
                .post(format!("{}/v2/checkout/orders", self.inner.base_url))
                .bearer_auth(token)
                .json(&body)
                .send()
                .await
                .map_err(|e| transport_failure("create", e))?;

            if !response.status().is_success() {
                return Err(failure_from_response("create", response).await);
            }

            let order: OrderResponse = response.json().await.map_err(|e| {
                ProviderFailure::new(format!("Unreadable PayPal order response: {}", e))
            })?;

            let approve_url = order
                .links
                .iter()
                .find(|l| l.rel == "approve" || l.rel == "payer-action")
                .map(|l| l.href.clone())
                .ok_or_else(|| ProviderFailure {
                    message: "PayPal order has no approval link".into(),
                    provider_status: Some(order.status.clone()),
                    ..Default::default()
                })?;

            Ok(ProviderOrder {
                id: order.id,
                status: order.status,
                approve_url,
            })
        }
        .await;

        record_call("create", &result);
        result
    }

    #[instrument(skip(self))]
    async fn capture_order(
        &self,
        provider_order_id: &str,
    ) -> Result<ProviderCapture, ProviderFailure> {
        let result = async {
            let token = self.access_token().await?;
            let response = self
                .inner
                .http
                .post(format!(
                    "{}/v2/checkout/orders/{}/capture",
                    self.inner.base_url, provider_order_id
                ))
                .bearer_auth(token)
                // PayPal deduplicates repeated captures carrying the same request id.
                .header("PayPal-Request-Id", format!("capture-{}", provider_order_id))
                .json(&serde_json::json!({}))
                .send()
                .await
                .map_err(|e| transport_failure("capture", e))?;

            if !response.status().is_success() {
                return Err(failure_from_response("capture", response).await);
            }

            let capture: CaptureResponse = response.json().await.map_err(|e| {
                ProviderFailure::new(format!("Unreadable PayPal capture response: {}", e))
            })?;

            let capture_id = capture
                .purchase_units
                .into_iter()
                .filter_map(|u| u.payments)
                .flat_map(|p| p.captures)
                .map(|c| c.id)
                .next();

            Ok(ProviderCapture {
                provider_order_id: capture.id,
                status: capture.status,
                capture_id,
            })
        }
        .await;

        record_call("capture", &result);
        result
    }
}

/// PayPal expects amounts as strings with exactly two decimals.
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

fn record_call<T>(operation: &str, result: &Result<T, ProviderFailure>) {
    let outcome = if result.is_ok() { "ok" } else { "error" };
    metrics::PAYPAL_CALLS
        .with_label_values(&[operation, outcome])
        .inc();
}

fn transport_failure(operation: &str, err: reqwest::Error) -> ProviderFailure {
    warn!(operation, error = %err, "PayPal request failed");
    let message = if err.is_timeout() {
        format!("PayPal {} request timed out", operation)
    } else {
        format!("PayPal {} request failed", operation)
    };
    ProviderFailure::new(message)
}

async fn failure_from_response(operation: &str, response: reqwest::Response) -> ProviderFailure {
    let status = response.status();
    let debug_header = response
        .headers()
        .get("paypal-debug-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body: ErrorResponse = response.json().await.unwrap_or_default();

    let provider_code = body
        .details
        .iter()
        .find_map(|d| d.issue.clone())
        .or(body.name);
    let debug_id = body.debug_id.or(debug_header);

    warn!(
        operation,
        http_status = status.as_u16(),
        provider_code = provider_code.as_deref().unwrap_or("-"),
        debug_id = debug_id.as_deref().unwrap_or("-"),
        "PayPal rejected the request"
    );

    ProviderFailure {
        message: body
            .message
            .unwrap_or_else(|| format!("PayPal {} failed with HTTP {}", operation, status.as_u16())),
        provider_status: None,
        provider_code,
        debug_id,
    }
}
