/*!
 * # Rate Limiting Module
 *
 * Fixed-window limiter keyed by client IP, applied to the public (unauthenticated) routes:
 * order submission, PayPal checkout, contact and sample intake.
 *
 * Counters live in a `DashMap` by default. With the Redis backend they are shared across
 * instances through `INCR`/`EXPIRE`, falling back to the local map whenever Redis is
 * unreachable so that a cache outage never takes the storefront down.
 *
 * ```ignore
 * let layer = RateLimitLayer::new(
 *     RateLimitConfig { requests_per_window: 30, window_duration: Duration::from_secs(60), ..Default::default() },
 *     RateLimitBackend::InMemory,
 * );
 * let public = Router::new().route("/contact", post(submit_contact)).layer(layer);
 * ```
 */
use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::errors::ServiceError;
use crate::middleware_helpers::client_ip::ip_from_headers;

/// Numeric strings are always valid header values.
fn num_to_header_value<T: ToString>(n: T) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

impl RateLimitEntry {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn roll_window(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.window_start) >= window {
            self.count = 0;
            self.window_start = now;
        }
    }

    fn time_until_reset(&self, now: Instant, window: Duration) -> Duration {
        window.saturating_sub(now.duration_since(self.window_start))
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window_duration: Duration,
    pub enable_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 30,
            window_duration: Duration::from_secs(60),
            enable_headers: true,
        }
    }
}

impl From<&crate::config::AppConfig> for RateLimitConfig {
    fn from(cfg: &crate::config::AppConfig) -> Self {
        Self {
            requests_per_window: cfg.rate_limit_requests_per_window,
            window_duration: Duration::from_secs(cfg.rate_limit_window_seconds.max(1)),
            enable_headers: cfg.rate_limit_enable_headers,
        }
    }
}

#[derive(Clone, Default)]
pub enum RateLimitBackend {
    #[default]
    InMemory,
    Redis {
        client: Arc<redis::Client>,
        namespace: String,
    },
}

#[derive(Clone)]
enum RateLimitStore {
    InMemory {
        entries: Arc<DashMap<String, RateLimitEntry>>,
    },
    Redis {
        client: Arc<redis::Client>,
        namespace: String,
        fallback: Arc<DashMap<String, RateLimitEntry>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_time: Duration,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: RateLimitStore,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, backend: RateLimitBackend) -> Self {
        let store = match backend {
            RateLimitBackend::InMemory => RateLimitStore::InMemory {
                entries: Arc::new(DashMap::new()),
            },
            RateLimitBackend::Redis { client, namespace } => RateLimitStore::Redis {
                client,
                namespace,
                fallback: Arc::new(DashMap::new()),
            },
        };

        Self { store, config }
    }

    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self::new(config, RateLimitBackend::InMemory)
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Counts one request against `key` and reports whether it may proceed.
    pub async fn check_rate_limit(&self, key: &str) -> RateLimitResult {
        match &self.store {
            RateLimitStore::InMemory { entries } => Self::check_in_memory(entries, key, &self.config),
            RateLimitStore::Redis {
                client,
                namespace,
                fallback,
            } => match client.get_async_connection().await {
                Ok(mut conn) => {
                    match Self::check_with_redis(&mut conn, namespace, key, &self.config).await {
                        Ok(result) => result,
                        Err(err) => {
                            warn!(error = %err, "Redis rate limit error, using local counters");
                            Self::check_in_memory(fallback, key, &self.config)
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Redis unavailable for rate limiting, using local counters");
                    Self::check_in_memory(fallback, key, &self.config)
                }
            },
        }
    }

    fn check_in_memory(
        entries: &DashMap<String, RateLimitEntry>,
        key: &str,
        config: &RateLimitConfig,
    ) -> RateLimitResult {
        let now = Instant::now();
        let mut entry = entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry::new(now));
        entry.roll_window(now, config.window_duration);

        let reset_time = entry.time_until_reset(now, config.window_duration);
        if entry.count >= config.requests_per_window {
            return RateLimitResult {
                allowed: false,
                limit: config.requests_per_window,
                remaining: 0,
                reset_time,
            };
        }

        entry.count += 1;
        RateLimitResult {
            allowed: true,
            limit: config.requests_per_window,
            remaining: config.requests_per_window.saturating_sub(entry.count),
            reset_time,
        }
    }

    async fn check_with_redis<C>(
        conn: &mut C,
        namespace: &str,
        key: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitResult, redis::RedisError>
    where
        C: redis::aio::ConnectionLike + Send,
    {
        let redis_key = format!("{}:{}", namespace, key);
        let window_secs = config.window_duration.as_secs().max(1);

        let count: i64 = conn.incr(&redis_key, 1).await?;
        let mut ttl: i64 = conn.ttl(&redis_key).await.unwrap_or(-1);
        if count == 1 || ttl < 0 {
            let _: Result<(), _> = conn.expire(&redis_key, window_secs as usize).await;
            ttl = window_secs as i64;
        }

        let allowed = count <= config.requests_per_window as i64;
        let remaining = if allowed {
            config.requests_per_window.saturating_sub(count.max(0) as u32)
        } else {
            0
        };

        Ok(RateLimitResult {
            allowed,
            limit: config.requests_per_window,
            remaining,
            reset_time: Duration::from_secs(ttl.max(0) as u64),
        })
    }

    pub async fn reset(&self, key: &str) {
        match &self.store {
            RateLimitStore::InMemory { entries } => {
                entries.remove(key);
            }
            RateLimitStore::Redis {
                client,
                namespace,
                fallback,
            } => {
                let redis_key = format!("{}:{}", namespace, key);
                if let Ok(mut conn) = client.get_async_connection().await {
                    let _: Result<(), _> = conn.del(&redis_key).await;
                }
                fallback.remove(key);
            }
        }
    }

    /// Drops counters whose window has fully elapsed.
    pub fn cleanup_expired(&self) {
        let entries = match &self.store {
            RateLimitStore::InMemory { entries } => entries,
            RateLimitStore::Redis { fallback, .. } => fallback,
        };
        let now = Instant::now();
        let window = self.config.window_duration;
        entries.retain(|_, entry| now.duration_since(entry.window_start) < window);
    }
}

/// Rate-limit key for a request: the client IP, or a shared bucket when it is unknown.
pub fn extract_ip_key(headers: &HeaderMap) -> String {
    match ip_from_headers(headers) {
        Some(ip) => format!("ip:{}", ip),
        None => "ip:unknown".to_string(),
    }
}

fn apply_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert("X-RateLimit-Limit", num_to_header_value(result.limit));
    headers.insert("X-RateLimit-Remaining", num_to_header_value(result.remaining));
    headers.insert(
        "X-RateLimit-Reset",
        num_to_header_value(result.reset_time.as_secs()),
    );
}

// Layer implementation for tower
#[derive(Clone)]
pub struct RateLimitLayer {
    rate_limiter: RateLimiter,
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig, backend: RateLimitBackend) -> Self {
        Self {
            rate_limiter: RateLimiter::new(config, backend),
        }
    }

    pub fn from_limiter(rate_limiter: RateLimiter) -> Self {
        Self { rate_limiter }
    }
}

impl<S> tower::Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            rate_limiter: self.rate_limiter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    rate_limiter: RateLimiter,
}

impl<S> tower::Service<Request> for RateLimitService<S>
where
    S: tower::Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let rate_limiter = self.rate_limiter.clone();
        // Swap in the clone so the instance that was polled ready handles this call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let key = extract_ip_key(request.headers());
            let result = rate_limiter.check_rate_limit(&key).await;
            let enable_headers = rate_limiter.config().enable_headers;

            if !result.allowed {
                warn!(key = %key, path = %request.uri().path(), "Rate limit exceeded");
                crate::metrics::RATE_LIMIT_DENIED.inc();

                let mut response = ServiceError::RateLimitExceeded.into_response();
                if enable_headers {
                    apply_headers(response.headers_mut(), &result);
                    response.headers_mut().insert(
                        "Retry-After",
                        num_to_header_value(result.reset_time.as_secs().max(1)),
                    );
                }
                return Ok(response);
            }

            let mut response = inner.call(request).await?;
            if enable_headers {
                apply_headers(response.headers_mut(), &result);
            }
            Ok(response)
        })
    }
}

/// Periodically evicts stale counters.
pub async fn start_cleanup_task(rate_limiter: RateLimiter, interval: Duration) {
    let mut interval_timer = tokio::time::interval(interval);

    loop {
        interval_timer.tick().await;
        rate_limiter.cleanup_expired();
        debug!("Rate limiter cleanup completed");
    }
}
