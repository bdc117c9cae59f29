/*!
 * # Authentication and Authorization Module
 *
 * Staff-facing routes are protected by HS256 bearer tokens. Tokens carry roles and explicit
 * permissions; the `admin` role implies every permission. Customer accounts do not exist, so
 * tokens are minted only by the operator CLI (`parfum-admin issue-token`).
 */

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::ServiceError;

mod permissions;

pub use permissions::*;

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub iss: String,
    pub aud: String,
}

/// Authenticated staff member extracted from the bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub token_id: String,
}

impl AuthUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }

    /// Permission check with the admin bypass applied
    pub fn can(&self, permission: &str) -> bool {
        self.is_admin() || self.has_permission(permission)
    }

    /// Name recorded in audit trails
    pub fn actor(&self) -> String {
        match (&self.email, &self.name) {
            (Some(email), _) => email.clone(),
            (None, Some(name)) => name.clone(),
            (None, None) => self.user_id.clone(),
        }
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            name: claims.name,
            email: claims.email,
            roles: claims.roles,
            permissions: claims.permissions,
            token_id: claims.jti,
        }
    }
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub jwt_issuer: String,
    pub access_token_expiration: Duration,
}

impl From<&AppConfig> for AuthConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            jwt_secret: cfg.jwt_secret.clone(),
            jwt_audience: cfg.auth_audience.clone(),
            jwt_issuer: cfg.auth_issuer.clone(),
            access_token_expiration: Duration::from_secs(cfg.jwt_expiration as u64),
        }
    }
}

/// Parameters for minting a staff token
#[derive(Debug, Clone, Default)]
pub struct TokenRequest {
    pub subject: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub ttl: Option<Duration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub token_id: String,
}

#[derive(Clone)]
pub struct AuthService {
    config: AuthConfig,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    pub fn issue_token(&self, request: TokenRequest) -> Result<IssuedToken, AuthError> {
        let ttl = request.ttl.unwrap_or(self.config.access_token_expiration);
        let now = Utc::now();
        let exp = now
            + ChronoDuration::from_std(ttl)
                .map_err(|_| AuthError::TokenCreation("Invalid token duration".to_string()))?;
        let jti = Uuid::new_v4().to_string();

        let claims = Claims {
            sub: request.subject,
            name: request.name,
            email: request.email,
            roles: request.roles,
            permissions: request.permissions,
            jti: jti.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            nbf: now.timestamp(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
        };

        let access_token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))?;

        Ok(IssuedToken {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: ttl.as_secs() as i64,
            token_id: jti,
        })
    }

    /// Validate a JWT token and extract the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);
        validation.set_audience(&[self.config.jwt_audience.as_str()]);

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            other => {
                debug!(reason = ?other, "rejected bearer token");
                AuthError::InvalidToken
            }
        })
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingAuth,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("Authentication service not available")]
    ServiceUnavailable,
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingAuth | AuthError::InvalidToken | AuthError::TokenExpired => {
                ServiceError::Unauthorized(err.to_string())
            }
            AuthError::InsufficientPermissions => ServiceError::Forbidden(err.to_string()),
            AuthError::TokenCreation(_) | AuthError::ServiceUnavailable => {
                ServiceError::InternalError(err.to_string())
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ServiceError::from(self).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AuthError::MissingAuth)
    }
}

/// Permission middleware to check if a user has the required permission
pub async fn permission_middleware(
    State(required_permission): State<String>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(AuthError::MissingAuth)?;

    if !user.can(&required_permission) {
        warn!(
            user_id = %user.user_id,
            permission = %required_permission,
            "permission denied"
        );
        return Err(AuthError::InsufficientPermissions);
    }

    Ok(next.run(request).await)
}

/// Authentication middleware that validates the bearer token and stores the `AuthUser`
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let auth_service = match request.extensions().get::<Arc<AuthService>>() {
        Some(service) => service.clone(),
        None => return AuthError::ServiceUnavailable.into_response(),
    };

    match extract_auth_from_headers(request.headers(), &auth_service) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

fn extract_auth_from_headers(
    headers: &HeaderMap,
    auth_service: &AuthService,
) -> Result<AuthUser, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingAuth)?;

    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::InvalidToken)?;

    auth_service.validate_token(token).map(AuthUser::from)
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
    fn with_permission(self, permission: &str) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(auth_middleware))
    }

    fn with_permission(self, permission: &str) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            permission.to_string(),
            permission_middleware,
        ))
        .with_auth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;

    fn service() -> AuthService {
        AuthService::new(AuthConfig {
            jwt_secret: crate::config::DEV_DEFAULT_JWT_SECRET.to_string(),
            jwt_audience: "parfum-admin".into(),
            jwt_issuer: "parfum-api".into(),
            access_token_expiration: Duration::from_secs(600),
        })
    }

    fn token(svc: &AuthService, roles: &[&str], permissions: &[&str]) -> String {
        svc.issue_token(TokenRequest {
            subject: "staff-1".into(),
            email: Some("ops@parfum.example".into()),
            roles: roles.iter().map(|s| s.to_string()).collect(),
            permissions: permissions.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
        .unwrap()
        .access_token
    }

    #[test]
    fn issued_tokens_validate() {
        let svc = service();
        let claims = svc.validate_token(&token(&svc, &["staff"], &[consts::ORDERS_READ])).unwrap();
        assert_eq!(claims.sub, "staff-1");
        assert_eq!(claims.permissions, vec!["orders:read".to_string()]);

        let user = AuthUser::from(claims);
        assert!(user.can(consts::ORDERS_READ));
        assert!(!user.can(consts::ORDERS_REFUND));
        assert_eq!(user.actor(), "ops@parfum.example");
    }

    #[test]
    fn tokens_from_other_audiences_are_rejected() {
        let other = AuthService::new(AuthConfig {
            jwt_audience: "storefront".into(),
            ..service().config
        });
        let foreign = token(&other, &["admin"], &[]);
        assert_matches!(service().validate_token(&foreign), Err(AuthError::InvalidToken));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let svc = service();
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "staff-1".into(),
            name: None,
            email: None,
            roles: vec![],
            permissions: vec![],
            jti: "t".into(),
            iat: now - 7200,
            exp: now - 3600,
            nbf: now - 7200,
            iss: "parfum-api".into(),
            aud: "parfum-admin".into(),
        };
        let stale = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(crate::config::DEV_DEFAULT_JWT_SECRET.as_bytes()),
        )
        .unwrap();
        assert_matches!(svc.validate_token(&stale), Err(AuthError::TokenExpired));
    }

    fn guarded_app() -> Router {
        let svc = Arc::new(service());
        Router::new()
            .route("/guarded", get(|user: AuthUser| async move { user.user_id }))
            .with_permission(consts::ORDERS_REFUND)
            .layer(Extension(svc))
    }

    async fn call(app: Router, bearer: Option<String>) -> StatusCode {
        let mut builder = HttpRequest::builder().uri("/guarded");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        app.oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn permission_gate_statuses() {
        let svc = service();
        assert_eq!(call(guarded_app(), None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(
            call(guarded_app(), Some(token(&svc, &[], &[consts::ORDERS_READ]))).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            call(guarded_app(), Some(token(&svc, &[], &[consts::ORDERS_REFUND]))).await,
            StatusCode::OK
        );
        assert_eq!(
            call(guarded_app(), Some(token(&svc, &["admin"], &[]))).await,
            StatusCode::OK
        );
    }
}
