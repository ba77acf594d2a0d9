use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use pinboard_types::error::ApiError;
use pinboard_types::models::Claims;

use crate::state::AppState;

/// Request-scoped identity, attached to every request that passes the
/// verifier. `claims` is `None` when no valid token was presented.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub claims: Option<Claims>,
}

impl AuthContext {
    pub fn authenticated(claims: Claims) -> Self {
        Self { claims: Some(claims) }
    }

    pub fn anonymous() -> Self {
        Self { claims: None }
    }

    pub fn is_authenticated(&self) -> bool {
        self.claims.is_some()
    }

    /// The caller's identity, or `Unauthenticated`. Handlers that require
    /// authentication call this; public ones just ignore the context.
    pub fn require(&self) -> Result<&Claims, ApiError> {
        self.claims.as_ref().ok_or(ApiError::Unauthenticated)
    }
}

/// Decode the bearer token from the Authorization header and attach an
/// `AuthContext` to the request. Never rejects: a missing or invalid token
/// yields an anonymous context, and downstream handlers decide whether
/// authentication is required.
pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let ctx = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|token| verify_token(&state.jwt_secret, token))
        .map(AuthContext::authenticated)
        .unwrap_or_else(AuthContext::anonymous);

    req.extensions_mut().insert(ctx);
    next.run(req).await
}

/// Validate a signed token and return its claims. Also used at the
/// WebSocket upgrade, where the header-based middleware does not apply.
pub fn verify_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}
