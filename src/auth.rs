//! Secret-token verification for the webhook endpoint

use axum::{
    body::Body,
    extract::State,
    http::{Request, Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;

/// Header Telegram sets when a webhook was registered with a secret token
pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Webhook authentication configuration
#[derive(Debug, Clone)]
pub struct WebhookAuth {
    /// Expected secret token (None = verification disabled)
    pub secret: Option<String>,
}

impl WebhookAuth {
    pub fn new(secret: Option<String>) -> Self {
        if secret.is_some() {
            tracing::info!("Webhook secret token verification enabled");
        } else {
            tracing::warn!("Webhook secret token not set - anyone can post updates to the webhook");
        }
        Self { secret }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Check the token presented by a request
    pub fn validate(&self, presented: Option<&str>) -> bool {
        match (&self.secret, presented) {
            (None, _) => true,
            (Some(expected), Some(presented)) => {
                constant_time_eq(expected.as_bytes(), presented.as_bytes())
            }
            (Some(_), None) => false,
        }
    }
}

/// Constant-time byte comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Middleware rejecting webhook requests without the configured secret token
pub async fn webhook_auth_middleware(
    State(auth): State<Arc<WebhookAuth>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if !auth.is_enabled() {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get(SECRET_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());

    if auth.validate(presented) {
        return next.run(request).await;
    }

    tracing::warn!("Rejected webhook request with missing or wrong secret token");
    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}
