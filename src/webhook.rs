//! Webhook ingress for platform updates

use crate::api::ApiUpdate;
use crate::auth::{webhook_auth_middleware, WebhookAuth};
use crate::broker::Broker;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn router(broker: Arc<Broker>, path: &str, auth: Arc<WebhookAuth>) -> Router {
    let hook_routes = Router::new()
        .route(path, post(receive_update))
        .layer(middleware::from_fn_with_state(auth, webhook_auth_middleware));

    Router::new()
        .merge(hook_routes)
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(broker)
}

/// Callback for bots that take webhook updates directly, without a broker
pub type UpdateHandler = Arc<dyn Fn(ApiUpdate) + Send + Sync>;

/// Webhook router for a standalone bot: every decoded update goes to `handler`
pub fn router_with_handler(path: &str, auth: Arc<WebhookAuth>, handler: UpdateHandler) -> Router {
    Router::new()
        .route(path, post(receive_for_handler))
        .layer(middleware::from_fn_with_state(auth, webhook_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

/// Re-encode an incoming update through the typed model.
///
/// Undecodable bodies yield `None`; they are acknowledged anyway so the
/// platform stops retrying them.
fn decode_update(body: &[u8]) -> Option<ApiUpdate> {
    match serde_json::from_slice::<ApiUpdate>(body) {
        Ok(update) => {
            tracing::debug!("Webhook update {}", update.update_id);
            Some(update)
        }
        Err(e) => {
            tracing::warn!("Received incorrect webhook request: {}", e);
            None
        }
    }
}

async fn receive_update(State(broker): State<Arc<Broker>>, body: Bytes) -> StatusCode {
    if let Some(update) = decode_update(&body) {
        broker.publish(update).await;
    }
    StatusCode::OK
}

async fn receive_for_handler(State(handler): State<UpdateHandler>, body: Bytes) -> StatusCode {
    if let Some(update) = decode_update(&body) {
        handler(update);
    }
    StatusCode::OK
}

async fn health(State(broker): State<Arc<Broker>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "clients": broker.connections().len().await,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SECRET_TOKEN_HEADER;
    use crate::connections::ClientConnection;
    use crate::framing::FrameReader;
    use crate::protocol::{parse_update, Update};
    use crate::upstream::testing::RecordingUpstream;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tokio::io::BufReader;
    use tower::ServiceExt;

    const UPDATE: &str = r#"{"update_id": 9, "message": {"message_id": 1, "date": 0, "chat": {"id": 5, "type": "private"}, "text": "hi"}}"#;

    fn broker() -> Arc<Broker> {
        Arc::new(Broker::new(
            Arc::new(RecordingUpstream::default()),
            Duration::from_secs(1),
        ))
    }

    fn post_update(body: &str, secret: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/webhook");
        if let Some(secret) = secret {
            builder = builder.header(SECRET_TOKEN_HEADER, secret);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_update_is_broadcast() {
        let broker = broker();
        let (local, remote) = tokio::io::duplex(4096);
        broker
            .connections()
            .add(ClientConnection::new("a", local))
            .await;

        let app = router(broker, "/webhook", Arc::new(WebhookAuth { secret: None }));
        let response = app.oneshot(post_update(UPDATE, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut frames = FrameReader::new(BufReader::new(remote));
        let frame = frames.next_frame().await.unwrap().unwrap();
        match parse_update(&frame).unwrap() {
            Update::Message(event) => {
                assert_eq!(event.update_id, 9);
                assert_eq!(event.message.unwrap().text.as_deref(), Some("hi"));
            }
            other => panic!("Expected Message update, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_update_acknowledged() {
        let broker = broker();
        let app = router(
            broker.clone(),
            "/webhook",
            Arc::new(WebhookAuth { secret: None }),
        );

        let response = app.oneshot(post_update("{nope", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_secret_token_enforced() {
        let auth = Arc::new(WebhookAuth {
            secret: Some("s3cret".to_string()),
        });
        let app = router(broker(), "/webhook", auth);

        let rejected = app
            .clone()
            .oneshot(post_update(UPDATE, Some("wrong")))
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

        let missing = app.clone().oneshot(post_update(UPDATE, None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let accepted = app
            .oneshot(post_update(UPDATE, Some("s3cret")))
            .await
            .unwrap();
        assert_eq!(accepted.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_standalone_handler_receives_updates() {
        let seen: Arc<std::sync::Mutex<Vec<i64>>> = Default::default();
        let handler: UpdateHandler = {
            let seen = seen.clone();
            Arc::new(move |update: ApiUpdate| seen.lock().unwrap().push(update.update_id))
        };
        let auth = Arc::new(WebhookAuth {
            secret: Some("s3cret".to_string()),
        });
        let app = router_with_handler("/webhook", auth, handler);

        let accepted = app
            .clone()
            .oneshot(post_update(UPDATE, Some("s3cret")))
            .await
            .unwrap();
        assert_eq!(accepted.status(), StatusCode::OK);

        let garbage = app
            .clone()
            .oneshot(post_update("[1, 2", Some("s3cret")))
            .await
            .unwrap();
        assert_eq!(garbage.status(), StatusCode::OK);

        let rejected = app.oneshot(post_update(UPDATE, None)).await.unwrap();
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(*seen.lock().unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn test_health_reports_clients() {
        let broker = broker();
        let (local, _remote) = tokio::io::duplex(64);
        broker
            .connections()
            .add(ClientConnection::new("a", local))
            .await;

        let app = router(broker, "/webhook", Arc::new(WebhookAuth { secret: None }));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["clients"], 1);
    }
}
