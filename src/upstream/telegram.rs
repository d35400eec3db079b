use super::*;
use crate::api::{ApiFile, ApiResponse};
use crate::protocol::{
    ChatActionData, FileRequestData, ForwardMessageData, InlineQueryResponse, PhotoData,
    TextMessageData,
};
use serde::de::DeserializeOwned;

/// Telegram's current Bot API base endpoint
pub const API_ENDPOINT: &str = "https://api.telegram.org/";

/// Bot API client
pub struct TelegramApi {
    endpoint: String,
    token: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl TelegramApi {
    /// Create a client for `token` against `endpoint` with a per-request timeout
    pub fn new(endpoint: &str, token: &str, timeout: Duration) -> UpstreamResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Config(e.to_string()))?;

        let endpoint = if endpoint.ends_with('/') {
            endpoint.to_string()
        } else {
            format!("{}/", endpoint)
        };

        Ok(Self {
            endpoint,
            token: token.to_string(),
            client,
            timeout,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}bot{}/{}", self.endpoint, self.token, method)
    }

    fn file_url(&self, path: &str) -> String {
        format!("{}file/bot{}/{}", self.endpoint, self.token, path)
    }

    /// Map a transport error without leaking the token-bearing URL
    fn http_error(&self, e: reqwest::Error) -> UpstreamError {
        if e.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::Http(e.without_url().to_string())
        }
    }

    async fn read_envelope<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> UpstreamResult<Option<T>> {
        let status = response.status();
        let envelope: ApiResponse<T> = response.json().await.map_err(|e| {
            UpstreamError::Parse(format!(
                "{} returned status {} with unreadable body: {}",
                method,
                status,
                e.without_url()
            ))
        })?;

        if !envelope.ok {
            return Err(UpstreamError::Api {
                code: envelope.error_code.unwrap_or(i64::from(status.as_u16())),
                description: envelope
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            });
        }

        Ok(envelope.result)
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        method: &str,
        form: &[(&str, String)],
    ) -> UpstreamResult<Option<T>> {
        let response = self
            .client
            .post(self.method_url(method))
            .form(form)
            .send()
            .await
            .map_err(|e| self.http_error(e))?;

        Self::read_envelope(method, response).await
    }

    /// Register the public URL Telegram should deliver updates to
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> UpstreamResult<()> {
        let mut form = vec![("url", url.to_string())];
        if let Some(secret) = secret {
            form.push(("secret_token", secret.to_string()));
        }

        self.post_form::<serde_json::Value>("setWebhook", &form)
            .await?;
        tracing::info!("Webhook successfully set");
        Ok(())
    }

    pub async fn send_text_message(&self, data: TextMessageData) -> UpstreamResult<()> {
        let mut form = vec![
            ("chat_id", data.chat_id.to_string()),
            ("text", data.text),
            ("parse_mode", "HTML".to_string()),
        ];
        if let Some(reply_id) = data.reply_id {
            form.push(("reply_to_message_id", reply_id.to_string()));
        }

        self.post_form::<serde_json::Value>("sendMessage", &form)
            .await
            .map(drop)
    }

    pub async fn send_photo(&self, data: PhotoData) -> UpstreamResult<()> {
        let bytes = data
            .decode_bytes()
            .map_err(|e| UpstreamError::InvalidPayload(format!("photo is not base64: {}", e)))?;

        let mut form = reqwest::multipart::Form::new()
            .part(
                "photo",
                reqwest::multipart::Part::bytes(bytes).file_name(data.filename),
            )
            .text("chat_id", data.chat_id.to_string());
        if let Some(reply_id) = data.reply_id {
            form = form.text("reply_to_message_id", reply_id.to_string());
        }
        if !data.caption.is_empty() {
            form = form.text("caption", data.caption);
        }

        let response = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.http_error(e))?;

        Self::read_envelope::<serde_json::Value>("sendPhoto", response)
            .await
            .map(drop)
    }

    pub async fn forward_message(&self, data: ForwardMessageData) -> UpstreamResult<()> {
        let form = [
            ("chat_id", data.chat_id.to_string()),
            ("from_chat_id", data.from_chat_id.to_string()),
            ("message_id", data.message_id.to_string()),
        ];

        self.post_form::<serde_json::Value>("forwardMessage", &form)
            .await
            .map(drop)
    }

    pub async fn send_chat_action(&self, data: ChatActionData) -> UpstreamResult<()> {
        let form = [
            ("chat_id", data.chat_id.to_string()),
            ("action", data.action.as_str().to_string()),
        ];

        self.post_form::<serde_json::Value>("sendChatAction", &form)
            .await
            .map(drop)
    }

    pub async fn answer_inline_query(&self, data: InlineQueryResponse) -> UpstreamResult<()> {
        let results = serde_json::to_string(&data.results)
            .map_err(|e| UpstreamError::InvalidPayload(e.to_string()))?;

        let mut form = vec![("inline_query_id", data.query_id), ("results", results)];
        if let Some(cache_time) = data.cache_time {
            form.push(("cache_time", cache_time.to_string()));
        }
        if data.is_personal {
            form.push(("is_personal", "true".to_string()));
        }
        if !data.next_offset.is_empty() {
            form.push(("next_offset", data.next_offset));
        }
        if !data.pm_text.is_empty() {
            form.push(("switch_pm_text", data.pm_text));
        }
        if !data.pm_param.is_empty() {
            form.push(("switch_pm_parameter", data.pm_param));
        }

        self.post_form::<serde_json::Value>("answerInlineQuery", &form)
            .await
            .map(drop)
    }

    /// Resolve a file id and download its contents
    pub async fn get_file(&self, data: FileRequestData) -> UpstreamResult<Vec<u8>> {
        let file: ApiFile = self
            .post_form("getFile", &[("file_id", data.file_id.clone())])
            .await?
            .ok_or_else(|| UpstreamError::MissingFile(data.file_id.clone()))?;

        let path = file
            .file_path
            .as_deref()
            .ok_or_else(|| UpstreamError::MissingFile(data.file_id.clone()))?;

        let response = self
            .client
            .get(self.file_url(path))
            .send()
            .await
            .map_err(|e| self.http_error(e))?;

        if !response.status().is_success() {
            return Err(UpstreamError::Http(format!(
                "file download returned status {}",
                response.status()
            )));
        }

        let bytes = response.bytes().await.map_err(|e| self.http_error(e))?;

        if let Some(expected) = file.file_size {
            if expected != bytes.len() as u64 {
                // Reported only; the downloaded bytes are still delivered
                tracing::warn!(
                    "Downloaded file {} does not match reported size: {} != {}",
                    data.file_id,
                    bytes.len(),
                    expected
                );
            }
        }

        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Upstream for TelegramApi {
    async fn execute(&self, action: Action) -> UpstreamResult<()> {
        match action {
            Action::SendText(data) => self.send_text_message(data).await,
            Action::SendPhoto(data) => self.send_photo(data).await,
            Action::ForwardMessage(data) => self.forward_message(data).await,
            Action::SendChatAction(data) => self.send_chat_action(data).await,
            Action::AnswerInlineQuery(data) => self.answer_inline_query(data).await,
        }
    }

    async fn request(&self, request: Request) -> UpstreamResult<Reply> {
        match request {
            Request::GetFile(data) => self.get_file(data).await.map(Reply::File),
        }
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChatAction;
    use axum::{
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::{get, post},
        Form, Json, Router,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    const TOKEN: &str = "123-abc";

    type Calls = Arc<Mutex<Vec<(String, HashMap<String, String>)>>>;

    async fn spawn_stub(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn recording_method(calls: Calls, method: &'static str) -> axum::routing::MethodRouter {
        post(move |Form(form): Form<HashMap<String, String>>| {
            let calls = calls.clone();
            async move {
                calls.lock().unwrap().push((method.to_string(), form));
                Json(json!({"ok": true, "result": true}))
            }
        })
    }

    fn api(base: &str) -> TelegramApi {
        TelegramApi::new(base, TOKEN, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_urls() {
        let api = api("https://api.telegram.org");
        assert_eq!(
            api.method_url("sendMessage"),
            "https://api.telegram.org/bot123-abc/sendMessage"
        );
        assert_eq!(
            api.file_url("photos/file_1.jpg"),
            "https://api.telegram.org/file/bot123-abc/photos/file_1.jpg"
        );
    }

    #[tokio::test]
    async fn test_get_file_downloads_bytes() {
        let router = Router::new()
            .route(
                "/bot123-abc/getFile",
                post(|Form(form): Form<HashMap<String, String>>| async move {
                    assert_eq!(form["file_id"], "AgADBAAD");
                    Json(json!({
                        "ok": true,
                        "result": {"file_id": "AgADBAAD", "file_size": 5, "file_path": "photos/a.jpg"}
                    }))
                }),
            )
            .route("/file/bot123-abc/photos/a.jpg", get(|| async { "hello" }));
        let base = spawn_stub(router).await;

        let reply = api(&base)
            .request(Request::GetFile(FileRequestData {
                file_id: "AgADBAAD".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(reply, Reply::File(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_get_file_size_mismatch_still_delivers() {
        let router = Router::new()
            .route(
                "/bot123-abc/getFile",
                post(|| async {
                    Json(json!({
                        "ok": true,
                        "result": {"file_id": "x", "file_size": 999, "file_path": "docs/x.bin"}
                    }))
                }),
            )
            .route("/file/bot123-abc/docs/x.bin", get(|| async { "abc" }));
        let base = spawn_stub(router).await;

        let bytes = api(&base)
            .get_file(FileRequestData {
                file_id: "x".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(bytes, b"abc");
    }

    #[tokio::test]
    async fn test_get_file_api_error() {
        let router = Router::new().route(
            "/bot123-abc/getFile",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"ok": false, "error_code": 400, "description": "Bad Request: invalid file_id"})),
                )
            }),
        );
        let base = spawn_stub(router).await;

        let err = api(&base)
            .get_file(FileRequestData {
                file_id: "nope".to_string(),
            })
            .await
            .unwrap_err();
        match err {
            UpstreamError::Api { code, description } => {
                assert_eq!(code, 400);
                assert!(description.contains("invalid file_id"));
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_file_without_path() {
        let router = Router::new().route(
            "/bot123-abc/getFile",
            post(|| async { Json(json!({"ok": true, "result": {"file_id": "x"}})) }),
        );
        let base = spawn_stub(router).await;

        let err = api(&base)
            .get_file(FileRequestData {
                file_id: "x".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::MissingFile(id) if id == "x"));
    }

    #[tokio::test]
    async fn test_get_file_download_failure() {
        let router = Router::new()
            .route(
                "/bot123-abc/getFile",
                post(|| async {
                    Json(json!({"ok": true, "result": {"file_id": "x", "file_path": "gone.jpg"}}))
                }),
            )
            .route(
                "/file/bot123-abc/gone.jpg",
                get(|| async { StatusCode::NOT_FOUND }),
            );
        let base = spawn_stub(router).await;

        let err = api(&base)
            .get_file(FileRequestData {
                file_id: "x".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"), "{}", err);
    }

    #[tokio::test]
    async fn test_send_text_form() {
        let calls: Calls = Default::default();
        let router = Router::new().route(
            "/bot123-abc/sendMessage",
            recording_method(calls.clone(), "sendMessage"),
        );
        let base = spawn_stub(router).await;

        api(&base)
            .execute(Action::SendText(TextMessageData {
                chat_id: -1001,
                text: "<i>hey</i>".to_string(),
                reply_id: Some(12),
            }))
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        let (_, form) = &calls[0];
        assert_eq!(form["chat_id"], "-1001");
        assert_eq!(form["text"], "<i>hey</i>");
        assert_eq!(form["parse_mode"], "HTML");
        assert_eq!(form["reply_to_message_id"], "12");
    }

    #[tokio::test]
    async fn test_chat_action_and_forward_forms() {
        let calls: Calls = Default::default();
        let router = Router::new()
            .route(
                "/bot123-abc/sendChatAction",
                recording_method(calls.clone(), "sendChatAction"),
            )
            .route(
                "/bot123-abc/forwardMessage",
                recording_method(calls.clone(), "forwardMessage"),
            );
        let base = spawn_stub(router).await;
        let api = api(&base);

        api.execute(Action::SendChatAction(ChatActionData {
            chat_id: 42,
            action: ChatAction::UploadDocument,
        }))
        .await
        .unwrap();
        api.execute(Action::ForwardMessage(ForwardMessageData {
            chat_id: 1,
            from_chat_id: 2,
            message_id: 3,
        }))
        .await
        .unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].0, "sendChatAction");
        assert_eq!(calls[0].1["action"], "upload_document");
        assert_eq!(calls[1].0, "forwardMessage");
        assert_eq!(calls[1].1["from_chat_id"], "2");
        assert_eq!(calls[1].1["message_id"], "3");
    }

    #[tokio::test]
    async fn test_answer_inline_query_form() {
        let calls: Calls = Default::default();
        let router = Router::new().route(
            "/bot123-abc/answerInlineQuery",
            recording_method(calls.clone(), "answerInlineQuery"),
        );
        let base = spawn_stub(router).await;

        api(&base)
            .execute(Action::AnswerInlineQuery(InlineQueryResponse {
                query_id: "q".to_string(),
                results: vec![json!({"type": "photo", "id": "1"})],
                cache_time: Some(0),
                is_personal: true,
                next_offset: String::new(),
                pm_text: "Open".to_string(),
                pm_param: String::new(),
            }))
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        let form = &calls[0].1;
        assert_eq!(form["inline_query_id"], "q");
        let results: Value = serde_json::from_str(&form["results"]).unwrap();
        assert_eq!(results[0]["type"], "photo");
        assert_eq!(form["cache_time"], "0");
        assert_eq!(form["is_personal"], "true");
        assert_eq!(form["switch_pm_text"], "Open");
        assert!(!form.contains_key("next_offset"));
        assert!(!form.contains_key("switch_pm_parameter"));
    }

    #[tokio::test]
    async fn test_send_photo_multipart() {
        let seen: Arc<Mutex<Option<String>>> = Default::default();
        let router = Router::new().route(
            "/bot123-abc/sendPhoto",
            post({
                let seen = seen.clone();
                move |headers: HeaderMap| {
                    let seen = seen.clone();
                    async move {
                        let content_type = headers
                            .get("content-type")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        *seen.lock().unwrap() = content_type;
                        Json(json!({"ok": true, "result": {}})).into_response()
                    }
                }
            }),
        );
        let base = spawn_stub(router).await;

        api(&base)
            .execute(Action::SendPhoto(PhotoData {
                chat_id: 5,
                bytes: "aGVsbG8=".to_string(),
                filename: "pic.png".to_string(),
                caption: "look".to_string(),
                reply_id: None,
            }))
            .await
            .unwrap();

        let content_type = seen.lock().unwrap().clone().unwrap();
        assert!(content_type.starts_with("multipart/form-data"));
    }

    #[tokio::test]
    async fn test_send_photo_rejects_bad_base64() {
        // Never reaches the network
        let api = api("http://127.0.0.1:9");
        let err = api
            .execute(Action::SendPhoto(PhotoData {
                chat_id: 5,
                bytes: "***".to_string(),
                filename: "pic.png".to_string(),
                caption: String::new(),
                reply_id: None,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_timeout_reported() {
        let router = Router::new().route(
            "/bot123-abc/sendChatAction",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Json(json!({"ok": true, "result": true}))
            }),
        );
        let base = spawn_stub(router).await;
        let api = TelegramApi::new(&base, TOKEN, Duration::from_millis(50)).unwrap();

        let err = api
            .execute(Action::SendChatAction(ChatActionData {
                chat_id: 1,
                action: ChatAction::Typing,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_set_webhook_failure() {
        let router = Router::new().route(
            "/bot123-abc/setWebhook",
            post(|| async {
                Json(json!({"ok": false, "error_code": 401, "description": "Unauthorized"}))
            }),
        );
        let base = spawn_stub(router).await;

        let err = api(&base)
            .set_webhook("https://example.org/webhook", Some("s3cret"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Api { code: 401, .. }));
    }
}
