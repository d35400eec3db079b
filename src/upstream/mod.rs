mod telegram;

use crate::callback::CallbackId;
use crate::protocol::{Action, Request, Update};
use async_trait::async_trait;
use std::time::Duration;

pub use telegram::{TelegramApi, API_ENDPOINT};

/// Result type for upstream operations
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Errors that can occur while talking to the chat platform
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Telegram API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("Response parsing failed: {0}")]
    Parse(String),

    #[error("File {0} is not available for download")]
    MissingFile(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Successful result of a [`Request`]
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    File(Vec<u8>),
}

/// Performs the actual remote calls behind broker commands.
///
/// Each call is a single attempt. Implementations own any timeout.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Fire-and-forget operation; failures are only logged by the caller
    async fn execute(&self, action: Action) -> UpstreamResult<()>;

    /// Operation whose result goes back to the requesting client
    async fn request(&self, request: Request) -> UpstreamResult<Reply>;

    fn name(&self) -> &str;
}

/// Wrap a finished request into the update addressed to `callback`
pub fn completion_update(callback: CallbackId, result: UpstreamResult<Reply>) -> Update {
    match result {
        Ok(Reply::File(bytes)) => Update::file(callback, &bytes),
        Err(e) => Update::error(callback, e.to_string()),
    }
}
