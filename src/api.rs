//! Minimal Telegram Bot API object model
//!
//! Only the fields the broker inspects are typed. Everything else a platform
//! update carries is kept in `extra` so re-encoding is lossless.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type ChatId = i64;
pub type MessageId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiUser {
    pub id: i64,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Private,
    Group,
    Supergroup,
    Channel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiChat {
    pub id: ChatId,
    #[serde(rename = "type")]
    pub kind: ChatType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiMessage {
    pub message_id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ApiUser>,
    pub date: i64,
    pub chat: ApiChat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Media, service fields, replies and anything newer than this model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiInlineQuery {
    pub id: String,
    pub from: ApiUser,
    pub query: String,
    #[serde(default)]
    pub offset: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Inbound platform event as delivered to the webhook
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiUpdate {
    pub update_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ApiMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_query: Option<ApiInlineQuery>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// File metadata returned by `getFile`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiFile {
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// Response envelope shared by every Bot API method
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub error_code: Option<i64>,
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_preserves_unknown_fields() {
        let raw = r#"{
            "update_id": 10,
            "message": {
                "message_id": 5,
                "from": {"id": 1, "first_name": "Ada"},
                "date": 1700000000,
                "chat": {"id": -100, "type": "supergroup", "title": "crew"},
                "photo": [{"file_id": "abc", "width": 90, "height": 90}]
            },
            "edited_channel_post": {"x": 1}
        }"#;

        let update: ApiUpdate = serde_json::from_str(raw).unwrap();
        let message = update.message.as_ref().unwrap();
        assert_eq!(message.chat.kind, ChatType::Supergroup);
        assert!(message.extra.contains_key("photo"));
        assert!(update.extra.contains_key("edited_channel_post"));

        let reencoded = serde_json::to_value(&update).unwrap();
        assert_eq!(reencoded["message"]["photo"][0]["file_id"], "abc");
        assert_eq!(reencoded["edited_channel_post"]["x"], 1);
        assert!(reencoded.get("inline_query").is_none());
    }

    #[test]
    fn test_error_envelope() {
        let raw = r#"{"ok": false, "error_code": 400, "description": "Bad Request: wrong file_id"}"#;
        let response: ApiResponse<ApiFile> = serde_json::from_str(raw).unwrap();
        assert!(!response.ok);
        assert!(response.result.is_none());
        assert_eq!(response.error_code, Some(400));
    }

    #[test]
    fn test_file_envelope() {
        let raw = r#"{"ok": true, "result": {"file_id": "abc", "file_path": "photos/a.jpg"}}"#;
        let response: ApiResponse<ApiFile> = serde_json::from_str(raw).unwrap();
        assert!(response.ok);
        assert!(response.description.is_none());
        let file = response.result.unwrap();
        assert_eq!(file.file_path.as_deref(), Some("photos/a.jpg"));
        assert!(file.file_size.is_none());
    }
}
