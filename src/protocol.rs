//! Broker wire protocol
//!
//! Clients send [`Command`]s and receive [`Update`]s, one JSON document per
//! line. On the wire both are flat PascalCase objects with a `Type` tag and
//! one populated payload field; in Rust they are enums whose shape already
//! says which payload exists and whether a callback identifier is carried.

use crate::api::{ApiUpdate, ChatId, MessageId};
use crate::callback::CallbackId;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{kind} command is missing {field}")]
    MissingPayload {
        kind: &'static str,
        field: &'static str,
    },

    #[error("{0} requires a callback identifier")]
    MissingCallback(&'static str),
}

// ---------------------------------------------------------------------------
// Commands (client -> broker)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CommandType {
    SendText,
    SendPhoto,
    ForwardMessage,
    SendChatAction,
    GetFile,
    AnswerInlineQuery,
}

impl CommandType {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandType::SendText => "sendText",
            CommandType::SendPhoto => "sendPhoto",
            CommandType::ForwardMessage => "forwardMessage",
            CommandType::SendChatAction => "sendChatAction",
            CommandType::GetFile => "getFile",
            CommandType::AnswerInlineQuery => "answerInlineQuery",
        }
    }
}

/// HTML-styled text message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextMessageData {
    #[serde(rename = "ChatID")]
    pub chat_id: ChatId,
    #[serde(rename = "Text")]
    pub text: String,
    #[serde(rename = "ReplyID", default, skip_serializing_if = "Option::is_none")]
    pub reply_id: Option<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhotoData {
    #[serde(rename = "ChatID")]
    pub chat_id: ChatId,
    /// Base64-encoded image bytes
    #[serde(rename = "Bytes")]
    pub bytes: String,
    #[serde(rename = "Filename")]
    pub filename: String,
    #[serde(rename = "Caption", default, skip_serializing_if = "String::is_empty")]
    pub caption: String,
    #[serde(rename = "ReplyID", default, skip_serializing_if = "Option::is_none")]
    pub reply_id: Option<MessageId>,
}

impl PhotoData {
    pub fn decode_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.bytes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForwardMessageData {
    #[serde(rename = "ChatID")]
    pub chat_id: ChatId,
    #[serde(rename = "FromChatID")]
    pub from_chat_id: ChatId,
    #[serde(rename = "MessageID")]
    pub message_id: MessageId,
}

/// Status shown to chat members for a few seconds (or until the next message)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatAction {
    Typing,
    UploadPhoto,
    RecordVideo,
    UploadVideo,
    RecordAudio,
    UploadAudio,
    UploadDocument,
    FindLocation,
}

impl ChatAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatAction::Typing => "typing",
            ChatAction::UploadPhoto => "upload_photo",
            ChatAction::RecordVideo => "record_video",
            ChatAction::UploadVideo => "upload_video",
            ChatAction::RecordAudio => "record_audio",
            ChatAction::UploadAudio => "upload_audio",
            ChatAction::UploadDocument => "upload_document",
            ChatAction::FindLocation => "find_location",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatActionData {
    #[serde(rename = "ChatID")]
    pub chat_id: ChatId,
    #[serde(rename = "Action")]
    pub action: ChatAction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRequestData {
    #[serde(rename = "FileID")]
    pub file_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InlineQueryResponse {
    #[serde(rename = "QueryID")]
    pub query_id: String,
    /// Result objects are passed through to the platform untouched
    #[serde(rename = "Results", default)]
    pub results: Vec<serde_json::Value>,
    #[serde(rename = "CacheTime", default, skip_serializing_if = "Option::is_none")]
    pub cache_time: Option<u32>,
    #[serde(rename = "IsPersonal", default, skip_serializing_if = "is_false")]
    pub is_personal: bool,
    #[serde(rename = "NextOffset", default, skip_serializing_if = "String::is_empty")]
    pub next_offset: String,
    #[serde(rename = "PMText", default, skip_serializing_if = "String::is_empty")]
    pub pm_text: String,
    #[serde(rename = "PMParam", default, skip_serializing_if = "String::is_empty")]
    pub pm_param: String,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Command document exactly as it appears on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireCommand {
    #[serde(rename = "Type")]
    pub kind: CommandType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_message_data: Option<TextMessageData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_data: Option<PhotoData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_message_data: Option<ForwardMessageData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_action_data: Option<ChatActionData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_query_results: Option<InlineQueryResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_request_data: Option<FileRequestData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackId>,
}

impl WireCommand {
    fn empty(kind: CommandType) -> Self {
        Self {
            kind,
            text_message_data: None,
            photo_data: None,
            forward_message_data: None,
            chat_action_data: None,
            inline_query_results: None,
            file_request_data: None,
            callback: None,
        }
    }
}

/// Operation with no result worth reporting back
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SendText(TextMessageData),
    SendPhoto(PhotoData),
    ForwardMessage(ForwardMessageData),
    SendChatAction(ChatActionData),
    AnswerInlineQuery(InlineQueryResponse),
}

impl Action {
    pub fn kind(&self) -> CommandType {
        match self {
            Action::SendText(_) => CommandType::SendText,
            Action::SendPhoto(_) => CommandType::SendPhoto,
            Action::ForwardMessage(_) => CommandType::ForwardMessage,
            Action::SendChatAction(_) => CommandType::SendChatAction,
            Action::AnswerInlineQuery(_) => CommandType::AnswerInlineQuery,
        }
    }
}

/// Operation whose result is delivered later as an [`Update`]
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    GetFile(FileRequestData),
}

impl Request {
    pub fn kind(&self) -> CommandType {
        match self {
            Request::GetFile(_) => CommandType::GetFile,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireCommand", into = "WireCommand")]
pub enum Command {
    /// Fire-and-forget
    Send(Action),
    /// Answered asynchronously with an update tagged `callback`
    Request {
        callback: CallbackId,
        request: Request,
    },
}

impl Command {
    pub fn kind(&self) -> CommandType {
        match self {
            Command::Send(action) => action.kind(),
            Command::Request { request, .. } => request.kind(),
        }
    }
}

fn required<T>(payload: Option<T>, kind: CommandType, field: &'static str) -> Result<T, ProtocolError> {
    payload.ok_or(ProtocolError::MissingPayload {
        kind: kind.as_str(),
        field,
    })
}

impl TryFrom<WireCommand> for Command {
    type Error = ProtocolError;

    fn try_from(wire: WireCommand) -> Result<Self, Self::Error> {
        let kind = wire.kind;

        let action = match kind {
            CommandType::GetFile => {
                let data = required(wire.file_request_data, kind, "FileRequestData")?;
                let callback = wire
                    .callback
                    .ok_or(ProtocolError::MissingCallback(kind.as_str()))?;
                return Ok(Command::Request {
                    callback,
                    request: Request::GetFile(data),
                });
            }
            CommandType::SendText => {
                Action::SendText(required(wire.text_message_data, kind, "TextMessageData")?)
            }
            CommandType::SendPhoto => Action::SendPhoto(required(wire.photo_data, kind, "PhotoData")?),
            CommandType::ForwardMessage => Action::ForwardMessage(required(
                wire.forward_message_data,
                kind,
                "ForwardMessageData",
            )?),
            CommandType::SendChatAction => {
                Action::SendChatAction(required(wire.chat_action_data, kind, "ChatActionData")?)
            }
            CommandType::AnswerInlineQuery => Action::AnswerInlineQuery(required(
                wire.inline_query_results,
                kind,
                "InlineQueryResults",
            )?),
        };

        if let Some(callback) = wire.callback {
            tracing::debug!(
                "Ignoring callback {} on fire-and-forget {} command",
                callback,
                kind.as_str()
            );
        }

        Ok(Command::Send(action))
    }
}

impl From<Command> for WireCommand {
    fn from(command: Command) -> Self {
        let mut wire = WireCommand::empty(command.kind());
        match command {
            Command::Send(Action::SendText(data)) => wire.text_message_data = Some(data),
            Command::Send(Action::SendPhoto(data)) => wire.photo_data = Some(data),
            Command::Send(Action::ForwardMessage(data)) => wire.forward_message_data = Some(data),
            Command::Send(Action::SendChatAction(data)) => wire.chat_action_data = Some(data),
            Command::Send(Action::AnswerInlineQuery(data)) => {
                wire.inline_query_results = Some(data)
            }
            Command::Request {
                callback,
                request: Request::GetFile(data),
            } => {
                wire.file_request_data = Some(data);
                wire.callback = Some(callback);
            }
        }
        wire
    }
}

// ---------------------------------------------------------------------------
// Updates (broker -> client)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Message,
    File,
    Error,
}

/// Update document exactly as it appears on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireUpdate {
    #[serde(rename = "Type")]
    pub kind: UpdateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<ApiUpdate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireUpdate", into = "WireUpdate")]
pub enum Update {
    /// Inbound platform event, broadcast to every client
    Message(Box<ApiUpdate>),
    /// Base64-encoded file contents answering a `getFile`
    File { callback: CallbackId, bytes: String },
    /// Failure answering a request
    Error { callback: CallbackId, error: String },
}

impl Update {
    pub fn file(callback: CallbackId, data: &[u8]) -> Self {
        Update::File {
            callback,
            bytes: STANDARD.encode(data),
        }
    }

    pub fn error(callback: CallbackId, error: impl Into<String>) -> Self {
        Update::Error {
            callback,
            error: error.into(),
        }
    }

    pub fn kind(&self) -> UpdateType {
        match self {
            Update::Message(_) => UpdateType::Message,
            Update::File { .. } => UpdateType::File,
            Update::Error { .. } => UpdateType::Error,
        }
    }

    /// Identifier of the request this update answers, `None` for broadcasts
    pub fn callback(&self) -> Option<CallbackId> {
        match self {
            Update::Message(_) => None,
            Update::File { callback, .. } | Update::Error { callback, .. } => Some(*callback),
        }
    }
}

impl TryFrom<WireUpdate> for Update {
    type Error = ProtocolError;

    fn try_from(wire: WireUpdate) -> Result<Self, ProtocolError> {
        match wire.kind {
            UpdateType::Message => {
                let data = wire.data.ok_or(ProtocolError::MissingPayload {
                    kind: "message",
                    field: "Data",
                })?;
                Ok(Update::Message(data))
            }
            UpdateType::File => {
                let callback = wire
                    .callback
                    .ok_or(ProtocolError::MissingCallback("file update"))?;
                let bytes = wire.bytes.ok_or(ProtocolError::MissingPayload {
                    kind: "file",
                    field: "Bytes",
                })?;
                Ok(Update::File { callback, bytes })
            }
            UpdateType::Error => {
                let callback = wire
                    .callback
                    .ok_or(ProtocolError::MissingCallback("error update"))?;
                let error = wire.error.ok_or(ProtocolError::MissingPayload {
                    kind: "error",
                    field: "Error",
                })?;
                Ok(Update::Error { callback, error })
            }
        }
    }
}

impl From<Update> for WireUpdate {
    fn from(update: Update) -> Self {
        let mut wire = WireUpdate {
            kind: update.kind(),
            callback: update.callback(),
            error: None,
            data: None,
            bytes: None,
        };
        match update {
            Update::Message(data) => wire.data = Some(data),
            Update::File { bytes, .. } => wire.bytes = Some(bytes),
            Update::Error { error, .. } => wire.error = Some(error),
        }
        wire
    }
}

pub fn parse_command(line: &[u8]) -> Result<Command, ProtocolError> {
    Ok(serde_json::from_slice(line)?)
}

pub fn parse_update(line: &[u8]) -> Result<Update, ProtocolError> {
    Ok(serde_json::from_slice(line)?)
}
