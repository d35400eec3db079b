//! Client side of the broker protocol
//!
//! A bot process connects with [`BrokerClient`], sends commands, and reads
//! the update stream. Replies to `getFile` are routed to the handler that
//! was registered when the request was sent.

use crate::api::{ApiMessage, ApiUpdate, ChatId};
use crate::callback::{CallbackId, CallbackRegistry};
use crate::framing::{encode_frame, FrameReader};
use crate::protocol::{
    parse_update, Action, ChatAction, ChatActionData, Command, FileRequestData,
    ForwardMessageData, InlineQueryResponse, PhotoData, Request, TextMessageData, Update,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;

/// File contents, or the broker's description of what went wrong
pub type FileResult = Result<Vec<u8>, String>;

pub type FileHandler = Box<dyn FnOnce(FileResult) + Send>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("broker connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct BrokerClient {
    writer: Mutex<OwnedWriteHalf>,
    frames: Mutex<FrameReader<BufReader<OwnedReadHalf>>>,
    callbacks: CallbackRegistry<FileHandler>,
}

impl BrokerClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            writer: Mutex::new(writer),
            frames: Mutex::new(FrameReader::new(BufReader::new(reader))),
            callbacks: CallbackRegistry::new(),
        })
    }

    async fn send(&self, command: &Command) -> Result<(), ClientError> {
        let frame = encode_frame(command)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        Ok(())
    }

    /// Send an HTML-styled text message, optionally as a reply
    pub async fn send_text_message(
        &self,
        chat_id: ChatId,
        text: impl Into<String>,
        reply_to: Option<i64>,
    ) -> Result<(), ClientError> {
        self.send(&Command::Send(Action::SendText(TextMessageData {
            chat_id,
            text: text.into(),
            reply_id: reply_to,
        })))
        .await
    }

    pub async fn send_photo(
        &self,
        chat_id: ChatId,
        data: &[u8],
        filename: impl Into<String>,
        caption: impl Into<String>,
        reply_to: Option<i64>,
    ) -> Result<(), ClientError> {
        self.send(&Command::Send(Action::SendPhoto(PhotoData {
            chat_id,
            bytes: STANDARD.encode(data),
            filename: filename.into(),
            caption: caption.into(),
            reply_id: reply_to,
        })))
        .await
    }

    /// Forward `message` into `chat_id`
    pub async fn forward_message(
        &self,
        chat_id: ChatId,
        message: &ApiMessage,
    ) -> Result<(), ClientError> {
        self.send(&Command::Send(Action::ForwardMessage(ForwardMessageData {
            chat_id,
            from_chat_id: message.chat.id,
            message_id: message.message_id,
        })))
        .await
    }

    pub async fn send_chat_action(
        &self,
        chat_id: ChatId,
        action: ChatAction,
    ) -> Result<(), ClientError> {
        self.send(&Command::Send(Action::SendChatAction(ChatActionData {
            chat_id,
            action,
        })))
        .await
    }

    pub async fn answer_inline_query(
        &self,
        response: InlineQueryResponse,
    ) -> Result<(), ClientError> {
        self.send(&Command::Send(Action::AnswerInlineQuery(response)))
            .await
    }

    /// Request a file; `handler` runs once when the broker replies.
    ///
    /// Returns the callback identifier the request was sent with.
    pub async fn get_file<F>(
        &self,
        file_id: impl Into<String>,
        handler: F,
    ) -> Result<CallbackId, ClientError>
    where
        F: FnOnce(FileResult) + Send + 'static,
    {
        let callback = self.callbacks.register(Box::new(handler));
        let command = Command::Request {
            callback,
            request: Request::GetFile(FileRequestData {
                file_id: file_id.into(),
            }),
        };

        if let Err(e) = self.send(&command).await {
            // The broker never saw it, so nothing will come back for this id
            let _ = self.callbacks.release(callback);
            return Err(e);
        }

        Ok(callback)
    }

    /// Read updates until the next platform event.
    ///
    /// Replies met along the way are handed to their handlers. Returns
    /// `None` once the broker closes the connection.
    pub async fn next_event(&self) -> Result<Option<ApiUpdate>, ClientError> {
        let mut frames = self.frames.lock().await;
        loop {
            let Some(frame) = frames.next_frame().await? else {
                return Ok(None);
            };

            match parse_update(&frame) {
                Ok(Update::Message(event)) => return Ok(Some(*event)),
                Ok(reply) => self.resolve(reply),
                Err(e) => tracing::warn!("Can't parse update from broker: {}", e),
            }
        }
    }

    fn resolve(&self, reply: Update) {
        let (callback, result) = match reply {
            Update::Message(_) => return,
            Update::File { callback, bytes } => (
                callback,
                STANDARD
                    .decode(bytes)
                    .map_err(|e| format!("broker sent invalid file data: {}", e)),
            ),
            Update::Error { callback, error } => (callback, Err(error)),
        };

        match self.callbacks.release(callback) {
            Ok(handler) => handler(result),
            Err(e) => tracing::warn!("Dropping reply: {}", e),
        }
    }

    /// Number of requests still waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_pending(&self, callback: CallbackId) -> bool {
        self.callbacks.contains(callback)
    }

    pub async fn close(&self) -> Result<(), ClientError> {
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}
