//! Live client connections
//!
//! Membership only changes on accept (add), on read failure (remove by the
//! read loop) and on any write failure (eviction). Broadcasts
//! write to a snapshot so the set lock is never held across network I/O.

use crate::framing::encode_frame;
use crate::protocol::Update;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify, RwLock};
use ulid::Ulid;

pub type ConnectionId = Ulid;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Outcome of an addressed delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The connection was no longer in the set
    Gone,
    Failed,
}

/// Write side of a client connection
#[derive(Clone)]
pub struct ClientConnection {
    id: ConnectionId,
    peer: Arc<str>,
    writer: Arc<Mutex<BoxedWriter>>,
    closed: Arc<Notify>,
}

impl ClientConnection {
    pub fn new(peer: impl Into<String>, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            id: Ulid::new(),
            peer: peer.into().into(),
            writer: Arc::new(Mutex::new(Box::new(writer))),
            closed: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Resolves once the connection has been evicted from the set
    pub fn closed(&self) -> Arc<Notify> {
        self.closed.clone()
    }

    /// Write one complete frame. Frames from concurrent writers never interleave.
    pub async fn write_frame(&self, frame: &[u8], timeout: Duration) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(frame).await?;
            writer.flush().await
        };

        tokio::time::timeout(timeout, write).await.map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("write stalled for more than {:?}", timeout),
            )
        })?
    }

    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!("Error shutting down connection {}: {}", self.peer, e);
        }
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish()
    }
}

pub struct ConnectionSet {
    connections: RwLock<HashMap<ConnectionId, ClientConnection>>,
    /// A write taking longer than this counts as a failed write
    write_timeout: Duration,
}

impl ConnectionSet {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            write_timeout,
        }
    }

    pub async fn add(&self, connection: ClientConnection) {
        self.connections
            .write()
            .await
            .insert(connection.id(), connection);
    }

    pub async fn remove(&self, id: ConnectionId) -> Option<ClientConnection> {
        self.connections.write().await.remove(&id)
    }

    pub async fn get(&self, id: ConnectionId) -> Option<ClientConnection> {
        self.connections.read().await.get(&id).cloned()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> Vec<ClientConnection> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Write an update to every connection, evicting the ones that fail.
    ///
    /// Returns the number of connections that received it.
    pub async fn broadcast(&self, update: &Update) -> usize {
        let frame = match encode_frame(update) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Cannot encode broadcast update: {}", e);
                return 0;
            }
        };

        let targets = self.snapshot().await;
        let timeout = self.write_timeout;
        let results = futures::future::join_all(targets.iter().map(|connection| {
            let frame = &frame;
            async move { connection.write_frame(frame, timeout).await }
        }))
        .await;

        let mut delivered = 0;
        for (connection, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        "Broadcast to {} failed, dropping client: {}",
                        connection.peer(),
                        e
                    );
                    self.evict(connection).await;
                }
            }
        }

        delivered
    }

    /// Write an update to a single connection, if it is still in the set
    pub async fn send_to(&self, id: ConnectionId, update: &Update) -> Delivery {
        let Some(connection) = self.get(id).await else {
            return Delivery::Gone;
        };

        let frame = match encode_frame(update) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Cannot encode update for {}: {}", connection.peer(), e);
                return Delivery::Failed;
            }
        };

        match connection.write_frame(&frame, self.write_timeout).await {
            Ok(()) => Delivery::Delivered,
            Err(e) => {
                // Part of the frame may already be on the wire
                tracing::warn!(
                    "Could not deliver update to {}, dropping client: {}",
                    connection.peer(),
                    e
                );
                self.evict(&connection).await;
                Delivery::Failed
            }
        }
    }

    async fn evict(&self, connection: &ClientConnection) {
        if self.remove(connection.id()).await.is_some() {
            connection.closed.notify_one();
            connection.shutdown().await;
        }
    }
}
