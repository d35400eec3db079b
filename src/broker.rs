//! Connection multiplexer
//!
//! Accepts client connections, reads one command per line, hands commands to
//! the upstream and routes completions back to the connection that asked.
//! Platform events are broadcast to every live connection.

use crate::api::ApiUpdate;
use crate::callback::CallbackId;
use crate::connections::{ClientConnection, ConnectionId, ConnectionSet, Delivery};
use crate::framing::FrameReader;
use crate::protocol::{parse_command, Command, Update};
use crate::upstream::{completion_update, Upstream};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Broker {
    connections: ConnectionSet,
    upstream: Arc<dyn Upstream>,
}

impl Broker {
    pub fn new(upstream: Arc<dyn Upstream>, write_timeout: Duration) -> Self {
        Self {
            connections: ConnectionSet::new(write_timeout),
            upstream,
        }
    }

    pub fn connections(&self) -> &ConnectionSet {
        &self.connections
    }

    /// Accept loop. Accept errors are logged and never stop the broker.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        self.accept_loop(|| listener.accept()).await
    }

    async fn accept_loop<F, Fut>(self: Arc<Self>, mut accept: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::io::Result<(TcpStream, SocketAddr)>>,
    {
        loop {
            match accept().await {
                Ok((stream, peer)) => {
                    tracing::info!("Client connected from {}", peer);
                    tokio::spawn(self.clone().handle_stream(stream, peer.to_string()));
                }
                Err(e) => {
                    // Persistent failures (fd exhaustion) would otherwise spin
                    tracing::error!("Can't accept client: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    pub async fn handle_stream(self: Arc<Self>, stream: TcpStream, peer: String) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not disable Nagle for {}: {}", peer, e);
        }
        let (reader, writer) = stream.into_split();
        self.handle_connection(reader, writer, peer).await;
    }

    /// Run one client connection until it closes or gets evicted
    pub async fn handle_connection<R, W>(self: Arc<Self>, reader: R, writer: W, peer: String)
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let connection = ClientConnection::new(peer, writer);
        let id = connection.id();
        let evicted = connection.closed();
        self.connections.add(connection.clone()).await;

        let mut frames = FrameReader::new(BufReader::new(reader));

        loop {
            let frame = tokio::select! {
                frame = frames.next_frame() => frame,
                _ = evicted.notified() => {
                    tracing::info!("Client {} was dropped after a failed write", connection.peer());
                    break;
                }
            };

            match frame {
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(command) => {
                        tracing::debug!(
                            "Command {} from {}",
                            command.kind().as_str(),
                            connection.peer()
                        );
                        self.dispatch(id, command).await;
                    }
                    Err(e) => {
                        tracing::warn!("Can't parse command from {}: {}", connection.peer(), e);
                        tracing::debug!("Offending line: {}", String::from_utf8_lossy(&line));
                    }
                },
                Ok(None) => {
                    tracing::info!("Client {} disconnected", connection.peer());
                    break;
                }
                Err(e) => {
                    tracing::warn!("Read error from {}: {}", connection.peer(), e);
                    break;
                }
            }
        }

        self.connections.remove(id).await;
        connection.shutdown().await;
    }

    /// Execute a parsed command on behalf of connection `origin`.
    ///
    /// Fire-and-forget commands run to completion before returning, so a
    /// connection's sends reach the platform in the order they were read.
    /// Requests run on their own task; the returned handle resolves once the
    /// reply has been delivered or found undeliverable. A failed delivery
    /// drops the connection.
    pub async fn dispatch(
        self: &Arc<Self>,
        origin: ConnectionId,
        command: Command,
    ) -> Option<JoinHandle<Delivery>> {
        match command {
            Command::Send(action) => {
                let kind = action.kind();
                if let Err(e) = self.upstream.execute(action).await {
                    tracing::error!("[{}] {} failed: {}", self.upstream.name(), kind.as_str(), e);
                }
                None
            }
            Command::Request { callback, request } => {
                let broker = self.clone();
                Some(tokio::spawn(async move {
                    let kind = request.kind();
                    let result = broker.upstream.request(request).await;
                    if let Err(e) = &result {
                        tracing::warn!(
                            "[{}] {} for callback {} failed: {}",
                            broker.upstream.name(),
                            kind.as_str(),
                            callback,
                            e
                        );
                    }
                    broker
                        .deliver(origin, callback, completion_update(callback, result))
                        .await
                }))
            }
        }
    }

    async fn deliver(&self, origin: ConnectionId, callback: CallbackId, update: Update) -> Delivery {
        let delivery = self.connections.send_to(origin, &update).await;
        if delivery == Delivery::Gone {
            tracing::debug!(
                "Dropping reply for callback {}: requesting client is gone",
                callback
            );
        }
        delivery
    }

    /// Broadcast an inbound platform event to every connected client
    pub async fn publish(&self, event: ApiUpdate) -> usize {
        let delivered = self
            .connections
            .broadcast(&Update::Message(Box::new(event)))
            .await;
        tracing::debug!("Broadcast event to {} clients", delivered);
        delivered
    }
}
