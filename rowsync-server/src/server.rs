//! WebSocket server multiplexing data sources by request path.
//!
//! Architecture:
//! ```text
//! Client A ──┐                                   ┌── SyncAdapter ── TableModel
//!             ├── "/"      ── BroadcastGroup ◄───┘
//! Client B ──┘
//! Client C ───── "/roles"  ── BroadcastGroup ◄────── SyncAdapter ── TableModel
//! ```
//!
//! Paths are registered on a [`ModelServer`] before it starts listening;
//! [`ModelServer::listen`] consumes the builder, so the path table of a
//! running server never changes. Each connection:
//! - is routed during the WebSocket handshake (unknown path → 404,
//!   path at capacity → 503),
//! - receives one full snapshot, taken atomically with its subscription,
//! - forwards its text frames to the path's adapter,
//! - receives every message the adapter emits after the snapshot.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval_at, Instant, Interval};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use rowsync_core::{AdapterConfig, SharedModel, SyncAdapter};

use crate::broadcast::{BroadcastGroup, BroadcastStats, ClientInfo, Slot};
use crate::error::ServerError;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum concurrent clients per path
    pub max_clients_per_path: usize,
    /// Broadcast channel capacity per path
    pub broadcast_capacity: usize,
    /// Ping interval in seconds (0 disables)
    pub heartbeat_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_clients_per_path: 100,
            broadcast_capacity: 256,
            heartbeat_interval_secs: 30,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub resyncs: u64,
}

/// One registered path: its adapter and the fan-out group it emits into.
#[derive(Clone)]
struct PathEntry {
    adapter: Arc<SyncAdapter>,
    group: Arc<BroadcastGroup>,
}

/// Builder holding the path table of a server that is not yet listening.
pub struct ModelServer {
    config: ServerConfig,
    paths: HashMap<String, PathEntry>,
}

impl ModelServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            paths: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve `model` at `path`, creating and binding its adapter.
    ///
    /// Registering the same path twice replaces the earlier source.
    pub fn serve_model(
        &mut self,
        path: impl Into<String>,
        model: SharedModel,
        config: AdapterConfig,
    ) -> Arc<SyncAdapter> {
        let path = normalize_path(path.into());
        let group = Arc::new(BroadcastGroup::new(self.config.broadcast_capacity));
        let adapter = Arc::new(SyncAdapter::new(config, group.clone()));
        adapter.bind(model);

        let entry = PathEntry {
            adapter: adapter.clone(),
            group,
        };
        if self.paths.insert(path.clone(), entry).is_some() {
            log::warn!("Path {path} registered twice, previous source replaced");
        } else {
            log::info!("Serving {path}");
        }
        adapter
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.paths.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Bind the listening socket. The path table is frozen from here on.
    pub async fn listen(self) -> Result<ListeningServer, ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!(
            "Sync server listening on {} ({} paths)",
            listener.local_addr()?,
            self.paths.len()
        );
        Ok(ListeningServer {
            listener,
            shared: Arc::new(Shared {
                config: self.config,
                paths: self.paths,
                stats: RwLock::new(ServerStats::default()),
            }),
        })
    }

    /// Listen and serve until the accept loop fails.
    pub async fn run(self) -> Result<(), ServerError> {
        self.listen().await?.run().await
    }
}

fn normalize_path(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

struct Shared {
    config: ServerConfig,
    paths: HashMap<String, PathEntry>,
    stats: RwLock<ServerStats>,
}

impl Shared {
    /// Look up `path` and claim a client slot on it. The slot is held
    /// until the returned guard drops, so concurrent handshakes cannot
    /// overshoot the cap.
    fn route(&self, path: &str) -> Result<(PathEntry, Slot), StatusCode> {
        let entry = self.paths.get(path).ok_or(StatusCode::NOT_FOUND)?;
        let slot = entry
            .group
            .try_reserve(self.config.max_clients_per_path)
            .ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
        Ok((entry.clone(), slot))
    }
}

/// A bound server, ready to accept connections.
pub struct ListeningServer {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl ListeningServer {
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for observing the server once `run` has taken it.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: self.shared.clone(),
        }
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, shared).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }
}

/// Read-only view of a running server.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    pub async fn stats(&self) -> ServerStats {
        self.shared.stats.read().await.clone()
    }

    pub fn client_count(&self, path: &str) -> usize {
        self.shared.paths.get(path).map_or(0, |e| e.group.client_count())
    }

    pub fn broadcast_stats(&self, path: &str) -> Option<BroadcastStats> {
        self.shared.paths.get(path).map(|e| e.group.stats())
    }

    pub fn adapter(&self, path: &str) -> Option<Arc<SyncAdapter>> {
        self.shared.paths.get(path).map(|e| e.adapter.clone())
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<Shared>,
) -> Result<(), ServerError> {
    let mut routed: Option<(String, PathEntry, Slot)> = None;
    let handshake = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        let path = req.uri().path();
        match shared.route(path) {
            Ok((entry, slot)) => {
                routed = Some((path.to_string(), entry, slot));
                Ok(resp)
            }
            Err(status) => {
                let mut rejection = ErrorResponse::new(Some(format!("{status}: {path}")));
                *rejection.status_mut() = status;
                Err(rejection)
            }
        }
    })
    .await;

    let ws_stream = match handshake {
        Ok(ws_stream) => ws_stream,
        Err(e) if routed.is_none() => {
            log::warn!("Rejected connection from {addr}: {e}");
            shared.stats.write().await.rejected_connections += 1;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let Some((path, entry, _slot)) = routed else {
        return Err(ServerError::UnknownPath(addr.to_string()));
    };

    let (mut ws_sender, ws_receiver) = ws_stream.split();
    let client = ClientInfo::new(Some(addr));
    let client_id = client.client_id;

    // Snapshot and subscription under one source lock: nothing emitted
    // after the snapshot can be missed, nothing before it is repeated.
    let (snapshot, rx) = entry.adapter.snapshot_with(|| entry.group.add_client(client))?;

    {
        let mut s = shared.stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }
    log::info!("Client {client_id} ({addr}) connected to {path}");

    let result = match ws_sender.send(Message::text(snapshot)).await {
        Ok(()) => serve_client(&shared, &entry, ws_sender, ws_receiver, rx, addr).await,
        Err(e) => Err(e.into()),
    };

    // Cleanup runs whatever ended the session; only this client is released.
    entry.group.remove_client(&client_id);
    shared.stats.write().await.active_connections -= 1;
    log::info!("Client {client_id} ({addr}) left {path}");

    result
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn serve_client(
    shared: &Shared,
    entry: &PathEntry,
    mut ws_sender: WsSink,
    mut ws_receiver: WsSource,
    mut rx: broadcast::Receiver<Arc<str>>,
    addr: SocketAddr,
) -> Result<(), ServerError> {
    let mut heartbeat = match shared.config.heartbeat_interval_secs {
        0 => None,
        secs => {
            let period = Duration::from_secs(secs);
            Some(interval_at(Instant::now() + period, period))
        }
    };

    loop {
        tokio::select! {
            // Incoming WebSocket frame
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        {
                            let mut s = shared.stats.write().await;
                            s.total_messages += 1;
                            s.total_bytes += text.len() as u64;
                        }
                        match entry.adapter.receive_message(text.as_str()) {
                            Ok(report) if report.is_ignored() => {
                                log::debug!("Ignored message from {addr}");
                            }
                            Ok(_) => {}
                            // Already logged by the adapter; nothing goes back.
                            Err(e) => log::debug!("Message from {addr} dropped: {e}"),
                        }
                    }

                    Some(Ok(Message::Binary(data))) => {
                        log::warn!("Ignoring {} byte binary frame from {addr}", data.len());
                    }

                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }

                    Some(Ok(Message::Close(_))) | None => {
                        log::debug!("Connection closed from {addr}");
                        break;
                    }

                    Some(Err(e)) => {
                        log::error!("WebSocket error from {addr}: {e}");
                        break;
                    }

                    _ => {}
                }
            }

            // Outgoing broadcast frame
            frame = rx.recv() => {
                match frame {
                    Ok(frame) => {
                        ws_sender.send(Message::text(frame.to_string())).await?;
                    }
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("Client {addr} lagged by {n} messages, resynchronizing");
                        entry.group.record_dropped(n);
                        let (snapshot, fresh) = entry.adapter.snapshot_with(|| rx.resubscribe())?;
                        rx = fresh;
                        shared.stats.write().await.resyncs += 1;
                        ws_sender.send(Message::text(snapshot)).await?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            _ = next_heartbeat(&mut heartbeat) => {
                ws_sender.send(Message::Ping(Default::default())).await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_core::{share, MemoryTable};
    use serde_json::json;

    fn table() -> SharedModel {
        share(MemoryTable::from_rows(vec!["id", "name"], vec![vec![json!(1), json!("a")]]))
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.max_clients_per_path, 100);
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.heartbeat_interval_secs, 30);
    }

    #[test]
    fn test_serve_model_registers_path() {
        let mut server = ModelServer::with_defaults();
        let adapter = server.serve_model("people", table(), AdapterConfig::default());
        server.serve_model("/roles", table(), AdapterConfig::default());

        assert!(adapter.is_bound());
        assert_eq!(server.paths(), vec!["/people".to_string(), "/roles".to_string()]);
    }

    #[test]
    fn test_duplicate_path_replaces_source() {
        let mut server = ModelServer::with_defaults();
        let first = server.serve_model("/", table(), AdapterConfig::default());
        let second = server.serve_model("/", table(), AdapterConfig::default());
        assert_eq!(server.paths().len(), 1);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&server.paths["/"].adapter, &second));
    }

    #[test]
    fn test_route_rejections() {
        let mut server = ModelServer::new(ServerConfig {
            max_clients_per_path: 1,
            ..ServerConfig::default()
        });
        server.serve_model("/", table(), AdapterConfig::default());
        let shared = Shared {
            config: server.config.clone(),
            paths: server.paths.clone(),
            stats: RwLock::new(ServerStats::default()),
        };

        assert_eq!(shared.route("/nope").err(), Some(StatusCode::NOT_FOUND));

        // A claimed slot counts against the cap before the client registers.
        let held = shared.route("/").unwrap();
        assert_eq!(shared.paths["/"].group.client_count(), 0);
        assert_eq!(shared.route("/").err(), Some(StatusCode::SERVICE_UNAVAILABLE));

        drop(held);
        assert!(shared.route("/").is_ok());
    }

    #[tokio::test]
    async fn test_listen_on_ephemeral_port() {
        let mut server = ModelServer::new(ServerConfig {
            bind_addr: "127.0.0.1:0".into(),
            ..ServerConfig::default()
        });
        server.serve_model("/", table(), AdapterConfig::default());
        let listening = server.listen().await.unwrap();
        assert_ne!(listening.local_addr().unwrap().port(), 0);

        let stats = listening.handle().stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("x".into()), "/x");
        assert_eq!(normalize_path("/x".into()), "/x");
    }
}
