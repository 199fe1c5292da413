//! WebSocket client for a served table.
//!
//! Provides:
//! - Connection lifecycle (connect, close)
//! - A [`TableMirror`] kept in step with every server message
//! - Mutation requests: update, remove, insert
//!
//! Requests are fire-and-forget: the server never answers them directly,
//! their effect arrives as ordinary change messages.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use rowsync_core::{key_string, ClientMessage, ServerMessage};

use crate::error::ClientError;
use crate::mirror::TableMirror;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the remote table.
#[derive(Debug, Clone, PartialEq)]
pub enum TableEvent {
    /// Connection established
    Connected,
    /// A server message was applied to the mirror
    Message(ServerMessage),
    /// Connection lost
    Disconnected,
}

/// Queue an event without waiting on the receiver. The mirror is updated
/// before this is called, so a full or abandoned queue only loses events.
fn emit(event_tx: &mpsc::Sender<TableEvent>, event: TableEvent) {
    match event_tx.try_send(event) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(_)) => log::debug!("Event queue full, dropping event"),
    }
}

/// Live view of one table served by a `ModelServer`.
pub struct RemoteTable {
    url: String,

    state: Arc<RwLock<ConnectionState>>,

    /// Local replica, updated by the reader task
    mirror: Arc<parking_lot::Mutex<TableMirror>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Message>>,

    event_rx: Option<mpsc::Receiver<TableEvent>>,

    event_tx: mpsc::Sender<TableEvent>,
}

impl RemoteTable {
    /// `url` is the full WebSocket URL including the table's path.
    pub fn new(url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            url: url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            mirror: Arc::new(parking_lot::Mutex::new(TableMirror::new())),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<TableEvent>> {
        self.event_rx.take()
    }

    /// Connect and spawn the reader and writer tasks.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(&self.url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = ws_writer.send(msg).await {
                    log::debug!("Writer stopped: {e}");
                    break;
                }
            }
        });

        *self.state.write().await = ConnectionState::Connected;
        emit(&self.event_tx, TableEvent::Connected);
        log::info!("Connected to {}", self.url);

        // Reader task: apply server messages to the mirror
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let mirror = self.mirror.clone();
        let pong_tx = self.outgoing_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerMessage::from_json(text.as_str()) {
                        Ok(message) => {
                            mirror.lock().apply(&message);
                            emit(&event_tx, TableEvent::Message(message));
                        }
                        Err(e) => log::warn!("Unrecognized server message: {e}"),
                    },
                    Ok(Message::Ping(data)) => {
                        if let Some(tx) = &pong_tx {
                            let _ = tx.send(Message::Pong(data)).await;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            emit(&event_tx, TableEvent::Disconnected);
        });

        Ok(())
    }

    /// Send a raw request.
    pub async fn send(&self, message: &ClientMessage) -> Result<(), ClientError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let tx = self.outgoing_tx.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(Message::text(message.to_json()?))
            .await
            .map_err(|_| ClientError::ChannelClosed)
    }

    /// Change the fields of the row whose key `item` carries.
    pub async fn update(&self, item: Map<String, Value>) -> Result<(), ClientError> {
        let key = self.key_of(&item)?;
        self.send(&ClientMessage::change(key, item)).await
    }

    pub async fn update_keyed(&self, key: impl Into<String>, fields: Map<String, Value>) -> Result<(), ClientError> {
        self.send(&ClientMessage::change(key, fields)).await
    }

    pub async fn remove(&self, key: impl Into<String>) -> Result<(), ClientError> {
        let key: String = key.into();
        self.send(&ClientMessage::remove([key])).await
    }

    /// Insert one row: keyed if `item` carries a key, otherwise positional.
    pub async fn insert(&self, item: Map<String, Value>) -> Result<(), ClientError> {
        match self.key_of(&item) {
            Ok(key) => self.insert_keyed(key, item).await,
            Err(_) => self.insert_rows(vec![item]).await,
        }
    }

    pub async fn insert_keyed(&self, key: impl Into<String>, fields: Map<String, Value>) -> Result<(), ClientError> {
        self.send(&ClientMessage::insert_keyed(key, fields)).await
    }

    pub async fn insert_rows(&self, rows: Vec<Map<String, Value>>) -> Result<(), ClientError> {
        self.send(&ClientMessage::insert_rows(rows)).await
    }

    /// Close the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        let tx = self.outgoing_tx.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(Message::Close(None))
            .await
            .map_err(|_| ClientError::ChannelClosed)
    }

    fn key_of(&self, item: &Map<String, Value>) -> Result<String, ClientError> {
        let key_field = self.key_field();
        item.get(&key_field)
            .and_then(key_string)
            .ok_or(ClientError::MissingKey(key_field))
    }

    /// Rows of the mirror in display order.
    pub fn items(&self) -> Vec<Value> {
        self.mirror.lock().items()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.mirror.lock().get(key).cloned()
    }

    pub fn key_field(&self) -> String {
        self.mirror.lock().key_field().to_string()
    }

    /// Copy of the whole mirror.
    pub fn mirror(&self) -> TableMirror {
        self.mirror.lock().clone()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_initial_state() {
        let table = RemoteTable::new("ws://localhost:9090/people");
        assert_eq!(table.url(), "ws://localhost:9090/people");
        assert_eq!(table.connection_state().await, ConnectionState::Disconnected);
        assert!(table.items().is_empty());
        assert_eq!(table.key_field(), "id");
    }

    #[tokio::test]
    async fn test_requests_need_connection() {
        let table = RemoteTable::new("ws://localhost:9090");
        let err = table.remove("1").await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
        assert!(matches!(table.close().await, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_update_requires_key() {
        let table = RemoteTable::new("ws://localhost:9090");
        let err = table.update(obj(json!({"name": "x"}))).await.unwrap_err();
        assert!(matches!(err, ClientError::MissingKey(field) if field == "id"));
    }

    #[tokio::test]
    async fn test_connect_failure_resets_state() {
        let mut table = RemoteTable::new("ws://127.0.0.1:1/none");
        assert!(table.connect().await.is_err());
        assert_eq!(table.connection_state().await, ConnectionState::Disconnected);
    }

    #[test]
    fn test_take_event_rx() {
        let mut table = RemoteTable::new("ws://localhost:9090");
        assert!(table.take_event_rx().is_some());
        assert!(table.take_event_rx().is_none());
    }
}
