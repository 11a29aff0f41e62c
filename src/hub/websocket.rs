//! WebSocket-backed observer connection

use super::{Connection, ConnectionId};
use crate::error::{Error, Result};
use crate::types::HubMessage;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::SinkExt;
use futures::stream::SplitSink;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Write half of an upgraded axum WebSocket
///
/// The read half stays with the route handler, which answers client pings
/// and notices the close frame.
pub struct WsConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    open: AtomicBool,
}

impl WsConnection {
    /// Wrap an already-upgraded socket's sink
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            id: ConnectionId::next(),
            sink: Mutex::new(sink),
            open: AtomicBool::new(true),
        }
    }

    /// Mark the socket closed after the peer went away
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, message: &HubMessage) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Connection(format!("{} is closed", self.id)));
        }
        let text = serde_json::to_string(message)?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text)).await.map_err(|e| {
            self.mark_closed();
            Error::Connection(format!("websocket send failed: {e}"))
        })
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let mut sink = self.sink.lock().await;
            if let Err(e) = sink.close().await {
                tracing::debug!(connection = %self.id, error = %e, "Error closing websocket");
            }
        }
    }
}
