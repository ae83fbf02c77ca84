//! Signaling channel: the connection to the relay.
//!
//! Incoming frames are decoded and delivered in receipt order, one message per
//! text frame, through the receiver returned by [`SignalingConnector::connect`].
//! There is no retry and no reconnect.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::{CallError, Result};
use crate::message::SignalMessage;

/// Buffer of decoded incoming messages.
pub const INCOMING_BUFFER: usize = 100;

pub type IncomingMessages = mpsc::Receiver<SignalMessage>;

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Serializes `message` to JSON text and transmits it.
    async fn send(&self, message: &SignalMessage) -> Result<()>;

    /// Drops the connection and anything in flight. Idempotent.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<(Arc<dyn SignalingChannel>, IncomingMessages)>;
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Opens [`WebSocketChannel`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<(Arc<dyn SignalingChannel>, IncomingMessages)> {
        let (channel, incoming) = WebSocketChannel::connect(url).await?;
        Ok((Arc::new(channel), incoming))
    }
}

/// Signaling channel over a WebSocket (tokio-tungstenite).
pub struct WebSocketChannel {
    url: String,
    sink: Mutex<Option<WsSink>>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl WebSocketChannel {
    pub async fn connect(url: &str) -> Result<(Self, IncomingMessages)> {
        let (ws_stream, _response) = connect_async(url).await.map_err(|e| {
            error!(url = %url, error = %e, "Signaling connection failed");
            CallError::Transport(format!("WebSocket handshake failed: {}", e))
        })?;
        info!(url = %url, "Signaling channel connected");

        let (sink, mut stream) = ws_stream.split();
        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        let url_reader = url.to_string();

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match SignalMessage::decode(&text) {
                        Ok(message) => {
                            debug!(kind = message.kind(), "Received signaling message");
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Dropping undecodable signaling frame");
                        }
                    },
                    Ok(Message::Close(_)) => {
                        info!(url = %url_reader, "Signaling channel closed by relay");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(url = %url_reader, error = %e, "Signaling channel read failed");
                        break;
                    }
                }
            }
        });

        Ok((
            Self {
                url: url.to_string(),
                sink: Mutex::new(Some(sink)),
                reader: std::sync::Mutex::new(Some(reader)),
                closed: AtomicBool::new(false),
            },
            rx,
        ))
    }

    fn abort_reader(&self) {
        let handle = match self.reader.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[async_trait]
impl SignalingChannel for WebSocketChannel {
    async fn send(&self, message: &SignalMessage) -> Result<()> {
        if self.is_closed() {
            return Err(CallError::Closed);
        }
        let text = message.encode()?;

        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => sink.send(Message::Text(text)).await.map_err(|e| {
                error!(url = %self.url, error = %e, "Signaling send failed");
                CallError::Transport(format!("WebSocket send failed: {}", e))
            }),
            None => Err(CallError::Closed),
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.abort_reader();
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!(url = %self.url, error = %e, "Close frame not delivered");
            }
        }
        info!(url = %self.url, "Signaling channel closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.abort_reader();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = WebSocketChannel::connect(&format!("ws://127.0.0.1:{}/ws", port)).await;
        assert!(matches!(result, Err(CallError::Transport(_))));
    }

    #[tokio::test]
    async fn test_invalid_url_is_transport_error() {
        let result = WebSocketConnector.connect("not a url").await;
        assert!(matches!(result, Err(CallError::Transport(_))));
    }
}
