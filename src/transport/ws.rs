//! WebSocket transport backed by tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use super::{Transport, TransportHooks};
use crate::error::{PulseError, Result};

/// WebSocket transport on tokio-tungstenite.
///
/// `connect` performs the dial and handshake in place and only then spawns
/// the reader and writer tasks, so a successful return means the socket is
/// live. Outbound frames funnel through one mpsc queue into the writer; the
/// reader feeds the hooks and flips the connected flag when the socket ends.
pub struct WsTransport {
    /// Outbound frame queue for the current socket, if any
    outbound: RwLock<Option<mpsc::Sender<Message>>>,
    connected: Arc<AtomicBool>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            outbound: RwLock::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn queue(&self, message: Message) -> Result<()> {
        if !self.is_connected() {
            return Err(PulseError::connection("Not connected"));
        }

        let tx = self.outbound.read().clone();
        match tx {
            Some(tx) => tx
                .send(message)
                .await
                .map_err(|_| PulseError::transport_closed("writer task is gone")),
            None => Err(PulseError::connection("Not connected")),
        }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&mut self, url: &str, hooks: TransportHooks) -> Result<()> {
        if self.is_connected() {
            return Err(PulseError::connection("Already connected"));
        }

        info!("Opening WebSocket to {}", url);
        let (stream, _response) = connect_async(url).await?;
        debug!("WebSocket handshake complete");

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(64);

        *self.outbound.write() = Some(outbound_tx.clone());
        self.connected.store(true, Ordering::SeqCst);

        // Writer: drain the outbound queue until a close frame or a failure
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() || closing {
                    break;
                }
            }
            debug!("Writer task ended");
        });

        // Reader: feed the hooks until the socket ends, then report the close
        let connected = self.connected.clone();
        tokio::spawn(async move {
            let (code, reason) = loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => (hooks.on_frame)(&text),
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = outbound_tx.try_send(Message::Pong(payload));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(cf) => (Some(cf.code.into()), Some(cf.reason.to_string())),
                            None => (None, None),
                        };
                    }
                    // Binary, pong and raw frames carry nothing for us
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {:?}", e);
                        (hooks.on_error)(format!("{:?}", e));
                        break (None, Some(format!("{:?}", e)));
                    }
                    None => break (None, Some("stream ended".to_string())),
                }
            };

            connected.store(false, Ordering::SeqCst);
            (hooks.on_close)(code, reason);
            debug!("Reader task ended");
        });

        Ok(())
    }

    async fn disconnect(&mut self) {
        let tx = self.outbound.write().take();
        if let Some(tx) = tx {
            info!("Closing WebSocket");
            let _ = tx.send(Message::Close(None)).await;
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn send(&self, message: &str) -> Result<()> {
        self.queue(Message::Text(message.to_string())).await
    }

    async fn ping(&self) -> Result<()> {
        self.queue(Message::Ping(Vec::new())).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_requires_open_socket() {
        let transport = WsTransport::new();
        assert!(!transport.is_connected());
        assert!(transport.send("{}").await.is_err());
        assert!(transport.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_is_returned_not_hooked() {
        use parking_lot::Mutex;

        let closed = Arc::new(Mutex::new(Vec::new()));
        let closed_clone = closed.clone();

        let mut transport = WsTransport::new();
        let hooks = TransportHooks {
            on_frame: Box::new(|_| {}),
            on_close: Box::new(move |code, reason| {
                closed_clone.lock().push((code, reason));
            }),
            on_error: Box::new(|_| {}),
        };

        // Nothing listens on this port; the dial error comes back directly
        let result = transport.connect("ws://127.0.0.1:1/app/key", hooks).await;
        assert!(result.is_err());
        assert!(!transport.is_connected());
        assert!(closed.lock().is_empty());
    }
}
