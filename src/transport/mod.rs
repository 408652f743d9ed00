//! WebSocket transport layer.
//!
//! The connection state machine only needs an open/send/receive/close
//! surface from the underlying WebSocket library. [`Transport`] captures
//! that seam; [`WsTransport`] is the tokio-tungstenite implementation.
//! Inbound traffic is pushed through [`TransportHooks`] handed over at
//! connect time, so a transport is never observable before its callbacks
//! are in place.

mod ws;

pub use ws::WsTransport;

use crate::error::Result;
use async_trait::async_trait;

/// Callback sinks for one socket lifetime, handed to [`Transport::connect`].
pub struct TransportHooks {
    /// Inbound text frame
    pub on_frame: Box<dyn Fn(&str) + Send + Sync>,
    /// Socket closed, with close code and reason when the peer sent them
    pub on_close: Box<dyn Fn(Option<u16>, Option<String>) + Send + Sync>,
    /// Transport-level failure; a close follows
    pub on_error: Box<dyn Fn(String) + Send + Sync>,
}

/// Open/send/receive/close abstraction over a WebSocket implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the socket. Resolves once the WebSocket handshake completes;
    /// a dial or handshake failure is returned directly rather than
    /// reported through the hooks.
    async fn connect(&mut self, url: &str, hooks: TransportHooks) -> Result<()>;

    /// Close the socket deliberately
    async fn disconnect(&mut self);

    /// Queue a text frame
    async fn send(&self, message: &str) -> Result<()>;

    /// Queue a WebSocket-level ping
    async fn ping(&self) -> Result<()>;

    /// Whether the socket is currently open
    fn is_connected(&self) -> bool;
}
