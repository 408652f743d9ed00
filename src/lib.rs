//! # pulsewire
//!
//! A client library for Pusher-protocol-compatible hosted publish/subscribe
//! services over WebSocket.
//!
//! ## Features
//!
//! - Public, private and presence channels
//! - Four auth strategies: none, HTTP endpoint, caller-built request,
//!   in-process HMAC signing
//! - Automatic reconnection with quadratic backoff, gated on network
//!   reachability
//! - Global and per-channel event bindings
//! - Presence membership rosters with member observers
//! - Device registration against the HTTP push-notification gateway
//!
//! ## Example
//!
//! ```ignore
//! use pulsewire::{PulseClient, PulseOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = PulseOptions::new()
//!         .host("localhost")
//!         .port(6001)
//!         .encrypted(false);
//!
//!     let client = PulseClient::new("your-app-key", options)?;
//!     client.connect().await?;
//!
//!     let channel = client.subscribe("my-channel")?;
//!     channel.bind("my-event", |event| {
//!         println!("Received: {:?}", event.data);
//!     });
//!
//!     Ok(())
//! }
//! ```

#![allow(dead_code)]

pub mod auth;
pub mod channels;
pub mod connection;
pub mod events;
pub mod protocol;
pub mod push;
pub mod reachability;
pub mod transport;
pub mod utils;

mod client;
mod error;
mod options;

// Re-exports
pub use auth::{AuthData, AuthStrategy, Authenticator, UserData, UserDataFn};
pub use channels::{Channel, ChannelRegistry, ChannelType, Member, Members, PresenceChannel};
pub use client::{PulseClient, SubscriptionErrorFn, SubscriptionSuccessFn};
pub use connection::{Connection, ConnectionState};
pub use error::{PulseError, Result};
pub use events::{BindingId, EventDispatcher, PulseEvent};
pub use options::{Config, PulseOptions};
pub use protocol::Protocol;
pub use push::{InterestChange, PlatformType, PushRegistration};
pub use reachability::{AlwaysReachable, ManualReachability, Reachability};
