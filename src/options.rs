//! Configuration options for the pulsewire client.

use crate::auth::{AuthStrategy, UserDataFn};
use crate::protocol::{CLIENT_NAME, CLIENT_VERSION, PROTOCOL_VERSION};
use std::time::Duration;

/// Configuration for creating a client.
///
/// Immutable once handed to [`crate::PulseClient::new`]; the builder methods
/// consume and return `self`.
#[derive(Clone)]
pub struct PulseOptions {
    /// Custom service host
    pub host: Option<String>,

    /// Custom service port (default: 80 for ws, 443 for wss)
    pub port: Option<u16>,

    /// Use TLS/WSS
    pub encrypted: bool,

    /// How private/presence subscriptions are authorized
    pub auth: AuthStrategy,

    /// Reconnect automatically after an unexpected close
    pub auto_reconnect: bool,

    /// Re-decode string event payloads into JSON before dispatch
    pub attempt_to_return_json_object: bool,

    /// Cap on consecutive reconnect attempts (None = unlimited)
    pub max_reconnect_attempts: Option<u32>,

    /// Cap on the reconnect backoff wait, in seconds (None = uncapped)
    pub max_reconnect_gap_seconds: Option<u64>,

    /// Local user identity provider for presence channels
    pub user_data: Option<UserDataFn>,
}

impl Default for PulseOptions {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            encrypted: true,
            auth: AuthStrategy::None,
            auto_reconnect: true,
            attempt_to_return_json_object: true,
            max_reconnect_attempts: None,
            max_reconnect_gap_seconds: None,
            user_data: None,
        }
    }
}

impl PulseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: set custom host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Builder pattern: set port
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Builder pattern: enable/disable TLS
    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// Builder pattern: set the auth strategy
    pub fn auth(mut self, strategy: AuthStrategy) -> Self {
        self.auth = strategy;
        self
    }

    /// Builder pattern: authorize via an HTTP endpoint
    pub fn auth_endpoint(mut self, url: impl Into<String>) -> Self {
        self.auth = AuthStrategy::endpoint(url);
        self
    }

    /// Builder pattern: authorize by signing with the app secret
    pub fn auth_secret(mut self, secret: impl Into<String>) -> Self {
        self.auth = AuthStrategy::inline_secret(secret);
        self
    }

    /// Builder pattern: enable/disable automatic reconnection
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Builder pattern: deliver payloads as parsed JSON or raw strings
    pub fn attempt_to_return_json_object(mut self, enabled: bool) -> Self {
        self.attempt_to_return_json_object = enabled;
        self
    }

    /// Builder pattern: cap consecutive reconnect attempts
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Builder pattern: cap the reconnect backoff wait
    pub fn max_reconnect_gap_seconds(mut self, seconds: u64) -> Self {
        self.max_reconnect_gap_seconds = Some(seconds);
        self
    }

    /// Builder pattern: set the presence user-data provider
    pub fn user_data(mut self, provider: UserDataFn) -> Self {
        self.user_data = Some(provider);
        self
    }

    /// Build the WebSocket URL for an application key.
    pub fn ws_url(&self, app_key: &str) -> String {
        let scheme = if self.encrypted { "wss" } else { "ws" };
        let host = self.host.as_deref().unwrap_or("ws.pusherapp.com");
        let port = self
            .port
            .unwrap_or(if self.encrypted { 443 } else { 80 });

        // Elide the port when it is the scheme default
        let port_str = if (self.encrypted && port == 443) || (!self.encrypted && port == 80) {
            String::new()
        } else {
            format!(":{}", port)
        };

        format!(
            "{}://{}{}/app/{}?protocol={}&client={}&version={}",
            scheme, host, port_str, app_key, PROTOCOL_VERSION, CLIENT_NAME, CLIENT_VERSION
        )
    }
}

impl std::fmt::Debug for PulseOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("encrypted", &self.encrypted)
            .field("auth", &self.auth)
            .field("auto_reconnect", &self.auto_reconnect)
            .field(
                "attempt_to_return_json_object",
                &self.attempt_to_return_json_object,
            )
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("max_reconnect_gap_seconds", &self.max_reconnect_gap_seconds)
            .finish()
    }
}

/// Internal configuration derived from `PulseOptions`
#[derive(Debug, Clone)]
pub struct Config {
    pub app_key: String,
    pub ws_url: String,
    pub auth: AuthStrategy,
    pub auto_reconnect: bool,
    pub attempt_to_return_json_object: bool,
    pub max_reconnect_attempts: Option<u32>,
    pub max_reconnect_gap: Option<Duration>,
}

impl Config {
    pub fn new(app_key: impl Into<String>, opts: &PulseOptions) -> Self {
        let app_key = app_key.into();
        Self {
            ws_url: opts.ws_url(&app_key),
            app_key,
            auth: opts.auth.clone(),
            auto_reconnect: opts.auto_reconnect,
            attempt_to_return_json_object: opts.attempt_to_return_json_object,
            max_reconnect_attempts: opts.max_reconnect_attempts,
            max_reconnect_gap: opts.max_reconnect_gap_seconds.map(Duration::from_secs),
        }
    }
}
