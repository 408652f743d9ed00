//! Error types for the pulsewire client library.

use thiserror::Error;

/// Result type alias for pulsewire operations
pub type Result<T> = std::result::Result<T, PulseError>;

/// Main error type for the pulsewire client
#[derive(Error, Debug, Clone)]
pub enum PulseError {
    #[error("transport closed: {message}")]
    TransportClosed { message: String },

    #[error("no auth strategy configured for restricted channel '{channel}'")]
    AuthMissing { channel: String },

    #[error("auth request failed: {message}")]
    AuthTransport { message: String },

    #[error("auth endpoint rejected or returned an invalid body: {message}")]
    AuthResponse { message: String },

    #[error("undecodable frame: {message}")]
    ProtocolDecode { message: String },

    #[error("invalid client event: {message}")]
    InvalidClientEvent { message: String },

    #[error("reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    #[error("invalid channel: {message}")]
    InvalidChannel { message: String },

    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("WebSocket error: {message}")]
    WebSocket { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl PulseError {
    pub fn transport_closed(msg: impl Into<String>) -> Self {
        Self::TransportClosed {
            message: msg.into(),
        }
    }

    pub fn auth_missing(channel: impl Into<String>) -> Self {
        Self::AuthMissing {
            channel: channel.into(),
        }
    }

    pub fn auth_transport(msg: impl Into<String>) -> Self {
        Self::AuthTransport {
            message: msg.into(),
        }
    }

    pub fn auth_response(msg: impl Into<String>) -> Self {
        Self::AuthResponse {
            message: msg.into(),
        }
    }

    pub fn protocol_decode(msg: impl Into<String>) -> Self {
        Self::ProtocolDecode {
            message: msg.into(),
        }
    }

    pub fn invalid_client_event(msg: impl Into<String>) -> Self {
        Self::InvalidClientEvent {
            message: msg.into(),
        }
    }

    pub fn reconnect_exhausted(attempts: u32) -> Self {
        Self::ReconnectExhausted { attempts }
    }

    pub fn invalid_channel(msg: impl Into<String>) -> Self {
        Self::InvalidChannel {
            message: msg.into(),
        }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection {
            message: msg.into(),
        }
    }

    pub fn websocket(msg: impl Into<String>) -> Self {
        Self::WebSocket {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }
}

impl From<serde_json::Error> for PulseError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<url::ParseError> for PulseError {
    fn from(err: url::ParseError) -> Self {
        Self::config(format!("Invalid URL: {}", err))
    }
}

impl From<reqwest::Error> for PulseError {
    fn from(err: reqwest::Error) -> Self {
        Self::auth_transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for PulseError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::websocket(format!("{:?}", err))
    }
}
