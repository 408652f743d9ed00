//! Wire protocol message types and encoding/decoding.

use crate::error::{PulseError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A single protocol frame.
///
/// Inbound frames carry at minimum an `event` name; `channel` and `data` are
/// optional. The server encodes `data` as a JSON string inside the frame, so
/// [`PulseEvent::data_as_value`] re-decodes it when a structured view is
/// needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseEvent {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl PulseEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            channel: None,
            data: None,
            user_id: None,
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_json_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Get the data field as a structured value, re-decoding the server's
    /// string-encoded payloads when necessary.
    pub fn data_as_value(&self) -> Option<Value> {
        match self.data {
            Some(Value::String(ref s)) => serde_json::from_str(s).ok().or_else(|| {
                // Not JSON, keep the raw string
                Some(Value::String(s.clone()))
            }),
            Some(ref v) => Some(v.clone()),
            None => None,
        }
    }

    /// Parse the data field as a specific type.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        let data = self
            .data_as_value()
            .ok_or_else(|| PulseError::protocol_decode("no data in event"))?;
        serde_json::from_value(data).map_err(Into::into)
    }

    /// Prepare the event for delivery to user bindings.
    ///
    /// When `attempt_json` is set, a string payload that parses as JSON is
    /// replaced by the parsed value; otherwise the raw string is kept.
    pub fn into_dispatchable(mut self, attempt_json: bool) -> Self {
        if attempt_json && matches!(self.data, Some(Value::String(_))) {
            if let Some(Value::String(s)) = self.data.take() {
                self.data = Some(serde_json::from_str(&s).unwrap_or(Value::String(s)));
            }
        }
        self
    }

    /// Check if this is an internal service event
    pub fn is_internal(&self) -> bool {
        self.event.starts_with("pusher_internal:") || self.event.starts_with("pusher:")
    }
}

/// Connection handshake payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEstablished {
    pub socket_id: String,
    #[serde(default)]
    pub activity_timeout: Option<u64>,
}

/// Subscription succeeded payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSucceeded {
    #[serde(default)]
    pub presence: Option<PresenceData>,
}

/// Presence roster snapshot carried by `subscription_succeeded`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceData {
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub ids: Option<Vec<String>>,
    #[serde(default)]
    pub hash: HashMap<String, Value>,
}

/// Member added/removed payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberData {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<Value>,
}

/// Server error payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub message: String,
    #[serde(default)]
    pub code: Option<i32>,
}

/// Subscribe control message payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeData {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<String>,
}

/// Unsubscribe control message payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeData {
    pub channel: String,
}

/// Protocol encoder/decoder
pub struct Protocol;

impl Protocol {
    /// Encode a message to a JSON string
    pub fn encode_message(event: &PulseEvent) -> Result<String> {
        serde_json::to_string(event).map_err(Into::into)
    }

    /// Decode a message from a JSON string.
    ///
    /// Frames that are not JSON objects or lack an `event` field fail with
    /// [`PulseError::ProtocolDecode`].
    pub fn decode_message(raw: &str) -> Result<PulseEvent> {
        serde_json::from_str(raw).map_err(|e| PulseError::protocol_decode(e.to_string()))
    }

    /// Create a subscribe control event
    pub fn create_subscribe_event(
        channel: &str,
        auth: Option<String>,
        channel_data: Option<String>,
    ) -> PulseEvent {
        let data = SubscribeData {
            channel: channel.to_string(),
            auth,
            channel_data,
        };

        PulseEvent::new("pusher:subscribe")
            .with_json_data(serde_json::to_value(data).unwrap_or(Value::Null))
    }

    /// Create an unsubscribe control event
    pub fn create_unsubscribe_event(channel: &str) -> PulseEvent {
        let data = UnsubscribeData {
            channel: channel.to_string(),
        };

        PulseEvent::new("pusher:unsubscribe")
            .with_json_data(serde_json::to_value(data).unwrap_or(Value::Null))
    }

    /// Create a pong reply
    pub fn create_pong_event() -> PulseEvent {
        PulseEvent::new("pusher:pong").with_json_data(serde_json::json!({}))
    }

    /// Create a client event.
    ///
    /// Client events must carry the `client-` prefix and a channel.
    pub fn create_client_event(event_name: &str, channel: &str, data: Value) -> Result<PulseEvent> {
        if !event_name.starts_with("client-") {
            return Err(PulseError::invalid_client_event(format!(
                "client events must start with 'client-', got: {}",
                event_name
            )));
        }

        Ok(PulseEvent::new(event_name)
            .with_channel(channel)
            .with_json_data(data))
    }

    /// Check whether a close code is the protocol "normal" close
    pub fn is_normal_close(code: Option<u16>) -> bool {
        code == Some(NORMAL_CLOSE_CODE)
    }
}

/// Protocol version sent in the connection URL
pub const PROTOCOL_VERSION: u8 = 7;

/// Client identifier sent in the connection URL
pub const CLIENT_NAME: &str = "pulsewire-rust";

/// Client version sent in the connection URL
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// WebSocket close code for a deliberate, non-retried close
pub const NORMAL_CLOSE_CODE: u16 = 1000;
