//! Authorization of private and presence channel subscriptions.
//!
//! Restricted channels require an auth token derived from the connection's
//! socket id. The token is produced by one of four strategies: none, an HTTP
//! endpoint, a caller-supplied request builder, or an in-process HMAC
//! signature computed from the application secret.

use crate::channels::ChannelType;
use crate::error::{PulseError, Result};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Caller-supplied hook producing the HTTP request for an auth round-trip.
///
/// Receives the shared HTTP client, the socket id and the channel name, and
/// returns a ready-to-send request builder.
pub type AuthRequestFn =
    Arc<dyn Fn(&reqwest::Client, &str, &str) -> reqwest::RequestBuilder + Send + Sync>;

/// Provider of the local user's identity for presence channels.
pub type UserDataFn = Arc<dyn Fn() -> UserData + Send + Sync>;

/// Identity of the local user on a presence channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserData {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_info: Option<Value>,
}

impl UserData {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_info: None,
        }
    }

    pub fn with_info(mut self, info: Value) -> Self {
        self.user_info = Some(info);
        self
    }
}

/// How auth tokens for restricted channels are produced.
#[derive(Clone, Default)]
pub enum AuthStrategy {
    /// No strategy; private/presence subscriptions fail with `AuthMissing`.
    #[default]
    None,
    /// POST `socket_id=<id>&channel_name=<name>` to an endpoint.
    Endpoint {
        url: String,
        headers: HashMap<String, String>,
    },
    /// Delegate request construction to the caller.
    RequestBuilder(AuthRequestFn),
    /// Sign locally with the application secret.
    InlineSecret { secret: String },
}

impl AuthStrategy {
    pub fn endpoint(url: impl Into<String>) -> Self {
        Self::Endpoint {
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    pub fn endpoint_with_headers(url: impl Into<String>, headers: HashMap<String, String>) -> Self {
        Self::Endpoint {
            url: url.into(),
            headers,
        }
    }

    pub fn request_builder(
        builder: impl Fn(&reqwest::Client, &str, &str) -> reqwest::RequestBuilder
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::RequestBuilder(Arc::new(builder))
    }

    pub fn inline_secret(secret: impl Into<String>) -> Self {
        Self::InlineSecret {
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Endpoint { url, .. } => f.debug_struct("Endpoint").field("url", url).finish(),
            Self::RequestBuilder(_) => write!(f, "RequestBuilder(..)"),
            Self::InlineSecret { .. } => write!(f, "InlineSecret"),
        }
    }
}

/// Token plus optional channel data for a restricted subscription.
#[derive(Debug, Clone)]
pub struct AuthData {
    pub auth: String,
    pub channel_data: Option<String>,
}

/// Auth failure enriched with the HTTP response, when one was received.
///
/// `status` and `body` feed the subscription-error handler so callers can
/// inspect what the endpoint actually returned.
#[derive(Debug, Clone)]
pub struct AuthFailure {
    pub status: Option<u16>,
    pub body: Option<String>,
    pub error: PulseError,
}

impl AuthFailure {
    fn plain(error: PulseError) -> Self {
        Self {
            status: None,
            body: None,
            error,
        }
    }
}

/// JSON body returned by auth endpoints
#[derive(Debug, Deserialize)]
struct AuthResponseBody {
    auth: String,
    #[serde(default)]
    channel_data: Option<String>,
}

/// Produces auth tokens for restricted channel subscriptions.
pub struct Authenticator {
    app_key: String,
    strategy: AuthStrategy,
    user_data: Option<UserDataFn>,
    http: reqwest::Client,
}

impl Authenticator {
    pub fn new(app_key: impl Into<String>, strategy: AuthStrategy, user_data: Option<UserDataFn>) -> Self {
        Self {
            app_key: app_key.into(),
            strategy,
            user_data,
            http: reqwest::Client::new(),
        }
    }

    /// Authorize a subscription.
    ///
    /// Public channels need no token and resolve to `Ok(None)`. Restricted
    /// channels resolve to the token plus, for presence channels, the
    /// `channel_data` string the server echoes to other members.
    pub async fn authorize(
        &self,
        channel_name: &str,
        kind: ChannelType,
        socket_id: &str,
    ) -> std::result::Result<Option<AuthData>, AuthFailure> {
        if !kind.requires_auth() {
            return Ok(None);
        }

        match self.strategy {
            AuthStrategy::None => Err(AuthFailure::plain(PulseError::auth_missing(channel_name))),
            AuthStrategy::Endpoint {
                ref url,
                ref headers,
            } => {
                let mut request = self
                    .http
                    .post(url)
                    .form(&[("socket_id", socket_id), ("channel_name", channel_name)]);
                for (key, value) in headers {
                    request = request.header(key, value);
                }
                self.execute(request).await
            }
            AuthStrategy::RequestBuilder(ref builder) => {
                let request = builder(&self.http, socket_id, channel_name);
                self.execute(request).await
            }
            AuthStrategy::InlineSecret { ref secret } => {
                Ok(Some(self.sign(secret, channel_name, kind, socket_id)?))
            }
        }
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<Option<AuthData>, AuthFailure> {
        let response = request
            .send()
            .await
            .map_err(|e| AuthFailure::plain(PulseError::auth_transport(e.to_string())))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthFailure::plain(PulseError::auth_transport(e.to_string())))?;

        if !status.is_success() {
            return Err(AuthFailure {
                status: Some(status.as_u16()),
                body: Some(body),
                error: PulseError::auth_response(format!("endpoint returned {}", status)),
            });
        }

        let parsed: AuthResponseBody = serde_json::from_str(&body).map_err(|e| AuthFailure {
            status: Some(status.as_u16()),
            body: Some(body.clone()),
            error: PulseError::auth_response(format!("unparseable auth body: {}", e)),
        })?;

        Ok(Some(AuthData {
            auth: parsed.auth,
            channel_data: parsed.channel_data,
        }))
    }

    fn sign(
        &self,
        secret: &str,
        channel_name: &str,
        kind: ChannelType,
        socket_id: &str,
    ) -> std::result::Result<AuthData, AuthFailure> {
        let channel_data = if kind == ChannelType::Presence {
            Some(self.presence_channel_data(socket_id).map_err(AuthFailure::plain)?)
        } else {
            None
        };

        let payload = signing_payload(socket_id, channel_name, channel_data.as_deref());

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| AuthFailure::plain(PulseError::auth_response(e.to_string())))?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(AuthData {
            auth: format!("{}:{}", self.app_key, signature).to_lowercase(),
            channel_data,
        })
    }

    /// Serialize the local user's identity for a presence subscription.
    ///
    /// Without a configured provider the socket id doubles as the user id.
    fn presence_channel_data(&self, socket_id: &str) -> Result<String> {
        let user = match self.user_data {
            Some(ref provider) => provider(),
            None => UserData::new(socket_id),
        };
        serde_json::to_string(&user).map_err(Into::into)
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("app_key", &self.app_key)
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// The string covered by the inline HMAC signature:
/// `<socket_id>:<channel_name>` with `:<channel_data>` appended for presence.
fn signing_payload(socket_id: &str, channel_name: &str, channel_data: Option<&str>) -> String {
    match channel_data {
        Some(data) => format!("{}:{}:{}", socket_id, channel_name, data),
        None => format!("{}:{}", socket_id, channel_name),
    }
}
