//! Device registration with the HTTP push-notification gateway.
//!
//! Separate from the realtime connection: a device registers its platform
//! token once, then subscribes to named interests so the service can reach
//! it while the WebSocket is down. Interest changes queue in an ordered
//! outbox until the client id is known, and a failure ceiling pauses the
//! flush loop rather than retrying forever.

mod outbox;

pub use outbox::{InterestChange, InterestOutbox, MAX_FAILED_REQUEST_ATTEMPTS};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PulseError, Result};

/// Device platform, as named by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformType {
    #[serde(rename = "apns")]
    Apns,
    #[serde(rename = "gcm")]
    Fcm,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    app_key: &'a str,
    platform_type: PlatformType,
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct InterestRequest<'a> {
    app_key: &'a str,
}

/// Client for the native push gateway.
pub struct PushRegistration {
    base_url: String,
    app_key: String,
    platform: PlatformType,
    client_id: RwLock<Option<String>>,
    outbox: InterestOutbox,
    http: reqwest::Client,
}

impl PushRegistration {
    pub fn new(
        base_url: impl Into<String>,
        app_key: impl Into<String>,
        platform: PlatformType,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            app_key: app_key.into(),
            platform,
            client_id: RwLock::new(None),
            outbox: InterestOutbox::new(),
            http: reqwest::Client::new(),
        }
    }

    /// The gateway-assigned client id, once registered
    pub fn client_id(&self) -> Option<String> {
        self.client_id.read().clone()
    }

    /// Pending interest changes not yet delivered
    pub fn pending_changes(&self) -> usize {
        self.outbox.len()
    }

    /// Register the device token, then flush any queued interest changes.
    pub async fn register(&self, token: &str) -> Result<String> {
        let url = format!("{}/client_api/v1/clients", self.base_url);
        let body = RegisterRequest {
            app_key: &self.app_key,
            platform_type: self.platform,
            token,
        };

        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(PulseError::auth_response(format!(
                "push registration failed with status {}",
                response.status()
            )));
        }

        let registered: RegisterResponse = response
            .json()
            .await
            .map_err(|e| PulseError::auth_response(format!("unparseable registration body: {}", e)))?;

        info!("Registered for native push, client id {}", registered.id);
        *self.client_id.write() = Some(registered.id.clone());

        self.flush().await;
        Ok(registered.id)
    }

    /// Subscribe the device to an interest.
    ///
    /// Queued until registration completes; flushed immediately afterwards.
    pub async fn subscribe(&self, interest: impl Into<String>) {
        self.outbox.push(InterestChange::Subscribe(interest.into()));
        self.flush().await;
    }

    /// Unsubscribe the device from an interest.
    pub async fn unsubscribe(&self, interest: impl Into<String>) {
        self.outbox
            .push(InterestChange::Unsubscribe(interest.into()));
        self.flush().await;
    }

    /// Reset the failure counter and retry whatever is queued.
    pub async fn retry(&self) {
        self.outbox.reset_failures();
        self.flush().await;
    }

    /// Drain the outbox head-first while the gateway accepts requests.
    ///
    /// A failed item goes back to the head; past the failure ceiling the
    /// loop pauses until [`PushRegistration::retry`].
    async fn flush(&self) {
        let client_id = match self.client_id() {
            Some(id) => id,
            None => {
                debug!("Deferring interest flush until registered");
                return;
            }
        };

        while self.outbox.can_attempt() {
            let Some(change) = self.outbox.pop() else {
                return;
            };

            if let Err(e) = self.send_change(&client_id, &change).await {
                warn!(
                    "Interest change for '{}' failed ({}); requeueing",
                    change.interest(),
                    e
                );
                self.outbox.requeue_front(change);
            }
        }

        if !self.outbox.is_empty() {
            warn!(
                "Pausing interest flush after {} failed attempts",
                self.outbox.failure_count()
            );
        }
    }

    async fn send_change(&self, client_id: &str, change: &InterestChange) -> Result<()> {
        let url = format!(
            "{}/client_api/v1/clients/{}/interests/{}",
            self.base_url,
            client_id,
            change.interest()
        );
        let body = InterestRequest {
            app_key: &self.app_key,
        };

        let request = match change {
            InterestChange::Subscribe(_) => self.http.post(&url),
            InterestChange::Unsubscribe(_) => self.http.delete(&url),
        };

        let response = request.json(&body).send().await?;
        if !response.status().is_success() {
            return Err(PulseError::auth_response(format!(
                "gateway returned {}",
                response.status()
            )));
        }

        debug!("Delivered {:?}", change);
        Ok(())
    }
}

impl std::fmt::Debug for PushRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushRegistration")
            .field("base_url", &self.base_url)
            .field("platform", &self.platform)
            .field("client_id", &self.client_id())
            .field("pending", &self.pending_changes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_serialization() {
        assert_eq!(
            serde_json::to_string(&PlatformType::Apns).unwrap(),
            "\"apns\""
        );
        assert_eq!(serde_json::to_string(&PlatformType::Fcm).unwrap(), "\"gcm\"");
    }

    #[tokio::test]
    async fn test_changes_queue_until_registered() {
        let push = PushRegistration::new("http://localhost:9", "key", PlatformType::Apns);

        push.subscribe("news").await;
        push.unsubscribe("news").await;

        // Not registered yet, so nothing was sent and nothing was dropped
        assert!(push.client_id().is_none());
        assert_eq!(push.pending_changes(), 2);
    }
}
