//! Top-level client façade.

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::auth::{AuthStrategy, Authenticator};
use crate::channels::{Channel, ChannelRegistry, ChannelType, MemberHook, PresenceChannel};
use crate::connection::{Connection, ConnectionState, StateChangeFn};
use crate::error::{PulseError, Result};
use crate::events::{BindingId, EventDispatcher};
use crate::options::{Config, PulseOptions};
use crate::protocol::{Protocol, PulseEvent};
use crate::reachability::{AlwaysReachable, Reachability};

/// Handler invoked when a subscription is confirmed, with the channel name.
pub type SubscriptionSuccessFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Handler invoked when a subscription fails: channel name, HTTP status and
/// body when the auth endpoint answered, and the underlying error.
pub type SubscriptionErrorFn =
    Arc<dyn Fn(&str, Option<u16>, Option<&str>, &PulseError) + Send + Sync>;

type HandlerSlot<T> = Arc<RwLock<Option<T>>>;

/// The main pulsewire client.
///
/// Subscribes the process to named channels on a Pusher-protocol-compatible
/// service, dispatches inbound events to bound callbacks, and keeps the
/// connection alive across network interruptions.
///
/// # Example
///
/// ```ignore
/// use pulsewire::{PulseClient, PulseOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let options = PulseOptions::new()
///         .host("localhost")
///         .port(6001)
///         .encrypted(false)
///         .auth_endpoint("http://localhost:3000/auth");
///
///     let client = PulseClient::new("app-key", options)?;
///     client.connect().await?;
///
///     let channel = client.subscribe("orders")?;
///     channel.bind("created", |event| {
///         println!("order created: {:?}", event.data);
///     });
///
///     Ok(())
/// }
/// ```
pub struct PulseClient {
    key: String,
    config: Arc<Config>,
    channels: Arc<ChannelRegistry>,
    /// The global channel: bindings that fire regardless of channel
    global: EventDispatcher,
    connection: Arc<Connection>,
    router: Arc<Router>,
    /// Random per-instance id, for diagnostics
    session_id: u32,
}

impl PulseClient {
    /// Create a client with the default reachability monitor.
    pub fn new(app_key: impl Into<String>, options: PulseOptions) -> Result<Self> {
        Self::with_reachability(app_key, options, Arc::new(AlwaysReachable::new()))
    }

    /// Create a client with a host-provided reachability monitor.
    pub fn with_reachability(
        app_key: impl Into<String>,
        options: PulseOptions,
        reachability: Arc<dyn Reachability>,
    ) -> Result<Self> {
        let app_key = app_key.into();
        if app_key.is_empty() {
            return Err(PulseError::config("App key is required"));
        }

        if let AuthStrategy::Endpoint { ref url, .. } = options.auth {
            url::Url::parse(url)?;
        }

        let config = Arc::new(Config::new(app_key.as_str(), &options));
        let session_id = rand::random::<u32>();

        info!(
            "Creating pulsewire client for app '{}' (session: {})",
            app_key, session_id
        );

        let connection = Connection::new((*config).clone(), reachability);

        // Channels write to the socket through the connection
        let mut registry = ChannelRegistry::new();
        let connection_for_send = Arc::downgrade(&connection);
        registry.set_send_callback(Arc::new(move |event_name, data, channel| {
            match connection_for_send.upgrade() {
                Some(conn) => conn.send_event(event_name, data, channel),
                None => false,
            }
        }));
        let channels = Arc::new(registry);

        let authenticator = Arc::new(Authenticator::new(
            app_key.as_str(),
            options.auth.clone(),
            options.user_data.clone(),
        ));

        let router = Arc::new(Router {
            channels: channels.clone(),
            global: EventDispatcher::new(),
            connection: Arc::downgrade(&connection),
            authenticator,
            attempt_json: config.attempt_to_return_json_object,
            on_success: Arc::new(RwLock::new(None)),
            on_error: Arc::new(RwLock::new(None)),
        });

        let router_for_events = router.clone();
        connection.bind_all(move |event| {
            router_for_events.route(event);
        });

        Ok(Self {
            key: app_key,
            config,
            channels,
            global: router.global.clone(),
            connection,
            router,
            session_id,
        })
    }

    /// Get the application key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the session id
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Get the socket id assigned by the server
    pub fn socket_id(&self) -> Option<String> {
        self.connection.socket_id()
    }

    /// Check if the client is connected
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Observe `(old, new)` connection state transitions
    pub fn on_state_change(
        &self,
        observer: impl Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    ) {
        let observer: StateChangeFn = Arc::new(observer);
        self.connection.set_state_observer(Some(observer));
    }

    /// Set the subscription success handler
    pub fn on_subscription_success(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        *self.router.on_success.write() = Some(Arc::new(handler));
    }

    /// Set the subscription error handler
    pub fn on_subscription_error(
        &self,
        handler: impl Fn(&str, Option<u16>, Option<&str>, &PulseError) + Send + Sync + 'static,
    ) {
        *self.router.on_error.write() = Some(Arc::new(handler));
    }

    /// Connect to the service
    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    /// Disconnect from the service.
    ///
    /// Channels stay registered with their bindings; a later `connect()`
    /// resubscribes them.
    pub async fn disconnect(&self) {
        info!("Disconnecting");
        self.connection.disconnect().await;
        self.channels.disconnect_all();
    }

    /// Wait until connected, up to a timeout
    pub async fn wait_for_connection(&self, timeout_secs: u64) -> Result<()> {
        let wait = tokio::time::timeout(Duration::from_secs(timeout_secs), async {
            while !self.is_connected() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        wait.map_err(|_| {
            PulseError::connection(format!(
                "failed to connect within {} seconds",
                timeout_secs
            ))
        })
    }

    /// Subscribe to a channel.
    ///
    /// Returns the channel object immediately; the subscribe control event is
    /// sent (after authorization, when required) as soon as a socket id is
    /// known, now or on the next `connection_established`.
    pub fn subscribe(&self, channel_name: &str) -> Result<Arc<Channel>> {
        if channel_name.starts_with('#') {
            return Err(PulseError::invalid_channel(format!(
                "channel names cannot start with '#': {}",
                channel_name
            )));
        }

        let channel = self.channels.add(channel_name);
        self.router.subscribe_channel(channel.clone());

        debug!("Subscribed to channel: {}", channel_name);
        Ok(channel)
    }

    /// Subscribe to a presence channel with optional member observers.
    pub fn subscribe_presence(
        &self,
        channel_name: &str,
        on_member_added: Option<MemberHook>,
        on_member_removed: Option<MemberHook>,
    ) -> Result<PresenceChannel> {
        let presence =
            self.channels
                .add_presence(channel_name, on_member_added, on_member_removed)?;
        self.router.subscribe_channel(presence.as_channel());

        debug!("Subscribed to presence channel: {}", channel_name);
        Ok(presence)
    }

    /// Unsubscribe from a channel, dropping its bindings.
    pub fn unsubscribe(&self, channel_name: &str) {
        if let Some(channel) = self.channels.find(channel_name) {
            channel.unsubscribe();
        }
        self.channels.remove(channel_name);
        debug!("Unsubscribed from channel: {}", channel_name);
    }

    /// Get a channel by name
    pub fn channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.find(name)
    }

    /// Get a presence channel by name
    pub fn presence_channel(&self, name: &str) -> Option<PresenceChannel> {
        self.channels.find_presence(name)
    }

    /// Get all registered channels
    pub fn all_channels(&self) -> Vec<Arc<Channel>> {
        self.channels.all()
    }

    /// Bind a callback to a named event on the global channel
    pub fn bind(
        &self,
        event_name: impl Into<String>,
        callback: impl Fn(&PulseEvent) + Send + Sync + 'static,
    ) -> BindingId {
        self.global.bind(event_name, callback)
    }

    /// Bind a callback to every event on the global channel
    pub fn bind_global(
        &self,
        callback: impl Fn(&PulseEvent) + Send + Sync + 'static,
    ) -> BindingId {
        self.global.bind_all(callback)
    }

    /// Unbind a global-channel binding by id
    pub fn unbind(&self, binding_id: BindingId) {
        self.global.unbind(binding_id);
    }

    /// Unbind all global-channel bindings
    pub fn unbind_all(&self) {
        self.global.unbind_all();
    }

    /// Trigger a client event on a subscribed private or presence channel.
    pub fn trigger(&self, channel_name: &str, event_name: &str, data: Value) -> Result<bool> {
        let channel = self.channels.find(channel_name).ok_or_else(|| {
            PulseError::invalid_client_event(format!("unknown channel '{}'", channel_name))
        })?;
        channel.trigger(event_name, data)
    }

    #[cfg(test)]
    pub(crate) fn route_for_test(&self, event: &PulseEvent) {
        self.router.route(event);
    }
}

impl std::fmt::Debug for PulseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseClient")
            .field("key", &self.key)
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .field("socket_id", &self.socket_id())
            .field("channel_count", &self.channels.len())
            .finish()
    }
}

/// Routes connection events to channels and the global channel, and runs the
/// authorize-then-subscribe sequence.
///
/// Holds only a weak reference back to the connection so the dispatcher
/// binding does not create an ownership cycle.
struct Router {
    channels: Arc<ChannelRegistry>,
    global: EventDispatcher,
    connection: Weak<Connection>,
    authenticator: Arc<Authenticator>,
    attempt_json: bool,
    on_success: HandlerSlot<SubscriptionSuccessFn>,
    on_error: HandlerSlot<SubscriptionErrorFn>,
}

impl Router {
    /// Dispatch one connection event.
    ///
    /// Internal events are handled structurally; everything else goes to
    /// global bindings first, then to the named channel's bindings.
    fn route(&self, event: &PulseEvent) {
        match event.event.as_str() {
            // Lifecycle events synthesized by the connection
            "connected" => {
                self.resubscribe_all();
            }
            "disconnected" => {
                self.channels.disconnect_all();
            }

            "pusher_internal:subscription_succeeded" => {
                let event = event.clone().into_dispatchable(self.attempt_json);
                let channel_name = event.channel.clone();

                let known = channel_name
                    .as_deref()
                    .and_then(|name| self.channels.find(name));
                if let Some(ref channel) = known {
                    channel.handle_event(&event);
                } else {
                    warn!(
                        "subscription_succeeded for unknown channel {:?}",
                        channel_name
                    );
                }

                let mut public = event;
                public.event = "pusher:subscription_succeeded".to_string();
                self.global.emit(&public);

                if known.is_some() {
                    if let (Some(name), Some(handler)) =
                        (channel_name.as_deref(), self.on_success.read().clone())
                    {
                        handler(name);
                    }
                }
            }

            "pusher_internal:member_added" | "pusher_internal:member_removed" => {
                match event.channel.as_deref().and_then(|n| self.channels.find(n)) {
                    Some(channel) => channel.handle_event(event),
                    None => warn!("{} for unknown channel {:?}", event.event, event.channel),
                }
            }

            _ => {
                let event = event.clone().into_dispatchable(self.attempt_json);
                self.global.emit(&event);

                if let Some(channel) = event.channel.as_deref().and_then(|n| self.channels.find(n))
                {
                    channel.handle_event(&event);
                }
            }
        }
    }

    /// Re-initiate authorization + subscribe for every channel that is not
    /// currently subscribed. Runs on each `connection_established`.
    fn resubscribe_all(&self) {
        let all = self.channels.all();
        info!("Connected; subscribing {} channels", all.len());
        for channel in all {
            self.subscribe_channel(channel);
        }
    }

    /// Authorize (when required) and send the subscribe control event.
    ///
    /// A no-op without a socket id; the `connected` sweep picks the channel
    /// up once the handshake lands.
    fn subscribe_channel(&self, channel: Arc<Channel>) {
        let Some(connection) = self.connection.upgrade() else {
            return;
        };
        let Some(socket_id) = connection.socket_id() else {
            return;
        };
        if !channel.mark_subscribing() {
            return;
        }

        let authenticator = self.authenticator.clone();
        let global = self.global.clone();
        let on_error = self.on_error.clone();
        let connection = Arc::downgrade(&connection);

        tokio::spawn(async move {
            let result = authenticator
                .authorize(channel.name(), channel.channel_type(), &socket_id)
                .await;

            match result {
                Ok(auth) => {
                    let (auth_token, channel_data) = match auth {
                        Some(auth) => {
                            if channel.channel_type() == ChannelType::Presence {
                                if let Some(ref data) = auth.channel_data {
                                    set_my_id_from_channel_data(&channel, data);
                                }
                            }
                            (Some(auth.auth), auth.channel_data)
                        }
                        None => (None, None),
                    };

                    let subscribe =
                        Protocol::create_subscribe_event(channel.name(), auth_token, channel_data);
                    let sent = match (connection.upgrade(), Protocol::encode_message(&subscribe)) {
                        (Some(conn), Ok(msg)) => conn.send(&msg),
                        _ => false,
                    };

                    if !sent {
                        warn!("Could not send subscribe for '{}'", channel.name());
                        channel.mark_unsubscribed();
                    }
                }
                Err(failure) => {
                    warn!(
                        "Authorization failed for '{}': {}",
                        channel.name(),
                        failure.error
                    );
                    channel.mark_unsubscribed();

                    let mut error_event =
                        PulseEvent::new("pusher:subscription_error").with_channel(channel.name());
                    error_event.data = Some(serde_json::json!({
                        "status": failure.status,
                        "body": failure.body,
                        "message": failure.error.to_string(),
                    }));
                    global.emit(&error_event);
                    channel.handle_event(&error_event);

                    if let Some(handler) = on_error.read().clone() {
                        handler(
                            channel.name(),
                            failure.status,
                            failure.body.as_deref(),
                            &failure.error,
                        );
                    }
                }
            }
        });
    }
}

/// Pull the local user's id out of the auth response's channel_data.
fn set_my_id_from_channel_data(channel: &Channel, channel_data: &str) {
    if let Ok(value) = serde_json::from_str::<Value>(channel_data) {
        if let Some(user_id) = value.get("user_id").and_then(|v| v.as_str()) {
            channel.members().set_my_id(user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_client() -> PulseClient {
        PulseClient::new("test-key", PulseOptions::new()).unwrap()
    }

    fn subscription_succeeded(channel: &str) -> PulseEvent {
        PulseEvent::new("pusher_internal:subscription_succeeded").with_channel(channel)
    }

    #[test]
    fn test_client_requires_key() {
        assert!(PulseClient::new("", PulseOptions::new()).is_err());
    }

    #[test]
    fn test_client_creation() {
        let client = test_client();
        assert_eq!(client.key(), "test-key");
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.socket_id().is_none());
    }

    #[test]
    fn test_subscribe_registers_channel() {
        let client = test_client();

        let channel = client.subscribe("chat").unwrap();
        assert_eq!(channel.name(), "chat");
        assert_eq!(channel.channel_type(), ChannelType::Public);
        assert!(!channel.is_subscribed());

        // Idempotent: same object, registry size stays 1
        let again = client.subscribe("chat").unwrap();
        assert!(Arc::ptr_eq(&channel, &again));
        assert_eq!(client.all_channels().len(), 1);
    }

    #[test]
    fn test_invalid_channel_name() {
        let client = test_client();
        assert!(client.subscribe("#invalid").is_err());
    }

    #[test]
    fn test_unsubscribe_removes_channel() {
        let client = test_client();

        client.subscribe("temp").unwrap();
        assert!(client.channel("temp").is_some());

        client.unsubscribe("temp");
        assert!(client.channel("temp").is_none());
        assert_eq!(client.all_channels().len(), 0);
    }

    #[test]
    fn test_subscription_succeeded_marks_channel_and_fires_global() {
        let client = test_client();
        let channel = client.subscribe("chat").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        client.bind("pusher:subscription_succeeded", move |event| {
            seen_clone.lock().push(event.channel.clone());
        });

        client.route_for_test(&subscription_succeeded("chat"));

        assert!(channel.is_subscribed());
        assert_eq!(seen.lock().as_slice(), &[Some("chat".to_string())]);
    }

    #[test]
    fn test_success_handler_receives_channel_name() {
        let client = test_client();
        client.subscribe("chat").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        client.on_subscription_success(move |name| {
            seen_clone.lock().push(name.to_string());
        });

        client.route_for_test(&subscription_succeeded("chat"));

        assert_eq!(seen.lock().as_slice(), &["chat".to_string()]);
    }

    #[test]
    fn test_event_routing_global_then_channel() {
        let client = test_client();
        let channel = client.subscribe("chat").unwrap();
        client.route_for_test(&subscription_succeeded("chat"));

        let order = Arc::new(Mutex::new(Vec::new()));
        let order_clone = order.clone();
        client.bind("message", move |_| order_clone.lock().push("global"));
        let order_clone = order.clone();
        channel.bind("message", move |_| order_clone.lock().push("channel"));

        client.route_for_test(
            &PulseEvent::new("message")
                .with_channel("chat")
                .with_json_data(serde_json::json!("hi")),
        );

        assert_eq!(order.lock().as_slice(), &["global", "channel"]);
    }

    #[test]
    fn test_payload_decoding_follows_option() {
        let decoded = Arc::new(Mutex::new(Vec::new()));

        // attempt_to_return_json_object = true: string payloads are re-decoded
        let client = test_client();
        let decoded_clone = decoded.clone();
        client.bind("update", move |event| {
            decoded_clone.lock().push(event.data.clone());
        });
        client.route_for_test(&PulseEvent {
            event: "update".to_string(),
            channel: Some("chat".to_string()),
            data: Some(Value::String("{\"x\":1}".to_string())),
            user_id: None,
        });
        assert_eq!(decoded.lock()[0], Some(serde_json::json!({"x": 1})));

        // attempt_to_return_json_object = false: raw string is preserved
        let raw_client = PulseClient::new(
            "test-key",
            PulseOptions::new().attempt_to_return_json_object(false),
        )
        .unwrap();
        let decoded_clone = decoded.clone();
        raw_client.bind("update", move |event| {
            decoded_clone.lock().push(event.data.clone());
        });
        raw_client.route_for_test(&PulseEvent {
            event: "update".to_string(),
            channel: Some("chat".to_string()),
            data: Some(Value::String("{\"x\":1}".to_string())),
            user_id: None,
        });
        assert_eq!(
            decoded.lock()[1],
            Some(Value::String("{\"x\":1}".to_string()))
        );
    }

    #[test]
    fn test_disconnected_resets_subscribed_flags() {
        let client = test_client();
        let channel = client.subscribe("chat").unwrap();

        client.route_for_test(&subscription_succeeded("chat"));
        assert!(channel.is_subscribed());

        client.route_for_test(&PulseEvent::new("disconnected"));
        assert!(!channel.is_subscribed());
        // The channel itself survives for resubscription
        assert!(client.channel("chat").is_some());
    }

    #[test]
    fn test_trigger_requires_known_restricted_channel() {
        let client = test_client();

        assert!(client
            .trigger("nope", "client-foo", serde_json::json!({}))
            .is_err());

        client.subscribe("news").unwrap();
        let result = client.trigger("news", "client-foo", serde_json::json!({}));
        assert!(matches!(
            result,
            Err(PulseError::InvalidClientEvent { .. })
        ));
    }

    #[test]
    fn test_presence_member_events_fire_observers() {
        let client = test_client();

        let added = Arc::new(Mutex::new(Vec::new()));
        let removed = Arc::new(Mutex::new(Vec::new()));
        let added_clone = added.clone();
        let removed_clone = removed.clone();

        let presence = client
            .subscribe_presence(
                "presence-room",
                Some(Arc::new(move |m: &crate::channels::Member| {
                    added_clone.lock().push(m.user_id.clone())
                })),
                Some(Arc::new(move |m: &crate::channels::Member| {
                    removed_clone.lock().push(m.user_id.clone())
                })),
            )
            .unwrap();

        client.route_for_test(&subscription_succeeded("presence-room").with_json_data(
            serde_json::json!({
                "presence": {"hash": {"u1": {"n": "a"}, "u2": {"n": "b"}}}
            }),
        ));
        assert_eq!(presence.member_count(), 2);

        client.route_for_test(
            &PulseEvent::new("pusher_internal:member_added")
                .with_channel("presence-room")
                .with_json_data(serde_json::json!({"user_id": "u3"})),
        );
        client.route_for_test(
            &PulseEvent::new("pusher_internal:member_removed")
                .with_channel("presence-room")
                .with_json_data(serde_json::json!({"user_id": "u1"})),
        );

        assert_eq!(added.lock().as_slice(), &["u3".to_string()]);
        assert_eq!(removed.lock().as_slice(), &["u1".to_string()]);
        assert_eq!(presence.member_count(), 2);
        assert!(presence.member("u2").is_some());
        assert!(presence.member("u3").is_some());
    }

    #[test]
    fn test_unbind_by_id() {
        let client = test_client();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let id = client.bind("ping", move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        client.route_for_test(&PulseEvent::new("ping"));
        client.unbind(id);
        client.route_for_test(&PulseEvent::new("ping"));

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
