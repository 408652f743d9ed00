//! Channel model: bindings, subscription state, client-event buffering.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::members::{Member, Members};
use crate::error::{PulseError, Result};
use crate::events::{BindingId, EventDispatcher};
use crate::protocol::{MemberData, PulseEvent};

/// Channel kind, derived once from the name prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelType {
    /// Public channel - no authentication required
    Public,
    /// Private channel - requires authentication
    Private,
    /// Presence channel - private with member tracking
    Presence,
}

impl ChannelType {
    /// Determine channel type from name
    pub fn from_name(name: &str) -> Self {
        if name.starts_with("private-") {
            Self::Private
        } else if name.starts_with("presence-") {
            Self::Presence
        } else {
            Self::Public
        }
    }

    /// Check if this channel type requires authentication
    pub fn requires_auth(&self) -> bool {
        matches!(self, Self::Private | Self::Presence)
    }

    /// Check if this channel type accepts client events
    pub fn supports_client_events(&self) -> bool {
        matches!(self, Self::Private | Self::Presence)
    }
}

/// Channel subscription state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Subscribed,
}

/// Callback that serializes and writes an event to the socket.
///
/// Arguments: event name, data payload, optional channel. Returns whether the
/// write was handed to the connection.
pub type SendEventFn = Arc<dyn Fn(&str, &Value, Option<&str>) -> bool + Send + Sync>;

/// Observer invoked when a presence member joins or leaves
pub type MemberHook = Arc<dyn Fn(&Member) + Send + Sync>;

/// A named channel within a client.
///
/// Created by the registry on first subscribe and reused for the lifetime of
/// the client (or until an explicit unsubscribe). The `subscribed` flag only
/// turns true on receipt of `subscription_succeeded` and falls back to false
/// on any disconnect.
pub struct Channel {
    name: String,
    kind: ChannelType,
    state: RwLock<SubscriptionState>,
    dispatcher: EventDispatcher,
    /// Client events triggered before the subscription was confirmed
    unsent_events: Mutex<Vec<(String, Value)>>,
    send_event: Option<SendEventFn>,
    /// Roster; only populated for the presence kind
    members: Members,
    member_added: RwLock<Option<MemberHook>>,
    member_removed: RwLock<Option<MemberHook>>,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let kind = ChannelType::from_name(&name);

        Self {
            name: name.clone(),
            kind,
            state: RwLock::new(SubscriptionState::Unsubscribed),
            dispatcher: EventDispatcher::with_fail_through(move |event, _| {
                debug!("No callbacks on {} for {}", name, event);
            }),
            unsent_events: Mutex::new(Vec::new()),
            send_event: None,
            members: Members::new(),
            member_added: RwLock::new(None),
            member_removed: RwLock::new(None),
        }
    }

    /// Set the send event callback
    pub(crate) fn set_send_callback(&mut self, callback: SendEventFn) {
        self.send_event = Some(callback);
    }

    /// Install presence member observers
    pub(crate) fn set_member_hooks(
        &self,
        on_added: Option<MemberHook>,
        on_removed: Option<MemberHook>,
    ) {
        *self.member_added.write() = on_added;
        *self.member_removed.write() = on_removed;
    }

    /// Get channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get channel type
    pub fn channel_type(&self) -> ChannelType {
        self.kind
    }

    /// Check if the subscription has been confirmed by the server
    pub fn is_subscribed(&self) -> bool {
        *self.state.read() == SubscriptionState::Subscribed
    }

    /// Check if a subscribe is in flight
    pub fn is_subscription_pending(&self) -> bool {
        *self.state.read() == SubscriptionState::Subscribing
    }

    /// The presence roster. Empty for public/private channels.
    pub fn members(&self) -> &Members {
        &self.members
    }

    /// Bind a callback to an event
    pub fn bind(
        &self,
        event_name: impl Into<String>,
        callback: impl Fn(&PulseEvent) + Send + Sync + 'static,
    ) -> BindingId {
        self.dispatcher.bind(event_name, callback)
    }

    /// Remove one binding by id
    pub fn unbind(&self, binding_id: BindingId) {
        self.dispatcher.unbind(binding_id);
    }

    /// Unbind all callbacks
    pub fn unbind_all(&self) {
        self.dispatcher.unbind_all();
    }

    /// Move into the subscribing state.
    ///
    /// Returns false if a subscribe is already in flight or confirmed, so
    /// concurrent resubscription sweeps do not double-send.
    pub(crate) fn mark_subscribing(&self) -> bool {
        let mut state = self.state.write();
        if *state != SubscriptionState::Unsubscribed {
            return false;
        }
        *state = SubscriptionState::Subscribing;
        true
    }

    /// Roll an in-flight subscribe back (auth failure)
    pub(crate) fn mark_unsubscribed(&self) {
        *self.state.write() = SubscriptionState::Unsubscribed;
    }

    /// Send the unsubscribe control event and clear local state
    pub(crate) fn unsubscribe(&self) {
        if !self.is_subscribed() && !self.is_subscription_pending() {
            return;
        }

        *self.state.write() = SubscriptionState::Unsubscribed;

        if let Some(ref send) = self.send_event {
            send(
                "pusher:unsubscribe",
                &serde_json::json!({ "channel": self.name }),
                None,
            );
        }
    }

    /// Handle a connection loss: the subscription is no longer valid
    pub(crate) fn disconnected(&self) {
        *self.state.write() = SubscriptionState::Unsubscribed;
        if self.kind == ChannelType::Presence {
            self.members.reset();
        }
    }

    /// Trigger a client event on this channel.
    ///
    /// Only private and presence channels accept client events, and only once
    /// subscribed; events triggered earlier are buffered and flushed after
    /// `subscription_succeeded`. Returns `Ok(true)` when written to the
    /// socket, `Ok(false)` when buffered.
    pub fn trigger(&self, event_name: &str, data: Value) -> Result<bool> {
        if !self.kind.supports_client_events() {
            warn!(
                "Dropping client event '{}': channel '{}' is not private or presence",
                event_name, self.name
            );
            return Err(PulseError::invalid_client_event(format!(
                "channel '{}' does not accept client events",
                self.name
            )));
        }

        if !event_name.starts_with("client-") {
            warn!("Dropping event '{}': missing 'client-' prefix", event_name);
            return Err(PulseError::invalid_client_event(format!(
                "client events must start with 'client-', got: {}",
                event_name
            )));
        }

        if !self.is_subscribed() {
            debug!(
                "Buffering client event '{}' on '{}' until subscribed",
                event_name, self.name
            );
            self.unsent_events
                .lock()
                .push((event_name.to_string(), data));
            return Ok(false);
        }

        Ok(self.send_client_event(event_name, &data))
    }

    fn send_client_event(&self, event_name: &str, data: &Value) -> bool {
        match self.send_event {
            Some(ref send) => send(event_name, data, Some(&self.name)),
            None => false,
        }
    }

    /// Handle an incoming event routed to this channel
    pub(crate) fn handle_event(&self, event: &PulseEvent) {
        match event.event.as_str() {
            "pusher_internal:subscription_succeeded" => {
                self.handle_subscription_succeeded(event);
            }
            "pusher_internal:member_added" => {
                self.handle_member_added(event);
            }
            "pusher_internal:member_removed" => {
                self.handle_member_removed(event);
            }
            name if name.starts_with("pusher_internal:") => {
                debug!("Ignoring internal event {} on {}", name, self.name);
            }
            _ => {
                self.dispatcher.emit(event);
            }
        }
    }

    fn handle_subscription_succeeded(&self, event: &PulseEvent) {
        *self.state.write() = SubscriptionState::Subscribed;

        if self.kind == ChannelType::Presence {
            if let Some(data) = event.data_as_value() {
                self.members.on_subscription(&data);
            }
        }

        let mut success_event = event.clone();
        success_event.event = "pusher:subscription_succeeded".to_string();
        success_event.channel = Some(self.name.clone());
        self.dispatcher.emit(&success_event);

        self.flush_unsent_events();
    }

    /// Flush events buffered before the subscription was confirmed.
    ///
    /// Drains tail-first, so buffered events go out in reverse trigger order.
    fn flush_unsent_events(&self) {
        let mut pending = std::mem::take(&mut *self.unsent_events.lock());
        while let Some((event_name, data)) = pending.pop() {
            self.send_client_event(&event_name, &data);
        }
    }

    fn handle_member_added(&self, event: &PulseEvent) {
        let member = match event.parse_data::<MemberData>() {
            Ok(data) => Member {
                user_id: data.user_id,
                user_info: data.user_info,
            },
            Err(e) => {
                warn!("Undecodable member_added on {}: {}", self.name, e);
                return;
            }
        };

        if let Some(member) = self.members.add(member) {
            if let Some(ref hook) = *self.member_added.read() {
                hook(&member);
            }

            let mut added_event = PulseEvent::new("pusher:member_added");
            added_event.channel = Some(self.name.clone());
            added_event.data = serde_json::to_value(&member).ok();
            self.dispatcher.emit(&added_event);
        }
    }

    fn handle_member_removed(&self, event: &PulseEvent) {
        let user_id = match event.parse_data::<MemberData>() {
            Ok(data) => data.user_id,
            Err(e) => {
                warn!("Undecodable member_removed on {}: {}", self.name, e);
                return;
            }
        };

        if let Some(member) = self.members.remove(&user_id) {
            if let Some(ref hook) = *self.member_removed.read() {
                hook(&member);
            }

            let mut removed_event = PulseEvent::new("pusher:member_removed");
            removed_event.channel = Some(self.name.clone());
            removed_event.data = serde_json::to_value(&member).ok();
            self.dispatcher.emit(&removed_event);
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("type", &self.kind)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn subscription_succeeded(channel: &str) -> PulseEvent {
        PulseEvent::new("pusher_internal:subscription_succeeded").with_channel(channel)
    }

    fn recording_send() -> (SendEventFn, Arc<PlMutex<Vec<(String, Value)>>>) {
        let sent = Arc::new(PlMutex::new(Vec::new()));
        let sent_clone = sent.clone();
        let send: SendEventFn = Arc::new(move |event, data, _channel| {
            sent_clone.lock().push((event.to_string(), data.clone()));
            true
        });
        (send, sent)
    }

    #[test]
    fn test_channel_type_from_name() {
        assert_eq!(ChannelType::from_name("test"), ChannelType::Public);
        assert_eq!(ChannelType::from_name("private-test"), ChannelType::Private);
        assert_eq!(
            ChannelType::from_name("presence-test"),
            ChannelType::Presence
        );
    }

    #[test]
    fn test_channel_bind_and_emit() {
        let channel = Channel::new("test-channel");
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        channel.bind("test-event", move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        channel.handle_event(&PulseEvent::new("test-event"));

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_succeeded_sets_flag() {
        let channel = Channel::new("chat");
        assert!(!channel.is_subscribed());

        channel.handle_event(&subscription_succeeded("chat"));
        assert!(channel.is_subscribed());

        channel.disconnected();
        assert!(!channel.is_subscribed());
    }

    #[test]
    fn test_client_event_rejected_on_public_channel() {
        let channel = Channel::new("news");
        let result = channel.trigger("client-foo", serde_json::json!({}));
        assert!(matches!(
            result,
            Err(PulseError::InvalidClientEvent { .. })
        ));
    }

    #[test]
    fn test_client_event_requires_prefix() {
        let channel = Channel::new("private-x");
        assert!(channel.trigger("foo", serde_json::json!({})).is_err());
    }

    #[test]
    fn test_client_event_buffered_until_subscribed() {
        let (send, sent) = recording_send();
        let mut channel = Channel::new("private-x");
        channel.set_send_callback(send);

        assert_eq!(
            channel.trigger("client-a", serde_json::json!(1)).unwrap(),
            false
        );
        assert_eq!(
            channel.trigger("client-b", serde_json::json!(2)).unwrap(),
            false
        );
        assert!(sent.lock().is_empty());

        channel.handle_event(&subscription_succeeded("private-x"));

        // Buffered events drain tail-first
        let names: Vec<String> = sent.lock().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, vec!["client-b", "client-a"]);

        assert_eq!(
            channel.trigger("client-c", serde_json::json!(3)).unwrap(),
            true
        );
        assert_eq!(sent.lock().len(), 3);
    }

    #[test]
    fn test_presence_roster_lifecycle() {
        let channel = Channel::new("presence-room");
        let added = Arc::new(PlMutex::new(Vec::new()));
        let removed = Arc::new(PlMutex::new(Vec::new()));
        let added_clone = added.clone();
        let removed_clone = removed.clone();

        channel.set_member_hooks(
            Some(Arc::new(move |m: &Member| {
                added_clone.lock().push(m.user_id.clone())
            })),
            Some(Arc::new(move |m: &Member| {
                removed_clone.lock().push(m.user_id.clone())
            })),
        );

        let success = subscription_succeeded("presence-room").with_json_data(serde_json::json!({
            "presence": {"hash": {"u1": {"n": "a"}, "u2": {"n": "b"}}}
        }));
        channel.handle_event(&success);
        assert_eq!(channel.members().count(), 2);

        channel.handle_event(
            &PulseEvent::new("pusher_internal:member_added")
                .with_channel("presence-room")
                .with_json_data(serde_json::json!({"user_id": "u3"})),
        );
        assert_eq!(added.lock().as_slice(), &["u3".to_string()]);

        channel.handle_event(
            &PulseEvent::new("pusher_internal:member_removed")
                .with_channel("presence-room")
                .with_json_data(serde_json::json!({"user_id": "u1"})),
        );
        assert_eq!(removed.lock().as_slice(), &["u1".to_string()]);

        assert!(channel.members().get("u1").is_none());
        assert!(channel.members().get("u2").is_some());
        assert!(channel.members().get("u3").is_some());
    }

    #[test]
    fn test_no_channel_events_before_subscription_succeeded() {
        let channel = Channel::new("presence-room");

        // member_added before the roster snapshot still mutates the roster,
        // but ordinary events reach bindings in arrival order
        let order = Arc::new(PlMutex::new(Vec::new()));
        let order_clone = order.clone();
        channel.bind("pusher:subscription_succeeded", move |_| {
            order_clone.lock().push("subscribed");
        });
        let order_clone = order.clone();
        channel.bind("update", move |_| {
            order_clone.lock().push("update");
        });

        channel.handle_event(&subscription_succeeded("presence-room"));
        channel.handle_event(&PulseEvent::new("update").with_channel("presence-room"));

        assert_eq!(order.lock().as_slice(), &["subscribed", "update"]);
    }
}
