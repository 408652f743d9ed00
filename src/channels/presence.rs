//! Presence channel surface: a channel plus its membership roster.

use serde_json::Value;
use std::sync::Arc;

use super::channel::{Channel, ChannelType};
use super::members::Member;
use crate::error::Result;
use crate::events::BindingId;
use crate::protocol::PulseEvent;

/// Handle to a presence channel.
///
/// Wraps the underlying [`Channel`] and exposes the roster. Obtained from
/// [`crate::PulseClient::subscribe_presence`] or
/// [`crate::channels::ChannelRegistry::find_presence`].
#[derive(Clone)]
pub struct PresenceChannel {
    inner: Arc<Channel>,
}

impl PresenceChannel {
    pub(crate) fn new(inner: Arc<Channel>) -> Self {
        debug_assert_eq!(inner.channel_type(), ChannelType::Presence);
        Self { inner }
    }

    /// Get channel name
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Check if subscribed
    pub fn is_subscribed(&self) -> bool {
        self.inner.is_subscribed()
    }

    /// All current members
    pub fn members(&self) -> Vec<Member> {
        self.inner.members().all()
    }

    /// The local user's member record, once known
    pub fn me(&self) -> Option<Member> {
        self.inner.members().me()
    }

    /// The local user's id, parsed from the auth response
    pub fn my_id(&self) -> Option<String> {
        self.inner.members().my_id()
    }

    /// Look up a member by id
    pub fn member(&self, user_id: &str) -> Option<Member> {
        self.inner.members().get(user_id)
    }

    /// Member count
    pub fn member_count(&self) -> usize {
        self.inner.members().count()
    }

    /// Bind a callback to an event
    pub fn bind(
        &self,
        event_name: impl Into<String>,
        callback: impl Fn(&PulseEvent) + Send + Sync + 'static,
    ) -> BindingId {
        self.inner.bind(event_name, callback)
    }

    /// Remove one binding by id
    pub fn unbind(&self, binding_id: BindingId) {
        self.inner.unbind(binding_id);
    }

    /// Unbind all callbacks
    pub fn unbind_all(&self) {
        self.inner.unbind_all();
    }

    /// Trigger a client event
    pub fn trigger(&self, event_name: &str, data: Value) -> Result<bool> {
        self.inner.trigger(event_name, data)
    }

    /// The underlying channel object
    pub fn as_channel(&self) -> Arc<Channel> {
        self.inner.clone()
    }
}

impl std::fmt::Debug for PresenceChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceChannel")
            .field("name", &self.name())
            .field("subscribed", &self.is_subscribed())
            .field("member_count", &self.member_count())
            .finish()
    }
}
