//! Channel registry: one channel object per name.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use super::channel::{Channel, ChannelType, MemberHook, SendEventFn};
use super::presence::PresenceChannel;
use crate::error::{PulseError, Result};

/// Maps channel names to channel objects.
///
/// Creation is idempotent: subscribing twice to the same name yields the same
/// channel object with its bindings intact.
pub struct ChannelRegistry {
    channels: DashMap<String, Arc<Channel>>,
    send_event: Option<SendEventFn>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            send_event: None,
        }
    }

    /// Set the send callback wired into every channel created afterwards
    pub(crate) fn set_send_callback(&mut self, callback: SendEventFn) {
        self.send_event = Some(callback);
    }

    /// Add or get a channel by name
    pub fn add(&self, name: &str) -> Arc<Channel> {
        if let Some(existing) = self.channels.get(name) {
            return existing.clone();
        }

        let mut channel = Channel::new(name);
        if let Some(ref cb) = self.send_event {
            channel.set_send_callback(cb.clone());
        }

        let channel = Arc::new(channel);
        self.channels.insert(name.to_string(), channel.clone());
        debug!("Created channel: {}", name);

        channel
    }

    /// Add or get a presence channel, installing the member observers
    pub fn add_presence(
        &self,
        name: &str,
        on_member_added: Option<MemberHook>,
        on_member_removed: Option<MemberHook>,
    ) -> Result<PresenceChannel> {
        if ChannelType::from_name(name) != ChannelType::Presence {
            return Err(PulseError::invalid_channel(format!(
                "channel name must start with 'presence-': {}",
                name
            )));
        }

        let channel = self.add(name);
        channel.set_member_hooks(on_member_added, on_member_removed);
        Ok(PresenceChannel::new(channel))
    }

    /// Find a channel by name
    pub fn find(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.get(name).map(|entry| entry.clone())
    }

    /// Find a presence channel by name
    pub fn find_presence(&self, name: &str) -> Option<PresenceChannel> {
        self.find(name)
            .filter(|ch| ch.channel_type() == ChannelType::Presence)
            .map(PresenceChannel::new)
    }

    /// Remove a channel, dropping its bindings with it
    pub fn remove(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.remove(name).map(|(_, channel)| {
            debug!("Removed channel: {}", name);
            channel
        })
    }

    /// Get all channels
    pub fn all(&self) -> Vec<Arc<Channel>> {
        self.channels.iter().map(|entry| entry.clone()).collect()
    }

    /// Get channel count
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Mark every channel unsubscribed after a connection loss
    pub fn disconnect_all(&self) {
        for entry in self.channels.iter() {
            entry.disconnected();
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent() {
        let registry = ChannelRegistry::new();

        let first = registry.add("test-channel");
        let second = registry.add("test-channel");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_channel_type_creation() {
        let registry = ChannelRegistry::new();

        assert_eq!(
            registry.add("my-channel").channel_type(),
            ChannelType::Public
        );
        assert_eq!(
            registry.add("private-channel").channel_type(),
            ChannelType::Private
        );
    }

    #[test]
    fn test_add_presence_rejects_other_prefixes() {
        let registry = ChannelRegistry::new();
        assert!(registry.add_presence("private-room", None, None).is_err());
        assert!(registry.add_presence("presence-room", None, None).is_ok());
    }

    #[test]
    fn test_find_presence() {
        let registry = ChannelRegistry::new();

        registry.add("presence-room");
        assert!(registry.find_presence("presence-room").is_some());

        registry.add("plain");
        assert!(registry.find_presence("plain").is_none());
    }

    #[test]
    fn test_remove() {
        let registry = ChannelRegistry::new();

        registry.add("test-channel");
        assert_eq!(registry.len(), 1);

        registry.remove("test-channel");
        assert_eq!(registry.len(), 0);
        assert!(registry.find("test-channel").is_none());
    }
}
