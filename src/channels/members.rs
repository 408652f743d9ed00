//! Membership tracking for presence channels.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A member of a presence channel, unique by `user_id` within the roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<Value>,
}

impl Member {
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

/// The membership roster of a presence channel.
#[derive(Debug, Default)]
pub struct Members {
    /// Map of user_id to member
    members: RwLock<HashMap<String, Member>>,
    /// The local user's id, parsed from the auth channel_data
    my_id: RwLock<Option<String>>,
}

impl Members {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the local user's id
    pub fn set_my_id(&self, id: impl Into<String>) {
        *self.my_id.write() = Some(id.into());
    }

    /// Get the local user's id
    pub fn my_id(&self) -> Option<String> {
        self.my_id.read().clone()
    }

    /// Get the local user's member record
    pub fn me(&self) -> Option<Member> {
        let my_id = self.my_id.read();
        my_id
            .as_deref()
            .and_then(|id| self.members.read().get(id).cloned())
    }

    /// Get a member by id
    pub fn get(&self, user_id: &str) -> Option<Member> {
        self.members.read().get(user_id).cloned()
    }

    /// Get all members
    pub fn all(&self) -> Vec<Member> {
        self.members.read().values().cloned().collect()
    }

    /// Get member count
    pub fn count(&self) -> usize {
        self.members.read().len()
    }

    /// Add a member, returning `None` if the id is already present
    pub fn add(&self, member: Member) -> Option<Member> {
        let mut members = self.members.write();

        if members.contains_key(&member.user_id) {
            return None;
        }

        members.insert(member.user_id.clone(), member.clone());
        Some(member)
    }

    /// Remove a member by id
    pub fn remove(&self, user_id: &str) -> Option<Member> {
        self.members.write().remove(user_id)
    }

    /// Rebuild the roster from a `subscription_succeeded` payload.
    ///
    /// The payload carries `presence.hash`, a map of user id to user info;
    /// a JSON `null` info is treated as absent.
    pub fn on_subscription(&self, data: &Value) {
        let mut members = self.members.write();
        members.clear();

        let hash = data
            .get("presence")
            .and_then(|p| p.get("hash"))
            .and_then(|h| h.as_object());

        if let Some(hash) = hash {
            for (user_id, info) in hash {
                let user_info = if info.is_null() {
                    None
                } else {
                    Some(info.clone())
                };

                members.insert(
                    user_id.clone(),
                    Member {
                        user_id: user_id.clone(),
                        user_info,
                    },
                );
            }
        }
    }

    /// Clear the roster and the local id
    pub fn reset(&self) {
        self.members.write().clear();
        *self.my_id.write() = None;
    }
}
