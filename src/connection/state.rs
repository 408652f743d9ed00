//! Connection state management.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No socket; the initial and terminal state
    Disconnected,
    /// Socket dial and handshake in progress
    Connecting,
    /// Handshake complete, socket id assigned
    Connected,
    /// Explicit disconnect requested, waiting for the socket close
    Disconnecting,
    /// Waiting out the backoff before the next connect attempt
    Reconnecting,
    /// Waiting for the reachability monitor before reconnecting
    ReconnectingWhenNetworkBecomesReachable,
}

impl ConnectionState {
    /// Check if currently connecting or connected
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a reconnect is pending in some form
    pub fn is_reconnecting(&self) -> bool {
        matches!(
            self,
            Self::Reconnecting | Self::ReconnectingWhenNetworkBecomesReachable
        )
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::ReconnectingWhenNetworkBecomesReachable => {
                write!(f, "reconnecting when network becomes reachable")
            }
        }
    }
}

/// Observer of `(old, new)` state transitions
pub type StateChangeFn = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;

/// Holds the current connection state and notifies an observer on change.
///
/// The observer runs outside the lock, after the transition is visible.
#[derive(Default)]
pub struct StateCell {
    state: RwLock<ConnectionState>,
    observer: RwLock<Option<StateChangeFn>>,
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn get(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Install the transition observer
    pub fn set_observer(&self, observer: Option<StateChangeFn>) {
        *self.observer.write() = observer;
    }

    /// Transition to a new state, returning the previous one.
    ///
    /// A no-op transition does not notify.
    pub fn transition(&self, new_state: ConnectionState) -> ConnectionState {
        let previous = {
            let mut state = self.state.write();
            let previous = *state;
            *state = new_state;
            previous
        };

        if previous != new_state {
            debug!("Connection state: {} -> {}", previous, new_state);
            if let Some(ref observer) = *self.observer.read() {
                observer(previous, new_state);
            }
        }

        previous
    }
}

impl std::fmt::Debug for StateCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCell").field("state", &self.get()).finish()
    }
}
