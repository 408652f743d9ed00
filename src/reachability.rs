//! Network reachability observation.
//!
//! The connection state machine consults a [`Reachability`] implementation
//! when deciding whether a reconnect attempt is worth scheduling, and parks
//! in `ReconnectingWhenNetworkBecomesReachable` until the monitor reports the
//! network back.

use std::sync::Arc;
use tokio::sync::watch;

/// Observes whether the network is currently usable.
///
/// `is_reachable` is a synchronous probe; `watch` hands out a receiver that
/// resolves whenever the reachable flag flips, which is what wakes a parked
/// reconnect.
pub trait Reachability: Send + Sync {
    /// Synchronous probe of the current state
    fn is_reachable(&self) -> bool;

    /// Receiver notified on every reachable/unreachable transition
    fn watch(&self) -> watch::Receiver<bool>;
}

/// Monitor that always reports the network as reachable.
///
/// The default for hosts without a platform network monitor; reconnects then
/// rely on the backoff policy alone.
pub struct AlwaysReachable {
    tx: watch::Sender<bool>,
}

impl AlwaysReachable {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx }
    }
}

impl Default for AlwaysReachable {
    fn default() -> Self {
        Self::new()
    }
}

impl Reachability for AlwaysReachable {
    fn is_reachable(&self) -> bool {
        true
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Monitor driven by the host application.
///
/// Platform integrations (or tests) call [`ManualReachability::set_reachable`]
/// as the underlying network comes and goes.
pub struct ManualReachability {
    tx: watch::Sender<bool>,
}

impl ManualReachability {
    pub fn new(initially_reachable: bool) -> Arc<Self> {
        let (tx, _) = watch::channel(initially_reachable);
        Arc::new(Self { tx })
    }

    /// Flip the reachable flag, waking any parked reconnect
    pub fn set_reachable(&self, reachable: bool) {
        // send_replace never fails; it keeps the value even with no receivers
        self.tx.send_replace(reachable);
    }
}

impl Reachability for ManualReachability {
    fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_reachable() {
        let monitor = AlwaysReachable::new();
        assert!(monitor.is_reachable());
        assert!(*monitor.watch().borrow());
    }

    #[tokio::test]
    async fn test_manual_transitions_wake_watchers() {
        let monitor = ManualReachability::new(false);
        assert!(!monitor.is_reachable());

        let mut rx = monitor.watch();
        monitor.set_reachable(true);

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(monitor.is_reachable());
    }
}
