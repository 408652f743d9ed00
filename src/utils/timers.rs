//! Timer utilities.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::sleep;

/// A single-shot timer that can be cancelled.
///
/// Dropping the timer cancels it, so storing a new timer in the same slot
/// replaces (and cancels) the previous one.
pub struct CancellableTimer {
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl CancellableTimer {
    /// Create a new timer that executes a callback after the specified duration
    pub fn new<F>(duration: Duration, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = oneshot::channel();

        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(duration) => {
                    callback();
                }
                _ = cancel_rx => {
                    // Timer was cancelled
                }
            }
        });

        Self {
            cancel_tx: Some(cancel_tx),
        }
    }

    /// Cancel the timer
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Check if the timer is still active
    pub fn is_active(&self) -> bool {
        self.cancel_tx.is_some()
    }
}

impl Drop for CancellableTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_timer_fires() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();

        let _timer = CancellableTimer::new(Duration::from_millis(10), move || {
            fired_clone.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();

        let mut timer = CancellableTimer::new(Duration::from_millis(20), move || {
            fired_clone.store(true, Ordering::SeqCst);
        });
        timer.cancel();
        assert!(!timer.is_active());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_replacing_timer_cancels_previous() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();

        let mut slot = Some(CancellableTimer::new(Duration::from_millis(20), move || {
            fired_clone.store(true, Ordering::SeqCst);
        }));
        assert!(slot.as_ref().unwrap().is_active());
        slot = Some(CancellableTimer::new(Duration::from_millis(200), || {}));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!fired.load(Ordering::SeqCst));
        drop(slot);
    }
}
