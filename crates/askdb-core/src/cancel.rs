//! Cooperative cancellation shared between a request and its generation stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Cloneable cancellation flag that can also be awaited.
///
/// Cancelling is idempotent; every clone observes the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool { self.inner.cancelled.load(Ordering::SeqCst) }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking the flag so a concurrent cancel is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_resolves_after_cancel_from_clone() {
        let handle = CancelHandle::new();
        let other = handle.clone();
        let waiter = tokio::spawn(async move { other.cancelled().await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.expect("woken").expect("join");
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_cancelled() {
        let handle = CancelHandle::new();
        handle.cancel();
        handle.cancel();
        tokio::time::timeout(Duration::from_millis(50), handle.cancelled()).await.expect("immediate");
    }
}
