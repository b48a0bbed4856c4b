//! Cooperative stop flag shared by every long-running loop.
//!
//! Loops check [`ShutdownSignal::is_triggered`] between iterations and use
//! [`ShutdownSignal::sleep`] for pauses so a stop request interrupts a backoff
//! instead of waiting it out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    triggered: AtomicBool,
    notify: Notify,
}

#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::Acquire)
    }

    /// Sleep for `duration` or until triggered; returns whether shutdown was requested
    pub async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_triggered() {
            return true;
        }
        tokio::select! {
            _ = &mut notified => true,
            _ = tokio::time::sleep(duration) => self.is_triggered(),
        }
    }

    /// Resolve once triggered
    pub async fn wait(&self) {
        while !self.sleep(Duration::from_secs(3600)).await {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_interrupts_sleep() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.sleep(Duration::from_secs(30)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.trigger();

        let interrupted = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(interrupted);
    }

    #[tokio::test]
    async fn test_sleep_elapses_without_trigger() {
        let signal = ShutdownSignal::new();
        assert!(!signal.sleep(Duration::from_millis(5)).await);
        assert!(!signal.is_triggered());
    }

    #[test]
    fn test_already_triggered_returns_immediately() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        assert!(tokio_test::block_on(signal.sleep(Duration::from_secs(30))));
        tokio_test::block_on(signal.wait());
    }
}
