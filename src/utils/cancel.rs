//! Cooperative cancellation for async operations.
//!
//! A `CancellationToken` can be cloned and shared across tasks. When `cancel()`
//! is called on any clone, every clone observes it, and tasks awaiting
//! `cancelled()` wake up. The gateway uses one per call as its reply deadline;
//! the worker uses one for shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A cancellation token shared across tasks.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    state: Arc<watch::Sender<bool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Create a new cancellation token.
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once the token is cancelled (immediately if it already is).
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Cancel the token after `delay` unless the returned timer is disarmed first.
    pub fn cancel_after(&self, delay: Duration) -> CancelTimer {
        let token = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            token.cancel();
        });
        CancelTimer { task }
    }
}

/// Pending `cancel_after`. Dropping it disarms the timer.
#[derive(Debug)]
pub struct CancelTimer {
    task: JoinHandle<()>,
}

impl CancelTimer {
    /// Stop the timer so it never cancels the token.
    pub fn disarm(self) {
        // Drop does the work.
    }
}

impl Drop for CancelTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        token1.cancel();

        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });

        token.cancel();

        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fires() {
        let token = CancellationToken::new();
        let _timer = token.cancel_after(Duration::from_secs(300));

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(!token.is_cancelled());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_timer_never_fires() {
        let token = CancellationToken::new();
        let timer = token.cancel_after(Duration::from_secs(1));

        timer.disarm();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(!token.is_cancelled());
    }
}
