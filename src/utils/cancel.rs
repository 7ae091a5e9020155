//! Cooperative cancellation token
//!
//! Every long-running operation accepts a `CancelToken` propagated from the
//! run root. Cancellation is cooperative: holders poll `is_cancelled()` at
//! safe points (solver iterations, loop boundaries) and unwind cleanly.

use tokio::sync::watch;

/// Cloneable cancellation token backed by a watch channel
#[derive(Debug, Clone)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

/// The cancelling side of a token pair
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelToken {
    /// Create a token and its cancelling handle
    pub fn new() -> (CancelHandle, CancelToken) {
        let (sender, receiver) = watch::channel(false);
        (CancelHandle { sender }, CancelToken { receiver })
    }

    /// A token that can never be cancelled, for callers without a run root
    pub fn never() -> CancelToken {
        let (sender, receiver) = watch::channel(false);
        // Keep the sender alive forever so the channel never closes
        std::mem::forget(sender);
        CancelToken { receiver }
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until cancellation is requested
    pub async fn cancelled(&mut self) {
        // A closed channel means the handle is gone; treat as cancelled
        while !*self.receiver.borrow_and_update() {
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

impl CancelHandle {
    /// Request cancellation; all clones of the token observe it
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    /// Whether cancel() has been called
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_starts_uncancelled() {
        let (_handle, token) = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_propagates_to_clones() {
        let (handle, token) = CancelToken::new();
        let clone = token.clone();

        handle.cancel();
        assert!(token.is_cancelled());
        assert!(clone.is_cancelled());
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_never_token() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let (handle, mut token) = CancelToken::new();

        let waiter = tokio::spawn(async move {
            token.cancelled().await;
            true
        });

        handle.cancel();
        assert!(waiter.await.unwrap());
    }
}
