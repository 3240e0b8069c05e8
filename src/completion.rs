//! Write-once completion values with many awaiters.
//!
//! A [`Completion`] is resolved at most once by any holder and can be awaited
//! by any number of tasks. Later attempts to resolve it are ignored, which is
//! what gives the push group its "first outcome wins" behavior.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Multi-consumer, write-once value.
pub struct Completion<T> {
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T> Completion<T> {
    /// Create an unresolved completion.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Resolve with `value`.
    ///
    /// Returns `true` if this call resolved the completion, `false` if it was
    /// already resolved (in which case `value` is dropped).
    pub fn complete(&self, value: T) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(value);
                true
            } else {
                false
            }
        })
    }

    /// Check whether a value has been set.
    pub fn is_complete(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl<T: Clone> Completion<T> {
    /// Current value, if resolved.
    pub fn peek(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Wait until the completion is resolved and return a copy of the value.
    pub async fn wait(&self) -> T {
        let mut rx = self.tx.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(value) = current {
                return value;
            }
            // The sender is owned by `self` and outlives this borrow
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("complete", &self.is_complete())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_value_wins() {
        let completion = Completion::new();
        assert!(!completion.is_complete());
        assert!(completion.complete(1));
        assert!(!completion.complete(2));
        assert_eq!(completion.peek(), Some(1));
    }

    #[tokio::test]
    async fn test_wait_before_and_after_resolution() {
        let completion: Completion<&'static str> = Completion::new();

        let early = {
            let c = completion.clone();
            tokio::spawn(async move { c.wait().await })
        };
        tokio::task::yield_now().await;

        completion.complete("done");
        assert_eq!(early.await.unwrap(), "done");
        assert_eq!(completion.wait().await, "done");
    }
}
