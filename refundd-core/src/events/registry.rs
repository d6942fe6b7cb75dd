//! Listener registry with explicit subscribe/unsubscribe.
//!
//! Listeners are invoked sequentially after a match is confirmed; each
//! listener's failure is caught and logged independently, so a broken
//! subscriber can neither stop its peers nor touch engine state.

use super::types::DepositDetected;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Handle returned by [`ListenerRegistry::subscribe`].
pub type ListenerId = Uuid;

/// Callback invoked whenever a qualifying deposit is detected.
#[async_trait]
pub trait DepositListener: Send + Sync {
    async fn on_deposit(
        &self,
        event: &DepositDetected,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Registry of deposit listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn DepositListener>)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener and return its handle.
    pub async fn subscribe(&self, listener: Arc<dyn DepositListener>) -> ListenerId {
        let id = Uuid::new_v4();
        self.listeners.write().await.push((id, listener));
        debug!(listener = %id, "deposit listener subscribed");
        id
    }

    /// Remove a listener. Returns true if it was registered.
    pub async fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() < before
    }

    pub async fn len(&self) -> usize {
        self.listeners.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.listeners.read().await.is_empty()
    }

    /// Notify every listener, isolating failures.
    pub async fn notify(&self, event: &DepositDetected) {
        // Snapshot so a listener can unsubscribe itself without deadlock.
        let snapshot: Vec<(ListenerId, Arc<dyn DepositListener>)> =
            self.listeners.read().await.clone();

        for (id, listener) in snapshot {
            if let Err(e) = listener.on_deposit(event).await {
                warn!(
                    listener = %id,
                    tx_hash = %event.tx_hash,
                    error = %e,
                    "deposit listener failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counting {
        calls: AtomicU64,
        fail: bool,
    }

    #[async_trait]
    impl DepositListener for Counting {
        async fn on_deposit(
            &self,
            _event: &DepositDetected,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err("listener exploded".into());
            }
            Ok(())
        }
    }

    fn event() -> DepositDetected {
        DepositDetected {
            address: "addr1_wallet".to_string(),
            tx_hash: "tx1".to_string(),
            amount: 2_000_000,
            block_timestamp: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn failing_listener_does_not_block_others() {
        let registry = ListenerRegistry::new();
        let bad = Arc::new(Counting {
            calls: AtomicU64::new(0),
            fail: true,
        });
        let good = Arc::new(Counting {
            calls: AtomicU64::new(0),
            fail: false,
        });
        registry.subscribe(bad.clone()).await;
        registry.subscribe(good.clone()).await;

        registry.notify(&event()).await;

        assert_eq!(bad.calls.load(Ordering::Relaxed), 1);
        assert_eq!(good.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_listener() {
        let registry = ListenerRegistry::new();
        let listener = Arc::new(Counting {
            calls: AtomicU64::new(0),
            fail: false,
        });
        let id = registry.subscribe(listener.clone()).await;
        assert_eq!(registry.len().await, 1);

        assert!(registry.unsubscribe(id).await);
        assert!(!registry.unsubscribe(id).await);
        assert!(registry.is_empty().await);

        registry.notify(&event()).await;
        assert_eq!(listener.calls.load(Ordering::Relaxed), 0);
    }
}
