use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Idle entries are pruned once the table grows past this many keys
const PRUNE_THRESHOLD: usize = 1024;

/// Table of async mutexes, one per serialization key.
///
/// Read-then-write sequences on sessions, guests and tokens run while holding
/// the guard for their key, so two detections of the same plate never
/// interleave.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl KeyedLocks {
    /// Creates an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: impl Into<String>) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut table = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            if table.len() >= PRUNE_THRESHOLD {
                // Only the table holds these; nobody waits on or holds them.
                table.retain(|_, m| Arc::strong_count(m) > 1);
            }
            table.entry(key.into()).or_default().clone()
        };

        mutex.lock_owned().await
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// True when no key is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Serialization key for everything decided about one plate
pub fn plate_key(organization_id: &Uuid, plate: &str) -> String {
    format!("plate:{}:{}", organization_id, plate)
}

/// Serialization key for a customer's registration tokens
pub fn customer_key(customer_id: &Uuid) -> String {
    format!("customer:{}", customer_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_is_mutually_exclusive() {
        let locks = KeyedLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("plate:x").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_idle_keys_are_pruned() {
        let locks = KeyedLocks::new();
        for i in 0..PRUNE_THRESHOLD {
            drop(locks.lock(format!("k{}", i)).await);
        }
        assert_eq!(locks.len(), PRUNE_THRESHOLD);

        let _held = locks.lock("fresh").await;
        assert_eq!(locks.len(), 1);
    }
}
