use std::time::Duration;

use bytes::Bytes;

use crate::{
    error::{Error, Result},
    store::KvStore,
};

/// Pause between acquisition attempts while another node holds the lock.
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Distributed mutex over one key in the lease bucket.
///
/// Acquisition is the classic compare-and-swap: create the key, which only
/// succeeds while it is absent, and retry until it does. Unlock deletes the
/// key. A holder that dies without unlocking degrades to the bucket's 3 s
/// TTL window, after which the entry expires and the next create wins.
pub struct ClusterMutex<S: KvStore> {
    store: S,
    key: String,
}

impl<S: KvStore> ClusterMutex<S> {
    pub fn new(store: S, key: impl Into<String>) -> Self {
        Self { store, key: key.into() }
    }

    /// Block until the lock is held. Contention loops; a store failure does
    /// not (the caller decides whether that is fatal).
    pub async fn lock(&self) -> Result<()> {
        loop {
            match self.store.create(&self.key, Bytes::new()).await {
                Ok(_) => return Ok(()),
                Err(Error::KeyExists) => tokio::time::sleep(RETRY_INTERVAL).await,
                Err(e) => return Err(e),
            }
        }
    }

    /// Release the lock. Best-effort: a failed delete only costs the TTL
    /// window, so it is logged rather than propagated.
    pub async fn unlock(&self) {
        if let Err(e) = self.store.delete(&self.key).await {
            tracing::warn!(key = %self.key, error = %e, "failed to release cluster mutex");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::mocks::MemoryKv;

    #[tokio::test]
    async fn lock_excludes_concurrent_holders() {
        let kv = MemoryKv::new();
        let holders = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let kv = kv.clone();
            let holders = holders.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                let mutex = ClusterMutex::new(kv, "job.add_lock");
                for _ in 0..5 {
                    mutex.lock().await.unwrap();
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    holders.fetch_sub(1, Ordering::SeqCst);
                    mutex.unlock().await;
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1, "mutex admitted two holders");
    }

    #[tokio::test]
    async fn unlock_lets_the_next_waiter_in() {
        let kv = MemoryKv::new();
        let a = ClusterMutex::new(kv.clone(), "k");
        let b = ClusterMutex::new(kv, "k");

        a.lock().await.unwrap();
        let waiter = tokio::spawn(async move {
            b.lock().await.unwrap();
            b.unlock().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        a.unlock().await;
        waiter.await.unwrap();
    }
}
