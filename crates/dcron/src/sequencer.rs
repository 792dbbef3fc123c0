use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use bytes::Bytes;

use crate::{
    cluster::Cluster,
    error::{Error, Result},
    shutdown::Shutdown,
    store::{KvStore, MAX_ID_KEY, MAX_ID_LEASE_KEY},
};

const RENEW_INTERVAL: Duration = Duration::from_secs(1);

/// Last issued id in the durable bucket, 0 when none was ever issued.
pub async fn read_max<S: KvStore>(store: &S) -> Result<u64> {
    match store.get(MAX_ID_KEY).await? {
        Some(value) => std::str::from_utf8(&value)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Store(format!("malformed {MAX_ID_KEY} value"))),
        None => Ok(0),
    }
}

/// Record an id issued by the add path. Any node holding the sequencer
/// claim — including this one — releases it on seeing the write.
pub async fn record_issued<S: KvStore>(store: &S, id: u64) -> Result<()> {
    store
        .put(MAX_ID_KEY, Bytes::from(id.to_string()))
        .await
        .map(|_| ())
}

/// Issues cluster-unique job ids from the `job.max_id` key.
///
/// Reads are always free. At startup the node with the newest catalog
/// publishes its maximum id and takes the sequencer claim (a lease-bound
/// key); a watcher on `job.max_id` drops the claim the moment any peer —
/// or a later add on this node — writes the key, so exactly one holder
/// maintains it at a time. Writes on the add path happen under the cluster
/// add mutex.
pub struct MaxIdSequencer<S: KvStore> {
    meta: S,
    leases: S,
    node_name: String,
    publish_lock: tokio::sync::Mutex<()>,
    claimed: Arc<AtomicBool>,
}

impl<S: KvStore> MaxIdSequencer<S> {
    pub fn new(cluster: &Cluster<S>) -> Self {
        Self {
            meta: cluster.meta.clone(),
            leases: cluster.leases.clone(),
            node_name: cluster.node.name.clone(),
            publish_lock: tokio::sync::Mutex::new(()),
            claimed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Last issued id, 0 when the cluster has never issued one.
    pub async fn current_max(&self) -> Result<u64> {
        read_max(&self.meta).await
    }

    /// Startup publication: push the locally loaded maximum id to the
    /// cluster when it is newer than the stored one, and become the
    /// claim holder maintaining the key.
    pub async fn publish_local_max(&self, local_max: u64, shutdown: Shutdown) -> Result<()> {
        let _guard = self.publish_lock.lock().await;

        if let Some(value) = self.meta.get(MAX_ID_KEY).await? {
            let stored: u64 = std::str::from_utf8(&value)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            if stored >= local_max {
                return Ok(());
            }
        }

        let revision = self
            .leases
            .put(MAX_ID_LEASE_KEY, Bytes::from(self.node_name.clone()))
            .await?;
        self.meta
            .put(MAX_ID_KEY, Bytes::from(local_max.to_string()))
            .await?;
        self.claimed.store(true, Ordering::SeqCst);
        tracing::info!(max_id = local_max, "published local max job id, holding sequencer claim");

        self.spawn_renew(revision, shutdown.clone());
        self.spawn_watch(shutdown).await?;
        Ok(())
    }

    /// Keep the claim lease alive until it is released or the service
    /// shuts down.
    fn spawn_renew(&self, revision: u64, shutdown: Shutdown) {
        let leases = self.leases.clone();
        let claimed = self.claimed.clone();
        let value = Bytes::from(self.node_name.clone());
        tokio::spawn(async move {
            let mut revision = revision;
            let mut tick = tokio::time::interval(RENEW_INTERVAL);
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        let _ = leases.delete(MAX_ID_LEASE_KEY).await;
                        return;
                    }
                    _ = tick.tick() => {
                        if !claimed.load(Ordering::SeqCst) {
                            return;
                        }
                        match leases.update(MAX_ID_LEASE_KEY, value.clone(), revision).await {
                            Ok(next) => revision = next,
                            Err(e) => {
                                claimed.store(false, Ordering::SeqCst);
                                tracing::warn!(error = %e, "sequencer claim renewal failed, claim dropped");
                                return;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Release the claim as soon as anyone else writes or deletes
    /// `job.max_id` — whoever wrote last is the canonical sequencer now.
    async fn spawn_watch(&self, shutdown: Shutdown) -> Result<()> {
        let mut events = self.meta.watch(MAX_ID_KEY).await?;
        let leases = self.leases.clone();
        let claimed = self.claimed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    event = events.recv() => match event {
                        Some(_) => {
                            if claimed.swap(false, Ordering::SeqCst) {
                                let _ = leases.delete(MAX_ID_LEASE_KEY).await;
                                tracing::info!("sequencer claim released");
                            }
                        }
                        None => {
                            if claimed.swap(false, Ordering::SeqCst) {
                                let _ = leases.delete(MAX_ID_LEASE_KEY).await;
                                tracing::warn!("max id watch ended, sequencer claim dropped");
                            }
                            return;
                        }
                    }
                }
            }
        });
        Ok(())
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn holds_claim(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::{mocks::MemoryKv, registry::Node};

    fn cluster(kv: &MemoryKv) -> Cluster<MemoryKv> {
        Cluster::new(
            kv.clone(),
            kv.clone(),
            Node::from_ip("10.0.0.1".to_string()),
            7777,
            Arc::new(Mutex::new(HashMap::new())),
        )
    }

    #[tokio::test]
    async fn ids_are_monotonic_from_one() {
        let kv = MemoryKv::new();

        for expected in 1..=5u64 {
            let id = read_max(&kv).await.unwrap() + 1;
            assert_eq!(id, expected);
            record_issued(&kv, id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn read_max_is_zero_on_a_fresh_cluster() {
        let kv = MemoryKv::new();
        assert_eq!(read_max(&kv).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn publish_skips_when_store_is_newer() {
        let kv = MemoryKv::new();
        let seq = MaxIdSequencer::new(&cluster(&kv));
        record_issued(&kv, 10).await.unwrap();

        seq.publish_local_max(4, Shutdown::new()).await.unwrap();
        assert_eq!(seq.current_max().await.unwrap(), 10);
        assert!(!seq.holds_claim());
    }

    #[tokio::test]
    async fn foreign_write_releases_the_claim() {
        let kv = MemoryKv::new();
        let shutdown = Shutdown::new();
        let seq = MaxIdSequencer::new(&cluster(&kv));
        seq.publish_local_max(4, shutdown.clone()).await.unwrap();
        assert!(seq.holds_claim());

        // A peer issues id 5.
        kv.put(MAX_ID_KEY, Bytes::from("5")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!seq.holds_claim());
        assert!(!kv.contains(MAX_ID_LEASE_KEY));
        shutdown.stop();
    }
}
