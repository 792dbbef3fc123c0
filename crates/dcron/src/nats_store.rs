use std::time::Duration;

use async_nats::jetstream::{self, kv};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::{
    error::{Error, Result},
    store::{KvEntry, KvEvent, KvOp, KvStore, DIAL_TIMEOUT, LEASE_TTL},
};

/// How long the initial-snapshot drain waits when a bucket turns out to be
/// empty (an empty bucket delivers no end-of-batch marker).
const SNAPSHOT_DEADLINE: Duration = Duration::from_millis(500);

/// Connect to the coordination store.
pub async fn connect(endpoints: &[String]) -> Result<async_nats::Client> {
    async_nats::ConnectOptions::new()
        .connection_timeout(DIAL_TIMEOUT)
        .connect(endpoints.join(","))
        .await
        .map_err(|e| Error::Store(e.to_string()))
}

/// Get or create the two buckets of one deployment: `<name>_cluster` holds
/// durable records (max id, pending replication, run-entries) and
/// `<name>_leases` holds lease-bound keys — its `max_age` *is* the lease
/// TTL, so an unrefreshed registration, lock, or claim vanishes on its own.
pub async fn open_buckets(client: &async_nats::Client, name: &str) -> Result<(NatsKv, NatsKv)> {
    let js = jetstream::new(client.clone());

    let meta = get_or_create(
        &js,
        kv::Config {
            bucket: format!("{name}_cluster"),
            history: 1,
            ..Default::default()
        },
    )
    .await?;

    let leases = get_or_create(
        &js,
        kv::Config {
            bucket: format!("{name}_leases"),
            history: 1,
            max_age: LEASE_TTL,
            ..Default::default()
        },
    )
    .await?;

    Ok((NatsKv::new(meta), NatsKv::new(leases)))
}

async fn get_or_create(js: &jetstream::Context, config: kv::Config) -> Result<kv::Store> {
    let name = config.bucket.clone();
    match js.create_key_value(config).await {
        Ok(store) => Ok(store),
        Err(_) => js
            .get_key_value(&name)
            .await
            .map_err(|e| Error::Store(e.to_string())),
    }
}

/// One JetStream KV bucket behind the `KvStore` seam.
#[derive(Clone)]
pub struct NatsKv {
    store: kv::Store,
}

impl NatsKv {
    pub fn new(store: kv::Store) -> Self {
        Self { store }
    }

    /// Drain the initial snapshot a history watcher delivers before any
    /// live updates. `delta == 0` marks the last entry of the batch; the
    /// deadline covers the empty-bucket case.
    async fn drain_snapshot(watcher: &mut kv::Watch) -> Result<Vec<KvEntry>> {
        let mut entries = Vec::new();

        let deadline = tokio::time::sleep(SNAPSHOT_DEADLINE);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                entry = watcher.next() => {
                    match entry {
                        Some(Ok(e)) => {
                            let is_last = e.delta == 0;
                            if e.operation == kv::Operation::Put {
                                entries.push(KvEntry { key: e.key, value: e.value });
                            }
                            if is_last {
                                break;
                            }
                        }
                        Some(Err(e)) => return Err(Error::Store(e.to_string())),
                        None => break,
                    }
                }
                _ = &mut deadline => break,
            }
        }

        Ok(entries)
    }

    /// Forward watch entries into a channel; dropping the receiver or the
    /// watch ending stops the pump. Consumers treat a closed channel as a
    /// dead watch.
    fn spawn_pump(mut watcher: kv::Watch) -> mpsc::UnboundedReceiver<KvEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(entry) = watcher.next().await {
                match entry {
                    Ok(e) => {
                        let op = match e.operation {
                            kv::Operation::Put => KvOp::Put,
                            kv::Operation::Delete | kv::Operation::Purge => KvOp::Delete,
                        };
                        if tx
                            .send(KvEvent { op, key: e.key, value: e.value })
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "kv watch stream error");
                        return;
                    }
                }
            }
        });
        rx
    }
}

impl KvStore for NatsKv {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.store
            .get(key)
            .await
            .map_err(|e| Error::Store(e.to_string()))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<u64> {
        self.store
            .put(key, value)
            .await
            .map_err(|e| Error::Store(e.to_string()))
    }

    async fn create(&self, key: &str, value: Bytes) -> Result<u64> {
        self.store.create(key, value).await.map_err(|e| {
            if e.kind() == kv::CreateErrorKind::AlreadyExists {
                Error::KeyExists
            } else {
                Error::Store(e.to_string())
            }
        })
    }

    async fn update(&self, key: &str, value: Bytes, revision: u64) -> Result<u64> {
        self.store
            .update(key, value, revision)
            .await
            .map_err(|e| Error::Store(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store
            .delete(key)
            .await
            .map_err(|e| Error::Store(e.to_string()))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KvEntry>> {
        let pattern = format!("{prefix}*");
        let mut watcher = self
            .store
            .watch_with_history(&pattern)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Self::drain_snapshot(&mut watcher).await
    }

    async fn load_and_watch(
        &self,
        pattern: &str,
    ) -> Result<(Vec<KvEntry>, mpsc::UnboundedReceiver<KvEvent>)> {
        // Watch is active before the snapshot is read, so no change can
        // slip between the two.
        let mut watcher = self
            .store
            .watch_with_history(pattern)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        let snapshot = Self::drain_snapshot(&mut watcher).await?;
        Ok((snapshot, Self::spawn_pump(watcher)))
    }

    async fn watch(&self, pattern: &str) -> Result<mpsc::UnboundedReceiver<KvEvent>> {
        let watcher = self
            .store
            .watch(pattern)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self::spawn_pump(watcher))
    }
}
