use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use crate::{
    error::{Error, Result},
    shutdown::Shutdown,
    store::{node_key, KvOp, KvStore, NODE_PATTERN, NODE_PREFIX},
};

/// Refresh cadence for the registration lease (TTL is 3 s).
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Cluster identity of this process: a stable digest of the host address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub ip: String,
}

impl Node {
    pub fn local() -> Self {
        Self::from_ip(local_ipv4())
    }

    pub fn from_ip(ip: String) -> Self {
        Self {
            name: format!("{:x}", md5::compute(ip.as_bytes())),
            ip,
        }
    }
}

/// The host's outbound IPv4 address. Connecting a UDP socket sends nothing;
/// it only makes the OS pick the source address it would route with.
fn local_ipv4() -> String {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}

/// Registers this node under `node.<name>` with a lease, keeps the lease
/// alive, and mirrors the peer set from the store.
pub struct NodeRegistry<S: KvStore> {
    store: S,
    pub node: Node,
    peers: Arc<Mutex<HashMap<String, String>>>,
}

impl<S: KvStore> NodeRegistry<S> {
    pub fn new(store: S, node: Node) -> Self {
        Self {
            store,
            node,
            peers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The shared peer map: node name → ip.
    pub fn peers(&self) -> Arc<Mutex<HashMap<String, String>>> {
        self.peers.clone()
    }

    /// Register this node. Fails when a live registration for the same
    /// address already exists (two processes on one host, or a restart
    /// faster than the lease TTL).
    pub async fn register(&self) -> Result<u64> {
        let key = node_key(&self.node.name);
        match self
            .store
            .create(&key, Bytes::from(self.node.ip.clone()))
            .await
        {
            Ok(revision) => {
                tracing::info!(name = %self.node.name, ip = %self.node.ip, "node registered");
                Ok(revision)
            }
            Err(Error::KeyExists) => Err(Error::Store(format!(
                "node {key:?} already registered"
            ))),
            Err(e) => Err(e),
        }
    }

    /// Refresh the registration every second. A failed refresh means the
    /// lease is gone — this node is no longer a legitimate member, so the
    /// key is deleted best-effort and the whole service shuts down.
    pub fn spawn_keep_alive(&self, revision: u64, shutdown: Shutdown) {
        let store = self.store.clone();
        let key = node_key(&self.node.name);
        let ip = Bytes::from(self.node.ip.clone());
        tokio::spawn(async move {
            let mut revision = revision;
            let mut tick = tokio::time::interval(KEEP_ALIVE_INTERVAL);
            tick.tick().await; // the first tick fires immediately

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        // Deregister now so peers see a DELETE instead of
                        // waiting out the TTL.
                        let _ = store.delete(&key).await;
                        tracing::info!("node deregistered");
                        return;
                    }
                    _ = tick.tick() => {
                        match store.update(&key, ip.clone(), revision).await {
                            Ok(next) => revision = next,
                            Err(e) => {
                                let _ = store.delete(&key).await;
                                shutdown.fail(&format!("node lease lost: {e}"));
                                return;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Seed the peer map from the current `node.` entries, then track
    /// membership changes until shutdown. The watch ending on its own is
    /// fatal: a node that cannot see the cluster must not keep scheduling.
    pub async fn seed_and_watch(&self, shutdown: Shutdown) -> Result<()> {
        let (snapshot, mut events) = self.store.load_and_watch(NODE_PATTERN).await?;
        {
            let mut peers = self.peers.lock().unwrap();
            for entry in snapshot {
                let name = strip_node_prefix(&entry.key);
                peers.insert(name, String::from_utf8_lossy(&entry.value).into_owned());
            }
        }

        let peers = self.peers.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    event = events.recv() => match event {
                        Some(event) => {
                            let name = strip_node_prefix(&event.key);
                            match event.op {
                                KvOp::Put => {
                                    let ip = String::from_utf8_lossy(&event.value).into_owned();
                                    tracing::debug!(%name, %ip, "peer registered");
                                    peers.lock().unwrap().insert(name, ip);
                                }
                                KvOp::Delete => {
                                    tracing::debug!(%name, "peer deregistered");
                                    peers.lock().unwrap().remove(&name);
                                }
                            }
                        }
                        None => {
                            shutdown.fail("node membership watch ended");
                            return;
                        }
                    }
                }
            }
        });
        Ok(())
    }
}

fn strip_node_prefix(key: &str) -> String {
    key.strip_prefix(NODE_PREFIX).unwrap_or(key).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MemoryKv;

    fn registry(kv: &MemoryKv, ip: &str) -> NodeRegistry<MemoryKv> {
        NodeRegistry::new(kv.clone(), Node::from_ip(ip.to_string()))
    }

    #[test]
    fn node_name_is_md5_of_ip() {
        let node = Node::from_ip("10.0.0.1".to_string());
        assert_eq!(node.name, format!("{:x}", md5::compute(b"10.0.0.1")));
        assert_eq!(node.name.len(), 32);
    }

    #[tokio::test]
    async fn double_registration_is_rejected() {
        let kv = MemoryKv::new();
        let a = registry(&kv, "10.0.0.1");
        a.register().await.unwrap();

        let b = registry(&kv, "10.0.0.1");
        let err = b.register().await.unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[tokio::test]
    async fn peer_map_tracks_membership_events() {
        let kv = MemoryKv::new();
        let other = registry(&kv, "10.0.0.2");
        other.register().await.unwrap();

        let me = registry(&kv, "10.0.0.1");
        me.register().await.unwrap();
        let shutdown = Shutdown::new();
        me.seed_and_watch(shutdown.clone()).await.unwrap();

        // Seeded with both registrations.
        assert_eq!(me.peers().lock().unwrap().len(), 2);

        // A third node joins, then leaves.
        let third = Node::from_ip("10.0.0.3".to_string());
        kv.put(&node_key(&third.name), Bytes::from("10.0.0.3"))
            .await
            .unwrap();
        kv.delete(&node_key(&other.node.name)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let peers = me.peers();
        let peers = peers.lock().unwrap();
        assert!(peers.contains_key(&third.name));
        assert!(!peers.contains_key(&other.node.name));
        shutdown.stop();
    }

    #[tokio::test]
    async fn lost_lease_is_fatal() {
        let kv = MemoryKv::new();
        let me = registry(&kv, "10.0.0.1");
        let revision = me.register().await.unwrap();

        let shutdown = Shutdown::new();
        me.spawn_keep_alive(revision, shutdown.clone());

        // Simulate the lease expiring out from under us.
        kv.delete(&node_key(&me.node.name)).await.unwrap();

        shutdown.cancelled().await;
        assert!(shutdown.is_fatal());
    }
}
