use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{registry::Node, store::KvStore};

/// Everything a component needs to talk to the rest of the cluster:
/// the two store buckets, this node's identity, and the live peer map.
/// Constructed once at startup and passed by capability; absent entirely
/// in single-node mode.
#[derive(Clone)]
pub struct Cluster<S: KvStore> {
    /// Durable bucket: `job.max_id`, `new_job_list.*`, `entries.*`.
    pub meta: S,

    /// TTL bucket: `node.*`, `job.add_lock`, `job.max_id_lease`.
    pub leases: S,

    pub node: Node,

    /// HTTP port every peer serves its façade on.
    pub port: u16,

    /// Shared client for the replication fan-out.
    pub http: reqwest::Client,

    peers: Arc<Mutex<HashMap<String, String>>>,
}

impl<S: KvStore> Cluster<S> {
    pub fn new(
        meta: S,
        leases: S,
        node: Node,
        port: u16,
        peers: Arc<Mutex<HashMap<String, String>>>,
    ) -> Self {
        Self {
            meta,
            leases,
            node,
            port,
            http: reqwest::Client::new(),
            peers,
        }
    }

    /// `ip:port` authorities of every peer except this node.
    pub fn peer_addrs(&self) -> Vec<String> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| **name != self.node.name)
            .map(|(_, ip)| format!("{}:{}", ip, self.port))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MemoryKv;

    #[test]
    fn peer_addrs_excludes_self() {
        let node = Node::from_ip("10.0.0.1".to_string());
        let peers = Arc::new(Mutex::new(HashMap::from([
            (node.name.clone(), node.ip.clone()),
            (
                Node::from_ip("10.0.0.2".to_string()).name,
                "10.0.0.2".to_string(),
            ),
        ])));
        let cluster = Cluster::new(MemoryKv::new(), MemoryKv::new(), node, 7777, peers);

        assert_eq!(cluster.peer_addrs(), vec!["10.0.0.2:7777".to_string()]);
    }
}
