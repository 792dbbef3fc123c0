use std::future::Future;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// TTL shared by every lease-like key: node registrations, the add mutex,
/// the sequencer claim.
pub const LEASE_TTL: std::time::Duration = std::time::Duration::from_secs(3);

/// How long the store client may take to establish a connection.
pub const DIAL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

// Key layout inside the two buckets. `.` is the hierarchy separator so
// watch wildcards work per segment.
pub const NODE_PREFIX: &str = "node.";
pub const NODE_PATTERN: &str = "node.*";
pub const MAX_ID_KEY: &str = "job.max_id";
pub const MAX_ID_LEASE_KEY: &str = "job.max_id_lease";
pub const ADD_LOCK_KEY: &str = "job.add_lock";
pub const NEW_JOB_PREFIX: &str = "new_job_list.";
pub const ENTRY_PREFIX: &str = "entries.";

pub fn node_key(name: &str) -> String {
    format!("{NODE_PREFIX}{name}")
}

pub fn new_job_key(id: u64) -> String {
    format!("{NEW_JOB_PREFIX}{id}")
}

pub fn entry_key(id: u64) -> String {
    format!("{ENTRY_PREFIX}{id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvOp {
    Put,
    Delete,
}

/// A key/value pair from a snapshot read.
#[derive(Debug, Clone)]
pub struct KvEntry {
    pub key: String,
    pub value: Bytes,
}

/// A live change under a watched pattern.
#[derive(Debug, Clone)]
pub struct KvEvent {
    pub op: KvOp,
    pub key: String,
    pub value: Bytes,
}

/// One bucket of the coordination store.
///
/// Implemented by the JetStream KV client and by the in-memory mock, so
/// every component above this seam is testable without a live server.
/// Lease semantics are built from these primitives: a lease is an entry in
/// a TTL bucket, kept alive by `update` (each write refreshes its age) and
/// revoked by `delete`; the distributed mutex is `create` (which succeeds
/// only when the key is absent) in a loop.
pub trait KvStore: Send + Sync + Clone + 'static {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    /// Unconditional write. Returns the new revision.
    fn put(&self, key: &str, value: Bytes) -> impl Future<Output = Result<u64>> + Send;

    /// Atomically create `key`. Returns the revision on success,
    /// `Error::KeyExists` when another writer holds it.
    fn create(&self, key: &str, value: Bytes) -> impl Future<Output = Result<u64>> + Send;

    /// Compare-and-swap update at `revision`. Returns the new revision.
    fn update(
        &self,
        key: &str,
        value: Bytes,
        revision: u64,
    ) -> impl Future<Output = Result<u64>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Current entries whose key starts with `prefix`.
    fn get_prefix(&self, prefix: &str) -> impl Future<Output = Result<Vec<KvEntry>>> + Send;

    /// Snapshot of `pattern` plus a live event stream for subsequent
    /// changes. The channel closes when the underlying watch ends, which
    /// callers treat as fatal.
    fn load_and_watch(
        &self,
        pattern: &str,
    ) -> impl Future<Output = Result<(Vec<KvEntry>, mpsc::UnboundedReceiver<KvEvent>)>> + Send;

    /// Live changes only, no snapshot. `pattern` is a key or a `*` glob on
    /// the final segment.
    fn watch(
        &self,
        pattern: &str,
    ) -> impl Future<Output = Result<mpsc::UnboundedReceiver<KvEvent>>> + Send;
}
