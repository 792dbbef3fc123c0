//! Mock implementations for testing without a live coordination store.
//!
//! Enabled with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! dcron = { path = "...", features = ["test-support"] }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{
    error::{Error, Result},
    job::Job,
    runner::JobRunner,
    store::{KvEntry, KvEvent, KvOp, KvStore},
};

// ── MemoryKv ──────────────────────────────────────────────────────────────────

/// In-memory `KvStore` with real CAS semantics and watch fan-out. No TTL:
/// lease expiry is not simulated, tests exercise the explicit paths.
#[derive(Clone, Default)]
pub struct MemoryKv {
    inner: Arc<Mutex<MemInner>>,
}

#[derive(Default)]
struct MemInner {
    entries: BTreeMap<String, (Bytes, u64)>,
    revision: u64,
    watchers: Vec<Watcher>,
}

struct Watcher {
    pattern: String,
    tx: mpsc::UnboundedSender<KvEvent>,
}

fn matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents, for assertions.
    pub fn dump(&self) -> Vec<(String, Bytes)> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .iter()
            .map(|(k, (v, _))| (k.clone(), v.clone()))
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().unwrap().entries.contains_key(key)
    }
}

impl MemInner {
    fn notify(&mut self, op: KvOp, key: &str, value: Bytes) {
        self.watchers.retain(|w| {
            if !matches(&w.pattern, key) {
                return true;
            }
            w.tx
                .send(KvEvent { op, key: key.to_string(), value: value.clone() })
                .is_ok()
        });
    }
}

impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.entries.get(key).map(|(v, _)| v.clone()))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        inner.revision += 1;
        let revision = inner.revision;
        inner.entries.insert(key.to_string(), (value.clone(), revision));
        inner.notify(KvOp::Put, key, value);
        Ok(revision)
    }

    async fn create(&self, key: &str, value: Bytes) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.contains_key(key) {
            return Err(Error::KeyExists);
        }
        inner.revision += 1;
        let revision = inner.revision;
        inner.entries.insert(key.to_string(), (value.clone(), revision));
        inner.notify(KvOp::Put, key, value);
        Ok(revision)
    }

    async fn update(&self, key: &str, value: Bytes, revision: u64) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        match inner.entries.get(key) {
            Some((_, current)) if *current == revision => {
                inner.revision += 1;
                let next = inner.revision;
                inner.entries.insert(key.to_string(), (value.clone(), next));
                inner.notify(KvOp::Put, key, value);
                Ok(next)
            }
            Some(_) => Err(Error::Store(format!("wrong last revision for {key}"))),
            None => Err(Error::Store(format!("key not found: {key}"))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.remove(key).is_some() {
            inner.notify(KvOp::Delete, key, Bytes::new());
        }
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KvEntry>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, (v, _))| KvEntry { key: k.clone(), value: v.clone() })
            .collect())
    }

    async fn load_and_watch(
        &self,
        pattern: &str,
    ) -> Result<(Vec<KvEntry>, mpsc::UnboundedReceiver<KvEvent>)> {
        let mut inner = self.inner.lock().unwrap();
        let snapshot = inner
            .entries
            .iter()
            .filter(|(k, _)| matches(pattern, k))
            .map(|(k, (v, _))| KvEntry { key: k.clone(), value: v.clone() })
            .collect();
        let (tx, rx) = mpsc::unbounded_channel();
        inner.watchers.push(Watcher { pattern: pattern.to_string(), tx });
        Ok((snapshot, rx))
    }

    async fn watch(&self, pattern: &str) -> Result<mpsc::UnboundedReceiver<KvEvent>> {
        let mut inner = self.inner.lock().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        inner.watchers.push(Watcher { pattern: pattern.to_string(), tx });
        Ok(rx)
    }
}

// ── MockRunner ────────────────────────────────────────────────────────────────

/// Records every dispatched job id instead of executing anything.
#[derive(Clone, Default)]
pub struct MockRunner {
    runs: Arc<Mutex<Vec<u64>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> Vec<u64> {
        self.runs.lock().unwrap().clone()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

impl JobRunner for MockRunner {
    async fn run(&self, job: &Job) -> Result<()> {
        self.runs.lock().unwrap().push(job.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_is_exclusive() {
        let kv = MemoryKv::new();
        kv.create("lock", Bytes::from("a")).await.unwrap();
        assert!(matches!(
            kv.create("lock", Bytes::from("b")).await,
            Err(Error::KeyExists)
        ));
        kv.delete("lock").await.unwrap();
        kv.create("lock", Bytes::from("c")).await.unwrap();
    }

    #[tokio::test]
    async fn update_requires_matching_revision() {
        let kv = MemoryKv::new();
        let rev = kv.create("k", Bytes::from("v1")).await.unwrap();
        let rev2 = kv.update("k", Bytes::from("v2"), rev).await.unwrap();
        assert!(kv.update("k", Bytes::from("v3"), rev).await.is_err());
        kv.update("k", Bytes::from("v3"), rev2).await.unwrap();
    }

    #[tokio::test]
    async fn watch_sees_puts_and_deletes_under_pattern() {
        let kv = MemoryKv::new();
        let (snapshot, mut rx) = kv.load_and_watch("node.*").await.unwrap();
        assert!(snapshot.is_empty());

        kv.put("node.a", Bytes::from("1.1.1.1")).await.unwrap();
        kv.put("other.b", Bytes::from("x")).await.unwrap();
        kv.delete("node.a").await.unwrap();

        let ev = rx.recv().await.unwrap();
        assert_eq!((ev.op, ev.key.as_str()), (KvOp::Put, "node.a"));
        let ev = rx.recv().await.unwrap();
        assert_eq!((ev.op, ev.key.as_str()), (KvOp::Delete, "node.a"));
    }

    #[tokio::test]
    async fn snapshot_contains_existing_entries() {
        let kv = MemoryKv::new();
        kv.put("node.a", Bytes::from("1")).await.unwrap();
        kv.put("node.b", Bytes::from("2")).await.unwrap();
        let (snapshot, _rx) = kv.load_and_watch("node.*").await.unwrap();
        assert_eq!(snapshot.len(), 2);
    }
}
