use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bytes::Bytes;

use crate::{
    cluster::Cluster,
    error::{Error, Result},
    job::{Job, JobDraft, JobPatch, JobStatus, JOB_SEPARATOR},
    mutex::ClusterMutex,
    replication, sequencer,
    scheduler::SchedulerHandle,
    store::{new_job_key, KvStore, ADD_LOCK_KEY},
};

pub const JOB_STORE_FILE: &str = "job_queue";
pub const JOB_UPDATE_FILE: &str = "job_update";

/// The full job set of this node: an id-sorted slice with a name index,
/// backed by two append-only logs.
///
/// `job_queue` is the authoritative add log; `job_update` carries updates
/// and delete tombstones. Startup replays the first and applies the second
/// on top, so a clean restart reproduces the pre-restart catalog. Both logs
/// frame each record as its JSON serialization terminated by `0x7C`.
pub struct JobCatalog {
    inner: Mutex<CatalogInner>,
    data_dir: PathBuf,
}

struct CatalogInner {
    /// Ascending by id.
    jobs: Vec<Job>,
    /// name → id, for duplicate rejection.
    names: HashMap<String, u64>,
    /// Largest id ever observed, tombstones included. Ids are never reused.
    max_seen_id: u64,
}

impl JobCatalog {
    /// Create the data directory if needed and replay the logs.
    pub fn open(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        let mut inner = CatalogInner {
            jobs: Vec::new(),
            names: HashMap::new(),
            max_seen_id: 0,
        };

        let queue = read_frames(&data_dir.join(JOB_STORE_FILE))?;
        for job in queue {
            if inner.jobs.iter().any(|j| j.id == job.id) {
                continue;
            }
            insert_sorted(&mut inner, job);
        }

        let updates = read_frames(&data_dir.join(JOB_UPDATE_FILE))?;
        for job in updates {
            inner.max_seen_id = inner.max_seen_id.max(job.id);
            let pos = inner.jobs.iter().position(|j| j.id == job.id);
            match (job.status, pos) {
                (JobStatus::Deleted, Some(pos)) => {
                    let removed = inner.jobs.remove(pos);
                    inner.names.remove(&removed.name);
                }
                (JobStatus::Deleted, None) => {}
                (_, Some(pos)) => {
                    let old_name = inner.jobs[pos].name.clone();
                    inner.names.remove(&old_name);
                    inner.names.insert(job.name.clone(), job.id);
                    inner.jobs[pos] = job;
                }
                (_, None) => {
                    tracing::warn!(job_id = job.id, "update record for unknown job, skipping");
                }
            }
        }

        tracing::info!(jobs = inner.jobs.len(), "local job catalog loaded");
        Ok(Self {
            inner: Mutex::new(inner),
            data_dir,
        })
    }

    /// Add a new job. Cluster mode serializes catalog growth behind the
    /// distributed add mutex, allocates the id from the sequencer key, and
    /// fans the record out to peers in the background. Single-node mode is
    /// the purely local path.
    pub async fn add<S: KvStore>(
        &self,
        draft: JobDraft,
        cluster: Option<&Cluster<S>>,
    ) -> Result<Job> {
        // Cheap rejection before touching the cluster; the decisive check
        // happens again under the catalog lock.
        {
            let inner = self.inner.lock().unwrap();
            if inner.names.contains_key(&draft.name) {
                return Err(Error::DuplicateName(draft.name));
            }
        }

        match cluster {
            Some(cluster) => {
                let lock = ClusterMutex::new(cluster.leases.clone(), ADD_LOCK_KEY);
                lock.lock().await?;
                let result = self.add_locked(cluster, draft).await;
                lock.unlock().await;
                let job = result?;

                let body = Bytes::from(serde_json::to_vec(&job)?);
                replication::spawn_fan_out(cluster, job.id, body);
                Ok(job)
            }
            None => self.add_local(draft),
        }
    }

    /// The critical section of a clustered add. The local disk append
    /// happens before the record is published to `new_job_list`.
    async fn add_locked<S: KvStore>(
        &self,
        cluster: &Cluster<S>,
        draft: JobDraft,
    ) -> Result<Job> {
        let local_max = self.inner.lock().unwrap().max_seen_id;
        let id = sequencer::read_max(&cluster.meta).await?.max(local_max) + 1;
        let job = draft.into_job(id)?;

        sequencer::record_issued(&cluster.meta, id).await?;

        let body = serde_json::to_vec(&job)?;
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.names.contains_key(&job.name) {
                return Err(Error::DuplicateName(job.name));
            }
            self.append_frame(JOB_STORE_FILE, &job)?;
            insert_sorted(&mut inner, job.clone());
        }

        cluster.meta.put(&new_job_key(id), Bytes::from(body)).await?;
        Ok(job)
    }

    fn add_local(&self, draft: JobDraft) -> Result<Job> {
        let mut inner = self.inner.lock().unwrap();
        if inner.names.contains_key(&draft.name) {
            return Err(Error::DuplicateName(draft.name));
        }
        let job = draft.into_job(inner.max_seen_id + 1)?;
        self.append_frame(JOB_STORE_FILE, &job)?;
        insert_sorted(&mut inner, job.clone());
        Ok(job)
    }

    /// Accept a record replicated from a peer. Duplicates by id or name
    /// are silent no-ops so replays cannot storm.
    pub fn sync_job(&self, data: &[u8]) -> Result<()> {
        let job: Job = serde_json::from_slice(data)
            .map_err(|e| Error::Validation(format!("malformed job record: {e}")))?;

        let mut inner = self.inner.lock().unwrap();
        if inner.names.contains_key(&job.name) || inner.jobs.iter().any(|j| j.id == job.id) {
            tracing::debug!(job_id = job.id, "duplicate sync, ignoring");
            return Ok(());
        }
        self.append_frame(JOB_STORE_FILE, &job)?;
        let id = job.id;
        insert_sorted(&mut inner, job);
        tracing::info!(job_id = id, "job synced from peer");
        Ok(())
    }

    /// Patch a job in place. A status flip drives the scheduler: `On`
    /// schedules the job, `Off` pulls its entry from the heap.
    pub fn update_by_id(
        &self,
        id: u64,
        patch: JobPatch,
        scheduler: &SchedulerHandle,
    ) -> Result<Job> {
        if patch.status == Some(JobStatus::Deleted) {
            return Err(Error::Validation("unknown job status: 3".to_string()));
        }

        let (job, status_change) = {
            let mut inner = self.inner.lock().unwrap();
            let pos = position(&inner, id)?;
            let mut job = inner.jobs[pos].clone();
            let old_name = job.name.clone();

            if let Some(new_name) = patch
                .name
                .as_ref()
                .filter(|n| !n.is_empty() && **n != old_name)
            {
                if inner.names.contains_key(new_name.as_str()) {
                    return Err(Error::DuplicateName(new_name.clone()));
                }
            }

            let status_change = patch.apply(&mut job);
            job.validate()?;

            self.append_frame(JOB_UPDATE_FILE, &job)?;
            inner.jobs[pos] = job.clone();
            if job.name != old_name {
                inner.names.remove(&old_name);
                inner.names.insert(job.name.clone(), id);
            }
            (job, status_change)
        };

        match status_change {
            Some(JobStatus::On) => scheduler.schedule(job.clone()),
            Some(JobStatus::Off) => scheduler.unschedule(id),
            _ => {}
        }
        Ok(job)
    }

    pub fn find_job_by_id(&self, id: u64) -> Result<Job> {
        let inner = self.inner.lock().unwrap();
        let pos = position(&inner, id)?;
        Ok(inner.jobs[pos].clone())
    }

    /// `jobs[(page-1)*size .. min(page*size, len)]`; out of range only
    /// when the window starts at or past the end.
    pub fn find_job_list(&self, page: usize, size: usize) -> Result<Vec<Job>> {
        if page == 0 || size == 0 {
            return Err(Error::OutOfRange(
                "page and size must be >= 1".to_string(),
            ));
        }
        let inner = self.inner.lock().unwrap();
        let start = (page - 1) * size;
        if start >= inner.jobs.len() {
            return Err(Error::OutOfRange(format!("page {page} is out of range")));
        }
        let end = (page * size).min(inner.jobs.len());
        Ok(inner.jobs[start..end].to_vec())
    }

    /// Physical removal. A tombstone frame goes to `job_update` so the id
    /// stays burned across restarts, and the scheduler drops any entry.
    pub fn delete_by_id(&self, id: u64, scheduler: &SchedulerHandle) -> Result<Job> {
        let job = {
            let mut inner = self.inner.lock().unwrap();
            let pos = position(&inner, id)?;
            let mut tombstone = inner.jobs[pos].clone();
            tombstone.status = JobStatus::Deleted;
            self.append_frame(JOB_UPDATE_FILE, &tombstone)?;
            let job = inner.jobs.remove(pos);
            inner.names.remove(&job.name);
            job
        };
        scheduler.unschedule(id);
        Ok(job)
    }

    /// Snapshot of every live record, ascending by id.
    pub fn jobs(&self) -> Vec<Job> {
        self.inner.lock().unwrap().jobs.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest id ever seen locally, for sequencer seeding and local
    /// allocation.
    pub fn local_max_id(&self) -> u64 {
        self.inner.lock().unwrap().max_seen_id
    }

    /// Append one framed record; called with the catalog lock held so
    /// readers never observe torn records.
    fn append_frame(&self, file: &str, job: &Job) -> Result<()> {
        let mut buf = serde_json::to_vec(job)?;
        buf.push(JOB_SEPARATOR);
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.data_dir.join(file))?;
        f.write_all(&buf)?;
        Ok(())
    }
}

fn position(inner: &CatalogInner, id: u64) -> Result<usize> {
    if inner.jobs.is_empty() {
        return Err(Error::NotFound("job catalog is empty".to_string()));
    }
    if id == 0 {
        return Err(Error::OutOfRange("job id must be >= 1".to_string()));
    }
    inner
        .jobs
        .binary_search_by_key(&id, |j| j.id)
        .map_err(|_| Error::NotFound(format!("job {id} not found")))
}

fn insert_sorted(inner: &mut CatalogInner, job: Job) {
    let pos = inner
        .jobs
        .binary_search_by_key(&job.id, |j| j.id)
        .unwrap_or_else(|p| p);
    inner.names.insert(job.name.clone(), job.id);
    inner.max_seen_id = inner.max_seen_id.max(job.id);
    inner.jobs.insert(pos, job);
}

/// Read every complete frame of an append-only log. A torn trailing record
/// (crash mid-append) is skipped; corruption elsewhere is a storage error.
fn read_frames(path: &Path) -> Result<Vec<Job>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = std::fs::read(path)?;
    let complete = data.last() == Some(&JOB_SEPARATOR);
    let chunks: Vec<&[u8]> = data.split(|b| *b == JOB_SEPARATOR).collect();
    let last = chunks.len() - 1;

    let mut jobs = Vec::new();
    for (i, chunk) in chunks.into_iter().enumerate() {
        if chunk.is_empty() {
            continue;
        }
        if i == last && !complete {
            tracing::warn!(path = %path.display(), "ignoring torn trailing record");
            break;
        }
        jobs.push(serde_json::from_slice(chunk)?);
    }
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobMode;
    use crate::mocks::MemoryKv;
    use crate::scheduler::SchedulerHandle;

    fn draft(name: &str) -> JobDraft {
        JobDraft {
            name: name.to_string(),
            spec: "* * * * * *".to_string(),
            mode: JobMode::Shell,
            exec: "echo hi".to_string(),
            desc: String::new(),
            args: serde_json::Map::new(),
            depend: Vec::new(),
            exec_num: None,
        }
    }

    async fn add_local(catalog: &JobCatalog, name: &str) -> Result<Job> {
        catalog.add::<MemoryKv>(draft(name), None).await
    }

    #[tokio::test]
    async fn local_adds_issue_sequential_ids() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JobCatalog::open(dir.path().to_path_buf()).unwrap();

        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let job = add_local(&catalog, name).await.unwrap();
            assert_eq!(job.id, i as u64 + 1);
        }
        assert_eq!(catalog.local_max_id(), 3);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JobCatalog::open(dir.path().to_path_buf()).unwrap();
        add_local(&catalog, "a").await.unwrap();

        let err = add_local(&catalog, "a").await.unwrap_err();
        assert!(matches!(err, Error::DuplicateName(_)));
    }

    #[tokio::test]
    async fn concurrent_duplicate_adds_yield_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = std::sync::Arc::new(JobCatalog::open(dir.path().to_path_buf()).unwrap());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let catalog = catalog.clone();
            tasks.push(tokio::spawn(async move {
                catalog.add::<MemoryKv>(draft("same"), None).await.is_ok()
            }));
        }
        let mut winners = 0;
        for t in tasks {
            if t.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn catalog_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let (sched, _rx) = SchedulerHandle::detached();
        {
            let catalog = JobCatalog::open(dir.path().to_path_buf()).unwrap();
            add_local(&catalog, "keep").await.unwrap();
            add_local(&catalog, "rename-me").await.unwrap();
            add_local(&catalog, "drop-me").await.unwrap();
            catalog
                .update_by_id(
                    2,
                    JobPatch {
                        name: Some("renamed".to_string()),
                        status: Some(JobStatus::On),
                        ..Default::default()
                    },
                    &sched,
                )
                .unwrap();
            catalog.delete_by_id(3, &sched).unwrap();
        }

        let reloaded = JobCatalog::open(dir.path().to_path_buf()).unwrap();
        let jobs = reloaded.jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].name, "keep");
        assert_eq!(jobs[1].name, "renamed");
        assert_eq!(jobs[1].status, JobStatus::On);
        // Id 3 stays burned after the tombstone replay.
        assert_eq!(reloaded.local_max_id(), 3);
        let next = add_local(&reloaded, "new").await.unwrap();
        assert_eq!(next.id, 4);
    }

    #[tokio::test]
    async fn sync_is_idempotent_by_id_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JobCatalog::open(dir.path().to_path_buf()).unwrap();

        let job = draft("from-peer").into_job(9).unwrap();
        let bytes = serde_json::to_vec(&job).unwrap();
        catalog.sync_job(&bytes).unwrap();
        catalog.sync_job(&bytes).unwrap();

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.local_max_id(), 9);
    }

    #[tokio::test]
    async fn pagination_follows_the_window_rule() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JobCatalog::open(dir.path().to_path_buf()).unwrap();
        for name in ["a", "b", "c", "d", "e"] {
            add_local(&catalog, name).await.unwrap();
        }

        let page1 = catalog.find_job_list(1, 2).unwrap();
        assert_eq!(page1.iter().map(|j| j.id).collect::<Vec<_>>(), vec![1, 2]);

        // Final partial page.
        let page3 = catalog.find_job_list(3, 2).unwrap();
        assert_eq!(page3.iter().map(|j| j.id).collect::<Vec<_>>(), vec![5]);

        // (page-1)*size >= len fails.
        assert!(matches!(
            catalog.find_job_list(4, 2),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            catalog.find_job_list(0, 2),
            Err(Error::OutOfRange(_))
        ));
    }

    #[tokio::test]
    async fn find_by_id_reports_missing_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JobCatalog::open(dir.path().to_path_buf()).unwrap();
        assert!(matches!(
            catalog.find_job_by_id(1),
            Err(Error::NotFound(_))
        ));

        add_local(&catalog, "a").await.unwrap();
        assert!(catalog.find_job_by_id(1).is_ok());
        assert!(matches!(
            catalog.find_job_by_id(2),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            catalog.find_job_by_id(0),
            Err(Error::OutOfRange(_))
        ));
    }

    #[tokio::test]
    async fn rename_collision_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JobCatalog::open(dir.path().to_path_buf()).unwrap();
        let (sched, _rx) = SchedulerHandle::detached();
        add_local(&catalog, "a").await.unwrap();
        add_local(&catalog, "b").await.unwrap();

        let err = catalog
            .update_by_id(
                2,
                JobPatch {
                    name: Some("a".to_string()),
                    ..Default::default()
                },
                &sched,
            )
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName(_)));
    }

    #[tokio::test]
    async fn torn_trailing_record_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        {
            let catalog = JobCatalog::open(dir.path().to_path_buf()).unwrap();
            add_local(&catalog, "whole").await.unwrap();
        }
        // Simulate a crash mid-append.
        let path = dir.path().join(JOB_STORE_FILE);
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"id\":2,\"name\":\"tor").unwrap();
        drop(f);

        let catalog = JobCatalog::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(catalog.len(), 1);
    }
}
