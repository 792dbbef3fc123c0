use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::JobCatalog,
    error::{Error, Result},
    job::Job,
    store::{entry_key, KvStore, ENTRY_PREFIX},
};

/// The record published to the store while a job executes on some node.
/// Put on dispatch, deleted on completion; keyed `entries.<job_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEntry {
    pub ip: String,
    pub prev_time: DateTime<Utc>,
    /// Absent when the schedule has no further fire time.
    #[serde(default)]
    pub next_time: Option<DateTime<Utc>>,
    pub job_id: u64,
}

pub async fn publish<S: KvStore>(store: &S, entry: &RunEntry) -> Result<()> {
    let value = serde_json::to_vec(entry)?;
    store
        .put(&entry_key(entry.job_id), value.into())
        .await
        .map(|_| ())
}

pub async fn clear<S: KvStore>(store: &S, job_id: u64) -> Result<()> {
    store.delete(&entry_key(job_id)).await
}

/// A run-entry joined with its catalog record, for `GET /entries`.
#[derive(Debug, Clone, Serialize)]
pub struct RunningJob {
    #[serde(flatten)]
    pub entry: RunEntry,
    pub job: Job,
}

/// Page through everything currently executing across the cluster. The set
/// is volatile (an entry may vanish between the read and the response), so
/// the window is best-effort: records past the end yield an empty page and
/// records whose job has not replicated here yet are skipped.
pub async fn find_entries<S: KvStore>(
    store: &S,
    catalog: &JobCatalog,
    page: usize,
    size: usize,
) -> Result<Vec<RunningJob>> {
    if page == 0 || size == 0 {
        return Err(Error::OutOfRange(
            "page and size must be >= 1".to_string(),
        ));
    }

    let all = store.get_prefix(ENTRY_PREFIX).await?;
    let mut list = Vec::new();
    for kv_entry in all.into_iter().skip((page - 1) * size).take(size) {
        let entry: RunEntry = match serde_json::from_slice(&kv_entry.value) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %kv_entry.key, error = %e, "malformed run entry, skipping");
                continue;
            }
        };
        match catalog.find_job_by_id(entry.job_id) {
            Ok(job) => list.push(RunningJob { entry, job }),
            Err(_) => {
                tracing::debug!(job_id = entry.job_id, "run entry references unknown job, skipping");
            }
        }
    }
    Ok(list)
}
