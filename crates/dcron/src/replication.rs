use std::time::Duration;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;

use crate::{
    cluster::Cluster,
    store::{new_job_key, KvStore},
};

/// Total wall-clock budget for one add's fan-out to every peer.
pub const SYNC_WINDOW: Duration = Duration::from_secs(5);

/// POST the serialized job to each peer's `/job/sync` concurrently. Returns
/// true only when every peer confirmed inside the window.
pub async fn fan_out(client: &reqwest::Client, peers: &[String], body: Bytes) -> bool {
    if peers.is_empty() {
        return true;
    }

    let posts = peers.iter().map(|peer| {
        let url = format!("http://{peer}/job/sync");
        let client = client.clone();
        let body = body.clone();
        async move {
            match client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => true,
                Ok(resp) => {
                    tracing::warn!(%url, status = %resp.status(), "peer sync rejected");
                    false
                }
                Err(e) => {
                    tracing::warn!(%url, error = %e, "peer sync failed");
                    false
                }
            }
        }
    });

    match tokio::time::timeout(SYNC_WINDOW, futures::future::join_all(posts)).await {
        Ok(results) => results.into_iter().all(|ok| ok),
        Err(_) => {
            tracing::warn!("peer sync window elapsed");
            false
        }
    }
}

/// Background fan-out for a freshly added job. When every peer confirms,
/// the pending `new_job_list` record is removed; otherwise it stays behind
/// for a reconciler to retry — the local add has already succeeded either
/// way.
pub fn spawn_fan_out<S: KvStore>(cluster: &Cluster<S>, id: u64, body: Bytes) {
    let client = cluster.http.clone();
    let peers = cluster.peer_addrs();
    let meta = cluster.meta.clone();
    tokio::spawn(async move {
        if fan_out(&client, &peers, body).await {
            if let Err(e) = meta.delete(&new_job_key(id)).await {
                tracing::warn!(job_id = id, error = %e, "failed to clear replicated job record");
            }
        } else {
            tracing::warn!(
                job_id = id,
                "peer sync incomplete, leaving new_job_list record for reconciliation"
            );
        }
    });
}
