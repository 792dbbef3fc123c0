use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    catalog::JobCatalog,
    cluster::Cluster,
    entries,
    error::{Error, Result},
    job::{JobDraft, JobPatch, JobStatus},
    scheduler::SchedulerHandle,
    shutdown::Shutdown,
    store::KvStore,
};

/// Shared state of the HTTP façade.
pub struct AppState<S: KvStore> {
    pub catalog: Arc<JobCatalog>,
    pub scheduler: SchedulerHandle,
    pub cluster: Option<Cluster<S>>,
}

impl<S: KvStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
            scheduler: self.scheduler.clone(),
            cluster: self.cluster.clone(),
        }
    }
}

pub fn router<S: KvStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/job", post(add_job).put(add_job))
        .route(
            "/job/{id}",
            get(find_job).patch(update_job).delete(delete_job),
        )
        .route("/job/{id}/on", put(enable_job))
        .route("/job/{id}/off", put(disable_job))
        .route("/jobs", get(list_jobs))
        .route("/entries", get(list_entries))
        .route("/job/sync", post(sync_job))
        .with_state(state)
}

/// Serve the façade until shutdown.
pub async fn serve<S: KvStore>(state: AppState<S>, port: u16, shutdown: Shutdown) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "http server listening");

    let cancel = shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

/// Every response wears the `{status, msg, data}` envelope with a matching
/// HTTP status.
fn reply(status: StatusCode, msg: &str, data: Option<Value>) -> Response {
    let mut body = json!({
        "status": status.as_u16(),
        "msg": msg,
    });
    if let Some(data) = data {
        body["data"] = data;
    }
    (status, Json(body)).into_response()
}

fn ok(data: Option<Value>) -> Response {
    reply(StatusCode::OK, "success", data)
}

fn fail(err: Error) -> Response {
    reply(err.status_code(), &err.to_string(), None)
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::Validation(format!("malformed request body: {e}")))
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_size")]
    size: usize,
}

fn default_page() -> usize {
    1
}

fn default_size() -> usize {
    20
}

async fn add_job<S: KvStore>(State(state): State<AppState<S>>, body: Bytes) -> Response {
    let draft: JobDraft = match parse_body(&body) {
        Ok(draft) => draft,
        Err(e) => return fail(e),
    };
    match state.catalog.add(draft, state.cluster.as_ref()).await {
        Ok(job) => ok(serde_json::to_value(&job).ok()),
        Err(e) => fail(e),
    }
}

async fn update_job<S: KvStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<u64>,
    body: Bytes,
) -> Response {
    let patch: JobPatch = match parse_body(&body) {
        Ok(patch) => patch,
        Err(e) => return fail(e),
    };
    match state.catalog.update_by_id(id, patch, &state.scheduler) {
        Ok(job) => ok(serde_json::to_value(&job).ok()),
        Err(e) => fail(e),
    }
}

async fn set_status<S: KvStore>(state: &AppState<S>, id: u64, status: JobStatus) -> Response {
    let patch = JobPatch {
        status: Some(status),
        ..Default::default()
    };
    match state.catalog.update_by_id(id, patch, &state.scheduler) {
        Ok(job) => ok(serde_json::to_value(&job).ok()),
        Err(e) => fail(e),
    }
}

async fn enable_job<S: KvStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<u64>,
) -> Response {
    set_status(&state, id, JobStatus::On).await
}

async fn disable_job<S: KvStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<u64>,
) -> Response {
    set_status(&state, id, JobStatus::Off).await
}

async fn find_job<S: KvStore>(State(state): State<AppState<S>>, Path(id): Path<u64>) -> Response {
    match state.catalog.find_job_by_id(id) {
        Ok(job) => ok(serde_json::to_value(&job).ok()),
        Err(e) => fail(e),
    }
}

async fn list_jobs<S: KvStore>(
    State(state): State<AppState<S>>,
    Query(query): Query<PageQuery>,
) -> Response {
    match state.catalog.find_job_list(query.page, query.size) {
        Ok(jobs) => ok(serde_json::to_value(&jobs).ok()),
        Err(e) => fail(e),
    }
}

async fn delete_job<S: KvStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<u64>,
) -> Response {
    match state.catalog.delete_by_id(id, &state.scheduler) {
        Ok(job) => ok(serde_json::to_value(&job).ok()),
        Err(e) => fail(e),
    }
}

async fn list_entries<S: KvStore>(
    State(state): State<AppState<S>>,
    Query(query): Query<PageQuery>,
) -> Response {
    let Some(cluster) = &state.cluster else {
        // Single-node mode has no store to consult; nothing is published.
        return ok(Some(json!([])));
    };
    match entries::find_entries(&cluster.meta, &state.catalog, query.page, query.size).await {
        Ok(list) => ok(serde_json::to_value(&list).ok()),
        Err(e) => fail(e),
    }
}

/// Internal replication acceptor: a peer pushes a freshly added job record.
async fn sync_job<S: KvStore>(State(state): State<AppState<S>>, body: Bytes) -> Response {
    match state.catalog.sync_job(&body) {
        Ok(()) => ok(None),
        Err(e) => fail(e),
    }
}
