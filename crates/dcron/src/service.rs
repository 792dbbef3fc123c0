use std::sync::Arc;

use crate::{
    catalog::JobCatalog,
    cluster::Cluster,
    config::Config,
    error::{Error, Result},
    job::JobStatus,
    nats_store::{self, NatsKv},
    registry::{Node, NodeRegistry},
    runner::ExecRunner,
    scheduler::CronScheduler,
    sequencer::MaxIdSequencer,
    server::{self, AppState},
    shutdown::{spawn_signal_handler, Shutdown},
};

/// Bring the whole service up and run it until shutdown: coordination
/// first, then the local catalog, then the HTTP façade, then the tick
/// loop. Returns an error when the run ended on a fatal condition, so the
/// process can exit non-zero under its supervisor.
pub async fn run(config: Config) -> Result<()> {
    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    // 1. Coordination. No endpoints means single-node mode: no peers, no
    //    mutex, no run-entry publication — adds are purely local.
    let cluster = if config.store_endpoints.is_empty() {
        tracing::info!("no store endpoints configured, running single-node");
        None
    } else {
        Some(join_cluster(&config, shutdown.clone()).await?)
    };

    // 2. Local catalog.
    let catalog = Arc::new(JobCatalog::open(config.data_dir()?)?);

    if let Some(cluster) = &cluster {
        let sequencer = MaxIdSequencer::new(cluster);
        sequencer
            .publish_local_max(catalog.local_max_id(), shutdown.clone())
            .await?;
    }

    // 3. Scheduler, fed with every job already enabled.
    let (scheduler, handle) =
        CronScheduler::new(ExecRunner::new(), cluster.clone(), shutdown.clone());
    for job in catalog.jobs() {
        if job.status == JobStatus::On {
            handle.schedule(job);
        }
    }

    // 4. HTTP façade.
    let state = AppState {
        catalog: catalog.clone(),
        scheduler: handle.clone(),
        cluster: cluster.clone(),
    };
    {
        let shutdown = shutdown.clone();
        let port = config.port;
        tokio::spawn(async move {
            if let Err(e) = server::serve(state, port, shutdown.clone()).await {
                shutdown.fail(&format!("http server failed: {e}"));
            }
        });
    }

    tracing::info!(name = %config.name, "service is working");
    scheduler.run().await;

    if shutdown.is_fatal() {
        Err(Error::Fatal("service stopped on an unrecoverable error".to_string()))
    } else {
        Ok(())
    }
}

/// Connect the store, register this node, and start membership tracking.
async fn join_cluster(config: &Config, shutdown: Shutdown) -> Result<Cluster<NatsKv>> {
    let client = nats_store::connect(&config.store_endpoints).await?;
    let (meta, leases) = nats_store::open_buckets(&client, &config.name).await?;

    let registry = NodeRegistry::new(leases.clone(), Node::local());
    let revision = registry.register().await?;
    registry.spawn_keep_alive(revision, shutdown.clone());
    registry.seed_and_watch(shutdown).await?;

    Ok(Cluster::new(
        meta,
        leases,
        registry.node.clone(),
        config.port,
        registry.peers(),
    ))
}
