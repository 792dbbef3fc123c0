//! # dcron
//!
//! Distributed cron service: peer nodes share a replicated catalog of
//! scheduled jobs and cooperate through a consensus-backed KV store to run
//! each job on its six-field, second-resolution cron expression.
//!
//! ## Architecture
//!
//! - Jobs live in a local, id-sorted [`catalog`] persisted as append-only
//!   framed logs; adds replicate to every peer over HTTP fan-out.
//! - The [`scheduler`] drives a min-[`heap`] of compiled schedules on a
//!   100 ms tick and hands due jobs to an opaque [`runner`].
//! - Cluster state — node liveness, the add mutex, the max-id sequencer,
//!   currently-running [`entries`] — lives in two KV buckets behind the
//!   [`store::KvStore`] seam (JetStream KV in production, an in-memory
//!   mock under the `test-support` feature).
//! - Execution is best-effort single-runner per fire: the advisory
//!   coordination never guarantees cluster-wide at-most-once.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use dcron::{config::Config, service};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::load("conf/config.toml".as_ref()).unwrap();
//!     service::run(config).await.unwrap();
//! }
//! ```

pub mod catalog;
pub mod cluster;
pub mod config;
pub mod entries;
pub mod error;
pub mod heap;
pub mod job;
pub mod mutex;
pub mod nats_store;
pub mod registry;
pub mod replication;
pub mod runner;
pub mod scheduler;
pub mod sequencer;
pub mod server;
pub mod service;
pub mod shutdown;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod mocks;

pub use catalog::JobCatalog;
pub use config::Config;
pub use error::{Error, Result};
pub use job::{Job, JobDraft, JobMode, JobPatch, JobStatus};
pub use scheduler::{CronScheduler, SchedulerHandle};
