use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{Local, Utc};
use tokio::sync::mpsc;

use crate::{
    cluster::Cluster,
    entries::{self, RunEntry},
    heap::{Entry, EntryHeap},
    job::Job,
    runner::JobRunner,
    shutdown::Shutdown,
    store::KvStore,
};

/// Coarse clock driving the due check. Schedules are second-resolution, so
/// ten ticks per second keeps fire jitter well under the grid.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

pub enum SchedulerCmd {
    Schedule(Job),
    Unschedule(u64),
}

/// Control-plane handle to the scheduler loop. All heap mutation funnels
/// through this channel, so the loop stays the heap's only owner.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerCmd>,
}

impl SchedulerHandle {
    pub fn schedule(&self, job: Job) {
        if self.tx.send(SchedulerCmd::Schedule(job)).is_err() {
            tracing::warn!("scheduler loop is gone, schedule request dropped");
        }
    }

    pub fn unschedule(&self, id: u64) {
        if self.tx.send(SchedulerCmd::Unschedule(id)).is_err() {
            tracing::warn!("scheduler loop is gone, unschedule request dropped");
        }
    }

    /// A handle wired to nothing but its receiver, for code paths under
    /// test that only need somewhere to send.
    #[cfg(any(test, feature = "test-support"))]
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<SchedulerCmd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// The tick loop: pops due entries, hands each off to a dispatch task, and
/// re-inserts with the next fire time computed from the *start* instant.
pub struct CronScheduler<S: KvStore, R: JobRunner> {
    heap: EntryHeap,
    commands: mpsc::UnboundedReceiver<SchedulerCmd>,
    runner: R,
    cluster: Option<Cluster<S>>,
    shutdown: Shutdown,
}

impl<S: KvStore, R: JobRunner> CronScheduler<S, R> {
    pub fn new(
        runner: R,
        cluster: Option<Cluster<S>>,
        shutdown: Shutdown,
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                heap: EntryHeap::new(),
                commands: rx,
                runner,
                cluster,
                shutdown,
            },
            SchedulerHandle { tx },
        )
    }

    /// Run until cancellation. In-flight dispatch tasks are not awaited;
    /// they carry their own lifecycle.
    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tracing::info!("scheduler loop started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("scheduler loop stopped");
                    return;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        tracing::info!("scheduler control channel closed");
                        return;
                    }
                },
                _ = tick.tick() => self.drain_due(),
            }
        }
    }

    fn handle_command(&mut self, command: SchedulerCmd) {
        match command {
            SchedulerCmd::Schedule(job) => {
                // Re-scheduling an already-scheduled job replaces its entry.
                self.heap.delete(job.id);
                let schedule = match dcron_schedule::parse(&job.spec) {
                    Ok(schedule) => schedule,
                    Err(e) => {
                        tracing::warn!(job_id = job.id, error = %e, "invalid spec reached the scheduler");
                        return;
                    }
                };
                match schedule.next(Local::now()) {
                    Some(next) => {
                        tracing::debug!(job_id = job.id, next = %next, "job scheduled");
                        self.heap.push(Entry::new(schedule, next, job));
                    }
                    None => {
                        tracing::warn!(
                            job_id = job.id,
                            spec = %job.spec,
                            "schedule has no reachable fire time, not scheduling"
                        );
                    }
                }
            }
            SchedulerCmd::Unschedule(id) => {
                if !self.heap.delete(id) {
                    tracing::debug!(job_id = id, "job was not scheduled");
                }
            }
        }
    }

    /// Fire everything due as of now. Several entries can come due within
    /// one tick; they all dispatch before the loop yields.
    fn drain_due(&mut self) {
        loop {
            let now = Local::now();
            match self.heap.peek() {
                Some(entry) if entry.next_time <= now => {}
                _ => return,
            }
            let Some(mut entry) = self.heap.pop() else {
                return;
            };

            let next = entry.schedule.next(now);
            entry.prev_time = Some(now);
            self.dispatch(&entry, now, next);

            match next {
                Some(next_time) => {
                    entry.next_time = next_time;
                    self.heap.push(entry);
                }
                None => {
                    tracing::warn!(
                        job_id = entry.job.id,
                        "schedule has no further fire times, dropping entry"
                    );
                }
            }
        }
    }

    /// Non-blocking hand-off: raise the executing flag, publish the run
    /// entry, run the job, clear both. The scheduler never waits on
    /// completion — rescheduling already happened from the start time.
    fn dispatch(
        &self,
        entry: &Entry,
        fired_at: chrono::DateTime<Local>,
        next: Option<chrono::DateTime<Local>>,
    ) {
        let executing = entry.executing.clone();
        let job = entry.job.clone();
        let runner = self.runner.clone();
        let cluster = self.cluster.clone();
        let shutdown = self.shutdown.clone();

        // Raised before the task is scheduled so the flag is already
        // visible when this function returns.
        executing.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            if let Some(cluster) = &cluster {
                let run = RunEntry {
                    ip: cluster.node.ip.clone(),
                    prev_time: fired_at.with_timezone(&Utc),
                    next_time: next.map(|t| t.with_timezone(&Utc)),
                    job_id: job.id,
                };
                if let Err(e) = entries::publish(&cluster.meta, &run).await {
                    shutdown.fail(&format!("failed to publish run entry: {e}"));
                }
            }

            if let Err(e) = runner.run(&job).await {
                tracing::error!(job_id = job.id, name = %job.name, error = %e, "job execution failed");
            }

            if let Some(cluster) = &cluster {
                if let Err(e) = entries::clear(&cluster.meta, job.id).await {
                    shutdown.fail(&format!("failed to clear run entry: {e}"));
                }
            }
            executing.store(false, Ordering::SeqCst);
        });
    }
}
