use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use paceline_metrics::Collector;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinError;
use tokio::time::Instant;

use crate::config::{OverflowPolicy, PoolConfig};
use crate::shutdown::Shutdown;
use crate::stats::ScenarioStats;
use crate::summary::PoolStats;
use crate::workload::{IterationContext, IterationOutcome, IterationRecord, Workload};

pub const ITERATION_SUCCESS: &str = "iteration_success";
pub const ITERATION_DURATION: &str = "iteration_duration";

/// An iteration released by a scheduler, waiting for a slot.
#[derive(Debug)]
pub(crate) struct Job {
    pub stats: Arc<ScenarioStats>,
    pub iteration: u64,
    pub scheduled_at: Instant,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// A slot picked the iteration up immediately.
    Started,
    /// Every slot was busy; the iteration waits in the backlog.
    Queued,
    /// Every slot was busy and the backlog was full.
    Dropped,
}

#[derive(Debug, Default)]
struct Counters {
    released: AtomicU64,
    executed: AtomicU64,
    dropped: AtomicU64,
    queued: AtomicU64,
    slots_created: AtomicU64,
    activations: AtomicU64,
    deactivations: AtomicU64,
    high_water_mark: AtomicU64,
}

#[derive(Debug)]
struct State {
    idle: Vec<u64>,
    slots: u64,
    busy: u64,
    queue: VecDeque<Job>,
}

enum Placement {
    Run(u64, Job),
    Queued,
    Dropped,
    Full(Job),
}

enum Finished {
    Done(Result<Result<(), String>, JoinError>),
    TimedOut,
    Aborted,
}

struct Inner {
    config: PoolConfig,
    workload: Arc<dyn Workload>,
    metrics: Arc<Collector>,
    state: Mutex<State>,
    /// Backlog space freed up.
    space: Notify,
    /// A slot went idle.
    quiet: Notify,
    /// Run-level cancellation; releases blocked submitters.
    cancel: Shutdown,
    /// Aborts in-flight and queued iterations.
    abort: Shutdown,
    counters: Counters,
}

/// Bounded set of reusable execution slots shared by every scenario of a run.
///
/// `pre_allocated` slots exist from construction; further slots are created on demand up to
/// `max` and are kept for reuse once idle. Releases that find every slot busy wait in a
/// bounded FIFO backlog, and what does not fit is handled per [`OverflowPolicy`].
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(
        config: PoolConfig,
        workload: Arc<dyn Workload>,
        metrics: Arc<Collector>,
        cancel: Shutdown,
    ) -> Self {
        let counters = Counters::default();
        counters
            .slots_created
            .store(config.pre_allocated, Ordering::Relaxed);

        // Reversed so the lowest id is handed out first.
        let idle: Vec<u64> = (0..config.pre_allocated).rev().collect();
        let state = State {
            idle,
            slots: config.pre_allocated,
            busy: 0,
            queue: VecDeque::new(),
        };

        Self {
            inner: Arc::new(Inner {
                config,
                workload,
                metrics,
                state: Mutex::new(state),
                space: Notify::new(),
                quiet: Notify::new(),
                cancel,
                abort: Shutdown::new(),
                counters,
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Hand an iteration to the pool. Only waits under [`OverflowPolicy::Block`].
    pub(crate) async fn submit(&self, job: Job) -> Release {
        self.inner.counters.released.fetch_add(1, Ordering::Relaxed);

        let mut job = job;
        loop {
            let space = self.inner.space.notified();
            let placement = if self.inner.abort.is_triggered() {
                self.inner.reject(&job)
            } else {
                self.inner.place(job)
            };

            match placement {
                Placement::Run(slot, job) => {
                    tokio::spawn(run_slot(self.inner.clone(), slot, job));
                    return Release::Started;
                }
                Placement::Queued => return Release::Queued,
                Placement::Dropped => return Release::Dropped,
                Placement::Full(back) => job = back,
            }

            tokio::select! {
                biased;
                _ = self.inner.cancel.wait() => {
                    self.inner.reject(&job);
                    return Release::Dropped;
                }
                _ = self.inner.abort.wait() => {}
                _ = space => {}
            }
        }
    }

    /// Number of slots currently running an iteration.
    pub fn busy(&self) -> u64 {
        self.inner.state.lock().busy
    }

    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Resolves once no iteration is running or waiting.
    pub async fn drain(&self) {
        loop {
            let quiet = self.inner.quiet.notified();
            {
                let st = self.inner.state.lock();
                if st.busy == 0 && st.queue.is_empty() {
                    return;
                }
            }
            quiet.await;
        }
    }

    /// Abort in-flight iterations; backlog entries are still taken off the queue, but finish
    /// immediately as aborted.
    pub fn abort(&self) {
        self.inner.abort.trigger();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.abort.is_triggered()
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.inner.counters;
        PoolStats {
            pre_allocated: self.inner.config.pre_allocated,
            max: self.inner.config.max,
            released: c.released.load(Ordering::Relaxed),
            executed: c.executed.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            queued: c.queued.load(Ordering::Relaxed),
            slots_created: c.slots_created.load(Ordering::Relaxed),
            activations: c.activations.load(Ordering::Relaxed),
            deactivations: c.deactivations.load(Ordering::Relaxed),
            high_water_mark: c.high_water_mark.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    fn place(&self, job: Job) -> Placement {
        let mut st = self.state.lock();

        let slot = match st.idle.pop() {
            Some(slot) => Some(slot),
            None if st.slots < self.config.max => {
                let slot = st.slots;
                st.slots += 1;
                self.counters.slots_created.fetch_add(1, Ordering::Relaxed);
                Some(slot)
            }
            None => None,
        };

        if let Some(slot) = slot {
            st.busy += 1;
            self.counters.activations.fetch_add(1, Ordering::Relaxed);
            self.counters
                .high_water_mark
                .fetch_max(st.busy, Ordering::Relaxed);
            return Placement::Run(slot, job);
        }

        if st.queue.len() < self.config.queue_capacity {
            st.queue.push_back(job);
            self.counters.queued.fetch_add(1, Ordering::Relaxed);
            return Placement::Queued;
        }

        drop(st);
        match self.config.overflow {
            OverflowPolicy::Drop => self.reject(&job),
            OverflowPolicy::Block => Placement::Full(job),
        }
    }

    fn reject(&self, job: &Job) -> Placement {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        job.stats.record_dropped();
        Placement::Dropped
    }

    /// Next backlog entry for `slot`, or return the slot to the idle set.
    fn next_job(&self, slot: u64) -> Option<Job> {
        let mut st = self.state.lock();
        match st.queue.pop_front() {
            Some(job) => Some(job),
            None => {
                st.busy -= 1;
                st.idle.push(slot);
                None
            }
        }
    }

    async fn execute(&self, slot: u64, job: Job) {
        let started_at = Instant::now();
        self.counters.executed.fetch_add(1, Ordering::Relaxed);

        let lag = started_at.saturating_duration_since(job.scheduled_at);
        if job.stats.record_started(lag) {
            log::debug!(
                "scenario `{}` iteration {} started {:?} late",
                job.stats.name(),
                job.iteration,
                lag
            );
        }

        let outcome = if self.abort.is_triggered() {
            IterationOutcome::Aborted
        } else {
            self.run_workload(slot, &job).await
        };

        let record = IterationRecord {
            scenario: job.stats.name().clone(),
            iteration: job.iteration,
            slot,
            scheduled_at: job.scheduled_at,
            started_at,
            finished_at: Instant::now(),
            outcome,
        };
        if let Some(detail) = record.outcome.detail() {
            log::debug!(
                "scenario `{}` iteration {} failed: {detail}",
                record.scenario,
                record.iteration
            );
        }
        job.stats.record_finished(&record);
        self.record_metrics(&record);
    }

    async fn run_workload(&self, slot: u64, job: &Job) -> IterationOutcome {
        let ctx = IterationContext {
            scenario: job.stats.name().clone(),
            exec: job.stats.exec().clone(),
            iteration: job.iteration,
            slot,
            scheduled_at: job.scheduled_at,
            metrics: self.metrics.clone(),
            shutdown: self.abort.clone(),
        };

        // Spawned separately so a panicking workload only fails its own iteration.
        let mut handle = tokio::spawn(self.workload.call(ctx));

        let finished = {
            let run = async {
                match job.timeout {
                    Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                        Ok(res) => Finished::Done(res),
                        Err(_) => Finished::TimedOut,
                    },
                    None => Finished::Done((&mut handle).await),
                }
            };

            tokio::select! {
                biased;
                _ = self.abort.wait() => Finished::Aborted,
                f = run => f,
            }
        };

        match finished {
            Finished::Done(Ok(Ok(()))) => IterationOutcome::Succeeded,
            Finished::Done(Ok(Err(msg))) => IterationOutcome::Failed(msg),
            Finished::Done(Err(err)) if err.is_panic() => {
                IterationOutcome::Failed("iteration panicked".to_string())
            }
            Finished::Done(Err(_)) => IterationOutcome::Aborted,
            Finished::TimedOut => {
                handle.abort();
                IterationOutcome::TimedOut
            }
            Finished::Aborted => {
                handle.abort();
                IterationOutcome::Aborted
            }
        }
    }

    fn record_metrics(&self, record: &IterationRecord) {
        if let Err(err) = self
            .metrics
            .record_rate(ITERATION_SUCCESS, record.outcome.is_success())
        {
            log::warn!("failed to record `{ITERATION_SUCCESS}`: {err}");
        }

        let elapsed_ms = record.elapsed().as_secs_f64() * 1_000.0;
        if let Err(err) = self.metrics.record_trend(ITERATION_DURATION, elapsed_ms) {
            log::warn!("failed to record `{ITERATION_DURATION}`: {err}");
        }
    }
}

/// Drive one slot: run `job`, then keep taking backlog entries until the backlog is empty.
async fn run_slot(inner: Arc<Inner>, slot: u64, job: Job) {
    let mut job = job;
    loop {
        inner.execute(slot, job).await;

        match inner.next_job(slot) {
            Some(next) => {
                inner.space.notify_waiters();
                job = next;
            }
            None => {
                inner.counters.deactivations.fetch_add(1, Ordering::Relaxed);
                // An idle slot is space for a blocked submitter too.
                inner.space.notify_waiters();
                inner.quiet.notify_waiters();
                return;
            }
        }
    }
}
