use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use paceline_metrics::Collector;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{RunPlan, ScenarioConfig};
use crate::error::Result;
use crate::pool::WorkerPool;
use crate::progress::{
    PoolProgress, ProgressFn, ProgressUpdate, ScenarioProgress, ScenarioState, StageProgress,
};
use crate::schedule::RateSchedule;
use crate::scheduler::ArrivalScheduler;
use crate::shutdown::Shutdown;
use crate::stats::ScenarioStats;
use crate::summary::RunSummary;
use crate::thresholds_eval::evaluate_thresholds;
use crate::workload::{IterationContext, Workload};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Run-scoped shared state handed to the engine by the caller.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub metrics: Arc<Collector>,
    pub shutdown: Shutdown,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
struct ScenarioEntry {
    config: ScenarioConfig,
    schedule: RateSchedule,
    stats: Arc<ScenarioStats>,
}

pub async fn run_scenarios<F, Fut, E>(
    plan: RunPlan,
    ctx: RunContext,
    workload: F,
    progress: Option<ProgressFn>,
) -> Result<RunSummary>
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    run_workload(plan, ctx, Arc::new(workload), progress).await
}

/// Execute every scenario of `plan` against one shared pool and evaluate the thresholds.
///
/// Returns once every scheduler has stopped and the pool is empty. A triggered
/// `ctx.shutdown` stops the schedulers and aborts whatever is still running; otherwise
/// in-flight iterations get `graceful_stop` to finish before they are aborted.
pub async fn run_workload(
    plan: RunPlan,
    ctx: RunContext,
    workload: Arc<dyn Workload>,
    progress: Option<ProgressFn>,
) -> Result<RunSummary> {
    let RunPlan {
        scenarios,
        thresholds,
        pool: pool_config,
        miss_tolerance,
        graceful_stop,
    } = plan;

    let pool = WorkerPool::new(
        pool_config,
        workload,
        ctx.metrics.clone(),
        ctx.shutdown.clone(),
    );

    let entries: Vec<ScenarioEntry> = scenarios
        .into_iter()
        .map(|config| {
            let schedule = config.schedule();
            let stats = Arc::new(ScenarioStats::new(
                config.name.clone(),
                config.exec.clone(),
                schedule.expected_iterations(),
                miss_tolerance,
            ));
            ScenarioEntry {
                config,
                schedule,
                stats,
            }
        })
        .collect();

    log::info!(
        "starting run: {} scenario(s), pool {}..{} slots, backlog {}, overflow {}",
        entries.len(),
        pool_config.pre_allocated,
        pool_config.max,
        pool_config.queue_capacity,
        pool_config.overflow
    );

    let started = Instant::now();

    let handles: Vec<JoinHandle<u64>> = entries
        .iter()
        .map(|e| {
            let scheduler = ArrivalScheduler::new(&e.config, e.stats.clone());
            tokio::spawn(scheduler.run(started, pool.clone(), ctx.shutdown.clone()))
        })
        .collect();

    let progress_handle = progress.map(|progress| {
        tokio::spawn(report_progress(
            progress,
            started,
            entries.clone(),
            pool.clone(),
        ))
    });

    let mut join_error = None;
    for h in handles {
        if let Err(err) = h.await {
            join_error.get_or_insert(err);
            ctx.shutdown.trigger();
        }
    }

    let drained = if ctx.shutdown.is_triggered() {
        false
    } else {
        tokio::select! {
            biased;
            _ = ctx.shutdown.wait() => false,
            res = tokio::time::timeout(graceful_stop, pool.drain()) => res.is_ok(),
        }
    };
    if !drained {
        if !ctx.shutdown.is_triggered() {
            log::warn!(
                "graceful stop of {graceful_stop:?} expired; aborting {} in-flight iteration(s)",
                pool.busy()
            );
        }
        pool.abort();
        pool.drain().await;
    }

    if let Some(h) = progress_handle {
        h.abort();
        let _ = h.await;
    }

    if let Some(err) = join_error {
        return Err(err.into());
    }

    let elapsed = started.elapsed();
    let cancelled = ctx.shutdown.is_triggered();
    let verdict = evaluate_thresholds(&ctx.metrics, &thresholds);
    let summary = RunSummary {
        elapsed,
        cancelled,
        scenarios: entries.iter().map(|e| e.stats.summary()).collect(),
        metrics: ctx.metrics.snapshot_all(),
        verdict,
        pool: pool.stats(),
    };

    if summary.pool.dropped > 0 {
        log::warn!(
            "{} iteration(s) dropped: the pool was saturated",
            summary.pool.dropped
        );
    }
    if summary.misses_total() > 0 {
        log::warn!(
            "{} iteration(s) started more than {miss_tolerance:?} late",
            summary.misses_total()
        );
    }
    log::info!(
        "run {} after {elapsed:?}: {} released, {} executed, thresholds {}",
        if cancelled { "cancelled" } else { "finished" },
        summary.pool.released,
        summary.pool.executed,
        if summary.passed() { "passed" } else { "failed" }
    );

    Ok(summary)
}

async fn report_progress(
    progress: ProgressFn,
    started: Instant,
    entries: Vec<ScenarioEntry>,
    pool: WorkerPool,
) {
    let mut interval = tokio::time::interval_at(started + PROGRESS_INTERVAL, PROGRESS_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut tick: u64 = 0;
    let mut last_at = started;
    let mut last_started: Vec<u64> = vec![0; entries.len()];

    loop {
        interval.tick().await;
        tick += 1;

        let now = Instant::now();
        let elapsed = now.saturating_duration_since(started);
        let dt = now.saturating_duration_since(last_at).as_secs_f64().max(1e-9);
        last_at = now;

        let pool_stats = pool.stats();
        let pool_progress = PoolProgress {
            busy: pool.busy(),
            queued: pool.queued() as u64,
            max: pool_stats.max,
            dropped_total: pool_stats.dropped,
        };

        for (e, last) in entries.iter().zip(last_started.iter_mut()) {
            let started_now = e.stats.started();
            let delta = started_now.saturating_sub(*last);
            *last = started_now;

            (progress)(ProgressUpdate {
                tick,
                elapsed,
                scenario: e.config.name.to_string(),
                exec: e.config.exec.to_string(),
                progress: scenario_progress(e, elapsed, delta as f64 / dt),
                pool: pool_progress,
            });
        }
    }
}

fn scenario_progress(e: &ScenarioEntry, run_elapsed: Duration, per_sec: f64) -> ScenarioProgress {
    let total_duration = e.schedule.total_duration();
    let state = if run_elapsed < e.config.start_time {
        ScenarioState::Pending
    } else if run_elapsed >= e.config.start_time.saturating_add(total_duration) {
        ScenarioState::Finished
    } else {
        ScenarioState::Running
    };
    let scenario_elapsed = run_elapsed
        .saturating_sub(e.config.start_time)
        .min(total_duration);

    let stage = (state == ScenarioState::Running)
        .then(|| e.schedule.stage_snapshot_at(scenario_elapsed))
        .flatten()
        .map(|st| StageProgress {
            stage: st.index + 1,
            stages: st.count,
            stage_elapsed: st.stage_elapsed,
            stage_remaining: st.stage_remaining,
            start_target: st.start_target,
            end_target: st.end_target,
            current_rate: st.current_rate,
        });

    ScenarioProgress {
        state,
        time_unit: e.schedule.time_unit(),
        total_duration,
        scenario_elapsed,
        stage,
        expected_iterations: e.schedule.expected_iterations(),
        scheduled: e.stats.scheduled(),
        started: e.stats.started(),
        dropped: e.stats.dropped(),
        failed: e.stats.failed(),
        misses: e.stats.misses(),
        iterations_per_sec_now: per_sec,
    }
}
