use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::ScenarioConfig;
use crate::pool::{Job, Release, WorkerPool};
use crate::schedule::RateSchedule;
use crate::shutdown::Shutdown;
use crate::stats::ScenarioStats;

/// Releases one scenario's iterations at the instants its rate schedule prescribes.
///
/// Each iteration `k` is due at `origin + instant_of(k)`, computed from the schedule rather
/// than accumulated from previous sleeps, so a late wakeup never shifts later arrivals. A
/// wakeup that comes late releases the overdue iteration immediately; releases are never early.
///
/// Once the scenario's window has closed, an arrival that is also overdue by more than the
/// miss tolerance is not released. The scheduler stops and counts everything it still owed
/// as skipped. This only happens when a blocking pool held the loop past the window.
#[derive(Debug)]
pub struct ArrivalScheduler {
    schedule: RateSchedule,
    start_time: Duration,
    iteration_timeout: Option<Duration>,
    stats: Arc<ScenarioStats>,
}

impl ArrivalScheduler {
    pub fn new(scenario: &ScenarioConfig, stats: Arc<ScenarioStats>) -> Self {
        Self {
            schedule: scenario.schedule(),
            start_time: scenario.start_time,
            iteration_timeout: scenario.iteration_timeout,
            stats,
        }
    }

    pub fn schedule(&self) -> &RateSchedule {
        &self.schedule
    }

    /// Run until the schedule is exhausted or `shutdown` fires. Returns the number released.
    pub async fn run(self, run_started: Instant, pool: WorkerPool, shutdown: Shutdown) -> u64 {
        let origin = run_started + self.start_time;
        let window_end = origin + self.schedule.total_duration();
        let tolerance = self.stats.miss_tolerance();
        let name = self.stats.name().clone();

        let mut released = 0_u64;
        let mut k = 1_u64;
        while let Some(at) = self.schedule.instant_of(k) {
            let due = origin + at;
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep_until(due) => {}
            }

            let now = Instant::now();
            if now > window_end && now.saturating_duration_since(due) > tolerance {
                let skipped = self.schedule.expected_iterations().saturating_sub(k - 1);
                self.stats.record_skipped(skipped);
                log::warn!(
                    "scenario `{name}` window closed {:?} ago; skipping {skipped} overdue iterations",
                    now.saturating_duration_since(window_end)
                );
                break;
            }

            self.stats.record_scheduled();
            let job = Job {
                stats: self.stats.clone(),
                iteration: k,
                scheduled_at: due,
                timeout: self.iteration_timeout,
            };
            if pool.submit(job).await == Release::Dropped {
                log::debug!("scenario `{name}` dropped iteration {k}");
            }

            released += 1;
            k += 1;
        }

        if shutdown.is_triggered() {
            log::info!("scenario `{name}` stopped after releasing {released} iterations");
        } else {
            log::info!("scenario `{name}` finished releasing {released} iterations");
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OverflowPolicy, PoolConfig, ScenarioExecutor, Stage};
    use crate::workload::{IterationContext, Workload};
    use paceline_metrics::Collector;
    use parking_lot::Mutex;

    fn scenario(executor: ScenarioExecutor, start_time: Duration) -> ScenarioConfig {
        ScenarioConfig {
            name: Arc::from("s"),
            exec: Arc::from("s"),
            executor,
            start_time,
            pre_allocated_slots: 8,
            max_slots: 8,
            iteration_timeout: None,
        }
    }

    fn recording_pool(
        seen: Arc<Mutex<Vec<(u64, Duration)>>>,
        origin: Instant,
        shutdown: Shutdown,
    ) -> WorkerPool {
        let workload: Arc<dyn Workload> = Arc::new(move |ctx: IterationContext| {
            seen.lock()
                .push((ctx.iteration, ctx.scheduled_at.duration_since(origin)));
            async { Ok::<(), String>(()) }
        });
        WorkerPool::new(
            PoolConfig {
                pre_allocated: 8,
                max: 8,
                queue_capacity: 8,
                overflow: OverflowPolicy::Drop,
            },
            workload,
            Arc::new(Collector::new()),
            shutdown,
        )
    }

    fn stats(expected: u64) -> Arc<ScenarioStats> {
        Arc::new(ScenarioStats::new(
            Arc::from("s"),
            Arc::from("s"),
            expected,
            Duration::from_millis(100),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn constant_rate_releases_on_schedule() {
        let cfg = scenario(
            ScenarioExecutor::ConstantArrivalRate {
                rate: 10,
                time_unit: Duration::from_secs(1),
                duration: Duration::from_secs(2),
            },
            Duration::ZERO,
        );
        let shutdown = Shutdown::new();
        let origin = Instant::now();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pool = recording_pool(seen.clone(), origin, shutdown.clone());

        let st = stats(20);
        let released = ArrivalScheduler::new(&cfg, st.clone())
            .run(origin, pool.clone(), shutdown)
            .await;
        pool.drain().await;

        assert_eq!(released, 20);
        assert_eq!(st.scheduled(), 20);
        assert_eq!(st.started(), 20);

        let seen = seen.lock();
        let seqs: Vec<u64> = seen.iter().map(|(k, _)| *k).collect();
        assert_eq!(seqs, (1..=20).collect::<Vec<_>>());
        for (k, at) in seen.iter() {
            let want = Duration::from_millis(100 * k);
            let diff = at.abs_diff(want);
            assert!(diff <= Duration::from_millis(1), "k={k} at={at:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_time_offsets_every_release() {
        let cfg = scenario(
            ScenarioExecutor::RampingArrivalRate {
                start_rate: 5,
                time_unit: Duration::from_secs(1),
                stages: vec![Stage {
                    duration: Duration::from_secs(1),
                    target: 5,
                }],
            },
            Duration::from_secs(3),
        );
        let shutdown = Shutdown::new();
        let origin = Instant::now();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pool = recording_pool(seen.clone(), origin, shutdown.clone());

        let released = ArrivalScheduler::new(&cfg, stats(5))
            .run(origin, pool.clone(), shutdown)
            .await;
        pool.drain().await;

        assert_eq!(released, 5);
        assert!(
            seen.lock()
                .iter()
                .all(|(_, at)| *at > Duration::from_secs(3))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_releasing() {
        let cfg = scenario(
            ScenarioExecutor::ConstantArrivalRate {
                rate: 10,
                time_unit: Duration::from_secs(1),
                duration: Duration::from_secs(60),
            },
            Duration::ZERO,
        );
        let shutdown = Shutdown::new();
        let origin = Instant::now();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pool = recording_pool(seen, origin, shutdown.clone());

        let task = tokio::spawn(
            ArrivalScheduler::new(&cfg, stats(600)).run(origin, pool.clone(), shutdown.clone()),
        );
        tokio::time::sleep(Duration::from_millis(1_050)).await;
        shutdown.trigger();

        let released = task.await.unwrap_or_else(|e| panic!("join: {e}"));
        assert_eq!(released, 10);
    }
}
