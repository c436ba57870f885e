use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::Mutex;

use crate::summary::{LagSummary, ScenarioSummary};
use crate::workload::{IterationOutcome, IterationRecord};

/// Per-scenario accounting shared by its scheduler and the pool.
#[derive(Debug)]
pub struct ScenarioStats {
    name: Arc<str>,
    exec: Arc<str>,
    expected: u64,
    miss_tolerance: Duration,

    scheduled: AtomicU64,
    dropped: AtomicU64,
    skipped: AtomicU64,
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    aborted: AtomicU64,
    misses: AtomicU64,
    lag_us: Mutex<Histogram<u64>>,
}

impl ScenarioStats {
    pub fn new(name: Arc<str>, exec: Arc<str>, expected: u64, miss_tolerance: Duration) -> Self {
        Self {
            name,
            exec,
            expected,
            miss_tolerance,
            scheduled: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            started: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            lag_us: Mutex::new(new_lag_histogram()),
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn exec(&self) -> &Arc<str> {
        &self.exec
    }

    pub fn record_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self, n: u64) {
        self.skipped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn miss_tolerance(&self) -> Duration {
        self.miss_tolerance
    }

    /// Record the start of an iteration; returns true when it started later than tolerated.
    pub fn record_started(&self, lag: Duration) -> bool {
        self.started.fetch_add(1, Ordering::Relaxed);
        let lag_us = u64::try_from(lag.as_micros()).unwrap_or(u64::MAX);
        self.lag_us.lock().saturating_record(lag_us);

        let missed = lag > self.miss_tolerance;
        if missed {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        missed
    }

    pub fn record_finished(&self, record: &IterationRecord) {
        let counter = match record.outcome {
            IterationOutcome::Succeeded => &self.succeeded,
            IterationOutcome::Failed(_) => &self.failed,
            IterationOutcome::TimedOut => &self.timed_out,
            IterationOutcome::Aborted => &self.aborted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scheduled(&self) -> u64 {
        self.scheduled.load(Ordering::Relaxed)
    }

    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Iterations that finished without succeeding.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
            + self.timed_out.load(Ordering::Relaxed)
            + self.aborted.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> ScenarioSummary {
        let lag = {
            let h = self.lag_us.lock();
            (h.len() > 0).then(|| LagSummary {
                p50: Duration::from_micros(h.value_at_quantile(0.50)),
                p99: Duration::from_micros(h.value_at_quantile(0.99)),
                max: Duration::from_micros(h.max()),
            })
        };

        ScenarioSummary {
            scenario: self.name.to_string(),
            exec: self.exec.to_string(),
            expected_iterations: self.expected,
            scheduled: self.scheduled(),
            dropped: self.dropped(),
            skipped: self.skipped(),
            started: self.started(),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            misses: self.misses(),
            lag,
        }
    }
}

fn new_lag_histogram() -> Histogram<u64> {
    // Up to one hour in microseconds, 3 significant figures.
    Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3)
        .unwrap_or_else(|err| panic!("failed to init histogram: {err}"))
}
