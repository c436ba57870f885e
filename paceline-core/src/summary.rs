use std::time::Duration;

use paceline_metrics::SeriesSnapshot;

use crate::thresholds_eval::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LagSummary {
    pub p50: Duration,
    pub p99: Duration,
    pub max: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioSummary {
    pub scenario: String,
    pub exec: String,
    /// Arrivals the schedule asks for over its whole duration.
    pub expected_iterations: u64,
    pub scheduled: u64,
    pub dropped: u64,
    /// Arrivals never released because the scenario's window had closed by the time the
    /// scheduler got to them.
    pub skipped: u64,
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub aborted: u64,
    /// Iterations that started later than the miss tolerance.
    pub misses: u64,
    pub lag: Option<LagSummary>,
}

impl ScenarioSummary {
    pub fn finished(&self) -> u64 {
        self.succeeded + self.failed + self.timed_out + self.aborted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub pre_allocated: u64,
    pub max: u64,
    pub released: u64,
    pub executed: u64,
    pub dropped: u64,
    /// Iterations that waited in the backlog before a slot picked them up.
    pub queued: u64,
    pub slots_created: u64,
    pub activations: u64,
    pub deactivations: u64,
    pub high_water_mark: u64,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub cancelled: bool,
    pub scenarios: Vec<ScenarioSummary>,
    pub metrics: Vec<SeriesSnapshot>,
    pub verdict: Verdict,
    pub pool: PoolStats,
}

impl RunSummary {
    pub fn passed(&self) -> bool {
        self.verdict.passed()
    }

    pub fn dropped_total(&self) -> u64 {
        self.pool.dropped
    }

    pub fn misses_total(&self) -> u64 {
        self.scenarios.iter().map(|s| s.misses).sum()
    }
}
