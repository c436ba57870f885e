use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ScenarioState {
    /// Waiting for its `start_time`.
    Pending,
    Running,
    Finished,
}

#[derive(Debug, Clone)]
pub struct StageProgress {
    /// 1-based stage index.
    pub stage: usize,
    pub stages: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    /// Iterations per second the schedule currently asks for.
    pub current_rate: f64,
}

#[derive(Debug, Clone)]
pub struct ScenarioProgress {
    pub state: ScenarioState,
    pub time_unit: Duration,
    pub total_duration: Duration,
    /// Time on the scenario's own clock, clamped to `0..=total_duration`.
    pub scenario_elapsed: Duration,
    pub stage: Option<StageProgress>,
    pub expected_iterations: u64,
    pub scheduled: u64,
    pub started: u64,
    pub dropped: u64,
    pub failed: u64,
    pub misses: u64,
    /// Iterations started per second during the last progress interval.
    pub iterations_per_sec_now: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolProgress {
    pub busy: u64,
    pub queued: u64,
    pub max: u64,
    pub dropped_total: u64,
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based) for progress emissions.
    pub tick: u64,
    pub elapsed: Duration,
    pub scenario: String,
    pub exec: String,
    pub progress: ScenarioProgress,
    pub pool: PoolProgress,
}

pub type ProgressFn = std::sync::Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;
