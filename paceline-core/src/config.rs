use std::sync::Arc;
use std::time::Duration;

use crate::schedule::RateSchedule;
use crate::thresholds::{Threshold, ThresholdSet};

pub const DEFAULT_TIME_UNIT: Duration = Duration::from_secs(1);
pub const DEFAULT_MISS_TOLERANCE: Duration = Duration::from_millis(100);
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

/// Scenario executor kind (the string form used by plan files).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
pub enum ScenarioExecutorKind {
    #[strum(serialize = "ramping-arrival-rate", serialize = "ramping-rps")]
    RampingArrivalRate,

    #[strum(serialize = "constant-arrival-rate", serialize = "constant-rps")]
    ConstantArrivalRate,
}

/// What to do with an iteration released while every slot is busy and the backlog is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OverflowPolicy {
    /// Discard it and count it as dropped.
    #[default]
    Drop,
    /// Hold the scheduler until backlog space frees up.
    Block,
}

#[derive(Debug, Clone, Default)]
pub struct ScenarioOptions {
    pub name: String,
    pub exec: Option<String>,

    /// Defaults to `ramping-arrival-rate`.
    pub executor: Option<String>,

    // Ramping arrival rate
    pub start_rate: Option<u64>,
    pub stages: Vec<Stage>,

    // Constant arrival rate
    pub rate: Option<u64>,
    pub duration: Option<Duration>,

    pub time_unit: Option<Duration>,
    pub start_time: Option<Duration>,
    pub pre_allocated_slots: Option<u64>,
    pub max_slots: Option<u64>,
    pub iteration_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct PoolOptions {
    pub pre_allocated: Option<u64>,
    pub max: Option<u64>,
    pub queue_capacity: Option<u64>,
    pub overflow: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub scenarios: Vec<ScenarioOptions>,
    pub thresholds: Vec<ThresholdSet>,
    pub pool: PoolOptions,
    pub miss_tolerance: Option<Duration>,
    pub graceful_stop: Option<Duration>,
}

#[derive(Debug, Clone)]
pub enum ScenarioExecutor {
    /// Open-model arrival rate (iterations started per `time_unit`), with ramping stages.
    RampingArrivalRate {
        start_rate: u64,
        time_unit: Duration,
        stages: Vec<Stage>,
    },

    /// Fixed arrival rate for a fixed duration.
    ConstantArrivalRate {
        rate: u64,
        time_unit: Duration,
        duration: Duration,
    },
}

impl ScenarioExecutor {
    pub fn kind(&self) -> ScenarioExecutorKind {
        match self {
            Self::RampingArrivalRate { .. } => ScenarioExecutorKind::RampingArrivalRate,
            Self::ConstantArrivalRate { .. } => ScenarioExecutorKind::ConstantArrivalRate,
        }
    }

    pub fn schedule(&self) -> RateSchedule {
        match self {
            Self::RampingArrivalRate {
                start_rate,
                time_unit,
                stages,
            } => RateSchedule::new(*start_rate, *time_unit, stages.clone()),
            Self::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
            } => RateSchedule::constant(*rate, *time_unit, *duration),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub name: Arc<str>,
    pub exec: Arc<str>,
    pub executor: ScenarioExecutor,
    /// Offset from run start at which the scenario's own clock starts.
    pub start_time: Duration,
    pub pre_allocated_slots: u64,
    pub max_slots: u64,
    pub iteration_timeout: Option<Duration>,
}

impl ScenarioConfig {
    pub fn schedule(&self) -> RateSchedule {
        self.executor.schedule()
    }

    /// Offset from run start at which the scenario's schedule ends.
    pub fn end_offset(&self) -> Duration {
        self.start_time.saturating_add(self.schedule().total_duration())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub pre_allocated: u64,
    pub max: u64,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

/// A validated run: everything the engine needs, with defaults applied.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub scenarios: Vec<ScenarioConfig>,
    pub thresholds: Vec<Threshold>,
    pub pool: PoolConfig,
    pub miss_tolerance: Duration,
    pub graceful_stop: Duration,
}

impl RunPlan {
    /// Offset from run start at which the last scenario's schedule ends.
    pub fn scheduled_duration(&self) -> Duration {
        self.scenarios
            .iter()
            .map(ScenarioConfig::end_offset)
            .max()
            .unwrap_or(Duration::ZERO)
    }
}
