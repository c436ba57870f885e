mod config;
mod error;
mod plan;
mod pool;
mod progress;
mod run;
mod schedule;
mod scheduler;
mod shutdown;
mod stats;
mod summary;
mod thresholds;
mod thresholds_eval;
mod workload;

pub use config::{
    DEFAULT_GRACEFUL_STOP, DEFAULT_MISS_TOLERANCE, DEFAULT_TIME_UNIT, OverflowPolicy, PoolConfig,
    PoolOptions, RunOptions, RunPlan, ScenarioConfig, ScenarioExecutor, ScenarioExecutorKind,
    ScenarioOptions, Stage,
};
pub use error::{Error, Result};
pub use plan::plan_from_options;
pub use pool::{ITERATION_DURATION, ITERATION_SUCCESS, Release, WorkerPool};
pub use progress::{
    PoolProgress, ProgressFn, ProgressUpdate, ScenarioProgress, ScenarioState, StageProgress,
};
pub use run::{RunContext, run_scenarios, run_workload};
pub use schedule::{RateSchedule, StageSnapshot};
pub use scheduler::ArrivalScheduler;
pub use shutdown::Shutdown;
pub use stats::ScenarioStats;
pub use summary::{LagSummary, PoolStats, RunSummary, ScenarioSummary};
pub use thresholds::{
    Threshold, ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdSet, parse_threshold_expr,
    parse_thresholds,
};
pub use thresholds_eval::{ThresholdResult, ThresholdStatus, Verdict, evaluate_thresholds};
pub use workload::{
    IterationContext, IterationOutcome, IterationRecord, Workload, WorkloadFuture,
};

pub use paceline_metrics as metrics;
