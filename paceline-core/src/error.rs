pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("no scenarios configured")]
    NoScenarios,

    #[error("duplicate scenario name `{0}`")]
    DuplicateScenario(String),

    #[error("scenario name must not be empty")]
    EmptyScenarioName,

    #[error(
        "scenario `{scenario}`: invalid `executor` `{executor}` (expected `ramping-arrival-rate` or `constant-arrival-rate`)"
    )]
    InvalidExecutor { scenario: String, executor: String },

    #[error("scenario `{0}`: `stages` must be a non-empty array of {{ duration, target }}")]
    InvalidStages(String),

    #[error("scenario `{0}`: total duration must be positive")]
    InvalidDuration(String),

    #[error("scenario `{0}`: constant-arrival-rate requires `rate`")]
    MissingRate(String),

    #[error("scenario `{0}`: `time_unit` must be a positive duration")]
    InvalidTimeUnit(String),

    #[error("scenario `{0}`: `pre_allocated_slots` must be a positive integer")]
    InvalidPreAllocatedSlots(String),

    #[error("scenario `{0}`: `max_slots` must be >= `pre_allocated_slots`")]
    InvalidMaxSlots(String),

    #[error("scenario `{0}`: `iteration_timeout` must be a positive duration")]
    InvalidIterationTimeout(String),

    #[error("invalid overflow policy `{0}` (expected `drop` or `block`)")]
    InvalidOverflowPolicy(String),

    #[error("pool: `max` must be >= `pre_allocated` and positive")]
    InvalidPoolSize,

    #[error("threshold for metric `{metric}` has no expressions")]
    EmptyThresholds { metric: String },

    #[error("invalid threshold expression for metric `{metric}`: {error}")]
    InvalidThresholdExpr { metric: String, error: String },
}

impl Error {
    /// Errors raised while validating a run plan, before any iteration starts.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Self::Join(_))
    }
}
