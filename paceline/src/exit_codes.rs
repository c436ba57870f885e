#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed.
    ThresholdsFailed = 11,

    /// Thresholds failed and at least one could not be evaluated (metric never observed,
    /// or an aggregation that does not fit the metric kind).
    ThresholdsAnomalous = 13,

    /// Invalid CLI/plan input (bad flags, unknown executor, invalid threshold syntax, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, a panicked engine task).
    RuntimeError = 40,

    /// The run was interrupted (Ctrl-C).
    Cancelled = 130,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_run(summary: &paceline_core::RunSummary) -> Self {
        if summary.cancelled {
            return Self::Cancelled;
        }
        match (summary.passed(), summary.verdict.has_anomalies()) {
            (true, _) => Self::Success,
            (false, false) => Self::ThresholdsFailed,
            (false, true) => Self::ThresholdsAnomalous,
        }
    }
}
