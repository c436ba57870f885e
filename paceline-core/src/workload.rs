use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use paceline_metrics::Collector;
use tokio::time::Instant;

use crate::shutdown::Shutdown;

pub type WorkloadFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// What a single iteration sees.
#[derive(Debug, Clone)]
pub struct IterationContext {
    pub scenario: Arc<str>,
    pub exec: Arc<str>,
    /// 1-based, in schedule order within the scenario.
    pub iteration: u64,
    pub slot: u64,
    pub scheduled_at: Instant,
    pub metrics: Arc<Collector>,
    /// Triggered when the run is being torn down.
    pub shutdown: Shutdown,
}

/// Unit of work executed once per released iteration.
///
/// Implemented for any `Fn(IterationContext) -> impl Future<Output = Result<(), E>>`.
pub trait Workload: Send + Sync + 'static {
    fn call(&self, ctx: IterationContext) -> WorkloadFuture;
}

impl<F, Fut, E> Workload for F
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    fn call(&self, ctx: IterationContext) -> WorkloadFuture {
        let fut = (self)(ctx);
        Box::pin(async move { fut.await.map_err(|e| e.to_string()) })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    Succeeded,
    Failed(String),
    TimedOut,
    Aborted,
}

impl IterationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Succeeded => None,
            Self::Failed(msg) => Some(msg),
            Self::TimedOut => Some("timed out"),
            Self::Aborted => Some("aborted"),
        }
    }
}

/// Result of one executed iteration.
#[derive(Debug, Clone)]
pub struct IterationRecord {
    pub scenario: Arc<str>,
    pub iteration: u64,
    pub slot: u64,
    pub scheduled_at: Instant,
    pub started_at: Instant,
    pub finished_at: Instant,
    pub outcome: IterationOutcome,
}

impl IterationRecord {
    pub fn lag(&self) -> Duration {
        self.started_at.saturating_duration_since(self.scheduled_at)
    }

    pub fn elapsed(&self) -> Duration {
        self.finished_at.saturating_duration_since(self.started_at)
    }
}
