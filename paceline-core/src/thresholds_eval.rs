use paceline_metrics::{Collector, SeriesValues};

use crate::thresholds::{Threshold, ThresholdAgg};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ThresholdStatus {
    Passed,
    Failed,
    /// The metric was never recorded, or has no observations.
    NoSamples,
    /// The aggregation does not apply to the metric's kind.
    KindMismatch,
}

impl ThresholdStatus {
    /// Statuses that indicate a broken test rather than a slow system.
    pub fn is_anomaly(self) -> bool {
        matches!(self, Self::NoSamples | Self::KindMismatch)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub status: ThresholdStatus,
    pub observed: Option<f64>,
}

impl ThresholdResult {
    pub fn passed(&self) -> bool {
        self.status == ThresholdStatus::Passed
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Verdict {
    pub results: Vec<ThresholdResult>,
}

impl Verdict {
    /// True iff every threshold passed; a run without thresholds passes.
    pub fn passed(&self) -> bool {
        self.results.iter().all(ThresholdResult::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.results.iter().filter(|r| !r.passed())
    }

    pub fn has_anomalies(&self) -> bool {
        self.results.iter().any(|r| r.status.is_anomaly())
    }
}

/// Evaluate every threshold against the collector's final state.
///
/// Each metric is snapshotted once, so all expressions on the same metric see the same samples.
/// A metric with no observations fails every one of its thresholds.
pub fn evaluate_thresholds(metrics: &Collector, thresholds: &[Threshold]) -> Verdict {
    let mut snapshots: Vec<(&str, Option<SeriesValues>)> = Vec::new();
    let mut results = Vec::with_capacity(thresholds.len());

    for t in thresholds {
        let values = match snapshots.iter().find(|(name, _)| *name == t.metric) {
            Some((_, v)) => v.clone(),
            None => {
                let v = metrics.snapshot(&t.metric).map(|s| s.values);
                snapshots.push((t.metric.as_str(), v.clone()));
                v
            }
        };

        let (status, observed) = evaluate_one(t, values.as_ref());
        if status.is_anomaly() {
            log::warn!(
                "threshold `{}` on `{}`: {}",
                t.source,
                t.metric,
                status
            );
        }
        results.push(ThresholdResult {
            metric: t.metric.clone(),
            expression: t.source.clone(),
            status,
            observed,
        });
    }

    Verdict { results }
}

fn evaluate_one(t: &Threshold, values: Option<&SeriesValues>) -> (ThresholdStatus, Option<f64>) {
    let Some(values) = values.filter(|v| v.count() > 0) else {
        return (ThresholdStatus::NoSamples, None);
    };

    if t
        .expr
        .agg
        .required_kind()
        .is_some_and(|required| required != values.kind())
    {
        return (ThresholdStatus::KindMismatch, None);
    }

    let observed = observed_value(values, t.expr.agg);
    let status = match observed {
        Some(v) if t.expr.op.holds(v, t.expr.value) => ThresholdStatus::Passed,
        Some(_) => ThresholdStatus::Failed,
        None => ThresholdStatus::NoSamples,
    };
    (status, observed)
}

fn observed_value(values: &SeriesValues, agg: ThresholdAgg) -> Option<f64> {
    match (agg, values) {
        (ThresholdAgg::Count, v) => Some(v.count() as f64),
        (ThresholdAgg::Rate, SeriesValues::Rate(r)) => r.rate(),
        (ThresholdAgg::Avg, SeriesValues::Trend(t)) => t.mean(),
        (ThresholdAgg::Min, SeriesValues::Trend(t)) => t.min(),
        (ThresholdAgg::Max, SeriesValues::Trend(t)) => t.max(),
        (ThresholdAgg::Med, SeriesValues::Trend(t)) => t.median(),
        (ThresholdAgg::P(p), SeriesValues::Trend(t)) => t.percentile(p),
        _ => None,
    }
}
