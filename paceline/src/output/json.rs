use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use paceline_core::metrics::{SeriesSnapshot, SeriesValues};
use paceline_core::{
    PoolStats, ProgressFn, ProgressUpdate, RunPlan, RunSummary, ScenarioSummary,
    ThresholdResult,
};
use serde::Serialize;

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _plan_path: &Path, _plan: &RunPlan) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u: ProgressUpdate| {
            emit_json_line(&build_progress_line(&u));
        }))
    }

    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        emit_json_line(&build_summary_line(summary));
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub scenario: String,
    pub exec: String,
    pub state: String,
    pub scenario_elapsed_secs: f64,
    pub total_duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<JsonStage>,
    pub expected_iterations: u64,
    pub scheduled: u64,
    pub started: u64,
    pub dropped: u64,
    pub failed: u64,
    pub misses: u64,
    pub iterations_per_sec: f64,
    pub pool: JsonPoolProgress,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JsonStage {
    pub stage: usize,
    pub stages: usize,
    pub start_target: u64,
    pub end_target: u64,
    pub current_rate: f64,
    pub stage_remaining_secs: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JsonPoolProgress {
    pub busy: u64,
    pub queued: u64,
    pub max: u64,
    pub dropped_total: u64,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    let p = &u.progress;
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        scenario: u.scenario.clone(),
        exec: u.exec.clone(),
        state: p.state.to_string(),
        scenario_elapsed_secs: p.scenario_elapsed.as_secs_f64(),
        total_duration_secs: p.total_duration.as_secs_f64(),
        stage: p.stage.as_ref().map(|s| JsonStage {
            stage: s.stage,
            stages: s.stages,
            start_target: s.start_target,
            end_target: s.end_target,
            current_rate: s.current_rate,
            stage_remaining_secs: s.stage_remaining.as_secs_f64(),
        }),
        expected_iterations: p.expected_iterations,
        scheduled: p.scheduled,
        started: p.started,
        dropped: p.dropped,
        failed: p.failed,
        misses: p.misses,
        iterations_per_sec: p.iterations_per_sec_now,
        pool: JsonPoolProgress {
            busy: u.pool.busy,
            queued: u.pool.queued,
            max: u.pool.max,
            dropped_total: u.pool.dropped_total,
        },
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub elapsed_secs: f64,
    pub cancelled: bool,
    pub passed: bool,
    pub scenarios: Vec<JsonScenarioSummary>,
    pub pool: JsonPoolSummary,
    pub metrics: Vec<JsonMetric>,
    pub thresholds: Vec<JsonThreshold>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JsonScenarioSummary {
    pub scenario: String,
    pub exec: String,
    pub expected_iterations: u64,
    pub scheduled: u64,
    pub started: u64,
    pub dropped: u64,
    pub skipped: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub aborted: u64,
    pub misses: u64,
    pub lag_p50_ms: Option<f64>,
    pub lag_p99_ms: Option<f64>,
    pub lag_max_ms: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JsonPoolSummary {
    pub pre_allocated: u64,
    pub max: u64,
    pub released: u64,
    pub executed: u64,
    pub dropped: u64,
    pub queued: u64,
    pub slots_created: u64,
    pub activations: u64,
    pub deactivations: u64,
    pub high_water_mark: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JsonMetric {
    pub name: String,
    pub kind: String,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub med: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p90: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p95: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JsonThreshold {
    pub metric: String,
    pub expression: String,
    pub status: String,
    pub passed: bool,
    pub observed: Option<f64>,
}

fn build_summary_line(summary: &RunSummary) -> JsonSummaryLine {
    JsonSummaryLine {
        kind: "summary",
        elapsed_secs: summary.elapsed.as_secs_f64(),
        cancelled: summary.cancelled,
        passed: summary.passed(),
        scenarios: summary.scenarios.iter().map(scenario_summary).collect(),
        pool: pool_summary(&summary.pool),
        metrics: summary.metrics.iter().map(metric).collect(),
        thresholds: summary.verdict.results.iter().map(threshold).collect(),
    }
}

fn scenario_summary(s: &ScenarioSummary) -> JsonScenarioSummary {
    let ms = |d: std::time::Duration| d.as_secs_f64() * 1_000.0;
    JsonScenarioSummary {
        scenario: s.scenario.clone(),
        exec: s.exec.clone(),
        expected_iterations: s.expected_iterations,
        scheduled: s.scheduled,
        started: s.started,
        dropped: s.dropped,
        skipped: s.skipped,
        succeeded: s.succeeded,
        failed: s.failed,
        timed_out: s.timed_out,
        aborted: s.aborted,
        misses: s.misses,
        lag_p50_ms: s.lag.map(|l| ms(l.p50)),
        lag_p99_ms: s.lag.map(|l| ms(l.p99)),
        lag_max_ms: s.lag.map(|l| ms(l.max)),
    }
}

fn pool_summary(p: &PoolStats) -> JsonPoolSummary {
    JsonPoolSummary {
        pre_allocated: p.pre_allocated,
        max: p.max,
        released: p.released,
        executed: p.executed,
        dropped: p.dropped,
        queued: p.queued,
        slots_created: p.slots_created,
        activations: p.activations,
        deactivations: p.deactivations,
        high_water_mark: p.high_water_mark,
    }
}

fn metric(m: &SeriesSnapshot) -> JsonMetric {
    let mut out = JsonMetric {
        name: m.name.clone(),
        kind: m.kind().to_string(),
        count: m.values.count(),
        rate: None,
        hits: None,
        avg: None,
        min: None,
        med: None,
        max: None,
        p90: None,
        p95: None,
    };
    match &m.values {
        SeriesValues::Rate(r) => {
            out.rate = r.rate();
            out.hits = Some(r.hits);
        }
        SeriesValues::Trend(t) => {
            out.avg = t.mean();
            out.min = t.min();
            out.med = t.median();
            out.max = t.max();
            out.p90 = t.percentile(90.0);
            out.p95 = t.percentile(95.0);
        }
    }
    out
}

fn threshold(r: &ThresholdResult) -> JsonThreshold {
    JsonThreshold {
        metric: r.metric.clone(),
        expression: r.expression.clone(),
        status: r.status.to_string(),
        passed: r.passed(),
        observed: r.observed,
    }
}

fn emit_json_line<T: Serialize>(value: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, value).is_ok() {
        let _ = out.write_all(b"\n");
        let _ = out.flush();
    }
}
