use std::fmt::Write as _;

use paceline_core::metrics::{SeriesSnapshot, SeriesValues};
use paceline_core::{RunSummary, ThresholdResult, ThresholdStatus};

use super::format::*;

pub(crate) fn render(summary: &RunSummary) -> String {
    let mut out = String::new();

    if summary.cancelled {
        writeln!(
            &mut out,
            "summary (cancelled after {})",
            format_duration(summary.elapsed)
        )
        .ok();
    } else {
        writeln!(&mut out, "summary ({})", format_duration(summary.elapsed)).ok();
    }

    for s in &summary.scenarios {
        writeln!(&mut out, "scenario: {} (exec {})", s.scenario, s.exec).ok();
        writeln!(
            &mut out,
            "  iterations: expected {} scheduled {} started {} dropped {} skipped {}",
            s.expected_iterations, s.scheduled, s.started, s.dropped, s.skipped
        )
        .ok();
        writeln!(
            &mut out,
            "  outcomes: succeeded {} failed {} timed_out {} aborted {}",
            s.succeeded, s.failed, s.timed_out, s.aborted
        )
        .ok();
        match &s.lag {
            Some(lag) => writeln!(
                &mut out,
                "  start lag: p50={} p99={} max={} misses {}",
                format_duration(lag.p50),
                format_duration(lag.p99),
                format_duration(lag.max),
                s.misses
            )
            .ok(),
            None => writeln!(&mut out, "  start lag: n/a misses {}", s.misses).ok(),
        };
        out.push('\n');
    }

    let p = &summary.pool;
    out.push_str("pool\n");
    writeln!(
        &mut out,
        "  slots: created {} (pre-allocated {}, max {}) peak busy {}",
        p.slots_created, p.pre_allocated, p.max, p.high_water_mark
    )
    .ok();
    writeln!(
        &mut out,
        "  released {} executed {} queued {}",
        p.released, p.executed, p.queued
    )
    .ok();
    writeln!(
        &mut out,
        "  dropped {} misses {}",
        summary.dropped_total(),
        summary.misses_total()
    )
    .ok();

    if !summary.metrics.is_empty() {
        out.push_str("\nmetrics\n");
        let width = summary
            .metrics
            .iter()
            .map(|m| m.name.len())
            .max()
            .unwrap_or(0);
        for m in &summary.metrics {
            writeln!(&mut out, "  {:<width$}  {}", m.name, render_series(m)).ok();
        }
    }

    if !summary.verdict.results.is_empty() {
        out.push_str("\nthresholds\n");
        for r in &summary.verdict.results {
            writeln!(&mut out, "  {}", render_threshold(r)).ok();
        }
    }

    out
}

fn render_series(m: &SeriesSnapshot) -> String {
    match &m.values {
        SeriesValues::Rate(r) => format!(
            "rate={} ({} of {})",
            format_percent(r.rate()),
            r.hits,
            r.total
        ),
        SeriesValues::Trend(t) => format!(
            "avg={} min={} med={} max={} p(90)={} p(95)={} (n={})",
            format_ms(t.mean()),
            format_ms(t.min()),
            format_ms(t.median()),
            format_ms(t.max()),
            format_ms(t.percentile(90.0)),
            format_ms(t.percentile(95.0)),
            t.count()
        ),
    }
}

fn render_threshold(r: &ThresholdResult) -> String {
    let mark = match r.status {
        ThresholdStatus::Passed => "✓",
        ThresholdStatus::Failed => "✗",
        ThresholdStatus::NoSamples | ThresholdStatus::KindMismatch => "!",
    };
    format!(
        "{mark} {} {} ({})",
        r.metric,
        r.expression,
        observed_or_status(r)
    )
}

fn observed_or_status(r: &ThresholdResult) -> String {
    r.observed
        .map_or_else(|| r.status.to_string(), |obs| format!("observed {obs}"))
}

/// Lines for stderr; empty when the verdict passed.
pub(crate) fn render_threshold_failures(summary: &RunSummary) -> String {
    let mut out = String::new();
    let failures: Vec<_> = summary.verdict.failures().collect();
    if failures.is_empty() {
        return out;
    }

    writeln!(&mut out, "thresholds failed: {}", failures.len()).ok();
    for r in failures {
        writeln!(
            &mut out,
            "  {}: {} ({})",
            r.metric,
            r.expression,
            observed_or_status(r)
        )
        .ok();
    }
    out
}
