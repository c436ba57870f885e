use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use paceline_core::metrics::SeriesValues;
use paceline_core::{
    ITERATION_SUCCESS, IterationContext, PoolOptions, ProgressFn, ProgressUpdate, RunContext,
    RunOptions, RunPlan, ScenarioOptions, ScenarioState, Stage, ThresholdSet, ThresholdStatus,
    plan_from_options, run_scenarios,
};

fn plan(opts: RunOptions) -> RunPlan {
    plan_from_options(opts).unwrap_or_else(|e| panic!("invalid plan: {e}"))
}

fn constant(name: &str, rate: u64, duration: Duration) -> ScenarioOptions {
    ScenarioOptions {
        name: name.to_string(),
        executor: Some("constant-arrival-rate".to_string()),
        rate: Some(rate),
        duration: Some(duration),
        pre_allocated_slots: Some(4),
        max_slots: Some(8),
        ..ScenarioOptions::default()
    }
}

fn thresholds(metric: &str, exprs: &[&str]) -> ThresholdSet {
    ThresholdSet {
        metric: metric.to_string(),
        expressions: exprs.iter().map(|s| s.to_string()).collect(),
    }
}

async fn timed_work(ctx: IterationContext) -> Result<(), String> {
    let started = tokio::time::Instant::now();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let ms = started.elapsed().as_secs_f64() * 1_000.0;
    ctx.metrics
        .record_trend("WorkTiming", ms)
        .map_err(|e| e.to_string())?;
    ctx.metrics
        .record_rate("WorkOK", true)
        .map_err(|e| e.to_string())?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn ramp_then_plateau_meets_thresholds() {
    let ramp = ScenarioOptions {
        name: "ramp_to_load".to_string(),
        executor: Some("ramping-arrival-rate".to_string()),
        start_rate: Some(0),
        stages: vec![Stage {
            duration: Duration::from_secs(2),
            target: 10,
        }],
        pre_allocated_slots: Some(4),
        max_slots: Some(8),
        ..ScenarioOptions::default()
    };
    let mut plateau = constant("maintain_load", 10, Duration::from_secs(1));
    plateau.start_time = Some(Duration::from_secs(2));

    let plan = plan(RunOptions {
        scenarios: vec![ramp, plateau],
        thresholds: vec![
            thresholds("WorkOK", &["rate==1"]),
            thresholds("WorkTiming", &["p(90)<100", "p(95)<200"]),
        ],
        ..RunOptions::default()
    });

    let summary = run_scenarios(plan, RunContext::new(), timed_work, None)
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));

    assert!(!summary.cancelled);
    assert!(summary.passed(), "verdict: {:?}", summary.verdict);
    assert_eq!(summary.verdict.results.len(), 3);
    assert!(summary.elapsed >= Duration::from_secs(3));

    let ramp = &summary.scenarios[0];
    assert_eq!(ramp.expected_iterations, 10);
    assert_eq!(ramp.scheduled, 10);
    assert_eq!(ramp.succeeded, 10);
    let plateau = &summary.scenarios[1];
    assert_eq!(plateau.scheduled, 10);
    assert_eq!(plateau.succeeded, 10);

    assert_eq!(summary.pool.released, 20);
    assert_eq!(summary.pool.executed, 20);
    assert_eq!(summary.pool.dropped, 0);
    assert_eq!(summary.misses_total(), 0);
    assert!(summary.pool.high_water_mark <= summary.pool.max);
}

#[tokio::test(start_paused = true)]
async fn saturated_pool_drops_instead_of_queueing_unboundedly() {
    let mut opts = RunOptions {
        scenarios: vec![constant("burst", 100, Duration::from_secs(1))],
        ..RunOptions::default()
    };
    opts.pool = PoolOptions {
        pre_allocated: Some(1),
        max: Some(2),
        queue_capacity: Some(0),
        overflow: None,
    };

    let slow = |_ctx: IterationContext| async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok::<(), String>(())
    };
    let summary = run_scenarios(plan(opts), RunContext::new(), slow, None)
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));

    assert_eq!(summary.pool.released, 100);
    assert_eq!(summary.pool.executed, 2);
    assert_eq!(summary.pool.dropped, 98);
    assert_eq!(
        summary.pool.executed + summary.pool.dropped,
        summary.pool.released
    );
    assert_eq!(summary.pool.high_water_mark, 2);
    assert_eq!(summary.scenarios[0].dropped, 98);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_schedulers_and_aborts_in_flight_work() {
    let opts = RunOptions {
        scenarios: vec![constant("long", 10, Duration::from_secs(600))],
        ..RunOptions::default()
    };
    let ctx = RunContext::new();
    let shutdown = ctx.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1_550)).await;
        shutdown.trigger();
    });

    let slow = |_ctx: IterationContext| async {
        tokio::time::sleep(Duration::from_millis(250)).await;
        Ok::<(), String>(())
    };
    let summary = run_scenarios(plan(opts), ctx, slow, None)
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));

    assert!(summary.cancelled);
    assert!(summary.elapsed < Duration::from_secs(2));
    let s = &summary.scenarios[0];
    assert_eq!(s.scheduled, 15);
    assert!(s.aborted >= 1, "in-flight iterations must be aborted: {s:?}");
    assert_eq!(s.finished(), s.started);
    assert_eq!(
        summary.pool.executed + summary.pool.dropped,
        summary.pool.released
    );
}

#[tokio::test(start_paused = true)]
async fn graceful_stop_expiry_aborts_stragglers() {
    let opts = RunOptions {
        scenarios: vec![constant("one", 1, Duration::from_secs(1))],
        graceful_stop: Some(Duration::from_secs(2)),
        thresholds: vec![thresholds(ITERATION_SUCCESS, &["rate==1"])],
        ..RunOptions::default()
    };

    let stuck = |_ctx: IterationContext| async {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok::<(), String>(())
    };
    let summary = run_scenarios(plan(opts), RunContext::new(), stuck, None)
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));

    assert!(!summary.cancelled);
    assert!(summary.elapsed < Duration::from_secs(10));
    assert_eq!(summary.scenarios[0].aborted, 1);
    assert!(!summary.passed());

    let success = summary
        .metrics
        .iter()
        .find(|m| m.name == ITERATION_SUCCESS)
        .map(|m| m.values.clone());
    match success {
        Some(SeriesValues::Rate(r)) => assert_eq!((r.total, r.hits), (1, 0)),
        other => panic!("unexpected {ITERATION_SUCCESS}: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn failing_iterations_and_missing_metrics_fail_the_verdict() {
    let opts = RunOptions {
        scenarios: vec![constant("flaky", 5, Duration::from_secs(1))],
        thresholds: vec![
            thresholds(ITERATION_SUCCESS, &["rate>=0.5"]),
            thresholds("NeverRecorded", &["p(95)<200"]),
        ],
        ..RunOptions::default()
    };

    let flaky = |ctx: IterationContext| async move {
        if ctx.iteration % 2 == 0 {
            return Err(format!("iteration {} failed", ctx.iteration));
        }
        Ok(())
    };
    let summary = run_scenarios(plan(opts), RunContext::new(), flaky, None)
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));

    let s = &summary.scenarios[0];
    assert_eq!(s.succeeded, 3);
    assert_eq!(s.failed, 2);

    let statuses: Vec<_> = summary.verdict.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![ThresholdStatus::Passed, ThresholdStatus::NoSamples]
    );
    assert!(summary.verdict.has_anomalies());
    assert!(!summary.passed());
}

#[tokio::test(start_paused = true)]
async fn progress_reports_every_scenario_each_tick() {
    let mut later = constant("later", 2, Duration::from_secs(1));
    later.start_time = Some(Duration::from_secs(2));
    let opts = RunOptions {
        scenarios: vec![constant("now", 2, Duration::from_secs(3)), later],
        ..RunOptions::default()
    };

    let updates = Arc::new(AtomicU64::new(0));
    let pending_seen = Arc::new(AtomicU64::new(0));
    let progress: ProgressFn = {
        let updates = updates.clone();
        let pending_seen = pending_seen.clone();
        Arc::new(move |u: ProgressUpdate| {
            updates.fetch_add(1, Ordering::Relaxed);
            if u.scenario == "later" && u.progress.state == ScenarioState::Pending {
                pending_seen.fetch_add(1, Ordering::Relaxed);
            }
        })
    };

    let noop = |_ctx: IterationContext| async { Ok::<(), String>(()) };
    let summary = run_scenarios(plan(opts), RunContext::new(), noop, Some(progress))
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));

    assert_eq!(summary.pool.released, 8);
    let updates = updates.load(Ordering::Relaxed);
    assert!(updates >= 4, "expected ticks for both scenarios, got {updates}");
    assert_eq!(updates % 2, 0);
    assert!(pending_seen.load(Ordering::Relaxed) >= 1);
}

#[tokio::test(start_paused = true)]
async fn overlapping_scenarios_share_the_pool_max() {
    let first = ScenarioOptions {
        pre_allocated_slots: Some(1),
        max_slots: Some(2),
        ..constant("first", 20, Duration::from_secs(3))
    };
    let mut second = ScenarioOptions {
        pre_allocated_slots: Some(1),
        max_slots: Some(2),
        ..constant("second", 20, Duration::from_secs(2))
    };
    second.start_time = Some(Duration::from_secs(1));

    let opts = RunOptions {
        scenarios: vec![first, second],
        ..RunOptions::default()
    };
    let slow = |_ctx: IterationContext| async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok::<(), String>(())
    };
    let summary = run_scenarios(plan(opts), RunContext::new(), slow, None)
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));

    assert_eq!(summary.pool.max, 4);
    assert_eq!(summary.pool.high_water_mark, 4);
    assert_eq!(summary.pool.released, 100);
    assert!(summary.pool.dropped > 0);
    assert_eq!(
        summary.pool.executed + summary.pool.dropped,
        summary.pool.released
    );
}

#[tokio::test(start_paused = true)]
async fn blocked_scheduler_stops_when_its_window_closes() {
    let mut opts = RunOptions {
        scenarios: vec![constant("blocked", 10, Duration::from_secs(1))],
        ..RunOptions::default()
    };
    opts.pool = PoolOptions {
        pre_allocated: Some(1),
        max: Some(1),
        queue_capacity: Some(0),
        overflow: Some("block".to_string()),
    };

    let slow = |_ctx: IterationContext| async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok::<(), String>(())
    };
    let summary = run_scenarios(plan(opts), RunContext::new(), slow, None)
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));

    // Iteration 1 runs from 0.1s to 1.1s; iteration 2 waits for its slot until then.
    let s = &summary.scenarios[0];
    assert_eq!(s.scheduled, 2);
    assert_eq!(s.skipped, 8);
    assert_eq!(s.succeeded, 2);
    assert_eq!(s.dropped, 0);
    assert_eq!(summary.pool.released, 2);
    assert_eq!(summary.pool.executed, 2);
    assert!(summary.elapsed < Duration::from_secs(3), "{:?}", summary.elapsed);
}
