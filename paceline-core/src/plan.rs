use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{
    DEFAULT_GRACEFUL_STOP, DEFAULT_MISS_TOLERANCE, DEFAULT_TIME_UNIT, OverflowPolicy, PoolConfig,
    RunOptions, RunPlan, ScenarioConfig, ScenarioExecutor, ScenarioExecutorKind, ScenarioOptions,
};
use crate::error::{Error, Result};
use crate::thresholds::parse_thresholds;

/// Validate options and apply defaults. Nothing is started if this fails.
pub fn plan_from_options(opts: RunOptions) -> Result<RunPlan> {
    if opts.scenarios.is_empty() {
        return Err(Error::NoScenarios);
    }

    let mut seen = HashSet::new();
    let mut scenarios = Vec::with_capacity(opts.scenarios.len());
    for s in opts.scenarios {
        if s.name.trim().is_empty() {
            return Err(Error::EmptyScenarioName);
        }
        if !seen.insert(s.name.clone()) {
            return Err(Error::DuplicateScenario(s.name));
        }
        scenarios.push(scenario_from_options(s)?);
    }

    let thresholds = parse_thresholds(&opts.thresholds)?;

    let summed_pre: u64 = scenarios.iter().map(|s| s.pre_allocated_slots).sum();
    let summed_max: u64 = scenarios.iter().map(|s| s.max_slots).sum();
    let pre_allocated = opts.pool.pre_allocated.unwrap_or(summed_pre);
    let max = opts.pool.max.unwrap_or(summed_max.max(pre_allocated));
    if max == 0 || max < pre_allocated {
        return Err(Error::InvalidPoolSize);
    }

    let overflow = match opts.pool.overflow.as_deref() {
        None => OverflowPolicy::default(),
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::InvalidOverflowPolicy(raw.to_string()))?,
    };
    let queue_capacity = opts.pool.queue_capacity.unwrap_or(max);
    let queue_capacity = usize::try_from(queue_capacity).unwrap_or(usize::MAX);

    Ok(RunPlan {
        scenarios,
        thresholds,
        pool: PoolConfig {
            pre_allocated,
            max,
            queue_capacity,
            overflow,
        },
        miss_tolerance: opts.miss_tolerance.unwrap_or(DEFAULT_MISS_TOLERANCE),
        graceful_stop: opts.graceful_stop.unwrap_or(DEFAULT_GRACEFUL_STOP),
    })
}

fn scenario_from_options(s: ScenarioOptions) -> Result<ScenarioConfig> {
    let name = s.name;
    let executor_name = s.executor.as_deref().unwrap_or("ramping-arrival-rate");
    let kind: ScenarioExecutorKind =
        executor_name
            .parse()
            .map_err(|_| Error::InvalidExecutor {
                scenario: name.clone(),
                executor: executor_name.to_string(),
            })?;

    let time_unit = s.time_unit.unwrap_or(DEFAULT_TIME_UNIT);
    if time_unit.is_zero() {
        return Err(Error::InvalidTimeUnit(name));
    }

    let executor = match kind {
        ScenarioExecutorKind::RampingArrivalRate => {
            if s.stages.is_empty() {
                return Err(Error::InvalidStages(name));
            }
            let total = s
                .stages
                .iter()
                .fold(Duration::ZERO, |acc, st| acc.saturating_add(st.duration));
            if total.is_zero() {
                return Err(Error::InvalidDuration(name));
            }
            ScenarioExecutor::RampingArrivalRate {
                start_rate: s.start_rate.unwrap_or(0),
                time_unit,
                stages: s.stages,
            }
        }
        ScenarioExecutorKind::ConstantArrivalRate => {
            let Some(rate) = s.rate else {
                return Err(Error::MissingRate(name));
            };
            let duration = s.duration.unwrap_or(Duration::ZERO);
            if duration.is_zero() {
                return Err(Error::InvalidDuration(name));
            }
            ScenarioExecutor::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
            }
        }
    };

    let pre_allocated_slots = s.pre_allocated_slots.unwrap_or(1);
    if pre_allocated_slots == 0 {
        return Err(Error::InvalidPreAllocatedSlots(name));
    }
    let max_slots = s.max_slots.unwrap_or(pre_allocated_slots);
    if max_slots < pre_allocated_slots {
        return Err(Error::InvalidMaxSlots(name));
    }
    if s.iteration_timeout.is_some_and(|t| t.is_zero()) {
        return Err(Error::InvalidIterationTimeout(name));
    }

    let exec = s.exec.unwrap_or_else(|| name.clone());
    Ok(ScenarioConfig {
        name: Arc::from(name),
        exec: Arc::from(exec),
        executor,
        start_time: s.start_time.unwrap_or(Duration::ZERO),
        pre_allocated_slots,
        max_slots,
        iteration_timeout: s.iteration_timeout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolOptions, Stage};
    use crate::thresholds::ThresholdSet;

    fn ramp_to_load() -> ScenarioOptions {
        ScenarioOptions {
            name: "ramp_to_load".to_string(),
            executor: Some("ramping-arrival-rate".to_string()),
            start_rate: Some(0),
            stages: vec![Stage {
                duration: Duration::from_secs(240),
                target: 50,
            }],
            pre_allocated_slots: Some(200),
            max_slots: Some(250),
            ..ScenarioOptions::default()
        }
    }

    fn maintain_load() -> ScenarioOptions {
        ScenarioOptions {
            name: "maintain_load".to_string(),
            executor: Some("constant-arrival-rate".to_string()),
            rate: Some(50),
            duration: Some(Duration::from_secs(60)),
            start_time: Some(Duration::from_secs(240)),
            pre_allocated_slots: Some(200),
            max_slots: Some(250),
            ..ScenarioOptions::default()
        }
    }

    fn plan(opts: RunOptions) -> RunPlan {
        plan_from_options(opts).unwrap_or_else(|e| panic!("plan_from_options: {e}"))
    }

    fn plan_err(opts: RunOptions) -> Error {
        match plan_from_options(opts) {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        }
    }

    fn with(scenario: ScenarioOptions) -> RunOptions {
        RunOptions {
            scenarios: vec![scenario],
            ..RunOptions::default()
        }
    }

    #[test]
    fn two_phase_plan_applies_defaults() {
        let p = plan(RunOptions {
            scenarios: vec![ramp_to_load(), maintain_load()],
            thresholds: vec![ThresholdSet {
                metric: "GetProduceTiming".to_string(),
                expressions: vec!["p(90)<100".to_string(), "p(95)<200".to_string()],
            }],
            ..RunOptions::default()
        });

        assert_eq!(p.scenarios.len(), 2);
        assert_eq!(&*p.scenarios[0].exec, "ramp_to_load");
        assert_eq!(p.scenarios[1].start_time, Duration::from_secs(240));
        assert_eq!(p.scheduled_duration(), Duration::from_secs(300));
        assert_eq!(p.thresholds.len(), 2);

        assert_eq!(p.pool.pre_allocated, 400);
        assert_eq!(p.pool.max, 500);
        assert_eq!(p.pool.queue_capacity, 500);
        assert_eq!(p.pool.overflow, OverflowPolicy::Drop);
        assert_eq!(p.miss_tolerance, DEFAULT_MISS_TOLERANCE);
        assert_eq!(p.graceful_stop, DEFAULT_GRACEFUL_STOP);
    }

    #[test]
    fn pool_overrides_win() {
        let mut opts = with(ramp_to_load());
        opts.pool = PoolOptions {
            pre_allocated: Some(4),
            max: Some(8),
            queue_capacity: Some(0),
            overflow: Some("block".to_string()),
        };
        let p = plan(opts);
        assert_eq!(p.pool.pre_allocated, 4);
        assert_eq!(p.pool.max, 8);
        assert_eq!(p.pool.queue_capacity, 0);
        assert_eq!(p.pool.overflow, OverflowPolicy::Block);
    }

    #[test]
    fn rejects_invalid_scenarios() {
        assert!(matches!(plan_err(RunOptions::default()), Error::NoScenarios));

        let mut s = ramp_to_load();
        s.stages.clear();
        assert!(matches!(plan_err(with(s)), Error::InvalidStages(_)));

        let mut s = ramp_to_load();
        s.stages = vec![Stage {
            duration: Duration::ZERO,
            target: 10,
        }];
        assert!(matches!(plan_err(with(s)), Error::InvalidDuration(_)));

        let mut s = ramp_to_load();
        s.time_unit = Some(Duration::ZERO);
        assert!(matches!(plan_err(with(s)), Error::InvalidTimeUnit(_)));

        let mut s = ramp_to_load();
        s.pre_allocated_slots = Some(0);
        assert!(matches!(plan_err(with(s)), Error::InvalidPreAllocatedSlots(_)));

        let mut s = ramp_to_load();
        s.max_slots = Some(10);
        assert!(matches!(plan_err(with(s)), Error::InvalidMaxSlots(_)));

        let mut s = ramp_to_load();
        s.executor = Some("constant-vus".to_string());
        assert!(matches!(plan_err(with(s)), Error::InvalidExecutor { .. }));

        let mut s = maintain_load();
        s.rate = None;
        assert!(matches!(plan_err(with(s)), Error::MissingRate(_)));

        let mut s = maintain_load();
        s.iteration_timeout = Some(Duration::ZERO);
        assert!(matches!(plan_err(with(s)), Error::InvalidIterationTimeout(_)));
    }

    #[test]
    fn rejects_duplicate_names_and_bad_pool() {
        let opts = RunOptions {
            scenarios: vec![ramp_to_load(), ramp_to_load()],
            ..RunOptions::default()
        };
        assert!(matches!(plan_err(opts), Error::DuplicateScenario(_)));

        let mut opts = with(ramp_to_load());
        opts.pool.overflow = Some("queue-forever".to_string());
        assert!(matches!(plan_err(opts), Error::InvalidOverflowPolicy(_)));

        let mut opts = with(ramp_to_load());
        opts.pool.pre_allocated = Some(10);
        opts.pool.max = Some(5);
        assert!(matches!(plan_err(opts), Error::InvalidPoolSize));
    }

    #[test]
    fn malformed_threshold_rejects_plan() {
        let mut opts = with(ramp_to_load());
        opts.thresholds = vec![ThresholdSet {
            metric: "GetProduceOK".to_string(),
            expressions: vec!["rate=1".to_string()],
        }];
        let err = plan_err(opts);
        assert!(err.is_configuration());
        assert!(matches!(err, Error::InvalidThresholdExpr { .. }));
    }
}
