use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use paceline_http::Method;
use serde::Deserialize;

use crate::workload::HttpStep;

/// Top-level run plan document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct PlanYaml {
    /// Substituted for `{base_url}` in step URLs, headers and bodies.
    #[serde(default)]
    pub base_url: Option<String>,

    pub scenarios: Vec<ScenarioYaml>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdExprYaml>,

    #[serde(default)]
    pub pool: PoolYaml,

    #[serde(default)]
    pub miss_tolerance: Option<YamlDuration>,

    #[serde(default)]
    pub graceful_stop: Option<YamlDuration>,

    /// Workload name -> ordered HTTP steps. Scenarios pick one by `exec`.
    #[serde(default)]
    pub workloads: BTreeMap<String, Vec<StepYaml>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ScenarioYaml {
    #[serde(default)]
    pub name: Option<String>,

    /// Workload name.
    #[serde(default)]
    pub exec: Option<String>,

    /// ramping-arrival-rate | constant-arrival-rate
    #[serde(default)]
    pub executor: Option<String>,

    // ramping-arrival-rate
    #[serde(default)]
    pub start_rate: Option<u64>,

    #[serde(default)]
    pub stages: Vec<StageYaml>,

    // constant-arrival-rate
    #[serde(default)]
    pub rate: Option<u64>,

    #[serde(default)]
    pub duration: Option<YamlDuration>,

    #[serde(default)]
    pub time_unit: Option<YamlDuration>,

    #[serde(default)]
    pub start_time: Option<YamlDuration>,

    #[serde(default, alias = "preAllocatedVUs")]
    pub pre_allocated_slots: Option<u64>,

    #[serde(default, alias = "maxVUs")]
    pub max_slots: Option<u64>,

    #[serde(default)]
    pub iteration_timeout: Option<YamlDuration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub target: u64,

    #[serde(default)]
    pub duration: YamlDuration,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct PoolYaml {
    #[serde(default)]
    pub pre_allocated: Option<u64>,

    #[serde(default)]
    pub max: Option<u64>,

    #[serde(default)]
    pub queue_capacity: Option<u64>,

    /// drop | block
    #[serde(default)]
    pub overflow: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StepYaml {
    /// Prefix of the `<name>OK` and `<name>Timing` metrics.
    pub name: String,

    #[serde(default = "default_method")]
    pub method: String,

    pub url: String,

    #[serde(default)]
    pub body: Option<BodyYaml>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub timeout: Option<YamlDuration>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// A literal request body, or a YAML structure sent as JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum BodyYaml {
    Text(String),
    Json(serde_json::Value),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdExprYaml {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> serde::de::Visitor<'de> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 4m, 250ms), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|v| YamlDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v < 0.0 {
                    return Err(E::custom("duration must be a non-negative number"));
                }
                Duration::try_from_secs_f64(v)
                    .map(YamlDuration)
                    .map_err(E::custom)
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// A parsed plan file, split into engine options and the CLI-owned HTTP workloads.
#[derive(Debug, Clone)]
pub(crate) struct LoadedPlan {
    pub options: paceline_core::RunOptions,
    pub base_url: Option<String>,
    pub workloads: BTreeMap<String, Vec<HttpStep>>,
}

pub(crate) async fn load_plan(path: &Path) -> anyhow::Result<LoadedPlan> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read run plan: {}", path.display()))?;

    parse_plan(&bytes).with_context(|| format!("invalid run plan: {}", path.display()))
}

pub(crate) fn parse_plan(bytes: &[u8]) -> anyhow::Result<LoadedPlan> {
    let doc: PlanYaml = serde_yaml::from_slice(bytes).context("failed to parse YAML")?;

    let PlanYaml {
        base_url,
        scenarios,
        thresholds,
        pool,
        miss_tolerance,
        graceful_stop,
        workloads,
    } = doc;

    let scenarios = scenarios
        .into_iter()
        .enumerate()
        .map(|(idx, s)| scenario_yaml_into_options(s, idx))
        .collect();

    let workloads = workloads
        .into_iter()
        .map(|(name, steps)| {
            let steps = steps
                .into_iter()
                .map(step_yaml_into_step)
                .collect::<anyhow::Result<Vec<_>>>()
                .with_context(|| format!("invalid workload `{name}`"))?;
            Ok((name, steps))
        })
        .collect::<anyhow::Result<BTreeMap<_, _>>>()?;

    Ok(LoadedPlan {
        options: paceline_core::RunOptions {
            scenarios,
            thresholds: thresholds_map_into_sets(thresholds),
            pool: paceline_core::PoolOptions {
                pre_allocated: pool.pre_allocated,
                max: pool.max,
                queue_capacity: pool.queue_capacity,
                overflow: pool.overflow,
            },
            miss_tolerance: miss_tolerance.map(YamlDuration::into_inner),
            graceful_stop: graceful_stop.map(YamlDuration::into_inner),
        },
        base_url,
        workloads,
    })
}

fn scenario_yaml_into_options(
    scenario: ScenarioYaml,
    idx: usize,
) -> paceline_core::ScenarioOptions {
    let ScenarioYaml {
        name,
        exec,
        executor,
        start_rate,
        stages,
        rate,
        duration,
        time_unit,
        start_time,
        pre_allocated_slots,
        max_slots,
        iteration_timeout,
    } = scenario;

    paceline_core::ScenarioOptions {
        name: name.unwrap_or_else(|| format!("scenario_{}", idx + 1)),
        exec,
        executor,
        start_rate,
        stages: stages
            .into_iter()
            .map(|s| paceline_core::Stage {
                duration: s.duration.into_inner(),
                target: s.target,
            })
            .collect(),
        rate,
        duration: duration.map(YamlDuration::into_inner),
        time_unit: time_unit.map(YamlDuration::into_inner),
        start_time: start_time.map(YamlDuration::into_inner),
        pre_allocated_slots,
        max_slots,
        iteration_timeout: iteration_timeout.map(YamlDuration::into_inner),
    }
}

fn step_yaml_into_step(step: StepYaml) -> anyhow::Result<HttpStep> {
    let StepYaml {
        name,
        method,
        url,
        body,
        headers,
        timeout,
    } = step;

    if name.trim().is_empty() {
        anyhow::bail!("step name must not be empty");
    }
    let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| anyhow::anyhow!("step `{name}`: invalid HTTP method `{method}`"))?;

    let mut headers: Vec<(String, String)> = headers.into_iter().collect();
    let body = match body {
        None => None,
        Some(BodyYaml::Text(s)) => Some(s),
        Some(BodyYaml::Json(v)) => {
            if !headers
                .iter()
                .any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            {
                headers.push(("content-type".to_string(), "application/json".to_string()));
            }
            Some(
                serde_json::to_string(&v)
                    .with_context(|| format!("step `{name}`: body is not valid JSON"))?,
            )
        }
    };

    let mut step = HttpStep::new(name, method, url);
    step.body = body;
    step.headers = headers;
    step.timeout = timeout.map(YamlDuration::into_inner);
    Ok(step)
}

fn thresholds_map_into_sets(
    raw: BTreeMap<String, ThresholdExprYaml>,
) -> Vec<paceline_core::ThresholdSet> {
    raw.into_iter()
        .map(|(metric, v)| paceline_core::ThresholdSet {
            metric,
            expressions: match v {
                ThresholdExprYaml::One(s) => vec![s],
                ThresholdExprYaml::Many(v) => v,
            },
        })
        .collect()
}
