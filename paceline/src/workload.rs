use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use paceline_core::{IterationContext, Workload, WorkloadFuture};
use paceline_http::{HttpClient, HttpRequest, Method};

/// Workload used by scenarios whose `exec` has no workload of its own.
pub(crate) const DEFAULT_WORKLOAD: &str = "default";

/// One HTTP request of a workload, with `{placeholder}` templates in url, headers and body.
#[derive(Debug, Clone)]
pub(crate) struct HttpStep {
    pub name: String,
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    ok_metric: String,
    timing_metric: String,
}

impl HttpStep {
    pub(crate) fn new(name: String, method: Method, url: String) -> Self {
        Self {
            ok_metric: format!("{name}OK"),
            timing_metric: format!("{name}Timing"),
            name,
            method,
            url,
            body: None,
            headers: Vec::new(),
            timeout: None,
        }
    }

    /// Rate metric: true when the response status is below 300.
    pub(crate) fn ok_metric(&self) -> &str {
        &self.ok_metric
    }

    /// Trend metric: response time in milliseconds.
    pub(crate) fn timing_metric(&self) -> &str {
        &self.timing_metric
    }

    fn uses_base_url(&self) -> bool {
        self.url.contains(BASE_URL_VAR)
            || self.body.as_deref().is_some_and(|b| b.contains(BASE_URL_VAR))
            || self.headers.iter().any(|(_, v)| v.contains(BASE_URL_VAR))
    }
}

const BASE_URL_VAR: &str = "{base_url}";

struct Vars<'a> {
    base_url: &'a str,
    scenario: &'a str,
    iteration: u64,
    slot: u64,
}

impl Vars<'_> {
    fn render(&self, template: &str) -> String {
        if !template.contains('{') {
            return template.to_string();
        }
        template
            .replace(BASE_URL_VAR, self.base_url)
            .replace("{scenario}", self.scenario)
            .replace("{iteration}", &self.iteration.to_string())
            .replace("{slot}", &self.slot.to_string())
    }
}

/// Runs the steps resolved for the iteration's `exec`, in order.
///
/// Every completed exchange records `<name>OK` and `<name>Timing`. An error status is an
/// observation, not a failure. A transport error records `<name>OK=false`; the remaining
/// steps still run and the iteration then fails with the first such error.
#[derive(Debug)]
pub(crate) struct HttpWorkload {
    client: HttpClient,
    base_url: Arc<str>,
    steps: HashMap<Arc<str>, Arc<[HttpStep]>>,
}

impl HttpWorkload {
    /// Resolve every exec name against `workloads`, falling back to [`DEFAULT_WORKLOAD`].
    pub(crate) fn new<'a>(
        client: HttpClient,
        base_url: Option<String>,
        workloads: &BTreeMap<String, Vec<HttpStep>>,
        execs: impl IntoIterator<Item = &'a str>,
    ) -> anyhow::Result<Self> {
        let mut steps: HashMap<Arc<str>, Arc<[HttpStep]>> = HashMap::new();

        for exec in execs {
            if steps.contains_key(exec) {
                continue;
            }
            let resolved = workloads
                .get(exec)
                .or_else(|| workloads.get(DEFAULT_WORKLOAD))
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "no workload named `{exec}` and no `{DEFAULT_WORKLOAD}` workload to fall back to"
                    )
                })?;
            if resolved.is_empty() {
                anyhow::bail!("workload for `{exec}` has no steps");
            }
            steps.insert(Arc::from(exec), Arc::from(resolved.as_slice()));
        }

        let needs_base_url = steps.values().flat_map(|s| s.iter()).any(HttpStep::uses_base_url);
        let base_url = match base_url {
            Some(u) => u.trim_end_matches('/').to_string(),
            None if needs_base_url => {
                anyhow::bail!("steps use `{BASE_URL_VAR}` but no base URL is set (plan `baseUrl` or --base-url)")
            }
            None => String::new(),
        };

        Ok(Self {
            client,
            base_url: Arc::from(base_url),
            steps,
        })
    }

    pub(crate) fn steps_for(&self, exec: &str) -> Option<&[HttpStep]> {
        self.steps.get(exec).map(|s| &s[..])
    }
}

impl Workload for HttpWorkload {
    fn call(&self, ctx: IterationContext) -> WorkloadFuture {
        let steps = self.steps.get(&ctx.exec).cloned();
        let client = self.client.clone();
        let base_url = self.base_url.clone();

        Box::pin(async move {
            let steps = steps.ok_or_else(|| format!("no workload for exec `{}`", ctx.exec))?;
            let vars = Vars {
                base_url: &base_url,
                scenario: &ctx.scenario,
                iteration: ctx.iteration,
                slot: ctx.slot,
            };
            let mut first_err = None;
            for step in steps.iter() {
                if let Err(err) = run_step(&client, &vars, step, &ctx).await {
                    first_err.get_or_insert(err);
                }
            }
            first_err.map_or(Ok(()), Err)
        })
    }
}

async fn run_step(
    client: &HttpClient,
    vars: &Vars<'_>,
    step: &HttpStep,
    ctx: &IterationContext,
) -> Result<(), String> {
    let mut req = HttpRequest::new(step.method.clone(), vars.render(&step.url))
        .with_timeout(step.timeout);
    if let Some(body) = &step.body {
        req = req.with_body(vars.render(body));
    }
    for (k, v) in &step.headers {
        req = req.with_header(k.clone(), vars.render(v));
    }

    let started = Instant::now();
    match client.request(req).await {
        Ok(res) => {
            let ms = res.elapsed.as_secs_f64() * 1_000.0;
            ctx.metrics
                .record_rate(step.ok_metric(), res.status < 300)
                .map_err(|e| e.to_string())?;
            ctx.metrics
                .record_trend(step.timing_metric(), ms)
                .map_err(|e| e.to_string())?;
            Ok(())
        }
        Err(err) => {
            let kind = err.transport_error_kind();
            log::debug!(
                "step `{}` failed ({kind}) after {:?}: {err}",
                step.name,
                started.elapsed()
            );
            ctx.metrics
                .record_rate(step.ok_metric(), false)
                .map_err(|e| e.to_string())?;
            Err(format!("{}: {kind}: {err}", step.name))
        }
    }
}
