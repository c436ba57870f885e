use std::sync::Arc;

use paceline_core::{RunContext, RunPlan, Shutdown};
use paceline_http::HttpClient;

use crate::cli::{CheckArgs, OutputFormat, PlanArgs, RunArgs};
use crate::exit_codes::ExitCode;
use crate::output;
use crate::plan_yaml::{self, LoadedPlan};
use crate::run_error::RunError;
use crate::workload::HttpWorkload;

struct Prepared {
    plan: RunPlan,
    workload: HttpWorkload,
}

async fn prepare(args: &PlanArgs) -> Result<Prepared, RunError> {
    let LoadedPlan {
        mut options,
        base_url,
        workloads,
    } = plan_yaml::load_plan(&args.plan)
        .await
        .map_err(RunError::InvalidInput)?;

    if let Some(d) = args.graceful_stop {
        options.graceful_stop = Some(d);
    }
    if let Some(d) = args.miss_tolerance {
        options.miss_tolerance = Some(d);
    }

    let plan = paceline_core::plan_from_options(options)?;

    let workload = HttpWorkload::new(
        HttpClient::default(),
        args.base_url.clone().or(base_url),
        &workloads,
        plan.scenarios.iter().map(|s| &*s.exec),
    )
    .map_err(|e| RunError::InvalidInput(e.context("invalid workloads")))?;

    Ok(Prepared { plan, workload })
}

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);
    let Prepared { plan, workload } = prepare(&args.plan).await?;

    out.print_header(&args.plan.plan, &plan);

    let ctx = RunContext::new();
    let interrupt = tokio::spawn(cancel_on_ctrl_c(ctx.shutdown.clone()));

    let result =
        paceline_core::run_workload(plan, ctx, Arc::new(workload), out.progress()).await;
    interrupt.abort();
    let summary = result?;

    out.print_summary(&summary).map_err(RunError::RuntimeError)?;

    Ok(ExitCode::from_run(&summary))
}

pub async fn check(args: CheckArgs) -> Result<ExitCode, RunError> {
    let Prepared { plan, workload } = prepare(&args.plan).await?;

    output::formatter(OutputFormat::HumanReadable).print_header(&args.plan.plan, &plan);
    for s in &plan.scenarios {
        let steps = workload.steps_for(&s.exec).unwrap_or_default();
        let names: Vec<&str> = steps.iter().map(|st| st.name.as_str()).collect();
        println!("workload: {} -> {}", s.exec, names.join(", "));
    }
    println!("plan ok");

    Ok(ExitCode::Success)
}

async fn cancel_on_ctrl_c(shutdown: Shutdown) {
    if tokio::signal::ctrl_c().await.is_ok() {
        log::warn!("interrupt received; stopping the run");
        eprintln!("interrupted: stopping schedulers and aborting in-flight iterations");
        shutdown.trigger();
    }
}
