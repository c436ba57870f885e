use std::path::Path;
use std::sync::Arc;

use paceline_core::{ProgressFn, ProgressUpdate, RunPlan, RunSummary, ScenarioState};

mod format;
mod progress;
mod summary;

use format::{format_duration, format_rate};
use progress::HumanProgress;
use summary::{render, render_threshold_failures};

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, plan_path: &Path, plan: &RunPlan) {
        println!("plan: {}", plan_path.display());
        for s in &plan.scenarios {
            let schedule = s.schedule();
            println!(
                "scenario: {} exec={} executor={} start={} duration={} iterations={} slots={}..{}",
                s.name,
                s.exec,
                s.executor.kind(),
                format_duration(s.start_time),
                format_duration(schedule.total_duration()),
                schedule.expected_iterations(),
                s.pre_allocated_slots,
                s.max_slots
            );
        }
        println!(
            "pool: slots={}..{} backlog={} overflow={} graceful_stop={}",
            plan.pool.pre_allocated,
            plan.pool.max,
            plan.pool.queue_capacity,
            plan.pool.overflow,
            format_duration(plan.graceful_stop)
        );
        println!(
            "thresholds: {} expression(s), run length {}",
            plan.thresholds.len(),
            format_duration(plan.scheduled_duration())
        );
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();
        Some(Arc::new(move |u: ProgressUpdate| {
            let p = &u.progress;
            let message = match p.state {
                ScenarioState::Pending => "pending".to_string(),
                ScenarioState::Running | ScenarioState::Finished => {
                    let mut msg = String::new();
                    if let Some(stage) = &p.stage {
                        msg.push_str(&format!(
                            "stage={}/{} target={}/s ",
                            stage.stage,
                            stage.stages,
                            format_rate(stage.current_rate)
                        ));
                    }
                    msg.push_str(&format!(
                        "iters/s={} scheduled={}/{} dropped={} misses={} failed={} busy={}/{} queued={}",
                        format_rate(p.iterations_per_sec_now),
                        p.scheduled,
                        p.expected_iterations,
                        p.dropped,
                        p.misses,
                        p.failed,
                        u.pool.busy,
                        u.pool.max,
                        u.pool.queued
                    ));
                    msg
                }
            };

            progress.update(&u.scenario, p.total_duration, p.scenario_elapsed, message);
        }))
    }

    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(summary));

        let failures = render_threshold_failures(summary);
        if !failures.is_empty() {
            eprint!("{failures}");
        }

        Ok(())
    }
}
