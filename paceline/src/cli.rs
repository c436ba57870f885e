use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }
    humantime::parse_duration(s)
        .map_err(|e| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m): {e}"))
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bars and a human-readable summary.
    HumanReadable,
    /// Emit JSON progress lines (NDJSON) and a JSON summary line to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "paceline",
    author,
    version,
    about = "Open-model load generator with threshold verdicts",
    long_about = "paceline releases iterations at the rate a plan prescribes, regardless of how fast the target responds.\n\nA run plan (YAML) lists arrival-rate scenarios, the HTTP steps each scenario executes, and the thresholds that decide whether the run passed.\n\nThe process exit code reflects the verdict: 0 passed, 11 thresholds failed, 13 thresholds could not be evaluated, 30 invalid input, 40 runtime error, 130 interrupted.",
    after_help = "Examples:\n  paceline run demos/supermarket.yaml\n  paceline run demos/supermarket.yaml --base-url http://127.0.0.1:8080 --output json\n  paceline check demos/supermarket.yaml"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute a run plan and report the verdict
    Run(RunArgs),

    /// Validate a run plan and print what it would do, without sending any traffic
    Check(CheckArgs),
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Path to the run plan (.yaml)
    pub plan: PathBuf,

    /// Base URL substituted for `{base_url}` (overrides `baseUrl` from the plan)
    #[arg(long, env = "PACELINE_BASE_URL")]
    pub base_url: Option<String>,

    /// How long in-flight iterations may run after the last release (e.g. 30s)
    #[arg(long, value_parser = parse_duration)]
    pub graceful_stop: Option<Duration>,

    /// Start lag beyond which an iteration counts as a scheduling miss (e.g. 100ms)
    #[arg(long, value_parser = parse_duration)]
    pub miss_tolerance: Option<Duration>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub plan: PlanArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub plan: PlanArgs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_common_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration(" 4m "), Ok(Duration::from_secs(240)));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn cli_parses_run_with_overrides() {
        let parsed = Cli::try_parse_from([
            "paceline",
            "run",
            "plan.yaml",
            "--base-url",
            "http://127.0.0.1:9000",
            "--graceful-stop",
            "5s",
            "--miss-tolerance",
            "50ms",
            "--output",
            "json",
        ]);

        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.plan.plan, PathBuf::from("plan.yaml"));
                assert_eq!(args.plan.base_url.as_deref(), Some("http://127.0.0.1:9000"));
                assert_eq!(args.plan.graceful_stop, Some(Duration::from_secs(5)));
                assert_eq!(args.plan.miss_tolerance, Some(Duration::from_millis(50)));
                assert!(matches!(args.output, OutputFormat::Json));
            }
            Command::Check(_) => panic!("expected run command"),
        }
    }

    #[test]
    fn cli_parses_check_defaults() {
        let parsed = Cli::try_parse_from(["paceline", "check", "plan.yaml"]);
        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        match cli.command {
            Command::Check(args) => {
                assert_eq!(args.plan.plan, PathBuf::from("plan.yaml"));
                assert_eq!(args.plan.graceful_stop, None);
                assert_eq!(args.plan.miss_tolerance, None);
            }
            Command::Run(_) => panic!("expected check command"),
        }
    }

    #[test]
    fn cli_rejects_bad_duration() {
        assert!(
            Cli::try_parse_from(["paceline", "run", "plan.yaml", "--graceful-stop", "10x"])
                .is_err()
        );
    }
}
