//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{ColoredString, Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use session_telemetry::core::config::Config;
use session_telemetry::core::errors::TelemetryError;
use session_telemetry::core::severity::Severity;
use session_telemetry::dashboard::experiments::bucket_for;
use session_telemetry::dashboard::metrics::{GradedValue, PerformanceMetrics};
use session_telemetry::monitor::vitals::Grade;
use session_telemetry::replay::{self, ReplayOutcome};

/// Session telemetry: replay scenarios through the monitoring pipeline.
#[derive(Debug, Parser)]
#[command(
    name = "tlm",
    author,
    version,
    about = "Session telemetry, alerting and A/B bucketing",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Replay a JSONL scenario through monitor, tracker and dashboard.
    Replay(ReplayArgs),
    /// Print the traffic bucket (0-99) for user ids.
    Bucket(BucketArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct ReplayArgs {
    /// Scenario file, one step per line.
    #[arg(value_name = "FILE")]
    scenario: PathBuf,
    /// Exit with status 4 when an alert at or above this severity was raised.
    #[arg(long, value_enum, value_name = "SEVERITY")]
    fail_on: Option<AlertLevel>,
    /// Include the full alert list in human output.
    #[arg(long)]
    all_alerts: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AlertLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl From<AlertLevel> for Severity {
    fn from(level: AlertLevel) -> Self {
        match level {
            AlertLevel::Low => Self::Low,
            AlertLevel::Medium => Self::Medium,
            AlertLevel::High => Self::High,
            AlertLevel::Critical => Self::Critical,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct BucketArgs {
    /// User ids to bucket.
    #[arg(required = true, value_name = "USER_ID")]
    user_ids: Vec<String>,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Command ran but its result tripped a failure gate.
    #[error("{0}")]
    Partial(String),
    /// Library failure.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Telemetry(e) => {
                if e.is_retryable() || matches!(e, TelemetryError::Io { .. }) {
                    2
                } else {
                    1
                }
            }
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }
    init_tracing(cli);

    match &cli.command {
        Command::Replay(args) => run_replay(cli, args),
        Command::Bucket(args) => run_bucket(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

/// Logs go to stderr; `TLM_LOG` wins over the verbosity flags.
/// Install the stderr subscriber. Returns false when a global subscriber was
/// already in place and this one was not installed.
fn init_tracing(cli: &Cli) -> bool {
    let default_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_env("TLM_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    match tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(filter)
        .try_init()
    {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(%err, "global tracing subscriber already installed");
            false
        }
    }
}

// ──────────────────── replay ────────────────────

fn run_replay(cli: &Cli, args: &ReplayArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let steps = replay::load_scenario(&args.scenario)?;
    tracing::debug!(steps = steps.len(), scenario = %args.scenario.display(), "replaying");

    let mut pipeline = replay::Pipeline::new(&config)?;
    let result = pipeline.run(&steps);
    let outcome = pipeline.outcome();
    pipeline.shutdown();
    result?;

    match output_mode(cli) {
        OutputMode::Human => print_outcome_human(&outcome, args.all_alerts),
        OutputMode::Json => {
            let payload = json!({
                "command": "replay",
                "scenario": args.scenario.to_string_lossy(),
                "outcome": serde_json::to_value(&outcome)?,
            });
            write_json_line(&payload)?;
        }
    }

    if let Some(level) = args.fail_on {
        let gate = Severity::from(level);
        let tripped = outcome
            .alerts
            .iter()
            .filter(|alert| alert.severity >= gate)
            .count();
        if tripped > 0 {
            return Err(CliError::Partial(format!(
                "{tripped} alert(s) at or above {gate}"
            )));
        }
    }
    Ok(())
}

fn print_outcome_human(outcome: &ReplayOutcome, all_alerts: bool) {
    println!(
        "{} {} steps, session {}",
        "Replay".bold(),
        outcome.steps,
        outcome.session_id
    );
    println!(
        "  errors: {}  breadcrumbs: {}  samples: {}",
        outcome.errors, outcome.breadcrumbs, outcome.summary.samples
    );

    match &outcome.current_metrics {
        Some(metrics) => print_metrics_human(metrics),
        None => println!("\n{}", "No metrics collected.".dimmed()),
    }

    let active = outcome.alerts.iter().filter(|a| a.is_active()).count();
    println!(
        "\n{} {} raised, {} active",
        "Alerts".bold(),
        outcome.alerts.len(),
        active
    );
    for (severity, count) in &outcome.summary.alerts_by_severity {
        if *count > 0 {
            println!("  {:<9} {count}", paint_severity(*severity));
        }
    }
    if all_alerts {
        for alert in &outcome.alerts {
            println!(
                "  [{}] {} {}",
                paint_severity(alert.severity),
                alert.timestamp.format("%H:%M:%S"),
                alert.message
            );
        }
    }

    if !outcome.assignments.is_empty() {
        println!("\n{}", "Assignments".bold());
        for assignment in &outcome.assignments {
            println!(
                "  {:<16} {:<20} {}",
                assignment.test,
                assignment.user,
                assignment.variant.as_deref().unwrap_or("-")
            );
        }
    }

    for (alias, results) in &outcome.experiments {
        println!(
            "\n{} {alias} ({}, {})",
            "Experiment".bold(),
            results.name,
            results.status.as_str()
        );
        println!(
            "  participants: {}  conversions: {}  rate: {:.1}%  leader: {}",
            results.total_participants,
            results.total_conversions,
            results.overall_conversion_rate,
            results.leading_variant.as_deref().unwrap_or("-")
        );
        for variant in &results.variants {
            println!(
                "    {:<14} {:>3}%  n={:<5} conv={:<5} rate={:>5.1}%  perf={:>5.1}",
                variant.id,
                variant.traffic_percentage,
                variant.metrics.participants,
                variant.metrics.conversions,
                variant.metrics.conversion_rate,
                variant.metrics.avg_performance_score
            );
        }
    }

    for cleanup in &outcome.cleanups {
        println!(
            "\n{} removed {} sample(s), {} alert(s)",
            "Cleanup".bold(),
            cleanup.metrics_removed,
            cleanup.alerts_removed
        );
    }
}

fn print_metrics_human(metrics: &PerformanceMetrics) {
    println!(
        "\n{} score {} at {}",
        "Metrics".bold(),
        metrics.score,
        metrics.timestamp.to_rfc3339()
    );
    let v = &metrics.vitals;
    for (label, value, unit) in [
        ("LCP", v.lcp, "ms"),
        ("FID", v.fid, "ms"),
        ("CLS", v.cls, ""),
        ("FCP", v.fcp, "ms"),
        ("TTI", v.tti, "ms"),
        ("TBT", v.tbt, "ms"),
    ] {
        println!("  {label:<4} {}", format_vital(value, unit));
    }
    println!(
        "  heap {:.1}MB (peak {:.1}MB, {})",
        metrics.memory.used_mb,
        metrics.memory.peak_mb,
        metrics.memory.pressure.as_str()
    );
    println!(
        "  errors {} total, {}/min, {} critical",
        metrics.errors.total, metrics.errors.per_minute, metrics.errors.critical
    );
    println!(
        "  network {} ({})",
        metrics.network.connection_type, metrics.network.effective_type
    );
}

fn format_vital(value: GradedValue, unit: &str) -> String {
    if value.value <= 0.0 {
        return "-".dimmed().to_string();
    }
    let text = if unit.is_empty() {
        format!("{:.3}", value.value)
    } else {
        format!("{:.0}{unit}", value.value)
    };
    let grade = match value.grade {
        Grade::Good => value.grade.as_str().green(),
        Grade::NeedsImprovement => value.grade.as_str().yellow(),
        Grade::Poor => value.grade.as_str().red(),
    };
    format!("{text:<10} {grade}")
}

fn paint_severity(severity: Severity) -> ColoredString {
    match severity {
        Severity::Low => severity.as_str().normal(),
        Severity::Medium => severity.as_str().yellow(),
        Severity::High => severity.as_str().red(),
        Severity::Critical => severity.as_str().red().bold(),
    }
}

// ──────────────────── bucket ────────────────────

fn run_bucket(cli: &Cli, args: &BucketArgs) -> Result<(), CliError> {
    if let Some(empty) = args.user_ids.iter().position(String::is_empty) {
        return Err(CliError::User(format!(
            "user id #{} is empty",
            empty + 1
        )));
    }
    match output_mode(cli) {
        OutputMode::Human => {
            for user in &args.user_ids {
                println!("{:>2}  {user}", bucket_for(user));
            }
        }
        OutputMode::Json => {
            let buckets: Vec<Value> = args
                .user_ids
                .iter()
                .map(|user| json!({ "user_id": user, "bucket": bucket_for(user) }))
                .collect();
            write_json_line(&json!({
                "command": "bucket",
                "buckets": buckets,
            }))?;
        }
    }
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("{}", "Configuration is valid.".green());
                        println!("  Source: {}", config.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.config_file.to_string_lossy(),
                            "hash": hash,
                        }))?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("{} {e}", "Configuration is INVALID:".red());
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        }))?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("TLM_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_tracing_init_reports_existing_subscriber() {
        let cli = Cli::try_parse_from(["tlm", "-q", "bucket", "user-1"]).expect("parse");
        init_tracing(&cli);
        assert!(!init_tracing(&cli));
    }

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "tlm",
            "--config",
            "/tmp/tlm.toml",
            "--json",
            "--no-color",
            "-v",
            "bucket",
            "user-1",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["tlm", "bucket", "user-1", "--json", "--no-color", "-q"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_subcommands() {
        let cases = [
            vec!["tlm", "replay", "scenario.jsonl"],
            vec!["tlm", "replay", "scenario.jsonl", "--fail-on", "high", "--all-alerts"],
            vec!["tlm", "bucket", "user-1", "user-42"],
            vec!["tlm", "config"],
            vec!["tlm", "config", "path"],
            vec!["tlm", "config", "show"],
            vec!["tlm", "config", "validate"],
        ];

        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Cli::try_parse_from(["tlm", "replay"]).is_err());
        assert!(Cli::try_parse_from(["tlm", "bucket"]).is_err());
        assert!(Cli::try_parse_from(["tlm", "replay", "s.jsonl", "--fail-on", "severe"]).is_err());
        assert!(Cli::try_parse_from(["tlm", "-v", "-q", "config"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["tlm", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(
            resolve_output_mode(false, Some("auto"), true),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn exit_codes_follow_error_class() {
        assert_eq!(CliError::User("x".into()).exit_code(), 1);
        assert_eq!(CliError::Partial("x".into()).exit_code(), 4);
        let parse = TelemetryError::ScenarioParse {
            line: 2,
            details: "bad".into(),
        };
        assert_eq!(CliError::from(parse).exit_code(), 1);
        let io_err = TelemetryError::io("/tmp/x", io::Error::other("gone"));
        assert_eq!(CliError::from(io_err).exit_code(), 2);
    }

    #[test]
    fn alert_level_maps_onto_severity() {
        assert_eq!(Severity::from(AlertLevel::Critical), Severity::Critical);
        assert!(Severity::from(AlertLevel::Medium) < Severity::from(AlertLevel::High));
    }
}
