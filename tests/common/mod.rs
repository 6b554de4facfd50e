#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use session_telemetry::core::config::Config;
use session_telemetry::core::ids::SessionId;
use session_telemetry::dashboard::analytics::AnalyticsDashboard;
use session_telemetry::monitor::performance::PerformanceMonitor;
use session_telemetry::platform::pal::{Platform, SyntheticPlatform};
use session_telemetry::tracker::error_tracker::ErrorTracker;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_tlm") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "tlm.exe" } else { "tlm" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve tlm binary path for integration test"),
    }
}

/// Run the `tlm` binary, keeping a per-case log of its output.
pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("tlm-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("TLM_LOG", "debug")
        .env_remove("TLM_OUTPUT_FORMAT")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute tlm command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let log_content = format!(
        "case={case_name}\nbin={}\nargs={args:?}\nstatus={}\n----- stdout -----\n{stdout}\n----- stderr -----\n{stderr}\n",
        bin_path.display(),
        output.status,
    );
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Monitor, tracker and dashboard sharing one synthetic platform. Nothing is
/// started; tests decide which lifecycles to run.
pub struct Stack {
    pub platform: Arc<SyntheticPlatform>,
    pub monitor: Arc<PerformanceMonitor>,
    pub tracker: Arc<ErrorTracker>,
    pub dashboard: AnalyticsDashboard,
}

impl Stack {
    pub fn new(config: &Config) -> Self {
        let platform = Arc::new(SyntheticPlatform::new());
        let shared: Arc<dyn Platform> = platform.clone();
        let session = SessionId::generate(shared.now());
        let monitor = Arc::new(PerformanceMonitor::with_session(
            Arc::clone(&shared),
            config.monitor.clone(),
            session.clone(),
        ));
        let tracker = Arc::new(ErrorTracker::with_session(
            Arc::clone(&shared),
            config.tracker.clone(),
            session,
        ));
        let dashboard = AnalyticsDashboard::new(
            shared,
            Arc::clone(&monitor),
            Arc::clone(&tracker),
            config.dashboard.clone(),
        );
        Self {
            platform,
            monitor,
            tracker,
            dashboard,
        }
    }

    pub fn started(config: &Config) -> Self {
        let stack = Self::new(config);
        stack.monitor.start_monitoring().expect("start monitor");
        stack.tracker.start_tracking();
        stack.dashboard.start_monitoring().expect("start dashboard");
        stack
    }
}

/// Config with background tickers slowed far past any test's runtime.
pub fn quiet_config() -> Config {
    let mut config = Config::default();
    config.monitor.memory_sample_interval_ms = 3_600_000;
    config.dashboard.refresh_interval_ms = 3_600_000;
    config
}
