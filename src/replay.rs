//! Scripted scenario replay through the full pipeline.
//!
//! A scenario is JSONL: one [`ScenarioStep`] per line, blank lines and `#`
//! comments ignored. Steps drive a [`SyntheticPlatform`] (clock, heap,
//! connection, raw platform events) and call collector and dashboard
//! operations directly. Experiments are addressed by a scenario-local alias
//! because test ids are generated at creation time.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::config::{Config, DashboardConfigPatch};
use crate::core::errors::{Result, TelemetryError};
use crate::core::ids::SessionId;
use crate::dashboard::alerts::PerformanceAlert;
use crate::dashboard::analytics::{AnalyticsDashboard, CleanupReport, DashboardSummary};
use crate::dashboard::experiments::{ABTestResults, ABTestSpec};
use crate::dashboard::metrics::PerformanceMetrics;
use crate::monitor::performance::PerformanceMonitor;
use crate::platform::events::PlatformEvent;
use crate::platform::pal::{ConnectionInfo, NavigationTiming, Platform, SyntheticPlatform};
use crate::tracker::error_tracker::ErrorTracker;
use crate::tracker::report::{BreadcrumbCategory, BreadcrumbEntry, BreadcrumbLevel, ErrorContext};

// ──────────────────── scenario steps ────────────────────

/// One scripted input. Serialized with an `op` tag, e.g.
/// `{"op":"heap","used_mb":120}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Deliver a raw platform event to every attached listener.
    Event { event: PlatformEvent },
    /// Move the synthetic clock forward.
    Advance { ms: i64 },
    Heap { used_mb: u64 },
    Connection { connection: Option<ConnectionInfo> },
    NavigationTiming { timing: Option<NavigationTiming> },
    ReportError {
        message: String,
        #[serde(default)]
        stack: Option<String>,
        #[serde(default)]
        context: Option<ErrorContext>,
    },
    ReportNetworkError {
        url: String,
        status: u16,
        #[serde(default)]
        status_text: String,
    },
    ReportMemoryError { used_mb: u64 },
    Breadcrumb {
        category: BreadcrumbCategory,
        message: String,
        #[serde(default)]
        level: BreadcrumbLevel,
    },
    /// Fold the collectors into one dashboard sample.
    Collect,
    CreateTest { alias: String, spec: ABTestSpec },
    StartTest { alias: String },
    PauseTest { alias: String },
    StopTest { alias: String },
    Assign { alias: String, user: String },
    Convert { alias: String, user: String },
    VariantScore { alias: String, user: String, score: f64 },
    Cleanup,
    UpdateConfig { patch: DashboardConfigPatch },
    AcknowledgeAlerts,
}

/// Parse JSONL scenario text. Line numbers in errors are 1-based.
pub fn parse_scenario(text: &str) -> Result<Vec<ScenarioStep>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| TelemetryError::ScenarioParse {
                line: idx + 1,
                details: e.to_string(),
            })
        })
        .collect()
}

/// Read and parse a scenario file.
pub fn load_scenario(path: &Path) -> Result<Vec<ScenarioStep>> {
    let text = fs::read_to_string(path).map_err(|e| TelemetryError::io(path, e))?;
    parse_scenario(&text)
}

// ──────────────────── outcome ────────────────────

/// Variant handed to one user by an `assign` step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub test: String,
    pub user: String,
    pub variant: Option<String>,
}

/// Final pipeline state after a replay.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayOutcome {
    pub steps: usize,
    pub session_id: String,
    pub current_metrics: Option<PerformanceMetrics>,
    pub alerts: Vec<PerformanceAlert>,
    pub errors: usize,
    pub breadcrumbs: usize,
    pub assignments: Vec<Assignment>,
    /// Results keyed by scenario alias.
    pub experiments: BTreeMap<String, ABTestResults>,
    pub cleanups: Vec<CleanupReport>,
    pub summary: DashboardSummary,
}

// ──────────────────── pipeline ────────────────────

/// Monitor, tracker and dashboard wired to one synthetic platform.
pub struct Pipeline {
    platform: Arc<SyntheticPlatform>,
    monitor: Arc<PerformanceMonitor>,
    tracker: Arc<ErrorTracker>,
    dashboard: AnalyticsDashboard,
    aliases: BTreeMap<String, String>,
    assignments: Vec<Assignment>,
    cleanups: Vec<CleanupReport>,
    steps: usize,
}

impl Pipeline {
    /// Build and start all three components.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
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

        monitor.start_monitoring()?;
        tracker.start_tracking();
        dashboard.start_monitoring()?;

        Ok(Self {
            platform,
            monitor,
            tracker,
            dashboard,
            aliases: BTreeMap::new(),
            assignments: Vec::new(),
            cleanups: Vec::new(),
            steps: 0,
        })
    }

    #[must_use]
    pub fn platform(&self) -> &SyntheticPlatform {
        &self.platform
    }

    #[must_use]
    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    #[must_use]
    pub fn tracker(&self) -> &ErrorTracker {
        &self.tracker
    }

    #[must_use]
    pub const fn dashboard(&self) -> &AnalyticsDashboard {
        &self.dashboard
    }

    /// Run every step in order, stopping at the first failing one.
    pub fn run(&mut self, steps: &[ScenarioStep]) -> Result<()> {
        for step in steps {
            self.apply(step)?;
        }
        Ok(())
    }

    pub fn apply(&mut self, step: &ScenarioStep) -> Result<()> {
        self.steps += 1;
        tracing::trace!(index = self.steps, ?step, "replay step");
        match step {
            ScenarioStep::Event { event } => {
                self.platform.emit(event.clone());
            }
            ScenarioStep::Advance { ms } => {
                self.platform.advance(chrono::Duration::milliseconds(*ms));
            }
            ScenarioStep::Heap { used_mb } => self.platform.set_heap_used_mb(*used_mb),
            ScenarioStep::Connection { connection } => {
                self.platform.set_connection(connection.clone());
            }
            ScenarioStep::NavigationTiming { timing } => {
                self.platform.set_navigation_timing(*timing);
            }
            ScenarioStep::ReportError {
                message,
                stack,
                context,
            } => {
                let mut error = crate::tracker::report::ReportedError::new(message.clone());
                error.stack.clone_from(stack);
                self.tracker.report_error(error, context.clone());
            }
            ScenarioStep::ReportNetworkError {
                url,
                status,
                status_text,
            } => {
                self.tracker
                    .report_network_error(url, *status, status_text, None);
            }
            ScenarioStep::ReportMemoryError { used_mb } => {
                self.tracker
                    .report_memory_error(used_mb.saturating_mul(1024 * 1024), None);
            }
            ScenarioStep::Breadcrumb {
                category,
                message,
                level,
            } => {
                self.tracker
                    .add_breadcrumb(BreadcrumbEntry::new(*category, message.clone()).level(*level));
            }
            ScenarioStep::Collect => {
                self.dashboard.collect_current_metrics();
            }
            ScenarioStep::CreateTest { alias, spec } => {
                let id = self.dashboard.create_ab_test(spec.clone())?;
                self.aliases.insert(alias.clone(), id);
            }
            ScenarioStep::StartTest { alias } => {
                let id = self.resolve(alias)?;
                self.dashboard.start_ab_test(&id)?;
            }
            ScenarioStep::PauseTest { alias } => {
                let id = self.resolve(alias)?;
                self.dashboard.pause_ab_test(&id)?;
            }
            ScenarioStep::StopTest { alias } => {
                let id = self.resolve(alias)?;
                self.dashboard.stop_ab_test(&id)?;
            }
            ScenarioStep::Assign { alias, user } => {
                let id = self.resolve(alias)?;
                let variant = self
                    .dashboard
                    .get_variant_for_user(&id, user)
                    .map(|v| v.id);
                self.assignments.push(Assignment {
                    test: alias.clone(),
                    user: user.clone(),
                    variant,
                });
            }
            ScenarioStep::Convert { alias, user } => {
                let id = self.resolve(alias)?;
                if !self.dashboard.record_conversion(&id, user) {
                    tracing::warn!(test = %alias, user = %user, "conversion for unassigned user ignored");
                }
            }
            ScenarioStep::VariantScore { alias, user, score } => {
                let id = self.resolve(alias)?;
                self.dashboard.record_variant_performance(&id, user, *score);
            }
            ScenarioStep::Cleanup => {
                let report = self.dashboard.cleanup_old_data();
                self.cleanups.push(report);
            }
            ScenarioStep::UpdateConfig { patch } => self.dashboard.update_config(patch)?,
            ScenarioStep::AcknowledgeAlerts => {
                for alert in self.dashboard.get_active_alerts() {
                    self.dashboard.acknowledge_alert(&alert.id);
                }
            }
        }
        Ok(())
    }

    fn resolve(&self, alias: &str) -> Result<String> {
        self.aliases
            .get(alias)
            .cloned()
            .ok_or_else(|| TelemetryError::UnknownExperiment {
                test_id: alias.to_string(),
            })
    }

    /// Snapshot the pipeline state.
    #[must_use]
    pub fn outcome(&self) -> ReplayOutcome {
        let experiments = self
            .aliases
            .iter()
            .filter_map(|(alias, id)| {
                self.dashboard
                    .get_ab_test_results(id)
                    .map(|results| (alias.clone(), results))
            })
            .collect();
        ReplayOutcome {
            steps: self.steps,
            session_id: self.monitor.session_id(),
            current_metrics: self.dashboard.get_current_metrics(),
            alerts: self.dashboard.get_all_alerts(),
            errors: self.tracker.get_session_errors().len(),
            breadcrumbs: self.tracker.get_breadcrumbs().len(),
            assignments: self.assignments.clone(),
            experiments,
            cleanups: self.cleanups.clone(),
            summary: self.dashboard.get_summary(),
        }
    }

    /// Stop all components, dashboard first.
    pub fn shutdown(&self) {
        self.dashboard.stop_monitoring();
        self.tracker.stop_tracking();
        self.monitor.stop_monitoring();
    }
}

/// Parse, run and summarize a scenario with the given config.
pub fn replay(config: &Config, text: &str) -> Result<ReplayOutcome> {
    let steps = parse_scenario(text)?;
    let mut pipeline = Pipeline::new(config)?;
    let result = pipeline.run(&steps);
    let outcome = pipeline.outcome();
    pipeline.shutdown();
    result.map(|()| outcome)
}
