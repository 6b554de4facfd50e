//! Analytics dashboard: rolling metrics history, alerting and experiments on
//! top of the two collectors.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::config::{DashboardConfig, DashboardConfigPatch};
use crate::core::errors::Result;
use crate::core::severity::Severity;
use crate::core::subscribers::{SubscriberSet, Subscription};
use crate::core::ticker::Ticker;
use crate::dashboard::alerts::{
    AlertDraft, AlertLog, AlertType, PerformanceAlert, draft_for_error, evaluate_thresholds,
    grade_issues,
};
use crate::dashboard::experiments::{
    ABTest, ABTestResults, ABTestSpec, ABTestVariant, ExperimentRegistry,
};
use crate::dashboard::metrics::PerformanceMetrics;
use crate::monitor::performance::PerformanceMonitor;
use crate::monitor::report::PerformanceReport;
use crate::monitor::vitals::check_performance_thresholds;
use crate::platform::pal::Platform;
use crate::tracker::error_tracker::ErrorTracker;
use crate::tracker::report::MobileErrorReport;

/// Counts removed by [`AnalyticsDashboard::cleanup_old_data`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub metrics_removed: usize,
    pub alerts_removed: usize,
}

/// Compact overview of dashboard state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardSummary {
    pub samples: usize,
    pub alerts_total: usize,
    pub active_alerts: usize,
    pub alerts_by_severity: BTreeMap<Severity, usize>,
    pub running_tests: usize,
    pub latest_score: Option<u8>,
}

struct DashboardState {
    config: DashboardConfig,
    history: Vec<PerformanceMetrics>,
    alerts: AlertLog,
    experiments: ExperimentRegistry,
}

#[derive(Default)]
struct Lifecycle {
    ticker: Option<Ticker>,
    subscriptions: Vec<Subscription>,
}

struct DashboardInner {
    platform: Arc<dyn Platform>,
    monitor: Arc<PerformanceMonitor>,
    tracker: Arc<ErrorTracker>,
    state: Mutex<DashboardState>,
    alert_subscribers: SubscriberSet<PerformanceAlert>,
    metrics_subscribers: SubscriberSet<PerformanceMetrics>,
    lifecycle: Mutex<Lifecycle>,
}

/// Aggregator, alert evaluator and A/B-testing engine.
pub struct AnalyticsDashboard {
    inner: Arc<DashboardInner>,
}

impl AnalyticsDashboard {
    #[must_use]
    pub fn new(
        platform: Arc<dyn Platform>,
        monitor: Arc<PerformanceMonitor>,
        tracker: Arc<ErrorTracker>,
        config: DashboardConfig,
    ) -> Self {
        Self {
            inner: Arc::new(DashboardInner {
                platform,
                monitor,
                tracker,
                state: Mutex::new(DashboardState {
                    config,
                    history: Vec::new(),
                    alerts: AlertLog::default(),
                    experiments: ExperimentRegistry::default(),
                }),
                alert_subscribers: SubscriberSet::new("alert"),
                metrics_subscribers: SubscriberSet::new("metrics-update"),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    // ──────────────────── lifecycle ────────────────────

    /// Subscribe to both collectors and start periodic collection. Idempotent.
    pub fn start_monitoring(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.ticker.is_some() {
            return Ok(());
        }
        let ticker = self.inner.spawn_collector()?;

        let weak: Weak<DashboardInner> = Arc::downgrade(&self.inner);
        let perf = self.inner.monitor.on_performance_report(move |report| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_performance_report(report);
            }
        });
        let weak: Weak<DashboardInner> = Arc::downgrade(&self.inner);
        let errors = self.inner.tracker.on_error_report(move |report| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_error_report(report);
            }
        });

        lifecycle.ticker = Some(ticker);
        lifecycle.subscriptions = vec![perf, errors];
        tracing::debug!(
            refresh_ms = self.inner.state.lock().config.refresh_interval_ms,
            "dashboard monitoring started"
        );
        Ok(())
    }

    /// Cancel the collector and drop both collector subscriptions. Idempotent.
    pub fn stop_monitoring(&self) {
        self.inner.stop();
    }

    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        self.inner.lifecycle.lock().ticker.is_some()
    }

    // ──────────────────── metrics ────────────────────

    /// Pull fresh collector data into one history sample.
    pub fn collect_current_metrics(&self) -> PerformanceMetrics {
        self.inner.collect()
    }

    /// Evaluate a sample against the configured thresholds, storing and
    /// announcing every alert raised.
    pub fn check_for_alerts(&self, metrics: &PerformanceMetrics) -> Vec<PerformanceAlert> {
        let thresholds = self.inner.state.lock().config.alert_thresholds;
        self.inner
            .raise(evaluate_thresholds(metrics, &thresholds))
    }

    #[must_use]
    pub fn get_current_metrics(&self) -> Option<PerformanceMetrics> {
        self.inner.state.lock().history.last().cloned()
    }

    /// Samples with `from <= timestamp <= to`.
    #[must_use]
    pub fn get_metrics_history(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<PerformanceMetrics> {
        self.inner
            .state
            .lock()
            .history
            .iter()
            .filter(|m| m.timestamp >= from && m.timestamp <= to)
            .cloned()
            .collect()
    }

    pub fn on_metrics_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&PerformanceMetrics) + Send + Sync + 'static,
    {
        self.inner.metrics_subscribers.subscribe(callback)
    }

    // ──────────────────── alerts ────────────────────

    #[must_use]
    pub fn get_active_alerts(&self) -> Vec<PerformanceAlert> {
        self.inner.state.lock().alerts.active()
    }

    #[must_use]
    pub fn get_all_alerts(&self) -> Vec<PerformanceAlert> {
        self.inner.state.lock().alerts.all().to_vec()
    }

    pub fn acknowledge_alert(&self, alert_id: &str) -> bool {
        self.inner.state.lock().alerts.acknowledge(alert_id)
    }

    pub fn resolve_alert(&self, alert_id: &str) -> bool {
        let now = self.inner.platform.now();
        self.inner.state.lock().alerts.resolve(alert_id, now)
    }

    pub fn on_alert<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&PerformanceAlert) + Send + Sync + 'static,
    {
        self.inner.alert_subscribers.subscribe(callback)
    }

    // ──────────────────── experiments ────────────────────

    pub fn create_ab_test(&self, spec: ABTestSpec) -> Result<String> {
        let now = self.inner.platform.now();
        let id = self.inner.state.lock().experiments.create(spec, now)?;
        tracing::debug!(test_id = %id, "experiment created");
        Ok(id)
    }

    pub fn start_ab_test(&self, test_id: &str) -> Result<()> {
        let now = self.inner.platform.now();
        self.inner.state.lock().experiments.start(test_id, now)?;
        tracing::debug!(test_id, "experiment running");
        Ok(())
    }

    pub fn pause_ab_test(&self, test_id: &str) -> Result<()> {
        self.inner.state.lock().experiments.pause(test_id)?;
        tracing::debug!(test_id, "experiment paused");
        Ok(())
    }

    pub fn stop_ab_test(&self, test_id: &str) -> Result<()> {
        let now = self.inner.platform.now();
        self.inner.state.lock().experiments.stop(test_id, now)?;
        tracing::debug!(test_id, "experiment completed");
        Ok(())
    }

    #[must_use]
    pub fn get_variant_for_user(&self, test_id: &str, user_id: &str) -> Option<ABTestVariant> {
        self.inner
            .state
            .lock()
            .experiments
            .variant_for_user(test_id, user_id)
    }

    /// Returns false when the user was never assigned in this test.
    pub fn record_conversion(&self, test_id: &str, user_id: &str) -> bool {
        self.inner
            .state
            .lock()
            .experiments
            .record_conversion(test_id, user_id)
    }

    pub fn record_variant_performance(&self, test_id: &str, user_id: &str, score: f64) -> bool {
        self.inner
            .state
            .lock()
            .experiments
            .record_performance(test_id, user_id, score)
    }

    pub fn record_variant_error(&self, test_id: &str, user_id: &str) -> bool {
        self.inner
            .state
            .lock()
            .experiments
            .record_error(test_id, user_id)
    }

    #[must_use]
    pub fn get_ab_test_results(&self, test_id: &str) -> Option<ABTestResults> {
        self.inner.state.lock().experiments.results(test_id)
    }

    #[must_use]
    pub fn list_ab_tests(&self) -> Vec<ABTest> {
        self.inner.state.lock().experiments.list().to_vec()
    }

    // ──────────────────── config & retention ────────────────────

    #[must_use]
    pub fn config(&self) -> DashboardConfig {
        self.inner.state.lock().config.clone()
    }

    /// Merge a partial config. A changed refresh interval restarts a running
    /// collector. Invalid results are rejected and leave the config untouched.
    pub fn update_config(&self, patch: &DashboardConfigPatch) -> Result<()> {
        let interval_changed = {
            let mut state = self.inner.state.lock();
            let mut next = state.config.clone();
            let changed = next.apply(patch);
            next.validate()?;
            state.config = next;
            changed
        };
        if interval_changed {
            self.inner.restart_collector()?;
        }
        Ok(())
    }

    /// Purge samples and alerts strictly older than the retention period.
    pub fn cleanup_old_data(&self) -> CleanupReport {
        let now = self.inner.platform.now();
        let mut state = self.inner.state.lock();
        // A retention window reaching past the clock's range keeps everything.
        let Some(cutoff) =
            chrono::Duration::try_days(i64::from(state.config.retention_period_days))
                .and_then(|window| now.checked_sub_signed(window))
        else {
            tracing::debug!(
                retention_days = state.config.retention_period_days,
                "retention window exceeds clock range, nothing to purge"
            );
            return CleanupReport::default();
        };
        let before = state.history.len();
        state.history.retain(|m| m.timestamp >= cutoff);
        let report = CleanupReport {
            metrics_removed: before - state.history.len(),
            alerts_removed: state.alerts.purge_older_than(cutoff),
        };
        tracing::debug!(
            metrics_removed = report.metrics_removed,
            alerts_removed = report.alerts_removed,
            %cutoff,
            "retention cleanup"
        );
        report
    }

    #[must_use]
    pub fn get_summary(&self) -> DashboardSummary {
        let state = self.inner.state.lock();
        let mut alerts_by_severity: BTreeMap<Severity, usize> =
            Severity::ALL.into_iter().map(|s| (s, 0)).collect();
        for alert in state.alerts.all() {
            *alerts_by_severity.entry(alert.severity).or_default() += 1;
        }
        DashboardSummary {
            samples: state.history.len(),
            alerts_total: state.alerts.len(),
            active_alerts: state.alerts.all().iter().filter(|a| a.is_active()).count(),
            alerts_by_severity,
            running_tests: state.experiments.running_count(),
            latest_score: state.history.last().map(|m| m.score),
        }
    }
}

impl Drop for AnalyticsDashboard {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl DashboardInner {
    fn spawn_collector(self: &Arc<Self>) -> Result<Ticker> {
        let period = self.state.lock().config.refresh_interval();
        let weak: Weak<Self> = Arc::downgrade(self);
        Ticker::spawn("tlm-dashboard-collector", period, move || {
            if let Some(inner) = weak.upgrade() {
                inner.collect();
            }
        })
    }

    fn restart_collector(self: &Arc<Self>) -> Result<()> {
        let old = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.ticker.is_none() {
                return Ok(());
            }
            let fresh = self.spawn_collector()?;
            lifecycle.ticker.replace(fresh)
        };
        if let Some(mut old) = old {
            old.stop();
        }
        tracing::debug!("dashboard collector restarted with new refresh interval");
        Ok(())
    }

    fn stop(&self) {
        let (ticker, subscriptions) = {
            let mut lifecycle = self.lifecycle.lock();
            (
                lifecycle.ticker.take(),
                std::mem::take(&mut lifecycle.subscriptions),
            )
        };
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        if let Some(mut ticker) = ticker {
            ticker.stop();
            tracing::debug!("dashboard monitoring stopped");
        }
    }

    fn collect(&self) -> PerformanceMetrics {
        let report = self.monitor.get_current_performance_snapshot();
        let errors = self.tracker.get_session_errors();
        let now = self.platform.now();

        let (metrics, drafts) = {
            let mut state = self.state.lock();
            let previous_peak = state
                .history
                .iter()
                .map(|m| m.memory.peak_mb)
                .fold(0.0_f64, f64::max);
            let metrics = PerformanceMetrics::fold(&report, &errors, previous_peak, now);
            state.history.push(metrics.clone());
            let drafts = if state.config.real_time_alerts {
                evaluate_thresholds(&metrics, &state.config.alert_thresholds)
            } else {
                Vec::new()
            };
            (metrics, drafts)
        };

        self.raise(drafts);
        self.metrics_subscribers.notify(&metrics);
        metrics
    }

    fn handle_performance_report(&self, report: &PerformanceReport) {
        if !self.state.lock().config.real_time_alerts {
            return;
        }
        let check = check_performance_thresholds(report);
        if !check.has_issues {
            return;
        }
        let draft = AlertDraft {
            alert_type: AlertType::Performance,
            severity: grade_issues(&check.issues),
            message: format!("Performance issues detected: {}", check.issues.join("; ")),
            data: serde_json::json!({
                "issues": check.issues,
                "url": report.url,
                "sessionId": report.session_id,
            }),
        };
        self.raise(vec![draft]);
    }

    fn handle_error_report(&self, report: &MobileErrorReport) {
        if !self.state.lock().config.real_time_alerts {
            return;
        }
        if let Some(draft) = draft_for_error(report) {
            self.raise(vec![draft]);
        }
    }

    /// Stamp, store and announce alerts. Subscribers run after the lock is released.
    fn raise(&self, drafts: Vec<AlertDraft>) -> Vec<PerformanceAlert> {
        if drafts.is_empty() {
            return Vec::new();
        }
        let now = self.platform.now();
        let alerts: Vec<PerformanceAlert> = drafts
            .into_iter()
            .map(|draft| draft.into_alert(now))
            .collect();
        {
            let mut state = self.state.lock();
            for alert in &alerts {
                state.alerts.push(alert.clone());
            }
        }
        for alert in &alerts {
            tracing::info!(
                id = %alert.id,
                severity = alert.severity.as_str(),
                message = %alert.message,
                "alert raised"
            );
            self.alert_subscribers.notify(alert);
        }
        alerts
    }
}
