//! Alert records, threshold grading and the in-place alert log.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::config::{AlertThresholds, Threshold};
use crate::core::ids::generate_id;
use crate::core::severity::Severity;
use crate::dashboard::metrics::PerformanceMetrics;
use crate::tracker::report::{ErrorType, MobileErrorReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Performance,
    Error,
    Memory,
    Network,
}

impl AlertType {
    #[must_use]
    pub const fn for_error(error_type: ErrorType) -> Self {
        match error_type {
            ErrorType::Network => Self::Network,
            ErrorType::Memory => Self::Memory,
            _ => Self::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub data: serde_json::Value,
    pub acknowledged: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PerformanceAlert {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.acknowledged && self.resolved_at.is_none()
    }
}

/// Alert content before it is stamped and stored.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertDraft {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub data: serde_json::Value,
}

impl AlertDraft {
    #[must_use]
    pub fn into_alert(self, now: DateTime<Utc>) -> PerformanceAlert {
        PerformanceAlert {
            id: generate_id("alert", now),
            timestamp: now,
            alert_type: self.alert_type,
            severity: self.severity,
            message: self.message,
            data: self.data,
            acknowledged: false,
            resolved_at: None,
        }
    }
}

/// `> critical` is critical, `(warning, critical]` is medium, otherwise nothing.
#[must_use]
pub fn grade_against(value: f64, threshold: Threshold) -> Option<Severity> {
    if value > threshold.critical {
        Some(Severity::Critical)
    } else if value > threshold.warning {
        Some(Severity::Medium)
    } else {
        None
    }
}

/// Run every tracked metric of a sample through its configured threshold.
#[must_use]
pub fn evaluate_thresholds(
    metrics: &PerformanceMetrics,
    thresholds: &AlertThresholds,
) -> Vec<AlertDraft> {
    #[allow(clippy::cast_precision_loss)]
    let checks = [
        ("LCP", "ms", AlertType::Performance, metrics.vitals.lcp.value, thresholds.lcp),
        ("FID", "ms", AlertType::Performance, metrics.vitals.fid.value, thresholds.fid),
        ("CLS", "", AlertType::Performance, metrics.vitals.cls.value, thresholds.cls),
        ("Memory usage", "MB", AlertType::Memory, metrics.memory.used_mb, thresholds.memory_usage),
        (
            "Error rate",
            "/min",
            AlertType::Error,
            metrics.errors.per_minute as f64,
            thresholds.error_rate,
        ),
    ];

    checks
        .into_iter()
        .filter_map(|(label, unit, alert_type, value, threshold)| {
            let severity = grade_against(value, threshold)?;
            let (level, limit) = if severity == Severity::Critical {
                ("critical", threshold.critical)
            } else {
                ("warning", threshold.warning)
            };
            Some(AlertDraft {
                alert_type,
                severity,
                message: format!(
                    "{label} exceeded {level} threshold: {} > {}",
                    format_value(value, unit),
                    format_value(limit, unit)
                ),
                data: serde_json::json!({
                    "metric": label,
                    "value": value,
                    "threshold": threshold,
                }),
            })
        })
        .collect()
}

/// Grade a collector's threshold-check outcome by its issue list.
#[must_use]
pub fn grade_issues(issues: &[String]) -> Severity {
    if issues
        .iter()
        .any(|issue| issue.to_lowercase().contains("critical"))
    {
        Severity::Critical
    } else if issues.len() >= 3 {
        Severity::High
    } else if issues.len() >= 2 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Alert raised from a high/critical error report, if any.
#[must_use]
pub fn draft_for_error(report: &MobileErrorReport) -> Option<AlertDraft> {
    if !report.severity.escalates() {
        return None;
    }
    Some(AlertDraft {
        alert_type: AlertType::for_error(report.error_type),
        severity: report.severity,
        message: format!("{} error: {}", report.error_type, report.message),
        data: serde_json::json!({
            "errorId": report.id,
            "errorType": report.error_type,
            "url": report.page.url,
        }),
    })
}

fn format_value(value: f64, unit: &str) -> String {
    if unit.is_empty() {
        format!("{value:.3}")
    } else {
        format!("{value:.0}{unit}")
    }
}

/// Append-only alert list; entries change only through acknowledge/resolve
/// and leave only through retention purges.
#[derive(Debug, Clone, Default)]
pub struct AlertLog {
    alerts: Vec<PerformanceAlert>,
}

impl AlertLog {
    pub fn push(&mut self, alert: PerformanceAlert) {
        self.alerts.push(alert);
    }

    pub fn acknowledge(&mut self, id: &str) -> bool {
        self.alerts
            .iter_mut()
            .find(|alert| alert.id == id)
            .map(|alert| alert.acknowledged = true)
            .is_some()
    }

    pub fn resolve(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        self.alerts
            .iter_mut()
            .find(|alert| alert.id == id)
            .map(|alert| {
                alert.acknowledged = true;
                alert.resolved_at = Some(now);
            })
            .is_some()
    }

    #[must_use]
    pub fn active(&self) -> Vec<PerformanceAlert> {
        self.alerts
            .iter()
            .filter(|alert| alert.is_active())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn all(&self) -> &[PerformanceAlert] {
        &self.alerts
    }

    /// Remove alerts strictly older than `cutoff`. Returns how many were removed.
    pub fn purge_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.alerts.len();
        self.alerts.retain(|alert| alert.timestamp >= cutoff);
        before - self.alerts.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}
