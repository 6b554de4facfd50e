//! Web-vital grading, memory-pressure tiers and the fixed threshold check.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::core::severity::Severity;
use crate::monitor::report::PerformanceReport;

const MB: u64 = 1024 * 1024;

/// Used heap above this is `high` pressure.
pub const MEMORY_WARNING_BYTES: u64 = 50 * MB;
/// Used heap above this is `critical` pressure.
pub const MEMORY_CRITICAL_BYTES: u64 = 100 * MB;

/// Good / needs-improvement / poor rating of a single vital.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Grade {
    #[default]
    Good,
    NeedsImprovement,
    Poor,
}

impl Grade {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::NeedsImprovement => "needs-improvement",
            Self::Poor => "poor",
        }
    }
}

/// Grading boundaries for one vital: `<= good` is good, `> poor` is poor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VitalThreshold {
    pub name: &'static str,
    pub unit: &'static str,
    pub good: f64,
    pub poor: f64,
}

impl VitalThreshold {
    #[must_use]
    pub fn grade(&self, value: f64) -> Grade {
        if value <= self.good {
            Grade::Good
        } else if value <= self.poor {
            Grade::NeedsImprovement
        } else {
            Grade::Poor
        }
    }
}

pub const LCP: VitalThreshold = VitalThreshold {
    name: "LCP",
    unit: "ms",
    good: 2_500.0,
    poor: 4_000.0,
};
pub const FID: VitalThreshold = VitalThreshold {
    name: "FID",
    unit: "ms",
    good: 100.0,
    poor: 300.0,
};
pub const CLS: VitalThreshold = VitalThreshold {
    name: "CLS",
    unit: "",
    good: 0.1,
    poor: 0.25,
};
pub const FCP: VitalThreshold = VitalThreshold {
    name: "FCP",
    unit: "ms",
    good: 1_800.0,
    poor: 3_000.0,
};
pub const TTI: VitalThreshold = VitalThreshold {
    name: "TTI",
    unit: "ms",
    good: 3_800.0,
    poor: 7_300.0,
};
pub const TBT: VitalThreshold = VitalThreshold {
    name: "TBT",
    unit: "ms",
    good: 200.0,
    poor: 600.0,
};

/// Coarse classification of used heap against the fixed memory thresholds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressure {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl MemoryPressure {
    /// Tiers are checked from most to least severe.
    #[must_use]
    pub fn classify(used_bytes: u64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let used = used_bytes as f64;
        #[allow(clippy::cast_precision_loss)]
        let warning = MEMORY_WARNING_BYTES as f64;
        if used_bytes > MEMORY_CRITICAL_BYTES {
            Self::Critical
        } else if used_bytes > MEMORY_WARNING_BYTES {
            Self::High
        } else if used > 0.7 * warning {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Same-named level on the shared severity scale.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::Low => Severity::Low,
            Self::Medium => Severity::Medium,
            Self::High => Severity::High,
            Self::Critical => Severity::Critical,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        self.severity().as_str()
    }
}

/// Outcome of [`check_performance_thresholds`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdCheck {
    pub has_issues: bool,
    pub issues: Vec<String>,
}

/// Evaluate a report's LCP/FID/CLS and memory against the fixed thresholds.
///
/// Produces one human-readable issue per violation. Vitals that have not been
/// observed (zero) are skipped.
#[must_use]
pub fn check_performance_thresholds(report: &PerformanceReport) -> ThresholdCheck {
    let mut issues = Vec::new();
    let vitals = &report.vitals;

    for (threshold, value) in [(LCP, vitals.lcp), (FID, vitals.fid), (CLS, vitals.cls)] {
        if value <= 0.0 {
            continue;
        }
        match threshold.grade(value) {
            Grade::Poor => issues.push(format!(
                "Poor {}: {} (should be under {})",
                threshold.name,
                format_value(value, threshold.unit),
                format_value(threshold.good, threshold.unit),
            )),
            Grade::NeedsImprovement => issues.push(format!(
                "{} needs improvement: {}",
                threshold.name,
                format_value(value, threshold.unit),
            )),
            Grade::Good => {}
        }
    }

    let used_mb = report.memory.used_mb();
    if report.memory.used_heap > MEMORY_CRITICAL_BYTES {
        issues.push(format!("Critical memory usage: {used_mb:.0}MB"));
    } else if report.memory.used_heap > MEMORY_WARNING_BYTES {
        issues.push(format!("High memory usage: {used_mb:.0}MB"));
    }

    ThresholdCheck {
        has_issues: !issues.is_empty(),
        issues,
    }
}

fn format_value(value: f64, unit: &str) -> String {
    if unit.is_empty() {
        format!("{value:.3}")
    } else {
        format!("{value:.0}{unit}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::report::{CoreWebVitals, MemoryMetrics, NetworkMetrics};
    use crate::platform::pal::DeviceInfo;

    fn report(vitals: CoreWebVitals, used_mb: u64) -> PerformanceReport {
        let used = used_mb * MB;
        PerformanceReport {
            timestamp: chrono::Utc::now(),
            session_id: "session_test".to_string(),
            url: "https://app.local/".to_string(),
            device: DeviceInfo::default(),
            vitals,
            memory: MemoryMetrics {
                used_heap: used,
                total_heap: used,
                heap_limit: 0,
                pressure: MemoryPressure::classify(used),
            },
            network: NetworkMetrics::default(),
        }
    }

    #[test]
    fn grades_at_boundaries() {
        assert_eq!(LCP.grade(2_500.0), Grade::Good);
        assert_eq!(LCP.grade(2_501.0), Grade::NeedsImprovement);
        assert_eq!(LCP.grade(4_000.0), Grade::NeedsImprovement);
        assert_eq!(LCP.grade(4_001.0), Grade::Poor);
        assert_eq!(CLS.grade(0.1), Grade::Good);
        assert_eq!(CLS.grade(0.3), Grade::Poor);
    }

    #[test]
    fn memory_pressure_tiers() {
        assert_eq!(MemoryPressure::classify(0), MemoryPressure::Low);
        assert_eq!(MemoryPressure::classify(35 * MB), MemoryPressure::Low);
        assert_eq!(MemoryPressure::classify(36 * MB), MemoryPressure::Medium);
        assert_eq!(MemoryPressure::classify(50 * MB), MemoryPressure::Medium);
        assert_eq!(MemoryPressure::classify(51 * MB), MemoryPressure::High);
        assert_eq!(MemoryPressure::classify(100 * MB), MemoryPressure::High);
        assert_eq!(MemoryPressure::classify(101 * MB), MemoryPressure::Critical);
        assert_eq!(MemoryPressure::Critical.severity(), Severity::Critical);
    }

    #[test]
    fn clean_report_has_no_issues() {
        let check = check_performance_thresholds(&report(CoreWebVitals::default(), 10));
        assert!(!check.has_issues);
        assert!(check.issues.is_empty());
    }

    #[test]
    fn one_issue_per_violation() {
        let vitals = CoreWebVitals {
            lcp: 5_000.0,
            fid: 150.0,
            cls: 0.05,
            ..CoreWebVitals::default()
        };
        let check = check_performance_thresholds(&report(vitals, 120));
        assert!(check.has_issues);
        assert_eq!(check.issues.len(), 3);
        assert!(check.issues[0].starts_with("Poor LCP"));
        assert!(check.issues[1].contains("FID needs improvement"));
        assert_eq!(check.issues[2], "Critical memory usage: 120MB");
    }

    #[test]
    fn high_memory_issue_between_thresholds() {
        let check = check_performance_thresholds(&report(CoreWebVitals::default(), 60));
        assert_eq!(check.issues, vec!["High memory usage: 60MB".to_string()]);
    }
}
