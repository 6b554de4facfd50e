//! Aggregated, graded metric samples.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::severity::Severity;
use crate::monitor::report::{NetworkMetrics, PerformanceReport};
use crate::monitor::vitals::{CLS, FCP, FID, Grade, LCP, MemoryPressure, TBT, TTI, VitalThreshold};
use crate::platform::pal::DeviceInfo;
use crate::tracker::report::MobileErrorReport;

/// Errors newer than this count toward the per-minute rate.
const ERROR_RATE_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GradedValue {
    pub value: f64,
    pub grade: Grade,
}

impl GradedValue {
    #[must_use]
    pub fn graded(value: f64, threshold: &VitalThreshold) -> Self {
        Self {
            value,
            grade: threshold.grade(value),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GradedVitals {
    pub lcp: GradedValue,
    pub fid: GradedValue,
    pub cls: GradedValue,
    pub fcp: GradedValue,
    pub tti: GradedValue,
    pub tbt: GradedValue,
}

impl GradedVitals {
    fn observed(&self) -> impl Iterator<Item = &GradedValue> {
        [
            &self.lcp, &self.fid, &self.cls, &self.fcp, &self.tti, &self.tbt,
        ]
        .into_iter()
        .filter(|v| v.value > 0.0)
    }
}

/// Memory usage in megabytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub used_mb: f64,
    pub total_mb: f64,
    pub limit_mb: f64,
    /// Highest `used_mb` across the whole history including this sample.
    pub peak_mb: f64,
    pub pressure: MemoryPressure,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRate {
    pub total: usize,
    /// Errors in the trailing minute.
    pub per_minute: usize,
    pub critical: usize,
}

/// One aggregated sample in the metrics history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub timestamp: DateTime<Utc>,
    pub vitals: GradedVitals,
    pub memory: MemoryUsage,
    pub errors: ErrorRate,
    pub network: NetworkMetrics,
    pub device: DeviceInfo,
    /// 0 to 100; higher is better.
    pub score: u8,
}

impl PerformanceMetrics {
    /// Fold a report and the session's errors into one sample.
    #[must_use]
    pub fn fold(
        report: &PerformanceReport,
        errors: &[MobileErrorReport],
        previous_peak_mb: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let v = &report.vitals;
        let vitals = GradedVitals {
            lcp: GradedValue::graded(v.lcp, &LCP),
            fid: GradedValue::graded(v.fid, &FID),
            cls: GradedValue::graded(v.cls, &CLS),
            fcp: GradedValue::graded(v.fcp, &FCP),
            tti: GradedValue::graded(v.tti, &TTI),
            tbt: GradedValue::graded(v.tbt, &TBT),
        };

        #[allow(clippy::cast_precision_loss)]
        let mb = |bytes: u64| bytes as f64 / (1024.0 * 1024.0);
        let used_mb = mb(report.memory.used_heap);
        let memory = MemoryUsage {
            used_mb,
            total_mb: mb(report.memory.total_heap),
            limit_mb: mb(report.memory.heap_limit),
            peak_mb: previous_peak_mb.max(used_mb),
            pressure: report.memory.pressure,
        };

        let window = chrono::Duration::seconds(ERROR_RATE_WINDOW_SECS);
        let errors = ErrorRate {
            total: errors.len(),
            per_minute: errors.iter().filter(|e| now - e.timestamp <= window).count(),
            critical: errors
                .iter()
                .filter(|e| e.severity == Severity::Critical)
                .count(),
        };

        Self {
            timestamp: now,
            score: performance_score(&vitals),
            vitals,
            memory,
            errors,
            network: report.network.clone(),
            device: report.device.clone(),
        }
    }
}

/// Mean of per-vital points (good 100, needs-improvement 50, poor 0) over
/// observed vitals. Nothing observed scores 100.
#[must_use]
pub fn performance_score(vitals: &GradedVitals) -> u8 {
    let (sum, count) = vitals.observed().fold((0u32, 0u32), |(sum, count), v| {
        let points = match v.grade {
            Grade::Good => 100,
            Grade::NeedsImprovement => 50,
            Grade::Poor => 0,
        };
        (sum + points, count + 1)
    });
    if count == 0 {
        return 100;
    }
    u8::try_from(sum / count).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::report::{CoreWebVitals, MemoryMetrics};

    fn report(vitals: CoreWebVitals, used_mb: u64) -> PerformanceReport {
        PerformanceReport {
            timestamp: Utc::now(),
            session_id: "s".to_string(),
            url: String::new(),
            device: DeviceInfo::default(),
            vitals,
            memory: MemoryMetrics::from_heap(Some(crate::platform::pal::HeapUsage::new(
                used_mb * 1024 * 1024,
                used_mb * 1024 * 1024,
                0,
            ))),
            network: NetworkMetrics::default(),
        }
    }

    #[test]
    fn score_averages_observed_vitals() {
        let vitals = GradedVitals {
            lcp: GradedValue::graded(1_000.0, &LCP),
            fid: GradedValue::graded(200.0, &FID),
            cls: GradedValue::graded(0.5, &CLS),
            ..GradedVitals::default()
        };
        assert_eq!(performance_score(&vitals), 50);
        assert_eq!(performance_score(&GradedVitals::default()), 100);
    }

    #[test]
    fn fold_grades_and_tracks_peak() {
        let vitals = CoreWebVitals {
            lcp: 3_000.0,
            fcp: 1_000.0,
            ..CoreWebVitals::default()
        };
        let now = Utc::now();
        let sample = PerformanceMetrics::fold(&report(vitals, 30), &[], 80.0, now);
        assert_eq!(sample.vitals.lcp.grade, Grade::NeedsImprovement);
        assert_eq!(sample.vitals.fcp.grade, Grade::Good);
        assert!((sample.memory.used_mb - 30.0).abs() < 1e-9);
        assert!((sample.memory.peak_mb - 80.0).abs() < 1e-9);
        assert_eq!(sample.score, 75);
    }
}
