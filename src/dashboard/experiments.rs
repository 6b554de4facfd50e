//! A/B testing engine: test lifecycle, deterministic bucketing, sticky
//! assignments and per-variant counters.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, TelemetryError};
use crate::core::ids::generate_id;

/// Map a user id onto `[0, 100)`.
///
/// `hash = hash * 31 + code_unit` over UTF-16 code units with signed 32-bit
/// wraparound, then `|hash| mod 100`.
#[must_use]
pub fn bucket_for(user_id: &str) -> u32 {
    let hash = user_id.encode_utf16().fold(0_i32, |hash, unit| {
        hash.wrapping_mul(31).wrapping_add(i32::from(unit))
    });
    hash.unsigned_abs() % 100
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Draft,
    Running,
    Paused,
    Completed,
}

impl TestStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantMetrics {
    pub participants: u64,
    pub conversions: u64,
    /// `conversions / participants * 100`.
    pub conversion_rate: f64,
    pub avg_performance_score: f64,
    /// Errors per 100 participants.
    pub error_rate: f64,
    #[serde(skip)]
    performance_samples: u64,
    #[serde(skip)]
    errors: u64,
}

impl VariantMetrics {
    #[allow(clippy::cast_precision_loss)]
    fn per_participant_pct(count: u64, participants: u64) -> f64 {
        if participants == 0 {
            0.0
        } else {
            count as f64 / participants as f64 * 100.0
        }
    }

    fn add_participant(&mut self) {
        self.participants += 1;
        self.conversion_rate = Self::per_participant_pct(self.conversions, self.participants);
        self.error_rate = Self::per_participant_pct(self.errors, self.participants);
    }

    fn add_conversion(&mut self) {
        self.conversions += 1;
        self.conversion_rate = Self::per_participant_pct(self.conversions, self.participants);
    }

    fn add_error(&mut self) {
        self.errors += 1;
        self.error_rate = Self::per_participant_pct(self.errors, self.participants);
    }

    #[allow(clippy::cast_precision_loss)]
    fn add_performance_sample(&mut self, score: f64) {
        self.performance_samples += 1;
        let n = self.performance_samples as f64;
        self.avg_performance_score += (score - self.avg_performance_score) / n;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ABTestVariant {
    pub id: String,
    pub name: String,
    /// Share of buckets, 0 to 100, consumed in declared order.
    pub traffic_percentage: u32,
    pub enabled: bool,
    pub config: serde_json::Value,
    pub metrics: VariantMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ABTest {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: TestStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub target_metric: String,
    pub variants: Vec<ABTestVariant>,
}

const fn default_enabled() -> bool {
    true
}

/// Caller-supplied variant definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSpec {
    pub id: String,
    pub name: String,
    pub traffic_percentage: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Caller-supplied test definition for [`ExperimentRegistry::create`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ABTestSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub target_metric: String,
    pub variants: Vec<VariantSpec>,
}

impl ABTestSpec {
    fn validate(&self) -> Result<()> {
        let invalid = |details: String| -> Result<()> {
            Err(TelemetryError::InvalidExperiment { details })
        };
        if self.name.trim().is_empty() {
            return invalid("test name must not be empty".to_string());
        }
        if self.variants.is_empty() {
            return invalid(format!("test {:?} has no variants", self.name));
        }
        let mut seen = HashSet::new();
        for variant in &self.variants {
            if variant.id.trim().is_empty() {
                return invalid("variant id must not be empty".to_string());
            }
            if !seen.insert(variant.id.as_str()) {
                return invalid(format!("duplicate variant id {:?}", variant.id));
            }
            if variant.traffic_percentage > 100 {
                return invalid(format!(
                    "variant {:?} traffic_percentage {} exceeds 100",
                    variant.id, variant.traffic_percentage
                ));
            }
        }
        let enabled_total: u32 = self
            .variants
            .iter()
            .filter(|v| v.enabled)
            .map(|v| v.traffic_percentage)
            .sum();
        if enabled_total > 100 {
            return invalid(format!(
                "enabled variants allocate {enabled_total}% of traffic (max 100)"
            ));
        }
        Ok(())
    }
}

/// Per-test results view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ABTestResults {
    pub test_id: String,
    pub name: String,
    pub status: TestStatus,
    pub target_metric: String,
    pub variants: Vec<ABTestVariant>,
    pub total_participants: u64,
    pub total_conversions: u64,
    pub overall_conversion_rate: f64,
    /// Highest raw conversion rate among variants with participants; first wins ties.
    pub leading_variant: Option<String>,
}

/// All tests plus the sticky `test:user` assignment table.
#[derive(Debug, Clone, Default)]
pub struct ExperimentRegistry {
    tests: Vec<ABTest>,
    assignments: HashMap<String, String>,
}

fn assignment_key(test_id: &str, user_id: &str) -> String {
    format!("{test_id}:{user_id}")
}

impl ExperimentRegistry {
    /// Create a test in `draft`. Returns its id.
    pub fn create(&mut self, spec: ABTestSpec, now: DateTime<Utc>) -> Result<String> {
        spec.validate()?;
        let id = generate_id("test", now);
        self.tests.push(ABTest {
            id: id.clone(),
            name: spec.name,
            description: spec.description,
            status: TestStatus::Draft,
            start_date: None,
            end_date: None,
            target_metric: spec.target_metric,
            variants: spec
                .variants
                .into_iter()
                .map(|v| ABTestVariant {
                    id: v.id,
                    name: v.name,
                    traffic_percentage: v.traffic_percentage,
                    enabled: v.enabled,
                    config: v.config,
                    metrics: VariantMetrics::default(),
                })
                .collect(),
        });
        Ok(id)
    }

    fn test_mut(&mut self, test_id: &str) -> Result<&mut ABTest> {
        self.tests
            .iter_mut()
            .find(|t| t.id == test_id)
            .ok_or_else(|| TelemetryError::UnknownExperiment {
                test_id: test_id.to_string(),
            })
    }

    #[must_use]
    pub fn get(&self, test_id: &str) -> Option<&ABTest> {
        self.tests.iter().find(|t| t.id == test_id)
    }

    fn transition(
        &mut self,
        test_id: &str,
        to: TestStatus,
        allowed_from: &[TestStatus],
    ) -> Result<&mut ABTest> {
        let test = self.test_mut(test_id)?;
        if !allowed_from.contains(&test.status) {
            return Err(TelemetryError::InvalidTransition {
                test_id: test_id.to_string(),
                from: test.status.as_str(),
                to: to.as_str(),
            });
        }
        test.status = to;
        Ok(test)
    }

    /// `draft -> running` stamps the start date; `paused -> running` resumes.
    pub fn start(&mut self, test_id: &str, now: DateTime<Utc>) -> Result<()> {
        let test = self.transition(
            test_id,
            TestStatus::Running,
            &[TestStatus::Draft, TestStatus::Paused],
        )?;
        if test.start_date.is_none() {
            test.start_date = Some(now);
        }
        Ok(())
    }

    pub fn pause(&mut self, test_id: &str) -> Result<()> {
        self.transition(test_id, TestStatus::Paused, &[TestStatus::Running])
            .map(|_| ())
    }

    pub fn stop(&mut self, test_id: &str, now: DateTime<Utc>) -> Result<()> {
        let test = self.transition(
            test_id,
            TestStatus::Completed,
            &[TestStatus::Running, TestStatus::Paused],
        )?;
        test.end_date = Some(now);
        Ok(())
    }

    /// Stored assignment if any; otherwise bucket the user into a running test.
    ///
    /// `None` when the test is unknown, not running (for new users), or the
    /// user's bucket falls past the enabled traffic allocation.
    pub fn variant_for_user(&mut self, test_id: &str, user_id: &str) -> Option<ABTestVariant> {
        let key = assignment_key(test_id, user_id);
        let test = self.tests.iter_mut().find(|t| t.id == test_id)?;

        if let Some(variant_id) = self.assignments.get(&key) {
            return test.variants.iter().find(|v| &v.id == variant_id).cloned();
        }
        if test.status != TestStatus::Running {
            return None;
        }

        let bucket = bucket_for(user_id);
        let mut cumulative = 0;
        let variant = test
            .variants
            .iter_mut()
            .filter(|v| v.enabled)
            .find(|v| {
                cumulative += v.traffic_percentage;
                cumulative >= bucket
            })?;
        variant.metrics.add_participant();
        self.assignments.insert(key, variant.id.clone());
        Some(variant.clone())
    }

    fn assigned_variant_mut(&mut self, test_id: &str, user_id: &str) -> Option<&mut ABTestVariant> {
        let variant_id = self.assignments.get(&assignment_key(test_id, user_id))?;
        self.tests
            .iter_mut()
            .find(|t| t.id == test_id)?
            .variants
            .iter_mut()
            .find(|v| &v.id == variant_id)
    }

    /// Returns false when the user has no assignment in this test.
    pub fn record_conversion(&mut self, test_id: &str, user_id: &str) -> bool {
        self.assigned_variant_mut(test_id, user_id)
            .map(|v| v.metrics.add_conversion())
            .is_some()
    }

    pub fn record_performance(&mut self, test_id: &str, user_id: &str, score: f64) -> bool {
        self.assigned_variant_mut(test_id, user_id)
            .map(|v| v.metrics.add_performance_sample(score))
            .is_some()
    }

    pub fn record_error(&mut self, test_id: &str, user_id: &str) -> bool {
        self.assigned_variant_mut(test_id, user_id)
            .map(|v| v.metrics.add_error())
            .is_some()
    }

    #[must_use]
    pub fn results(&self, test_id: &str) -> Option<ABTestResults> {
        let test = self.get(test_id)?;
        let total_participants: u64 = test.variants.iter().map(|v| v.metrics.participants).sum();
        let total_conversions: u64 = test.variants.iter().map(|v| v.metrics.conversions).sum();
        let mut leading: Option<&ABTestVariant> = None;
        for variant in test.variants.iter().filter(|v| v.metrics.participants > 0) {
            if leading.is_none_or(|best| variant.metrics.conversion_rate > best.metrics.conversion_rate)
            {
                leading = Some(variant);
            }
        }
        Some(ABTestResults {
            test_id: test.id.clone(),
            name: test.name.clone(),
            status: test.status,
            target_metric: test.target_metric.clone(),
            variants: test.variants.clone(),
            total_participants,
            total_conversions,
            overall_conversion_rate: VariantMetrics::per_participant_pct(
                total_conversions,
                total_participants,
            ),
            leading_variant: leading.map(|v| v.id.clone()),
        })
    }

    /// Tests in creation order.
    #[must_use]
    pub fn list(&self) -> &[ABTest] {
        &self.tests
    }

    #[must_use]
    pub fn running_count(&self) -> usize {
        self.tests
            .iter()
            .filter(|t| t.status == TestStatus::Running)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn spec(split: &[(&str, u32)]) -> ABTestSpec {
        ABTestSpec {
            name: "checkout button".to_string(),
            description: String::new(),
            target_metric: "conversion".to_string(),
            variants: split
                .iter()
                .map(|(id, pct)| VariantSpec {
                    id: (*id).to_string(),
                    name: (*id).to_string(),
                    traffic_percentage: *pct,
                    enabled: true,
                    config: serde_json::Value::Null,
                })
                .collect(),
        }
    }

    fn running(split: &[(&str, u32)]) -> (ExperimentRegistry, String) {
        let mut registry = ExperimentRegistry::default();
        let now = Utc::now();
        let id = registry.create(spec(split), now).expect("create");
        registry.start(&id, now).expect("start");
        (registry, id)
    }

    #[test]
    fn bucket_matches_reference_values() {
        assert_eq!(bucket_for(""), 0);
        assert_eq!(bucket_for("a"), 97);
        assert_eq!(bucket_for("abc"), 54);
        assert_eq!(bucket_for("user-1"), 25);
        assert_eq!(bucket_for("user-7"), 19);
        assert_eq!(bucket_for("user-42"), 56);
    }

    #[test]
    fn assignment_is_sticky() {
        let (mut registry, id) = running(&[("control", 50), ("treatment", 50)]);
        let first = registry.variant_for_user(&id, "user-1").expect("assigned");
        let second = registry.variant_for_user(&id, "user-1").expect("assigned");
        assert_eq!(first.id, second.id);
        assert_eq!(first.id, "control");
        assert_eq!(
            registry.get(&id).expect("test").variants[0].metrics.participants,
            1
        );
    }

    #[test]
    fn sticky_assignment_survives_completion() {
        let (mut registry, id) = running(&[("control", 50), ("treatment", 50)]);
        let assigned = registry.variant_for_user(&id, "user-42").expect("assigned");
        assert_eq!(assigned.id, "treatment");
        registry.stop(&id, Utc::now()).expect("stop");
        assert_eq!(
            registry.variant_for_user(&id, "user-42").map(|v| v.id),
            Some("treatment".to_string())
        );
        assert!(registry.variant_for_user(&id, "someone-new").is_none());
    }

    #[test]
    fn draft_and_paused_tests_reject_new_users() {
        let mut registry = ExperimentRegistry::default();
        let now = Utc::now();
        let id = registry.create(spec(&[("a", 100)]), now).expect("create");
        assert!(registry.variant_for_user(&id, "u").is_none());
        registry.start(&id, now).expect("start");
        registry.pause(&id).expect("pause");
        assert!(registry.variant_for_user(&id, "u").is_none());
        registry.start(&id, now + chrono::Duration::hours(1)).expect("resume");
        assert_eq!(registry.get(&id).expect("test").start_date, Some(now));
        assert!(registry.variant_for_user(&id, "u").is_some());
    }

    #[test]
    fn disabled_variants_are_skipped() {
        let mut s = spec(&[("off", 50), ("on", 50)]);
        s.variants[0].enabled = false;
        let mut registry = ExperimentRegistry::default();
        let now = Utc::now();
        let id = registry.create(s, now).expect("create");
        registry.start(&id, now).expect("start");
        // "user-1" buckets to 25, which falls inside the only enabled 50%.
        assert_eq!(
            registry.variant_for_user(&id, "user-1").map(|v| v.id),
            Some("on".to_string())
        );
        // "a" buckets to 97, past the enabled allocation.
        assert!(registry.variant_for_user(&id, "a").is_none());
    }

    #[test]
    fn conversion_rate_recomputed() {
        let (mut registry, id) = running(&[("control", 50), ("treatment", 50)]);
        assert!(!registry.record_conversion(&id, "user-1"));
        registry.variant_for_user(&id, "user-1");
        assert!(registry.record_conversion(&id, "user-1"));
        let results = registry.results(&id).expect("results");
        let control = &results.variants[0];
        assert_eq!(control.metrics.conversions, 1);
        assert!((control.metrics.conversion_rate - 100.0).abs() < f64::EPSILON);
        assert_eq!(results.leading_variant.as_deref(), Some("control"));

        registry.variant_for_user(&id, "user-7");
        let control = &registry.results(&id).expect("results").variants[0];
        assert_eq!(control.metrics.participants, 2);
        assert!((control.metrics.conversion_rate - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn performance_and_error_counters() {
        let (mut registry, id) = running(&[("only", 100)]);
        registry.variant_for_user(&id, "u1");
        registry.variant_for_user(&id, "u2");
        assert!(registry.record_performance(&id, "u1", 80.0));
        assert!(registry.record_performance(&id, "u2", 60.0));
        assert!(registry.record_error(&id, "u1"));
        let metrics = &registry.results(&id).expect("results").variants[0].metrics;
        assert!((metrics.avg_performance_score - 70.0).abs() < 1e-9);
        assert!((metrics.error_rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_specs_rejected() {
        let mut registry = ExperimentRegistry::default();
        let now = Utc::now();
        for bad in [
            spec(&[]),
            spec(&[("a", 60), ("b", 60)]),
            spec(&[("a", 50), ("a", 50)]),
            spec(&[("a", 101)]),
        ] {
            let err = registry.create(bad, now).unwrap_err();
            assert_eq!(err.code(), "TLM-2002");
        }
    }

    #[test]
    fn invalid_transitions_rejected() {
        let mut registry = ExperimentRegistry::default();
        let now = Utc::now();
        let id = registry.create(spec(&[("a", 100)]), now).expect("create");
        assert_eq!(registry.pause(&id).unwrap_err().code(), "TLM-2003");
        assert_eq!(registry.stop(&id, now).unwrap_err().code(), "TLM-2003");
        registry.start(&id, now).expect("start");
        registry.stop(&id, now).expect("stop");
        assert_eq!(registry.start(&id, now).unwrap_err().code(), "TLM-2003");
        assert_eq!(
            registry.start("test_missing", now).unwrap_err().code(),
            "TLM-2001"
        );
    }

    proptest! {
        #[test]
        fn bucket_is_in_range_and_deterministic(user in ".{0,40}") {
            let b = bucket_for(&user);
            prop_assert!(b < 100);
            prop_assert_eq!(b, bucket_for(&user));
        }

        #[test]
        fn full_allocation_always_assigns(users in proptest::collection::hash_set("[a-z0-9-]{1,12}", 1..50)) {
            let (mut registry, id) = running(&[("a", 30), ("b", 30), ("c", 40)]);
            for user in &users {
                prop_assert!(registry.variant_for_user(&id, user).is_some());
            }
            let total: u64 = registry
                .results(&id)
                .expect("results")
                .variants
                .iter()
                .map(|v| v.metrics.participants)
                .sum();
            prop_assert_eq!(total, users.len() as u64);
        }
    }
}
