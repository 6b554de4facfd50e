//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, TelemetryError};

/// Full pipeline configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub tracker: TrackerConfig,
    pub dashboard: DashboardConfig,
    /// Where this config was loaded from. Never serialized.
    #[serde(skip)]
    pub config_file: PathBuf,
}

/// Performance monitor sampling knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Period of the background memory sampler.
    pub memory_sample_interval_ms: u64,
}

/// Error tracker buffer sizes and interaction capture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrackerConfig {
    pub breadcrumb_capacity: usize,
    pub session_event_capacity: usize,
    /// Error log bound; oldest reports are dropped first.
    pub max_errors: usize,
    /// Minimum spacing between scroll breadcrumbs.
    pub scroll_throttle_ms: u64,
    /// When false, click/scroll/keydown events produce no breadcrumbs.
    pub capture_interactions: bool,
    /// Single-character key presses are logged as `<redacted>`.
    pub redact_typed_keys: bool,
}

/// `{warning, critical}` pair for one tracked metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

impl Threshold {
    #[must_use]
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }
}

/// Per-metric alert thresholds used by the dashboard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertThresholds {
    /// Milliseconds.
    pub lcp: Threshold,
    /// Milliseconds.
    pub fid: Threshold,
    /// Unitless layout-shift score.
    pub cls: Threshold,
    /// Used heap in megabytes.
    pub memory_usage: Threshold,
    /// Errors per trailing minute.
    pub error_rate: Threshold,
}

/// Dashboard aggregation, alerting and retention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DashboardConfig {
    pub refresh_interval_ms: u64,
    pub alert_thresholds: AlertThresholds,
    pub retention_period_days: u32,
    pub real_time_alerts: bool,
}

/// Partial dashboard update: only `Some` fields are applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DashboardConfigPatch {
    pub refresh_interval_ms: Option<u64>,
    pub lcp: Option<Threshold>,
    pub fid: Option<Threshold>,
    pub cls: Option<Threshold>,
    pub memory_usage: Option<Threshold>,
    pub error_rate: Option<Threshold>,
    pub retention_period_days: Option<u32>,
    pub real_time_alerts: Option<bool>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            memory_sample_interval_ms: 5_000,
        }
    }
}

impl MonitorConfig {
    #[must_use]
    pub const fn memory_sample_interval(&self) -> Duration {
        Duration::from_millis(self.memory_sample_interval_ms)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            breadcrumb_capacity: 50,
            session_event_capacity: 1_000,
            max_errors: 500,
            scroll_throttle_ms: 1_000,
            capture_interactions: true,
            redact_typed_keys: true,
        }
    }
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            lcp: Threshold::new(2_500.0, 4_000.0),
            fid: Threshold::new(100.0, 300.0),
            cls: Threshold::new(0.1, 0.25),
            memory_usage: Threshold::new(50.0, 100.0),
            error_rate: Threshold::new(5.0, 10.0),
        }
    }
}

impl AlertThresholds {
    fn named(&self) -> [(&'static str, Threshold); 5] {
        [
            ("lcp", self.lcp),
            ("fid", self.fid),
            ("cls", self.cls),
            ("memory_usage", self.memory_usage),
            ("error_rate", self.error_rate),
        ]
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 5_000,
            alert_thresholds: AlertThresholds::default(),
            retention_period_days: 7,
            real_time_alerts: true,
        }
    }
}

impl DashboardConfig {
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Merge a partial update. Returns true when the refresh interval changed.
    pub fn apply(&mut self, patch: &DashboardConfigPatch) -> bool {
        let mut interval_changed = false;
        if let Some(ms) = patch.refresh_interval_ms {
            interval_changed = ms != self.refresh_interval_ms;
            self.refresh_interval_ms = ms;
        }
        let t = &mut self.alert_thresholds;
        for (slot, value) in [
            (&mut t.lcp, patch.lcp),
            (&mut t.fid, patch.fid),
            (&mut t.cls, patch.cls),
            (&mut t.memory_usage, patch.memory_usage),
            (&mut t.error_rate, patch.error_rate),
        ] {
            if let Some(value) = value {
                *slot = value;
            }
        }
        if let Some(days) = patch.retention_period_days {
            self.retention_period_days = days;
        }
        if let Some(enabled) = patch.real_time_alerts {
            self.real_time_alerts = enabled;
        }
        interval_changed
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval_ms == 0 {
            return Err(TelemetryError::InvalidConfig {
                details: "dashboard.refresh_interval_ms must be > 0".to_string(),
            });
        }
        if self.retention_period_days == 0 {
            return Err(TelemetryError::InvalidConfig {
                details: "dashboard.retention_period_days must be >= 1".to_string(),
            });
        }
        for (name, threshold) in self.alert_thresholds.named() {
            if !(threshold.warning.is_finite() && threshold.critical.is_finite())
                || threshold.warning < 0.0
            {
                return Err(TelemetryError::InvalidConfig {
                    details: format!(
                        "alert_thresholds.{name} must be finite and non-negative, got {threshold:?}"
                    ),
                });
            }
            if threshold.warning >= threshold.critical {
                return Err(TelemetryError::InvalidConfig {
                    details: format!(
                        "alert_thresholds.{name}: warning ({}) must be < critical ({})",
                        threshold.warning, threshold.critical
                    ),
                });
            }
        }
        Ok(())
    }
}

impl Config {
    /// Default configuration path (`$HOME/.config/tlm/config.toml`).
    #[must_use]
    pub fn default_path() -> PathBuf {
        let home = env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        home.join(".config").join("tlm").join("config.toml")
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf)
                .map_err(|source| TelemetryError::io(&path_buf, source))?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(TelemetryError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // monitor
        set_u64(
            &mut lookup,
            "TLM_MONITOR_MEMORY_SAMPLE_INTERVAL_MS",
            &mut self.monitor.memory_sample_interval_ms,
        )?;

        // tracker
        set_usize(
            &mut lookup,
            "TLM_TRACKER_BREADCRUMB_CAPACITY",
            &mut self.tracker.breadcrumb_capacity,
        )?;
        set_usize(
            &mut lookup,
            "TLM_TRACKER_SESSION_EVENT_CAPACITY",
            &mut self.tracker.session_event_capacity,
        )?;
        set_usize(
            &mut lookup,
            "TLM_TRACKER_MAX_ERRORS",
            &mut self.tracker.max_errors,
        )?;
        set_u64(
            &mut lookup,
            "TLM_TRACKER_SCROLL_THROTTLE_MS",
            &mut self.tracker.scroll_throttle_ms,
        )?;
        set_bool(
            &mut lookup,
            "TLM_TRACKER_CAPTURE_INTERACTIONS",
            &mut self.tracker.capture_interactions,
        )?;
        set_bool(
            &mut lookup,
            "TLM_TRACKER_REDACT_TYPED_KEYS",
            &mut self.tracker.redact_typed_keys,
        )?;

        // dashboard
        set_u64(
            &mut lookup,
            "TLM_DASHBOARD_REFRESH_INTERVAL_MS",
            &mut self.dashboard.refresh_interval_ms,
        )?;
        if let Some(raw) = lookup("TLM_DASHBOARD_RETENTION_PERIOD_DAYS") {
            self.dashboard.retention_period_days = raw.parse::<u32>().map_err(|error| {
                TelemetryError::ConfigParse {
                    context: "env",
                    details: format!("TLM_DASHBOARD_RETENTION_PERIOD_DAYS={raw:?}: {error}"),
                }
            })?;
        }
        set_bool(
            &mut lookup,
            "TLM_DASHBOARD_REAL_TIME_ALERTS",
            &mut self.dashboard.real_time_alerts,
        )?;

        let t = &mut self.dashboard.alert_thresholds;
        for (metric, slot) in [
            ("LCP", &mut t.lcp),
            ("FID", &mut t.fid),
            ("CLS", &mut t.cls),
            ("MEMORY_USAGE", &mut t.memory_usage),
            ("ERROR_RATE", &mut t.error_rate),
        ] {
            set_f64(
                &mut lookup,
                &format!("TLM_ALERT_{metric}_WARNING"),
                &mut slot.warning,
            )?;
            set_f64(
                &mut lookup,
                &format!("TLM_ALERT_{metric}_CRITICAL"),
                &mut slot.critical,
            )?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.monitor.memory_sample_interval_ms == 0 {
            return Err(TelemetryError::InvalidConfig {
                details: "monitor.memory_sample_interval_ms must be > 0".to_string(),
            });
        }
        if self.tracker.breadcrumb_capacity == 0
            || self.tracker.session_event_capacity == 0
            || self.tracker.max_errors == 0
        {
            return Err(TelemetryError::InvalidConfig {
                details: "tracker.breadcrumb_capacity, session_event_capacity and max_errors must be > 0"
                    .to_string(),
            });
        }
        self.dashboard.validate()
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| TelemetryError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn set_u64<F>(lookup: &mut F, name: &str, slot: &mut u64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

fn set_usize<F>(lookup: &mut F, name: &str, slot: &mut usize) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

fn set_f64<F>(lookup: &mut F, name: &str, slot: &mut f64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

fn set_bool<F>(lookup: &mut F, name: &str, slot: &mut bool) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}
