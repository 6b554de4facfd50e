//! Error report, breadcrumb and context types plus severity classification.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::severity::Severity;
use crate::platform::pal::{BrowserInfo, DeviceInfo, PageInfo};

/// Error taxonomy. `Rendering` is reserved and never produced internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorType {
    Javascript,
    Network,
    Rendering,
    Memory,
    Crash,
    UnhandledRejection,
}

impl ErrorType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Javascript => "javascript",
            Self::Network => "network",
            Self::Rendering => "rendering",
            Self::Memory => "memory",
            Self::Crash => "crash",
            Self::UnhandledRejection => "unhandled-rejection",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-driven severity with message heuristics for everything else.
#[must_use]
pub fn classify_severity(error_type: ErrorType, message: &str) -> Severity {
    match error_type {
        ErrorType::Memory | ErrorType::Crash => Severity::Critical,
        ErrorType::Network => Severity::Medium,
        _ => {
            let message = message.to_lowercase();
            if message.contains("out of memory") || message.contains("maximum call stack") {
                Severity::Critical
            } else if message.contains("network") || message.contains("fetch") {
                Severity::Medium
            } else {
                Severity::High
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreadcrumbCategory {
    Navigation,
    UserInteraction,
    Network,
    Console,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreadcrumbLevel {
    #[default]
    Info,
    Warning,
    Error,
}

/// Timestamped note of recent activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBreadcrumb {
    pub timestamp: DateTime<Utc>,
    pub category: BreadcrumbCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub level: BreadcrumbLevel,
}

/// Breadcrumb as supplied by callers; the tracker stamps the time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreadcrumbEntry {
    pub category: BreadcrumbCategory,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub level: BreadcrumbLevel,
}

impl BreadcrumbEntry {
    #[must_use]
    pub fn new(category: BreadcrumbCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            data: None,
            level: BreadcrumbLevel::Info,
        }
    }

    #[must_use]
    pub const fn level(mut self, level: BreadcrumbLevel) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub(crate) fn stamp(self, timestamp: DateTime<Utc>) -> ErrorBreadcrumb {
        ErrorBreadcrumb {
            timestamp,
            category: self.category,
            message: self.message,
            data: self.data,
            level: self.level,
        }
    }
}

/// Session counters captured into each report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub page_views: u64,
    pub interactions: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkContext {
    pub online: bool,
    pub connection_type: String,
    pub effective_type: String,
}

/// Fully enriched error report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobileErrorReport {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub error_type: ErrorType,
    pub message: String,
    pub stack: Option<String>,
    pub filename: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub device: DeviceInfo,
    pub browser: BrowserInfo,
    pub page: PageInfo,
    pub session: SessionContext,
    pub network: NetworkContext,
    /// Trail leading up to the error, oldest first.
    pub breadcrumbs: Vec<ErrorBreadcrumb>,
    pub tags: BTreeMap<String, String>,
    pub severity: Severity,
}

/// Optional caller-supplied overrides and extra tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorContext {
    pub severity: Option<Severity>,
    pub error_type: Option<ErrorType>,
    pub filename: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub tags: BTreeMap<String, String>,
}

impl ErrorContext {
    #[must_use]
    pub const fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    #[must_use]
    pub const fn with_error_type(mut self, error_type: ErrorType) -> Self {
        self.error_type = Some(error_type);
        self
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Error payload accepted by `report_error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedError {
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
}

impl ReportedError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Message from `Display`; the source chain becomes the stack.
    #[must_use]
    pub fn from_error(error: &dyn std::error::Error) -> Self {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        Self {
            message: error.to_string(),
            stack: (!chain.is_empty()).then(|| chain.join("\n")),
        }
    }
}

impl From<&str> for ReportedError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ReportedError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}
