//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use session_telemetry::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, DashboardConfig, DashboardConfigPatch};
pub use crate::core::errors::{Result, TelemetryError};
pub use crate::core::ids::SessionId;
pub use crate::core::severity::Severity;
pub use crate::core::subscribers::Subscription;

// Platform
pub use crate::platform::events::{EventSource, PlatformEvent};
pub use crate::platform::pal::{Platform, SyntheticPlatform, detect_platform};

// Monitor
pub use crate::monitor::performance::PerformanceMonitor;
pub use crate::monitor::report::PerformanceReport;
pub use crate::monitor::vitals::{Grade, MemoryPressure};

// Tracker
pub use crate::tracker::error_tracker::ErrorTracker;
pub use crate::tracker::report::{
    BreadcrumbCategory, BreadcrumbEntry, ErrorContext, ErrorType, MobileErrorReport,
};

// Dashboard
pub use crate::dashboard::alerts::{AlertType, PerformanceAlert};
pub use crate::dashboard::analytics::AnalyticsDashboard;
pub use crate::dashboard::experiments::{ABTestResults, ABTestSpec, VariantSpec, bucket_for};
pub use crate::dashboard::metrics::PerformanceMetrics;
