#![forbid(unsafe_code)]

//! Session telemetry: in-process performance monitoring, error tracking with
//! breadcrumbs and session recording, and an analytics dashboard with
//! threshold alerting and deterministic A/B-test bucketing.
//!
//! Three cooperating components share one [`platform::pal::Platform`]:
//! 1. **Performance monitor**: Core Web Vitals, memory and network sampling
//! 2. **Error tracker**: classified error reports, breadcrumbs, session recording
//! 3. **Analytics dashboard**: metrics history, alerts, experiments, retention
//!
//! # Library usage
//!
//! ```rust,no_run
//! use session_telemetry::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use session_telemetry::core::config::Config;
//! use session_telemetry::dashboard::experiments::bucket_for;
//! ```

pub mod prelude;

pub mod core;
pub mod dashboard;
pub mod monitor;
pub mod platform;
pub mod replay;
pub mod tracker;
