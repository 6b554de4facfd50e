//! Error tracking: enriched error reports, breadcrumb trail, session recording.

pub mod error_tracker;
pub mod report;
pub mod session;
