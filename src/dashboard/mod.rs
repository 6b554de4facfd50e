//! Analytics dashboard: metric aggregation, threshold alerting, A/B testing.

pub mod alerts;
pub mod analytics;
pub mod experiments;
pub mod metrics;
