//! Performance monitoring: vitals capture, memory sampling, threshold checks.

pub mod performance;
pub mod report;
pub mod vitals;
