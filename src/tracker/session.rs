//! Bounded per-session recording of breadcrumbs and errors.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::ring::RingBuffer;
use crate::core::severity::Severity;
use crate::tracker::report::{ErrorBreadcrumb, ErrorType, MobileErrorReport};

/// One entry in the session event list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SessionEvent {
    Breadcrumb(ErrorBreadcrumb),
    Error {
        id: String,
        timestamp: DateTime<Utc>,
        error_type: ErrorType,
        severity: Severity,
        message: String,
    },
}

impl SessionEvent {
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Breadcrumb(crumb) => crumb.timestamp,
            Self::Error { timestamp, .. } => *timestamp,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionCounters {
    /// Navigation-start to load-event-end, once known.
    pub initial_load_time_ms: Option<f64>,
    pub interactions: u64,
    pub page_views: u64,
    pub memory_peak_bytes: u64,
}

/// In-memory log of one browsing session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecording {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub events: RingBuffer<SessionEvent>,
    pub error_ids: RingBuffer<String>,
    pub counters: SessionCounters,
}

impl SessionRecording {
    #[must_use]
    pub fn new(
        session_id: String,
        start_time: DateTime<Utc>,
        event_capacity: usize,
        error_capacity: usize,
    ) -> Self {
        Self {
            session_id,
            start_time,
            end_time: None,
            events: RingBuffer::new(event_capacity),
            error_ids: RingBuffer::new(error_capacity),
            counters: SessionCounters::default(),
        }
    }

    pub fn record_breadcrumb(&mut self, crumb: ErrorBreadcrumb) {
        self.events.push(SessionEvent::Breadcrumb(crumb));
    }

    pub fn record_error(&mut self, report: &MobileErrorReport) {
        self.events.push(SessionEvent::Error {
            id: report.id.clone(),
            timestamp: report.timestamp,
            error_type: report.error_type,
            severity: report.severity,
            message: report.message.clone(),
        });
        self.error_ids.push(report.id.clone());
    }

    pub fn observe_memory(&mut self, used_bytes: u64) {
        self.counters.memory_peak_bytes = self.counters.memory_peak_bytes.max(used_bytes);
    }

    #[must_use]
    pub fn duration_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.end_time.unwrap_or(now) - self.start_time)
            .num_milliseconds()
            .max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::report::{BreadcrumbCategory, BreadcrumbEntry};

    #[test]
    fn event_list_is_bounded() {
        let now = Utc::now();
        let mut recording = SessionRecording::new("session_x".to_string(), now, 3, 10);
        for i in 0..5 {
            recording.record_breadcrumb(
                BreadcrumbEntry::new(BreadcrumbCategory::Console, format!("log {i}")).stamp(now),
            );
        }
        assert_eq!(recording.events.len(), 3);
        let first = recording.events.iter().next().expect("event");
        assert!(matches!(first, SessionEvent::Breadcrumb(c) if c.message == "log 2"));
    }

    #[test]
    fn memory_peak_only_grows() {
        let mut recording = SessionRecording::new("s".to_string(), Utc::now(), 10, 10);
        recording.observe_memory(500);
        recording.observe_memory(200);
        assert_eq!(recording.counters.memory_peak_bytes, 500);
    }

    #[test]
    fn duration_uses_end_time_when_stopped() {
        let start = Utc::now();
        let mut recording = SessionRecording::new("s".to_string(), start, 10, 10);
        recording.end_time = Some(start + chrono::Duration::seconds(2));
        assert_eq!(
            recording.duration_ms(start + chrono::Duration::seconds(60)),
            2_000
        );
    }
}
