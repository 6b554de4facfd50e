//! Error tracker: global error surfaces, interaction breadcrumbs and the
//! bounded session recording.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::core::config::TrackerConfig;
use crate::core::ids::{SessionId, generate_id};
use crate::core::ring::RingBuffer;
use crate::core::subscribers::{SubscriberSet, Subscription};
use crate::platform::events::{ListenerId, PlatformEvent};
use crate::platform::pal::{Platform, UNKNOWN};
use crate::tracker::report::{
    BreadcrumbCategory, BreadcrumbEntry, BreadcrumbLevel, ErrorBreadcrumb, ErrorContext,
    ErrorType, MobileErrorReport, NetworkContext, ReportedError, SessionContext,
    classify_severity,
};
use crate::tracker::session::SessionRecording;

const MB: u64 = 1024 * 1024;

/// Raw error facts before enrichment.
struct ErrorDraft {
    error_type: ErrorType,
    message: String,
    stack: Option<String>,
    filename: Option<String>,
    line: Option<u32>,
    column: Option<u32>,
    tags: BTreeMap<String, String>,
}

impl ErrorDraft {
    fn new(error_type: ErrorType, message: String) -> Self {
        Self {
            error_type,
            message,
            stack: None,
            filename: None,
            line: None,
            column: None,
            tags: BTreeMap::new(),
        }
    }
}

struct TrackerState {
    breadcrumbs: RingBuffer<ErrorBreadcrumb>,
    errors: RingBuffer<MobileErrorReport>,
    recording: SessionRecording,
    last_scroll_at: Option<DateTime<Utc>>,
}

struct TrackerInner {
    platform: Arc<dyn Platform>,
    config: TrackerConfig,
    session: SessionId,
    state: Mutex<TrackerState>,
    subscribers: SubscriberSet<MobileErrorReport>,
    listener: Mutex<Option<ListenerId>>,
}

/// Collector for uncaught errors, manual reports and breadcrumbs.
pub struct ErrorTracker {
    inner: Arc<TrackerInner>,
}

impl ErrorTracker {
    /// Tracker with a session id of its own.
    #[must_use]
    pub fn new(platform: Arc<dyn Platform>, config: TrackerConfig) -> Self {
        let session = SessionId::generate(platform.now());
        Self::with_session(platform, config, session)
    }

    /// Tracker recording under the owner's session id. [`Self::clear_session`]
    /// rotates that id for every holder.
    #[must_use]
    pub fn with_session(
        platform: Arc<dyn Platform>,
        config: TrackerConfig,
        session: SessionId,
    ) -> Self {
        let state = TrackerState {
            breadcrumbs: RingBuffer::new(config.breadcrumb_capacity),
            errors: RingBuffer::new(config.max_errors),
            recording: new_recording(session.current(), platform.now(), &config),
            last_scroll_at: None,
        };
        Self {
            inner: Arc::new(TrackerInner {
                platform,
                config,
                session,
                state: Mutex::new(state),
                subscribers: SubscriberSet::new("error-report"),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Attach error, interaction and navigation handlers. Idempotent.
    pub fn start_tracking(&self) {
        let mut listener = self.inner.listener.lock();
        if listener.is_some() {
            return;
        }
        {
            let mut state = self.inner.state.lock();
            state.recording.end_time = None;
            if state.recording.counters.initial_load_time_ms.is_none() {
                state.recording.counters.initial_load_time_ms = self
                    .inner
                    .platform
                    .navigation_timing()
                    .and_then(|timing| timing.load_time());
            }
        }
        let weak: Weak<TrackerInner> = Arc::downgrade(&self.inner);
        *listener = Some(self.inner.platform.events().subscribe(Arc::new(
            move |event: &PlatformEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_event(event);
                }
            },
        )));
        tracing::debug!("error tracking started");
    }

    /// Detach every handler and stamp the recording's end time. Idempotent.
    pub fn stop_tracking(&self) {
        self.inner.stop();
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.inner.listener.lock().is_some()
    }

    /// Report a caught error. Never fails; returns the report id.
    pub fn report_error(
        &self,
        error: impl Into<ReportedError>,
        context: Option<ErrorContext>,
    ) -> String {
        let error = error.into();
        let mut draft = ErrorDraft::new(ErrorType::Javascript, error.message);
        draft.stack = error.stack;
        self.inner.record(draft, context)
    }

    /// Report a failed HTTP exchange.
    pub fn report_network_error(
        &self,
        url: &str,
        status: u16,
        status_text: &str,
        context: Option<ErrorContext>,
    ) -> String {
        let mut draft = ErrorDraft::new(
            ErrorType::Network,
            format!("Network error: {status} {status_text}"),
        );
        draft.tags.insert("url".to_string(), url.to_string());
        draft.tags.insert("status".to_string(), status.to_string());
        draft
            .tags
            .insert("statusText".to_string(), status_text.to_string());
        self.inner.record(draft, context)
    }

    /// Report memory exhaustion at `used_bytes`.
    pub fn report_memory_error(&self, used_bytes: u64, context: Option<ErrorContext>) -> String {
        let mut draft = ErrorDraft::new(
            ErrorType::Memory,
            format!("Memory usage exceeded: {}MB", used_bytes / MB),
        );
        draft
            .tags
            .insert("memoryUsage".to_string(), used_bytes.to_string());
        self.inner.record(draft, context)
    }

    pub fn add_breadcrumb(&self, entry: BreadcrumbEntry) {
        let now = self.inner.platform.now();
        self.inner.state.lock().push_breadcrumb(entry.stamp(now));
    }

    pub fn on_error_report<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&MobileErrorReport) + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(callback)
    }

    #[must_use]
    pub fn get_session_recording(&self) -> SessionRecording {
        self.inner.state.lock().recording.clone()
    }

    /// Reports from the current session, oldest first.
    #[must_use]
    pub fn get_session_errors(&self) -> Vec<MobileErrorReport> {
        let state = self.inner.state.lock();
        let session_id = &state.recording.session_id;
        state
            .errors
            .iter()
            .filter(|report| &report.session.session_id == session_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn get_breadcrumbs(&self) -> Vec<ErrorBreadcrumb> {
        self.inner.state.lock().breadcrumbs.to_vec()
    }

    /// Drop breadcrumbs and errors and start a fresh recording under a new
    /// session id.
    pub fn clear_session(&self) {
        let now = self.inner.platform.now();
        let mut state = self.inner.state.lock();
        let (old, new) = self.inner.session.rotate(now);
        let recording = new_recording(new, now, &self.inner.config);
        tracing::debug!(%old, new = %recording.session_id, "session cleared");
        state.breadcrumbs.clear();
        state.errors.clear();
        state.last_scroll_at = None;
        state.recording = recording;
    }
}

impl Drop for ErrorTracker {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

fn new_recording(
    session_id: String,
    now: DateTime<Utc>,
    config: &TrackerConfig,
) -> SessionRecording {
    SessionRecording::new(
        session_id,
        now,
        config.session_event_capacity,
        config.max_errors,
    )
}

impl TrackerState {
    fn push_breadcrumb(&mut self, crumb: ErrorBreadcrumb) {
        self.recording.record_breadcrumb(crumb.clone());
        self.breadcrumbs.push(crumb);
    }
}

impl TrackerInner {
    fn stop(&self) {
        let Some(id) = self.listener.lock().take() else {
            return;
        };
        self.platform.events().unsubscribe(id);
        self.state.lock().recording.end_time = Some(self.platform.now());
        tracing::debug!("error tracking stopped");
    }

    fn handle_event(&self, event: &PlatformEvent) {
        match event {
            PlatformEvent::UncaughtError {
                message,
                filename,
                line,
                column,
                stack,
            } => {
                let mut draft = ErrorDraft::new(ErrorType::Javascript, message.clone());
                draft.filename.clone_from(filename);
                draft.line = *line;
                draft.column = *column;
                draft.stack.clone_from(stack);
                self.record(draft, None);
            }
            PlatformEvent::UnhandledRejection { reason, stack } => {
                let mut draft = ErrorDraft::new(
                    ErrorType::UnhandledRejection,
                    format!("Unhandled promise rejection: {reason}"),
                );
                draft.stack.clone_from(stack);
                self.record(draft, None);
            }
            PlatformEvent::Click { target } => {
                self.interaction(format!("Clicked on {target}"), None);
            }
            PlatformEvent::KeyDown { key } => {
                // Printable keys may be form input.
                let shown = if self.config.redact_typed_keys && key.chars().count() == 1 {
                    "<redacted>"
                } else {
                    key.as_str()
                };
                self.interaction(format!("Key pressed: {shown}"), None);
            }
            PlatformEvent::Scroll { x, y } => {
                let now = self.platform.now();
                let throttle = chrono::Duration::milliseconds(
                    i64::try_from(self.config.scroll_throttle_ms).unwrap_or(i64::MAX),
                );
                {
                    let mut state = self.state.lock();
                    if state
                        .last_scroll_at
                        .is_some_and(|last| now - last < throttle)
                    {
                        return;
                    }
                    state.last_scroll_at = Some(now);
                }
                self.interaction(
                    format!("Scrolled to ({x:.0}, {y:.0})"),
                    Some(serde_json::json!({ "x": x, "y": y })),
                );
            }
            PlatformEvent::Navigation { url } => {
                let crumb = BreadcrumbEntry::new(
                    BreadcrumbCategory::Navigation,
                    format!("Navigated to {url}"),
                )
                .stamp(self.platform.now());
                let mut state = self.state.lock();
                state.recording.counters.page_views += 1;
                state.push_breadcrumb(crumb);
            }
            _ => {}
        }
    }

    fn interaction(&self, message: String, data: Option<serde_json::Value>) {
        if !self.config.capture_interactions {
            return;
        }
        let mut entry = BreadcrumbEntry::new(BreadcrumbCategory::UserInteraction, message);
        entry.data = data;
        let crumb = entry.stamp(self.platform.now());
        let mut state = self.state.lock();
        state.recording.counters.interactions += 1;
        state.push_breadcrumb(crumb);
    }

    /// Enrich, log, record and fan out one report.
    fn record(&self, draft: ErrorDraft, context: Option<ErrorContext>) -> String {
        let context = context.unwrap_or_default();
        let now = self.platform.now();
        let error_type = context.error_type.unwrap_or(draft.error_type);
        let severity = context
            .severity
            .unwrap_or_else(|| classify_severity(error_type, &draft.message));
        let mut tags = draft.tags;
        tags.extend(context.tags);

        let device = self.platform.device_info();
        let browser = self.platform.browser_info();
        let page = self.platform.page_info();
        let connection = self.platform.connection();
        let network = NetworkContext {
            online: browser.online,
            connection_type: connection
                .as_ref()
                .map_or_else(|| UNKNOWN.to_string(), |c| c.connection_type.clone()),
            effective_type: connection
                .as_ref()
                .map_or_else(|| UNKNOWN.to_string(), |c| c.effective_type.clone()),
        };
        let heap_used = self.platform.heap_usage().map(|heap| heap.used_bytes);

        let report = {
            let mut state = self.state.lock();
            let recording = &state.recording;
            let report = MobileErrorReport {
                id: generate_id("err", now),
                timestamp: now,
                error_type,
                message: draft.message,
                stack: draft.stack,
                filename: context.filename.or(draft.filename),
                line: context.line.or(draft.line),
                column: context.column.or(draft.column),
                device,
                browser,
                page,
                session: SessionContext {
                    session_id: recording.session_id.clone(),
                    started_at: recording.start_time,
                    duration_ms: recording.duration_ms(now),
                    page_views: recording.counters.page_views,
                    interactions: recording.counters.interactions,
                },
                network,
                breadcrumbs: state.breadcrumbs.to_vec(),
                tags,
                severity,
            };

            state.errors.push(report.clone());
            state.recording.record_error(&report);
            if let Some(used) = heap_used {
                state.recording.observe_memory(used);
            }
            let crumb = BreadcrumbEntry::new(
                BreadcrumbCategory::Error,
                format!("{}: {}", report.error_type, report.message),
            )
            .level(BreadcrumbLevel::Error)
            .data(serde_json::json!({ "errorId": report.id }))
            .stamp(now);
            state.push_breadcrumb(crumb);
            report
        };

        tracing::debug!(
            id = %report.id,
            error_type = report.error_type.as_str(),
            severity = report.severity.as_str(),
            "error report recorded"
        );
        self.subscribers.notify(&report);
        report.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::severity::Severity;
    use crate::platform::pal::SyntheticPlatform;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tracker_with(config: TrackerConfig) -> (Arc<SyntheticPlatform>, ErrorTracker) {
        let platform = Arc::new(SyntheticPlatform::new());
        let tracker = ErrorTracker::new(Arc::clone(&platform) as Arc<dyn Platform>, config);
        (platform, tracker)
    }

    fn tracker() -> (Arc<SyntheticPlatform>, ErrorTracker) {
        tracker_with(TrackerConfig::default())
    }

    #[test]
    fn breadcrumbs_evict_oldest_past_capacity() {
        let (_platform, tracker) = tracker();
        for i in 1..=60 {
            tracker.add_breadcrumb(BreadcrumbEntry::new(
                BreadcrumbCategory::Console,
                format!("crumb {i}"),
            ));
        }
        let crumbs = tracker.get_breadcrumbs();
        assert_eq!(crumbs.len(), 50);
        assert_eq!(crumbs[0].message, "crumb 11");
        assert_eq!(crumbs[49].message, "crumb 60");
        assert_eq!(tracker.get_session_recording().events.len(), 60);
    }

    #[test]
    fn report_carries_trail_before_error_breadcrumb() {
        let (_platform, tracker) = tracker();
        tracker.add_breadcrumb(BreadcrumbEntry::new(BreadcrumbCategory::Console, "before"));
        let id = tracker.report_error("boom", None);

        let errors = tracker.get_session_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].id, id);
        assert_eq!(errors[0].breadcrumbs.len(), 1);
        assert_eq!(errors[0].severity, Severity::High);

        let crumbs = tracker.get_breadcrumbs();
        assert_eq!(crumbs.len(), 2);
        assert_eq!(crumbs[1].category, BreadcrumbCategory::Error);
        assert_eq!(crumbs[1].level, BreadcrumbLevel::Error);

        let recording = tracker.get_session_recording();
        assert_eq!(recording.error_ids.to_vec(), vec![id]);
    }

    #[test]
    fn context_overrides_severity_and_type() {
        let (_platform, tracker) = tracker();
        tracker.report_error(
            "layout thrash",
            Some(
                ErrorContext::default()
                    .with_error_type(ErrorType::Rendering)
                    .with_severity(Severity::Low)
                    .with_tag("component", "calendar"),
            ),
        );
        let report = &tracker.get_session_errors()[0];
        assert_eq!(report.error_type, ErrorType::Rendering);
        assert_eq!(report.severity, Severity::Low);
        assert_eq!(report.tags.get("component").map(String::as_str), Some("calendar"));
    }

    #[test]
    fn context_error_type_drives_classification() {
        let (_platform, tracker) = tracker();
        tracker.report_error(
            "renderer died",
            Some(ErrorContext::default().with_error_type(ErrorType::Crash)),
        );
        assert_eq!(tracker.get_session_errors()[0].severity, Severity::Critical);
    }

    #[test]
    fn error_log_is_bounded() {
        let (_platform, tracker) = tracker_with(TrackerConfig {
            max_errors: 3,
            ..TrackerConfig::default()
        });
        for i in 0..5 {
            tracker.report_error(format!("e{i}"), None);
        }
        let messages: Vec<String> = tracker
            .get_session_errors()
            .into_iter()
            .map(|r| r.message)
            .collect();
        assert_eq!(messages, vec!["e2", "e3", "e4"]);
    }

    #[test]
    fn faulty_subscriber_is_isolated() {
        let (_platform, tracker) = tracker();
        let hits = Arc::new(AtomicUsize::new(0));
        let h1 = Arc::clone(&hits);
        let _a = tracker.on_error_report(move |_| {
            h1.fetch_add(1, Ordering::SeqCst);
        });
        let _b = tracker.on_error_report(|_| panic!("subscriber bug"));
        let h2 = Arc::clone(&hits);
        let _c = tracker.on_error_report(move |_| {
            h2.fetch_add(1, Ordering::SeqCst);
        });
        tracker.report_error("x", None);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn platform_errors_and_rejections_are_reported() {
        let (platform, tracker) = tracker();
        tracker.start_tracking();
        platform.emit(PlatformEvent::UncaughtError {
            message: "x is undefined".to_string(),
            filename: Some("app.js".to_string()),
            line: Some(10),
            column: Some(4),
            stack: None,
        });
        platform.emit(PlatformEvent::UnhandledRejection {
            reason: "fetch failed".to_string(),
            stack: None,
        });
        let errors = tracker.get_session_errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].filename.as_deref(), Some("app.js"));
        assert_eq!(errors[1].error_type, ErrorType::UnhandledRejection);
        assert_eq!(errors[1].severity, Severity::Medium);
        tracker.stop_tracking();
    }

    #[test]
    fn interactions_become_breadcrumbs_with_scroll_throttle() {
        let (platform, tracker) = tracker();
        tracker.start_tracking();
        platform.emit(PlatformEvent::Click {
            target: "button#book".to_string(),
        });
        platform.emit(PlatformEvent::Scroll { x: 0.0, y: 100.0 });
        platform.emit(PlatformEvent::Scroll { x: 0.0, y: 200.0 });
        platform.advance(chrono::Duration::milliseconds(1_500));
        platform.emit(PlatformEvent::Scroll { x: 0.0, y: 300.0 });
        platform.emit(PlatformEvent::KeyDown {
            key: "a".to_string(),
        });
        platform.emit(PlatformEvent::KeyDown {
            key: "Enter".to_string(),
        });
        platform.emit(PlatformEvent::Navigation {
            url: "https://app.local/boats".to_string(),
        });

        let messages: Vec<String> = tracker
            .get_breadcrumbs()
            .into_iter()
            .map(|c| c.message)
            .collect();
        assert_eq!(
            messages,
            vec![
                "Clicked on button#book",
                "Scrolled to (0, 100)",
                "Scrolled to (0, 300)",
                "Key pressed: <redacted>",
                "Key pressed: Enter",
                "Navigated to https://app.local/boats",
            ]
        );
        let counters = tracker.get_session_recording().counters;
        assert_eq!(counters.interactions, 5);
        assert_eq!(counters.page_views, 1);
        tracker.stop_tracking();
    }

    #[test]
    fn typed_keys_are_recorded_verbatim_when_redaction_is_off() {
        let (platform, tracker) = tracker_with(TrackerConfig {
            redact_typed_keys: false,
            ..TrackerConfig::default()
        });
        tracker.start_tracking();
        platform.emit(PlatformEvent::KeyDown {
            key: "é".to_string(),
        });
        platform.emit(PlatformEvent::KeyDown {
            key: "Tab".to_string(),
        });
        let messages: Vec<String> = tracker
            .get_breadcrumbs()
            .into_iter()
            .map(|c| c.message)
            .collect();
        assert_eq!(messages, vec!["Key pressed: é", "Key pressed: Tab"]);
        tracker.stop_tracking();
    }

    #[test]
    fn interactions_can_be_disabled() {
        let (platform, tracker) = tracker_with(TrackerConfig {
            capture_interactions: false,
            ..TrackerConfig::default()
        });
        tracker.start_tracking();
        platform.emit(PlatformEvent::Click {
            target: "div".to_string(),
        });
        assert!(tracker.get_breadcrumbs().is_empty());
        tracker.stop_tracking();
    }

    #[test]
    fn stop_stamps_end_time_and_detaches() {
        let (platform, tracker) = tracker();
        tracker.start_tracking();
        tracker.start_tracking();
        assert_eq!(platform.events().listener_count(), 1);
        tracker.stop_tracking();
        tracker.stop_tracking();
        assert_eq!(platform.events().listener_count(), 0);
        assert!(tracker.get_session_recording().end_time.is_some());

        platform.emit(PlatformEvent::Click {
            target: "ignored".to_string(),
        });
        assert!(tracker.get_breadcrumbs().is_empty());
    }

    #[test]
    fn clear_session_starts_fresh_recording() {
        let (platform, tracker) = tracker();
        tracker.report_error("old", None);
        let old_id = tracker.get_session_recording().session_id;
        platform.advance(chrono::Duration::seconds(1));
        tracker.clear_session();

        let recording = tracker.get_session_recording();
        assert_ne!(recording.session_id, old_id);
        assert!(recording.events.is_empty());
        assert!(tracker.get_session_errors().is_empty());
        assert!(tracker.get_breadcrumbs().is_empty());
    }

    #[test]
    fn memory_peak_refreshes_on_reports() {
        let (platform, tracker) = tracker();
        platform.set_heap_used_mb(80);
        tracker.report_error("a", None);
        platform.set_heap_used_mb(40);
        tracker.report_error("b", None);
        assert_eq!(
            tracker.get_session_recording().counters.memory_peak_bytes,
            80 * MB
        );
    }
}
