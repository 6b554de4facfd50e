//! Performance monitor: accumulates web vitals from platform events, samples
//! memory on a background ticker, and pushes reports to subscribers.

#![allow(missing_docs)]

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::config::MonitorConfig;
use crate::core::errors::Result;
use crate::core::ids::SessionId;
use crate::core::subscribers::{SubscriberSet, Subscription};
use crate::core::ticker::Ticker;
use crate::monitor::report::{CoreWebVitals, MemoryMetrics, NetworkMetrics, PerformanceReport};
use crate::monitor::vitals::{MemoryPressure, ThresholdCheck, check_performance_thresholds};
use crate::platform::events::{ListenerId, PlatformEvent};
use crate::platform::pal::{Platform, UNKNOWN};

/// Long tasks block the main thread for everything past this many milliseconds.
const LONG_TASK_BUDGET_MS: f64 = 50.0;

#[derive(Debug, Default)]
struct Observed {
    lcp: Option<f64>,
    fcp: Option<f64>,
    fid: Option<f64>,
    cls: f64,
    tbt: f64,
    connection_type: Option<String>,
    last_pressure: MemoryPressure,
}

#[derive(Default)]
struct Lifecycle {
    listener: Option<ListenerId>,
    sampler: Option<Ticker>,
}

struct MonitorInner {
    platform: Arc<dyn Platform>,
    config: MonitorConfig,
    session: SessionId,
    observed: Mutex<Observed>,
    subscribers: SubscriberSet<PerformanceReport>,
    lifecycle: Mutex<Lifecycle>,
}

/// Collector for Core Web Vitals, memory and network readings.
pub struct PerformanceMonitor {
    inner: Arc<MonitorInner>,
}

impl PerformanceMonitor {
    /// Monitor with a session id of its own.
    #[must_use]
    pub fn new(platform: Arc<dyn Platform>, config: MonitorConfig) -> Self {
        let session = SessionId::generate(platform.now());
        Self::with_session(platform, config, session)
    }

    /// Monitor stamping reports with the owner's session id.
    #[must_use]
    pub fn with_session(
        platform: Arc<dyn Platform>,
        config: MonitorConfig,
        session: SessionId,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                platform,
                config,
                session,
                observed: Mutex::new(Observed::default()),
                subscribers: SubscriberSet::new("performance-report"),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> String {
        self.inner.session.current()
    }

    /// Attach the platform listener and start the memory sampler. Idempotent.
    pub fn start_monitoring(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.listener.is_some() {
            return Ok(());
        }

        let weak: Weak<MonitorInner> = Arc::downgrade(&self.inner);
        let sampler = Ticker::spawn(
            "tlm-memory-sampler",
            self.inner.config.memory_sample_interval(),
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.sample_memory();
                }
            },
        )?;

        self.inner.observed.lock().connection_type = self
            .inner
            .platform
            .connection()
            .map(|info| info.connection_type);

        let weak: Weak<MonitorInner> = Arc::downgrade(&self.inner);
        let listener = self
            .inner
            .platform
            .events()
            .subscribe(Arc::new(move |event: &PlatformEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_event(event);
                }
            }));

        lifecycle.listener = Some(listener);
        lifecycle.sampler = Some(sampler);
        tracing::debug!(
            session = %self.inner.session.current(),
            "performance monitoring started"
        );
        Ok(())
    }

    /// Detach the listener and stop the sampler. Idempotent; safe from callbacks.
    pub fn stop_monitoring(&self) {
        self.inner.stop();
    }

    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        self.inner.lifecycle.lock().listener.is_some()
    }

    pub fn on_performance_report<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&PerformanceReport) + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(callback)
    }

    /// Fresh report from whatever instrumentation is currently available.
    #[must_use]
    pub fn get_current_performance_snapshot(&self) -> PerformanceReport {
        self.inner.snapshot()
    }

    #[must_use]
    pub fn check_performance_thresholds(&self, report: &PerformanceReport) -> ThresholdCheck {
        check_performance_thresholds(report)
    }

    /// Forget accumulated vitals, e.g. after a soft navigation.
    pub fn reset_vitals(&self) {
        let mut observed = self.inner.observed.lock();
        observed.lcp = None;
        observed.fcp = None;
        observed.fid = None;
        observed.cls = 0.0;
        observed.tbt = 0.0;
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl MonitorInner {
    fn stop(&self) {
        let (listener, sampler) = {
            let mut lifecycle = self.lifecycle.lock();
            (lifecycle.listener.take(), lifecycle.sampler.take())
        };
        if let Some(id) = listener {
            self.platform.events().unsubscribe(id);
            tracing::debug!(session = %self.session.current(), "performance monitoring stopped");
        }
        if let Some(mut sampler) = sampler {
            sampler.stop();
        }
    }

    fn handle_event(&self, event: &PlatformEvent) {
        let emit = {
            let mut observed = self.observed.lock();
            match event {
                PlatformEvent::Paint { name, start_time } if name == "first-contentful-paint" => {
                    observed.fcp = Some(*start_time);
                    observed.lcp.is_some()
                }
                PlatformEvent::LargestContentfulPaint { start_time } => {
                    observed.lcp = Some(*start_time);
                    observed.fcp.is_some()
                }
                PlatformEvent::FirstInput {
                    start_time,
                    processing_start,
                } => {
                    if observed.fid.is_none() {
                        observed.fid = Some((processing_start - start_time).max(0.0));
                    }
                    false
                }
                PlatformEvent::LayoutShift {
                    value,
                    had_recent_input,
                } => {
                    if !had_recent_input {
                        observed.cls += value;
                    }
                    false
                }
                PlatformEvent::LongTask { duration } => {
                    observed.tbt += (duration - LONG_TASK_BUDGET_MS).max(0.0);
                    false
                }
                PlatformEvent::ConnectionChange => {
                    let current = self.platform.connection().map(|info| info.connection_type);
                    let changed = current != observed.connection_type;
                    if changed {
                        tracing::debug!(
                            from = observed.connection_type.as_deref().unwrap_or(UNKNOWN),
                            to = current.as_deref().unwrap_or(UNKNOWN),
                            "connection type changed"
                        );
                    }
                    observed.connection_type = current;
                    changed
                }
                _ => false,
            }
        };
        if emit {
            self.emit();
        }
    }

    fn sample_memory(&self) {
        let memory = MemoryMetrics::from_heap(self.platform.heap_usage());
        let reached_critical = {
            let mut observed = self.observed.lock();
            if memory.pressure != observed.last_pressure {
                tracing::debug!(
                    from = observed.last_pressure.as_str(),
                    to = memory.pressure.as_str(),
                    used_bytes = memory.used_heap,
                    "memory pressure changed"
                );
            }
            let previous = std::mem::replace(&mut observed.last_pressure, memory.pressure);
            previous != MemoryPressure::Critical && memory.pressure == MemoryPressure::Critical
        };
        if reached_critical {
            tracing::warn!(used_bytes = memory.used_heap, "critical memory pressure");
            self.emit();
        }
    }

    fn emit(&self) {
        let report = self.snapshot();
        self.subscribers.notify(&report);
    }

    fn snapshot(&self) -> PerformanceReport {
        let tti = self
            .platform
            .navigation_timing()
            .and_then(|timing| timing.time_to_interactive())
            .unwrap_or(0.0);
        let vitals = {
            let observed = self.observed.lock();
            CoreWebVitals {
                lcp: observed.lcp.unwrap_or(0.0),
                fid: observed.fid.unwrap_or(0.0),
                cls: observed.cls,
                fcp: observed.fcp.unwrap_or(0.0),
                tti,
                tbt: observed.tbt,
            }
        };
        PerformanceReport {
            timestamp: self.platform.now(),
            session_id: self.session.current(),
            url: self.platform.page_info().url,
            device: self.platform.device_info(),
            vitals,
            memory: MemoryMetrics::from_heap(self.platform.heap_usage()),
            network: NetworkMetrics::from(self.platform.connection()),
        }
    }
}
