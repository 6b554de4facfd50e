//! PAL trait with a native implementation and an in-memory synthetic one.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, TelemetryError};
use crate::platform::events::{EventBus, EventSource, PlatformEvent};

/// Heap (or process memory) reading in bytes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeapUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub limit_bytes: u64,
}

impl HeapUsage {
    #[must_use]
    pub const fn new(used_bytes: u64, total_bytes: u64, limit_bytes: u64) -> Self {
        Self {
            used_bytes,
            total_bytes,
            limit_bytes,
        }
    }
}

/// Network-information reading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionInfo {
    pub connection_type: String,
    pub effective_type: String,
    /// Megabits per second.
    pub downlink: f64,
    /// Milliseconds.
    pub rtt: f64,
    pub save_data: bool,
}

/// Navigation timing marks, milliseconds from time origin.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct NavigationTiming {
    pub fetch_start: f64,
    pub dom_interactive: f64,
    pub dom_content_loaded: f64,
    pub load_event_end: f64,
}

impl NavigationTiming {
    /// Time to interactive, or `None` when the marks are not yet populated.
    #[must_use]
    pub fn time_to_interactive(&self) -> Option<f64> {
        (self.dom_interactive > 0.0 && self.dom_interactive >= self.fetch_start)
            .then(|| self.dom_interactive - self.fetch_start)
    }

    /// Full load duration, or `None` before the load event has fired.
    #[must_use]
    pub fn load_time(&self) -> Option<f64> {
        (self.load_event_end > 0.0 && self.load_event_end >= self.fetch_start)
            .then(|| self.load_event_end - self.fetch_start)
    }
}

/// Device context snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceInfo {
    pub user_agent: String,
    pub platform: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub pixel_ratio: f64,
    pub is_mobile: bool,
    pub touch_support: bool,
    pub hardware_concurrency: u32,
    /// Gigabytes, when the platform exposes it.
    pub device_memory: Option<f64>,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            user_agent: UNKNOWN.to_string(),
            platform: UNKNOWN.to_string(),
            screen_width: 0,
            screen_height: 0,
            pixel_ratio: 1.0,
            is_mobile: false,
            touch_support: false,
            hardware_concurrency: 0,
            device_memory: None,
        }
    }
}

/// Browser (or host runtime) context snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrowserInfo {
    pub name: String,
    pub version: String,
    pub language: String,
    pub cookies_enabled: bool,
    pub online: bool,
}

impl Default for BrowserInfo {
    fn default() -> Self {
        Self {
            name: UNKNOWN.to_string(),
            version: UNKNOWN.to_string(),
            language: UNKNOWN.to_string(),
            cookies_enabled: false,
            online: true,
        }
    }
}

/// Current page context snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageInfo {
    pub url: String,
    pub referrer: String,
    pub title: String,
}

/// Fallback for any string the platform cannot report.
pub const UNKNOWN: &str = "unknown";

/// Polled instrumentation plus the asynchronous event source.
///
/// Optional readings return `None` when the underlying API is unavailable;
/// callers degrade to zero values rather than failing.
pub trait Platform: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn heap_usage(&self) -> Option<HeapUsage>;
    fn connection(&self) -> Option<ConnectionInfo>;
    fn navigation_timing(&self) -> Option<NavigationTiming>;
    fn device_info(&self) -> DeviceInfo;
    fn browser_info(&self) -> BrowserInfo;
    fn page_info(&self) -> PageInfo;
    fn events(&self) -> &dyn EventSource;
}

// ──────────────────── native ────────────────────

/// Host-process platform: wall clock, process memory from `/proc`, and an
/// event bus the embedding application pumps.
pub struct NativePlatform {
    bus: EventBus,
    page: RwLock<PageInfo>,
    connection: RwLock<Option<ConnectionInfo>>,
    navigation: RwLock<Option<NavigationTiming>>,
    heap_cache: RwLock<Option<(HeapUsage, Instant)>>,
    cache_ttl: Duration,
}

impl Default for NativePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl NativePlatform {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bus: EventBus::new(),
            page: RwLock::new(PageInfo::default()),
            connection: RwLock::new(None),
            navigation: RwLock::new(None),
            heap_cache: RwLock::new(None),
            cache_ttl: Duration::from_millis(500),
        }
    }

    /// Forward a host event to every attached listener.
    pub fn emit(&self, event: &PlatformEvent) -> usize {
        if let PlatformEvent::Navigation { url } = event {
            self.page.write().url.clone_from(url);
        }
        self.bus.emit(event)
    }

    pub fn set_page(&self, page: PageInfo) {
        *self.page.write() = page;
    }

    pub fn set_navigation_timing(&self, timing: NavigationTiming) {
        *self.navigation.write() = Some(timing);
    }

    /// Record a connection reading, emitting `ConnectionChange` when it differs.
    pub fn set_connection(&self, info: Option<ConnectionInfo>) {
        let changed = {
            let mut slot = self.connection.write();
            let changed = *slot != info;
            *slot = info;
            changed
        };
        if changed {
            self.bus.emit(&PlatformEvent::ConnectionChange);
        }
    }

    fn read_heap(&self) -> Result<HeapUsage> {
        {
            let cache = self.heap_cache.read();
            if let Some((usage, collected_at)) = &*cache
                && collected_at.elapsed() < self.cache_ttl
            {
                return Ok(*usage);
            }
        }

        let status = fs::read_to_string("/proc/self/status")
            .map_err(|source| TelemetryError::io("/proc/self/status", source))?;
        let meminfo = fs::read_to_string("/proc/meminfo")
            .map_err(|source| TelemetryError::io("/proc/meminfo", source))?;
        let usage = heap_from_proc(&parse_kb_table(&status)?, &parse_kb_table(&meminfo)?)?;

        *self.heap_cache.write() = Some((usage, Instant::now()));
        Ok(usage)
    }
}

impl Platform for NativePlatform {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn heap_usage(&self) -> Option<HeapUsage> {
        if !cfg!(target_os = "linux") {
            return None;
        }
        match self.read_heap() {
            Ok(usage) => Some(usage),
            Err(error) => {
                tracing::debug!(code = error.code(), %error, "process memory unavailable");
                None
            }
        }
    }

    fn connection(&self) -> Option<ConnectionInfo> {
        self.connection.read().clone()
    }

    fn navigation_timing(&self) -> Option<NavigationTiming> {
        *self.navigation.read()
    }

    fn device_info(&self) -> DeviceInfo {
        let cores = std::thread::available_parallelism()
            .map_or(0, |n| u32::try_from(n.get()).unwrap_or(u32::MAX));
        DeviceInfo {
            user_agent: format!(
                "{}/{} ({}; {})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
            platform: std::env::consts::OS.to_string(),
            hardware_concurrency: cores,
            ..DeviceInfo::default()
        }
    }

    fn browser_info(&self) -> BrowserInfo {
        let language = std::env::var("LANG")
            .ok()
            .and_then(|lang| lang.split('.').next().map(|s| s.replace('_', "-")))
            .filter(|lang| !lang.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string());
        BrowserInfo {
            name: "native".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            language,
            cookies_enabled: false,
            online: true,
        }
    }

    fn page_info(&self) -> PageInfo {
        self.page.read().clone()
    }

    fn events(&self) -> &dyn EventSource {
        &self.bus
    }
}

/// Native platform as a shared trait object.
#[must_use]
pub fn detect_platform() -> Arc<dyn Platform> {
    Arc::new(NativePlatform::new())
}

/// Parse `Key:   123 kB` tables (`/proc/self/status`, `/proc/meminfo`) into bytes.
///
/// Lines without a numeric value (e.g. `Name:`) are skipped.
fn parse_kb_table(raw: &str) -> Result<HashMap<String, u64>> {
    let mut values = HashMap::new();
    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((key, rest)) = line.split_once(':') else {
            return Err(TelemetryError::PlatformQuery {
                details: format!("invalid proc line (missing ':'): {line}"),
            });
        };
        let mut parts = rest.split_whitespace();
        let Some(value) = parts.next().and_then(|v| v.parse::<u64>().ok()) else {
            continue;
        };
        let bytes = match parts.next() {
            None => value,
            Some("kB") => value.saturating_mul(1024),
            Some(_) => continue,
        };
        values.insert(key.trim().to_string(), bytes);
    }
    Ok(values)
}

fn heap_from_proc(
    status: &HashMap<String, u64>,
    meminfo: &HashMap<String, u64>,
) -> Result<HeapUsage> {
    let field = |table: &HashMap<String, u64>, key: &str| {
        table
            .get(key)
            .copied()
            .ok_or_else(|| TelemetryError::PlatformQuery {
                details: format!("missing required proc field: {key}"),
            })
    };
    let used = field(status, "VmRSS")?;
    Ok(HeapUsage {
        used_bytes: used,
        total_bytes: status.get("VmHWM").copied().unwrap_or(used),
        limit_bytes: field(meminfo, "MemTotal")?,
    })
}

// ──────────────────── synthetic ────────────────────

#[derive(Debug, Clone)]
struct SyntheticState {
    now: DateTime<Utc>,
    heap: Option<HeapUsage>,
    connection: Option<ConnectionInfo>,
    navigation: Option<NavigationTiming>,
    device: DeviceInfo,
    browser: BrowserInfo,
    page: PageInfo,
}

/// In-memory platform with a settable clock, for tests and scenario replay.
///
/// Every optional API starts unavailable; setters fill them in.
pub struct SyntheticPlatform {
    state: RwLock<SyntheticState>,
    bus: EventBus,
}

impl Default for SyntheticPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticPlatform {
    /// Clock starts at 2024-01-01T00:00:00Z.
    #[must_use]
    pub fn new() -> Self {
        let start = DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default();
        Self {
            state: RwLock::new(SyntheticState {
                now: start,
                heap: None,
                connection: None,
                navigation: None,
                device: DeviceInfo::default(),
                browser: BrowserInfo::default(),
                page: PageInfo {
                    url: "https://app.local/".to_string(),
                    referrer: String::new(),
                    title: String::new(),
                },
            }),
            bus: EventBus::new(),
        }
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        self.state.write().now = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut state = self.state.write();
        state.now += by;
    }

    pub fn set_heap(&self, heap: Option<HeapUsage>) {
        self.state.write().heap = heap;
    }

    /// Convenience: report `used_mb` megabytes of a 2 GiB heap.
    pub fn set_heap_used_mb(&self, used_mb: u64) {
        let used = used_mb.saturating_mul(1024 * 1024);
        self.set_heap(Some(HeapUsage::new(
            used,
            used.max(64 * 1024 * 1024),
            2 * 1024 * 1024 * 1024,
        )));
    }

    /// Replace the connection reading and emit `ConnectionChange` when it differs.
    pub fn set_connection(&self, info: Option<ConnectionInfo>) {
        let changed = {
            let mut state = self.state.write();
            let changed = state.connection != info;
            state.connection = info;
            changed
        };
        if changed {
            self.bus.emit(&PlatformEvent::ConnectionChange);
        }
    }

    pub fn set_navigation_timing(&self, timing: Option<NavigationTiming>) {
        self.state.write().navigation = timing;
    }

    pub fn set_device(&self, device: DeviceInfo) {
        self.state.write().device = device;
    }

    pub fn set_browser(&self, browser: BrowserInfo) {
        self.state.write().browser = browser;
    }

    pub fn set_page_url(&self, url: &str) {
        self.state.write().page.url = url.to_string();
    }

    /// Fire an event at every attached listener, after updating page state for
    /// navigations. Returns how many listeners ran to completion.
    pub fn emit(&self, event: PlatformEvent) -> usize {
        if let PlatformEvent::Navigation { url } = &event {
            self.set_page_url(url);
        }
        self.bus.emit(&event)
    }
}

impl Platform for SyntheticPlatform {
    fn now(&self) -> DateTime<Utc> {
        self.state.read().now
    }

    fn heap_usage(&self) -> Option<HeapUsage> {
        self.state.read().heap
    }

    fn connection(&self) -> Option<ConnectionInfo> {
        self.state.read().connection.clone()
    }

    fn navigation_timing(&self) -> Option<NavigationTiming> {
        self.state.read().navigation
    }

    fn device_info(&self) -> DeviceInfo {
        self.state.read().device.clone()
    }

    fn browser_info(&self) -> BrowserInfo {
        self.state.read().browser.clone()
    }

    fn page_info(&self) -> PageInfo {
        self.state.read().page.clone()
    }

    fn events(&self) -> &dyn EventSource {
        &self.bus
    }
}
