//! Performance report value types.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitor::vitals::MemoryPressure;
use crate::platform::pal::{ConnectionInfo, DeviceInfo, HeapUsage, UNKNOWN};

/// Core Web Vitals in milliseconds (CLS is unitless). Zero means not yet observed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CoreWebVitals {
    pub lcp: f64,
    pub fid: f64,
    pub cls: f64,
    pub fcp: f64,
    pub tti: f64,
    pub tbt: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryMetrics {
    pub used_heap: u64,
    pub total_heap: u64,
    pub heap_limit: u64,
    pub pressure: MemoryPressure,
}

impl Default for MemoryMetrics {
    fn default() -> Self {
        Self {
            used_heap: 0,
            total_heap: 0,
            heap_limit: 0,
            pressure: MemoryPressure::Low,
        }
    }
}

impl MemoryMetrics {
    #[must_use]
    pub fn from_heap(heap: Option<HeapUsage>) -> Self {
        heap.map_or_else(Self::default, |heap| Self {
            used_heap: heap.used_bytes,
            total_heap: heap.total_bytes,
            heap_limit: heap.limit_bytes,
            pressure: MemoryPressure::classify(heap.used_bytes),
        })
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn used_mb(&self) -> f64 {
        self.used_heap as f64 / (1024.0 * 1024.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkMetrics {
    pub connection_type: String,
    pub effective_type: String,
    pub downlink: f64,
    pub rtt: f64,
    pub save_data: bool,
}

impl Default for NetworkMetrics {
    fn default() -> Self {
        Self {
            connection_type: UNKNOWN.to_string(),
            effective_type: UNKNOWN.to_string(),
            downlink: 0.0,
            rtt: 0.0,
            save_data: false,
        }
    }
}

impl From<Option<ConnectionInfo>> for NetworkMetrics {
    fn from(info: Option<ConnectionInfo>) -> Self {
        info.map_or_else(Self::default, |info| Self {
            connection_type: info.connection_type,
            effective_type: info.effective_type,
            downlink: info.downlink,
            rtt: info.rtt,
            save_data: info.save_data,
        })
    }
}

/// Point-in-time performance snapshot. Plain value; subscribers get clones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceReport {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub url: String,
    pub device: DeviceInfo,
    pub vitals: CoreWebVitals,
    pub memory: MemoryMetrics,
    pub network: NetworkMetrics,
}
