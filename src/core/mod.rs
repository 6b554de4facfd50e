//! Core types: errors, configuration, severity, bounded buffers, subscribers, tickers.

pub mod config;
pub mod errors;
pub mod ids;
pub mod ring;
pub mod severity;
pub mod subscribers;
pub mod ticker;
