//! Platform abstraction layer: polled instrumentation and asynchronous events.

pub mod events;
pub mod pal;
