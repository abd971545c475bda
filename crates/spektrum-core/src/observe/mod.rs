//! Observability: structured logging via `tracing`.
//!
//! Scan counters live in [`crate::stats`]; this module only wires the
//! subscriber.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
