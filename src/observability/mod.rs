//! # Observability
//!
//! Structured logging setup for the daemon using the tracing ecosystem.

mod logging;

pub use logging::{init_logging, LoggingConfig};
