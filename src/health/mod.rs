//! # Health Monitoring
//!
//! Tracks per-service TCP reachability. Each `(project, service)` pair in
//! the enabled configuration is dialed on an interval; state transitions
//! are timestamped, logged and surfaced to an optional callback, and the
//! control API serves the current snapshot.

mod monitor;

pub use monitor::{HealthMonitor, MonitorConfig};

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Time between health sweep cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// TCP dial timeout for each check.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Health state of a single service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Not checked yet
    Unknown,
    /// TCP dial succeeded
    Healthy,
    /// TCP dial failed
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Unknown => write!(f, "unknown"),
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Uniquely identifies a service within a project.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceKey {
    pub project: String,
    pub service: String,
}

impl ServiceKey {
    pub fn new<P: Into<String>, S: Into<String>>(project: P, service: S) -> Self {
        Self { project: project.into(), service: service.into() }
    }
}

/// Current health of one service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceStatus {
    pub state: HealthState,
    /// `host:port` being dialed; may change under the same key on reload.
    pub addr: String,
    /// When the current state was first observed.
    pub since: DateTime<Utc>,
    /// When the last check completed, regardless of outcome.
    pub last_check: Option<DateTime<Utc>>,
}
