//! # Control API
//!
//! Loopback HTTP API consumed by the CLI and the desktop dashboard:
//! daemon status, project CRUD, health snapshots, a server-sent event
//! stream of the daemon's structured log, raw YAML config access and a
//! config re-apply trigger. Bodies are JSON except `/api/config`, which
//! speaks YAML.
//!
//! Clients are not authenticated; the listener binds only the loopback
//! interface. Mutating JSON endpoints require `Content-Type:
//! application/json`, which doubles as CSRF protection: the non-simple
//! content type forces a CORS preflight that is never answered for
//! cross-origin requests.

mod error;
mod log_hub;
mod server;

pub use error::ApiError;
pub use log_hub::LogHub;
pub use server::{ApiServer, ApiServerConfig, ApiState, DEFAULT_API_ADDR};

use async_trait::async_trait;

use crate::errors::Result;

/// Daemon operations the API can trigger.
#[async_trait]
pub trait DaemonControl: Send + Sync {
    /// Re-read the config from disk and re-apply it to the proxy and the
    /// health monitor.
    async fn reload_config(&self) -> Result<()>;
}
