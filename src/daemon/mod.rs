//! # Daemon Lifecycle
//!
//! Single-instance enforcement through a locked PID file, pre-flight port
//! conflict detection, and the supervisor that owns every component for
//! the life of the process: ordered startup, config-reload fan-out and
//! reverse-order shutdown.

mod pid;
mod port;
mod supervisor;

pub use pid::{is_running, PidFile};
pub use port::{check_port, PortInfo};
pub use supervisor::Supervisor;
