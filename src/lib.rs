//! # Hatch
//!
//! Hatch is a developer-workstation daemon that gives local projects
//! first-class HTTPS endpoints on custom domains: declare projects in one
//! YAML file, and `https://<project>.test` resolves to the local machine,
//! terminates TLS with a locally trusted certificate and reverse-proxies
//! to the project's upstream process.
//!
//! ## Architecture
//!
//! ```text
//! Config Store ──▶ Supervisor ──▶ Proxy Engine (route table via admin API)
//!      ▲               │    └───▶ Health Monitor (TCP sweeps)
//!      │               ├────────▶ DNS Stub Resolver (*.tld → loopback)
//!  Watcher / API       └────────▶ Control API (status, CRUD, log stream)
//! ```
//!
//! The supervisor owns every component exclusively: it loads the config,
//! fans it out as a translated route table and a set of health targets,
//! re-applies the same fan-out on every config change, and tears the
//! stack down in reverse order on shutdown.

pub mod api;
pub mod certs;
pub mod config;
pub mod daemon;
pub mod dns;
pub mod errors;
pub mod health;
pub mod observability;
pub mod proxy;

pub use errors::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
