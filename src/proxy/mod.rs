//! # Proxy Component
//!
//! Hatch terminates TLS and reverse-proxies through an embedded HTTPS
//! engine driven entirely over its loopback admin API: the daemon
//! translates its own configuration into the engine's JSON route table and
//! POSTs it to `/load`. The engine is pluggable; anything that accepts a
//! JSON config document on an admin endpoint and reloads atomically
//! satisfies the contract.

mod client;
mod server;
mod translate;

pub use client::AdminClient;
pub use server::{clear_pki_cache, EngineConfig, ProxyServer};
pub use translate::{translate, RouteTable};

use std::path::PathBuf;

/// Default admin API listen address of the proxy engine.
pub const DEFAULT_ADMIN_ADDR: &str = "localhost:2019";

/// The engine's data directory, where it caches PKI authorities and leaf
/// certificates between runs.
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Application Support/Caddy");
        }
    }
    if let Some(xdg) = std::env::var_os("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("caddy");
        }
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".local/share/caddy"),
        None => PathBuf::from(".caddy"),
    }
}
