//! # Stub DNS Resolver
//!
//! An authoritative stub resolver for the configured development TLD:
//! `A`/`AAAA` queries under `*.<tld>.` answer with loopback, everything
//! else is forwarded to the system's upstream resolvers. The OS resolver
//! file (written by an external collaborator) points the TLD at this
//! listener's address and port.

mod forward;
mod server;

pub use forward::{discover_upstreams, parse_nameservers};
pub use server::{DnsServer, ServerConfig};

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{Error, Result};

/// Default listen address for the stub resolver. A non-privileged port;
/// the OS resolver file provides the indirection from 53.
pub const DEFAULT_LISTEN_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const DEFAULT_PORT: u16 = 5053;

/// Directory of per-TLD resolver files on the host.
pub const RESOLVER_DIR: &str = "/etc/resolver";

static SAFE_TLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]+$").expect("valid regex"));

/// Content of a resolver file directing queries to the given address.
pub fn resolver_file_content(listen_ip: IpAddr, port: u16) -> String {
    format!("nameserver {}\nport {}\n", listen_ip, port)
}

/// Full path of the resolver file for a TLD, e.g. `/etc/resolver/test`.
pub fn resolver_file_path(tld: &str) -> PathBuf {
    Path::new(RESOLVER_DIR).join(tld)
}

/// Reject TLD/port combinations that must never reach a privileged shell.
/// Only plain lowercase alphabetic TLDs are accepted.
pub fn validate_resolver_inputs(tld: &str, port: u16) -> Result<()> {
    if !SAFE_TLD.is_match(tld) {
        return Err(Error::config(format!("invalid TLD {:?}", tld)));
    }
    if port == 0 {
        return Err(Error::config(format!("invalid port {}", port)));
    }
    Ok(())
}

/// Whether a resolver file exists for the given TLD.
pub fn is_resolver_installed(tld: &str) -> bool {
    resolver_file_path(tld).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_file_content() {
        let content = resolver_file_content(DEFAULT_LISTEN_IP, DEFAULT_PORT);
        assert_eq!(content, "nameserver 127.0.0.1\nport 5053\n");
    }

    #[test]
    fn test_resolver_file_path() {
        assert_eq!(resolver_file_path("test"), PathBuf::from("/etc/resolver/test"));
    }

    #[test]
    fn test_tld_guard() {
        assert!(validate_resolver_inputs("test", 5053).is_ok());
        assert!(validate_resolver_inputs("te.st", 5053).is_err());
        assert!(validate_resolver_inputs("TEST", 5053).is_err());
        assert!(validate_resolver_inputs("test; rm -rf /", 5053).is_err());
        assert!(validate_resolver_inputs("", 5053).is_err());
        assert!(validate_resolver_inputs("test", 0).is_err());
    }
}
