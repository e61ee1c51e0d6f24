//! Upstream resolver discovery.
//!
//! Hatch forwards non-TLD queries to whatever resolvers the host was
//! already using. Loopback entries are filtered out: the host resolver
//! configuration usually points at Hatch's own listener once the resolver
//! file is installed, and forwarding to ourselves would loop.

use std::fs;
use std::net::IpAddr;

const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Public resolvers used when discovery fails or yields nothing usable.
pub fn default_upstreams() -> Vec<String> {
    vec!["8.8.8.8:53".to_string(), "1.1.1.1:53".to_string()]
}

/// Discover the system's configured DNS servers from the OS resolver
/// configuration. Falls back to public resolvers.
pub fn discover_upstreams() -> Vec<String> {
    let servers = fs::read_to_string(RESOLV_CONF)
        .map(|content| parse_nameservers(&content))
        .unwrap_or_default();
    if servers.is_empty() {
        return default_upstreams();
    }
    servers
}

/// Extract nameserver addresses from resolver configuration output.
/// Accepts both the plain form `nameserver 192.168.1.1` and the indexed
/// form `nameserver[0] : 192.168.1.1` some tools print. Each unique
/// non-loopback address is returned as `ip:53`.
pub fn parse_nameservers(output: &str) -> Vec<String> {
    let mut seen = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("nameserver") else {
            continue;
        };

        // Skip an optional "[<n>]" index and separator.
        let rest = match rest.trim_start().strip_prefix('[') {
            Some(indexed) => match indexed.split_once(']') {
                Some((_, tail)) => tail,
                None => continue,
            },
            None => rest,
        };
        let value = rest.trim_start().trim_start_matches(':').trim();
        if value.is_empty() {
            continue;
        }

        let Ok(ip) = value.parse::<IpAddr>() else {
            continue;
        };
        if ip.is_loopback() {
            continue;
        }

        let addr = match ip {
            IpAddr::V4(v4) => format!("{}:53", v4),
            IpAddr::V6(v6) => format!("[{}]:53", v6),
        };
        if !seen.contains(&addr) {
            seen.push(addr);
        }
    }

    seen
}
