//! Typed configuration model mirroring the on-disk YAML schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

/// The config document version this build understands.
pub const CURRENT_VERSION: i64 = 1;

/// Top-level Hatch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub projects: BTreeMap<String, Project>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            settings: Settings::default(),
            projects: BTreeMap::new(),
        }
    }
}

/// Global daemon settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub tld: String,
    pub http_port: u16,
    pub https_port: u16,
    pub auto_start: bool,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tld: "test".to_string(),
            http_port: 80,
            https_port: 443,
            auto_start: true,
            log_level: "info".to_string(),
        }
    }
}

/// A single project's proxy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
}

/// How a single upstream service is proxied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub proxy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub websocket: bool,
}

impl Service {
    /// The `host:port` address to dial for this service, derived from the
    /// proxy URL. Ports default to 80 for `http` and 443 for `https`.
    /// An unparseable URL is returned verbatim; validation rejects those
    /// before any component dials them.
    pub fn dial_address(&self) -> String {
        match Url::parse(&self.proxy) {
            Ok(url) => {
                let host = url.host_str().unwrap_or_default().to_string();
                match url.port_or_known_default() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host,
                }
            }
            Err(_) => self.proxy.clone(),
        }
    }

    /// The hostname this service answers on, given its project's domain.
    pub fn effective_host(&self, project_domain: &str) -> String {
        match &self.subdomain {
            Some(sub) => format!("{}.{}", sub, project_domain),
            None => project_domain.to_string(),
        }
    }
}

/// Schema for a per-project `hatch.yml` descriptor, consumed by link-style
/// operations that merge a project into the main config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDescriptor {
    pub domain: String,
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.version, 1);
        assert_eq!(config.settings.tld, "test");
        assert_eq!(config.settings.http_port, 80);
        assert_eq!(config.settings.https_port, 443);
        assert!(config.settings.auto_start);
        assert_eq!(config.settings.log_level, "info");
        assert!(config.projects.is_empty());
    }

    #[test]
    fn test_dial_address_defaults_scheme_port() {
        let http = Service { proxy: "http://localhost".into(), route: None, subdomain: None, websocket: false };
        assert_eq!(http.dial_address(), "localhost:80");

        let https = Service { proxy: "https://localhost".into(), route: None, subdomain: None, websocket: false };
        assert_eq!(https.dial_address(), "localhost:443");

        let explicit = Service { proxy: "http://localhost:3000".into(), route: None, subdomain: None, websocket: false };
        assert_eq!(explicit.dial_address(), "localhost:3000");
    }

    #[test]
    fn test_effective_host() {
        let plain = Service { proxy: "http://localhost:3000".into(), route: None, subdomain: None, websocket: false };
        assert_eq!(plain.effective_host("acme.test"), "acme.test");

        let sub = Service {
            proxy: "http://localhost:6001".into(),
            route: None,
            subdomain: Some("ws".into()),
            websocket: true,
        };
        assert_eq!(sub.effective_host("acme.test"), "ws.acme.test");
    }

    #[test]
    fn test_yaml_round_trip_omits_empty_optionals() {
        let service = Service { proxy: "http://localhost:3000".into(), route: None, subdomain: None, websocket: false };
        let yaml = serde_yaml::to_string(&service).unwrap();
        assert!(!yaml.contains("route"));
        assert!(!yaml.contains("subdomain"));
        assert!(!yaml.contains("websocket"));

        let parsed: Service = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, service);
    }

    #[test]
    fn test_yaml_parses_full_document() {
        let yaml = r#"
version: 1
settings:
  tld: test
  http_port: 80
  https_port: 443
  auto_start: true
  log_level: info
projects:
  acme:
    domain: acme.test
    path: /home/user/projects/acme
    enabled: true
    services:
      web:
        proxy: http://localhost:3000
      api:
        proxy: http://localhost:8000
        route: /api/*
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.version, 1);
        let acme = &config.projects["acme"];
        assert_eq!(acme.domain, "acme.test");
        assert_eq!(acme.services.len(), 2);
        assert_eq!(acme.services["api"].route.as_deref(), Some("/api/*"));
    }
}
