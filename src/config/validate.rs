//! Whole-document configuration validation.
//!
//! Validation never short-circuits: one pass collects every broken rule so
//! a user editing the file by hand sees the full list at once.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::model::{Config, Project, Service, CURRENT_VERSION};

static HOSTNAME_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$").expect("valid regex"));

const ALLOWED_TLDS: [&str; 4] = ["test", "localhost", "local", "dev"];
const ALLOWED_LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

/// Check `cfg` for structural and semantic correctness. Returns every
/// validation error found; an empty vector means the config is valid.
pub fn validate(cfg: &Config) -> Vec<String> {
    let mut errs = Vec::new();

    if cfg.version != CURRENT_VERSION {
        errs.push(format!("version must be 1, got {}", cfg.version));
    }

    validate_settings(cfg, &mut errs);

    // domain -> owning project, for duplicate detection across projects
    let mut domains: BTreeMap<&str, &str> = BTreeMap::new();
    for (name, project) in &cfg.projects {
        validate_project(name, project, &cfg.settings.tld, &mut domains, &mut errs);
    }

    errs
}

fn validate_settings(cfg: &Config, errs: &mut Vec<String>) {
    let s = &cfg.settings;

    if !ALLOWED_TLDS.contains(&s.tld.as_str()) {
        errs.push(format!(
            "settings.tld must be one of: test, localhost, local, dev; got {:?}",
            s.tld
        ));
    }

    if s.http_port == 0 {
        errs.push(format!("settings.http_port must be 1-65535, got {}", s.http_port));
    }
    if s.https_port == 0 {
        errs.push(format!("settings.https_port must be 1-65535, got {}", s.https_port));
    }
    if s.http_port != 0 && s.https_port != 0 && s.http_port == s.https_port {
        errs.push(format!(
            "settings.http_port and settings.https_port must differ, both are {}",
            s.http_port
        ));
    }

    if !ALLOWED_LOG_LEVELS.contains(&s.log_level.as_str()) {
        errs.push(format!(
            "settings.log_level must be one of: debug, info, warn, error; got {:?}",
            s.log_level
        ));
    }
}

fn validate_project<'a>(
    name: &'a str,
    project: &'a Project,
    tld: &str,
    domains: &mut BTreeMap<&'a str, &'a str>,
    errs: &mut Vec<String>,
) {
    let prefix = format!("projects.{}", name);

    if project.domain.is_empty() {
        errs.push(format!("{}.domain is required", prefix));
    } else if !is_valid_domain(&project.domain, tld) {
        errs.push(format!(
            "{}.domain {:?} must be a valid hostname ending with .{}",
            prefix, project.domain, tld
        ));
    } else if let Some(other) = domains.get(project.domain.as_str()) {
        errs.push(format!(
            "duplicate domain {:?} in projects {:?} and {:?}",
            project.domain, other, name
        ));
    } else {
        domains.insert(&project.domain, name);
    }

    if project.path.is_empty() {
        errs.push(format!("{}.path is required", prefix));
    }

    if project.services.is_empty() {
        errs.push(format!("{}.services must have at least one entry", prefix));
    }
    for (svc_name, service) in &project.services {
        validate_service(&prefix, svc_name, service, errs);
    }
}

fn validate_service(prefix: &str, name: &str, service: &Service, errs: &mut Vec<String>) {
    let svc_prefix = format!("{}.services.{}", prefix, name);

    if service.proxy.is_empty() {
        errs.push(format!("{}.proxy is required", svc_prefix));
    } else {
        let valid = Url::parse(&service.proxy)
            .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
            .unwrap_or(false);
        if !valid {
            errs.push(format!(
                "{}.proxy {:?} must be a valid URL with http or https scheme",
                svc_prefix, service.proxy
            ));
        }
    }

    if let Some(subdomain) = &service.subdomain {
        if !HOSTNAME_LABEL.is_match(subdomain) {
            errs.push(format!(
                "{}.subdomain {:?} must be a valid hostname label",
                svc_prefix, subdomain
            ));
        }
    }
}

/// A domain is valid when it ends with `.<tld>` and every label before the
/// suffix is a legal hostname label.
fn is_valid_domain(domain: &str, tld: &str) -> bool {
    let suffix = format!(".{}", tld);
    let Some(base) = domain.strip_suffix(&suffix) else {
        return false;
    };
    if base.is_empty() {
        return false;
    }
    base.split('.').all(|label| HOSTNAME_LABEL.is_match(label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn service(proxy: &str) -> Service {
        Service { proxy: proxy.to_string(), route: None, subdomain: None, websocket: false }
    }

    fn project(domain: &str) -> Project {
        Project {
            domain: domain.to_string(),
            path: "/tmp/project".to_string(),
            enabled: true,
            services: BTreeMap::from([("web".to_string(), service("http://localhost:3000"))]),
        }
    }

    fn valid_config() -> Config {
        Config {
            projects: BTreeMap::from([("acme".to_string(), project("acme.test"))]),
            ..Config::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate(&valid_config()).is_empty());
    }

    #[test]
    fn test_wrong_version_reported() {
        let cfg = Config { version: 2, ..valid_config() };
        let errs = validate(&cfg);
        assert!(errs.contains(&"version must be 1, got 2".to_string()), "{:?}", errs);
    }

    #[test]
    fn test_equal_ports_rejected() {
        let cfg = Config {
            settings: Settings { http_port: 8080, https_port: 8080, ..Settings::default() },
            ..valid_config()
        };
        let errs = validate(&cfg);
        assert!(
            errs.iter().any(|e| e.contains("must differ, both are 8080")),
            "{:?}",
            errs
        );
    }

    #[test]
    fn test_zero_port_rejected() {
        let cfg = Config {
            settings: Settings { http_port: 0, ..Settings::default() },
            ..valid_config()
        };
        let errs = validate(&cfg);
        assert!(errs.contains(&"settings.http_port must be 1-65535, got 0".to_string()));
    }

    #[test]
    fn test_bad_tld_and_log_level_rejected() {
        let cfg = Config {
            settings: Settings {
                tld: "example".to_string(),
                log_level: "loud".to_string(),
                ..Settings::default()
            },
            ..valid_config()
        };
        let errs = validate(&cfg);
        assert_eq!(errs.len(), 2, "{:?}", errs);
    }

    #[test]
    fn test_duplicate_domains_named_in_one_error() {
        let mut cfg = valid_config();
        cfg.projects.insert("clone".to_string(), project("acme.test"));
        let errs = validate(&cfg);
        assert!(
            errs.contains(&r#"duplicate domain "acme.test" in projects "acme" and "clone""#.to_string()),
            "{:?}",
            errs
        );
    }

    #[test]
    fn test_domain_must_end_with_tld() {
        let mut cfg = valid_config();
        cfg.projects.get_mut("acme").unwrap().domain = "acme.dev".to_string();
        let errs = validate(&cfg);
        assert!(errs.iter().any(|e| e.contains("must be a valid hostname ending with .test")));
    }

    #[test]
    fn test_leading_hyphen_label_rejected() {
        let mut cfg = valid_config();
        cfg.projects.get_mut("acme").unwrap().domain = "-bad.test".to_string();
        let errs = validate(&cfg);
        assert_eq!(errs.len(), 1, "{:?}", errs);
    }

    #[test]
    fn test_service_proxy_url_rules() {
        let mut cfg = valid_config();
        let proj = cfg.projects.get_mut("acme").unwrap();
        proj.services.insert("ftp".to_string(), service("ftp://localhost:21"));
        proj.services.insert("empty".to_string(), service(""));
        let errs = validate(&cfg);
        assert!(errs.iter().any(|e| e.contains("services.ftp.proxy")));
        assert!(errs.contains(&"projects.acme.services.empty.proxy is required".to_string()));
    }

    #[test]
    fn test_invalid_subdomain_rejected() {
        let mut cfg = valid_config();
        let proj = cfg.projects.get_mut("acme").unwrap();
        proj.services.insert(
            "ws".to_string(),
            Service {
                proxy: "http://localhost:6001".to_string(),
                route: None,
                subdomain: Some("-ws".to_string()),
                websocket: true,
            },
        );
        let errs = validate(&cfg);
        assert!(errs.iter().any(|e| e.contains("subdomain \"-ws\" must be a valid hostname label")));
    }

    #[test]
    fn test_all_errors_collected_in_one_pass() {
        let cfg = Config {
            version: 0,
            settings: Settings { tld: "nope".to_string(), ..Settings::default() },
            projects: BTreeMap::from([(
                "broken".to_string(),
                Project {
                    domain: String::new(),
                    path: String::new(),
                    enabled: true,
                    services: BTreeMap::new(),
                },
            )]),
        };
        let errs = validate(&cfg);
        assert!(errs.len() >= 5, "expected aggregate reporting, got {:?}", errs);
    }
}
