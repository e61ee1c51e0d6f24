//! Translation from Hatch configuration to the proxy engine's JSON config.
//!
//! `translate` is a pure function of the configuration and the CA material:
//! equal inputs produce byte-equal serialized documents. A golden-file test
//! pins the exact bytes, so field names and struct field order here are
//! part of the daemon's external contract — change them only together with
//! the fixture.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::certs::{CaMaterial, CA_COMMON_NAME};
use crate::config::{Config, Service};

use super::DEFAULT_ADMIN_ADDR;

/// The full engine configuration document pushed to the admin `/load`
/// endpoint. Loading replaces the previous document wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTable {
    pub admin: AdminBlock,
    pub apps: Apps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminBlock {
    pub listen: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Apps {
    pub http: HttpApp,
    pub tls: TlsApp,
    pub pki: PkiApp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpApp {
    pub servers: Servers,
}

/// The two listeners: plaintext redirect and TLS termination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Servers {
    pub hatch_http: RedirectServer,
    pub hatch_https: HttpsServer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectServer {
    pub listen: Vec<String>,
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpsServer {
    pub listen: Vec<String>,
    pub routes: Vec<Route>,
    pub tls_connection_policies: Vec<TlsConnectionPolicy>,
    pub automatic_https: AutomaticHttps,
}

/// Empty policy object: accept TLS with the engine defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsConnectionPolicy {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomaticHttps {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(rename = "match")]
    pub matchers: Vec<Matcher>,
    pub handle: Vec<Handler>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub terminal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matcher {
    pub host: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "handler")]
pub enum Handler {
    #[serde(rename = "reverse_proxy")]
    ReverseProxy {
        upstreams: Vec<Upstream>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flush_interval: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<UpgradeHeaders>,
    },
    #[serde(rename = "static_response")]
    StaticResponse {
        status_code: String,
        headers: RedirectHeaders,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    pub dial: String,
}

/// Copies the hop-by-hop upgrade headers through to the upstream so
/// websocket handshakes survive the proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeHeaders {
    pub request: HeaderRewrite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderRewrite {
    pub set: UpgradeHeaderSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeHeaderSet {
    #[serde(rename = "Connection")]
    pub connection: Vec<String>,
    #[serde(rename = "Upgrade")]
    pub upgrade: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectHeaders {
    #[serde(rename = "Location")]
    pub location: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsApp {
    pub automation: TlsAutomation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsAutomation {
    pub policies: Vec<TlsPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsPolicy {
    pub subjects: Vec<String>,
    pub issuers: Vec<TlsIssuer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsIssuer {
    pub module: String,
    pub ca: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PkiApp {
    pub certificate_authorities: CertificateAuthorities,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateAuthorities {
    pub hatch: CertificateAuthority,
}

/// The engine's internal issuer signs leaves with this material, so served
/// certificates chain up to the locally trusted root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateAuthority {
    pub name: String,
    pub root_certificate: String,
    pub root_private_key: String,
    pub intermediate_certificate: String,
    pub intermediate_private_key: String,
}

/// Convert a Hatch config and the local CA material into the engine
/// document. Disabled projects contribute nothing.
pub fn translate(cfg: &Config, pki: &CaMaterial) -> RouteTable {
    let domains = collect_domains(cfg);

    RouteTable {
        admin: AdminBlock { listen: DEFAULT_ADMIN_ADDR.to_string() },
        apps: Apps {
            http: HttpApp {
                servers: Servers {
                    hatch_http: RedirectServer {
                        listen: vec![format!(":{}", cfg.settings.http_port)],
                        routes: redirect_routes(&domains),
                    },
                    hatch_https: HttpsServer {
                        listen: vec![format!(":{}", cfg.settings.https_port)],
                        routes: https_routes(cfg),
                        tls_connection_policies: vec![TlsConnectionPolicy {}],
                        automatic_https: AutomaticHttps {},
                    },
                },
            },
            tls: TlsApp {
                automation: TlsAutomation {
                    policies: if domains.is_empty() {
                        Vec::new()
                    } else {
                        vec![TlsPolicy {
                            subjects: domains.clone(),
                            issuers: vec![TlsIssuer {
                                module: "internal".to_string(),
                                ca: "hatch".to_string(),
                            }],
                        }]
                    },
                },
            },
            pki: PkiApp {
                certificate_authorities: CertificateAuthorities {
                    hatch: CertificateAuthority {
                        name: CA_COMMON_NAME.to_string(),
                        root_certificate: pki.root_cert.clone(),
                        root_private_key: pki.root_key.clone(),
                        intermediate_certificate: pki.intermediate_cert.clone(),
                        intermediate_private_key: pki.intermediate_key.clone(),
                    },
                },
            },
        },
    }
}

/// One route candidate, carrying the keys the deterministic ordering
/// compares on.
struct RouteSpec<'a> {
    host: String,
    service: &'a Service,
}

impl RouteSpec<'_> {
    /// 0 = subdomain, 1 = path, 2 = catch-all. Lower tiers match first.
    fn tier(&self) -> u8 {
        if self.service.subdomain.is_some() {
            return 0;
        }
        if self.service.route.is_some() {
            return 1;
        }
        2
    }

    fn route(&self) -> &str {
        self.service.route.as_deref().unwrap_or_default()
    }
}

/// HTTPS routes for all enabled projects, most specific first: subdomain
/// routes, then path routes (longer paths first, then lexicographic), then
/// catch-alls, with the effective host as the final tiebreaker.
fn https_routes(cfg: &Config) -> Vec<Route> {
    let mut specs: Vec<RouteSpec> = Vec::new();
    for project in cfg.projects.values() {
        if !project.enabled {
            continue;
        }
        for service in project.services.values() {
            specs.push(RouteSpec { host: service.effective_host(&project.domain), service });
        }
    }

    specs.sort_by(|a, b| {
        (a.tier(), Reverse(a.route().len()), a.route(), a.host.as_str())
            .cmp(&(b.tier(), Reverse(b.route().len()), b.route(), b.host.as_str()))
    });

    specs.into_iter().map(|spec| service_route(spec.host, spec.service)).collect()
}

fn service_route(host: String, service: &Service) -> Route {
    let headers = service.websocket.then(|| UpgradeHeaders {
        request: HeaderRewrite {
            set: UpgradeHeaderSet {
                connection: vec!["{http.request.header.Connection}".to_string()],
                upgrade: vec!["{http.request.header.Upgrade}".to_string()],
            },
        },
    });

    Route {
        matchers: vec![Matcher {
            host: vec![host],
            path: service.route.as_ref().map(|r| vec![r.clone()]),
        }],
        handle: vec![Handler::ReverseProxy {
            upstreams: vec![Upstream { dial: service.dial_address() }],
            flush_interval: service.websocket.then_some(-1),
            headers,
        }],
        terminal: true,
    }
}

/// The single plaintext route answering every project domain with a 302 to
/// the HTTPS origin.
fn redirect_routes(domains: &[String]) -> Vec<Route> {
    if domains.is_empty() {
        return Vec::new();
    }
    vec![Route {
        matchers: vec![Matcher { host: domains.to_vec(), path: None }],
        handle: vec![Handler::StaticResponse {
            status_code: "302".to_string(),
            headers: RedirectHeaders {
                location: vec!["https://{http.request.host}{http.request.uri}".to_string()],
            },
        }],
        terminal: false,
    }]
}

/// All unique domains across enabled projects, sorted; `*.domain` is added
/// only for projects with at least one subdomain service.
fn collect_domains(cfg: &Config) -> Vec<String> {
    let mut set = BTreeSet::new();
    for project in cfg.projects.values() {
        if !project.enabled {
            continue;
        }
        set.insert(project.domain.clone());
        if project.services.values().any(|s| s.subdomain.is_some()) {
            set.insert(format!("*.{}", project.domain));
        }
    }
    set.into_iter().collect()
}
