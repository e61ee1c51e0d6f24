//! The supervisor: owns every component, in order.
//!
//! Startup: PID lock, config load, port preflight, CA material, DNS,
//! proxy PKI cache clear, proxy engine, route load, health monitor,
//! control API, config watcher. Any failure tears down what already
//! started, in reverse. Shutdown runs the same reverse order; teardown
//! errors are logged and never block the remaining components.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{ApiServer, ApiServerConfig, ApiState, DaemonControl, LogHub, DEFAULT_API_ADDR};
use crate::certs::{self, CaMaterial, CaPaths};
use crate::config::{Config, ConfigStore, ConfigWatcher, Paths};
use crate::dns::{DnsServer, ServerConfig as DnsConfig};
use crate::errors::{Error, Result};
use crate::health::{HealthMonitor, MonitorConfig};
use crate::proxy::{clear_pki_cache, translate, EngineConfig, ProxyServer};

use super::pid::PidFile;
use super::port::check_port;

/// Orchestrates the daemon's components for the process lifetime.
pub struct Supervisor {
    paths: Paths,
    version: &'static str,
    log_hub: LogHub,
    /// Proxy engine settings; overridable for tests.
    pub engine: EngineConfig,
    /// Control API listen address; overridable for tests.
    pub api_addr: SocketAddr,
    /// DNS listener settings (TLD comes from the loaded config).
    pub dns: DnsConfig,
}

impl Supervisor {
    pub fn new(paths: Paths, version: &'static str, log_hub: LogHub) -> Self {
        Self {
            paths,
            version,
            log_hub,
            engine: EngineConfig::default(),
            api_addr: DEFAULT_API_ADDR.parse().expect("default api addr parses"),
            dns: DnsConfig::default(),
        }
    }

    /// Start everything, block until `token` is cancelled, then shut down.
    /// Startup failures return an error after tearing down whatever had
    /// already started; the PID lock is always released.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let pid_file = PidFile::acquire(&self.paths)
            .map_err(|e| Error::config(format!("write pid: {}", e)))?;
        info!(pid = std::process::id(), "pid file written");

        let result = self.run_components(&token).await;
        if let Err(e) = pid_file.release() {
            warn!(error = %e, "pid file removal failed");
        } else {
            info!("pid file removed");
        }
        result
    }

    async fn run_components(&self, token: &CancellationToken) -> Result<()> {
        let store = Arc::new(ConfigStore::new(self.paths.clone()));
        let cfg = store
            .load()
            .map_err(|e| Error::config(format!("load config: {}", e)))?;

        // Pre-flight: both proxy ports must be free.
        for port in [cfg.settings.http_port, cfg.settings.https_port] {
            match check_port(port) {
                Ok(Some(info)) => {
                    return Err(Error::config(format!(
                        "port conflict: port :{} in use by {}",
                        port, info
                    )));
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, port, "could not check port availability"),
            }
        }

        // CA material must exist; generation is the CLI's job.
        let ca_paths = CaPaths::new(&self.paths.certs_dir());
        if !certs::root_exists(&ca_paths) {
            return Err(Error::certs(format!(
                "CA files not found at {} — run 'hatch up' to generate",
                self.paths.certs_dir().display()
            )));
        }
        if !certs::intermediate_exists(&ca_paths) {
            return Err(Error::certs(format!(
                "intermediate CA files not found at {} — run 'hatch up' to generate",
                self.paths.certs_dir().display()
            )));
        }
        let pki = certs::load(&ca_paths)?;

        let mut running = Running::default();

        // DNS
        let dns_cfg = DnsConfig { tld: cfg.settings.tld.clone(), ..self.dns.clone() };
        match DnsServer::start(dns_cfg).await {
            Ok(server) => {
                info!(tld = %cfg.settings.tld, addr = %server.local_addr(), "dns server started");
                running.dns = Some(server);
            }
            Err(e) => return Err(Error::transport(format!("start dns: {}", e))),
        }

        // Drop cached PKI state so the engine picks up our intermediate.
        if let Err(e) = clear_pki_cache(&self.engine.data_dir) {
            warn!(error = %e, "failed to clear proxy PKI cache");
        }

        // Proxy engine
        let proxy = Arc::new(ProxyServer::new(self.engine.clone()));
        if let Err(e) = proxy.start().await {
            running.shutdown().await;
            return Err(Error::transport(format!("start proxy: {}", e)));
        }
        running.proxy = Some(Arc::clone(&proxy));

        let table = translate(&cfg, &pki);
        if let Err(e) = proxy.load_routes(&table).await {
            running.shutdown().await;
            return Err(Error::transport(format!("load proxy config: {}", e)));
        }
        info!("proxy config loaded");

        // Health monitor
        let health = HealthMonitor::new(MonitorConfig::default());
        if let Err(e) = health.start(&cfg) {
            running.shutdown().await;
            return Err(Error::internal(format!("start health monitor: {}", e)));
        }
        running.health = Some(Arc::clone(&health));
        info!("health monitor started");

        // Control API
        let reload = Arc::new(ReloadHandle {
            store: Arc::clone(&store),
            proxy: Arc::clone(&proxy),
            health: Arc::clone(&health),
            pki,
        });
        let state = ApiState::new(
            Arc::clone(&store),
            Arc::clone(&health),
            reload.clone() as Arc<dyn DaemonControl>,
            self.log_hub.clone(),
            self.version,
        );
        match ApiServer::start(ApiServerConfig { addr: self.api_addr }, state).await {
            Ok(server) => running.api = Some(server),
            Err(e) => {
                running.shutdown().await;
                return Err(Error::transport(format!("start api server: {}", e)));
            }
        }

        // Config watcher feeds the same reload path the API uses.
        let watcher_reload = Arc::clone(&reload);
        match ConfigWatcher::spawn(Arc::clone(&store), move |cfg| {
            let reload = Arc::clone(&watcher_reload);
            tokio::spawn(async move {
                reload.apply(&cfg).await;
            });
        }) {
            Ok(watcher) => running.watcher = Some(watcher),
            Err(e) => {
                running.shutdown().await;
                return Err(Error::config(format!("start config watcher: {}", e)));
            }
        }
        info!("config watcher started");

        info!("daemon running");
        token.cancelled().await;
        info!("shutdown signal received");

        running.shutdown().await;
        info!("daemon stopped");
        Ok(())
    }
}

/// Components that have been started, shut down in reverse start order.
#[derive(Default)]
struct Running {
    api: Option<ApiServer>,
    watcher: Option<ConfigWatcher>,
    health: Option<Arc<HealthMonitor>>,
    proxy: Option<Arc<ProxyServer>>,
    dns: Option<DnsServer>,
}

impl Running {
    async fn shutdown(&mut self) {
        if let Some(api) = self.api.take() {
            api.stop().await;
            info!("api server stopped");
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.stop().await;
            info!("config watcher stopped");
        }
        if let Some(health) = self.health.take() {
            health.stop().await;
            info!("health monitor stopped");
        }
        if let Some(proxy) = self.proxy.take() {
            if let Err(e) = proxy.stop().await {
                warn!(error = %e, "proxy engine stop failed");
            }
        }
        if let Some(dns) = self.dns.take() {
            dns.stop().await;
            info!("dns server stopped");
        }
    }
}

/// Shared reload path: translate the config, push it to the proxy, then
/// update the health targets. A proxy rejection leaves the previous
/// configuration serving.
struct ReloadHandle {
    store: Arc<ConfigStore>,
    proxy: Arc<ProxyServer>,
    health: Arc<HealthMonitor>,
    pki: CaMaterial,
}

impl ReloadHandle {
    async fn apply(&self, cfg: &Config) {
        let table = translate(cfg, &self.pki);
        if let Err(e) = self.proxy.load_routes(&table).await {
            error!(error = %e, "failed to reload proxy config");
            return;
        }
        self.health.update_config(cfg);
        info!("config reloaded successfully");
    }
}

#[async_trait]
impl DaemonControl for ReloadHandle {
    async fn reload_config(&self) -> Result<()> {
        let cfg = self.store.load()?;
        self.apply(&cfg).await;
        Ok(())
    }
}
