//! Proxy engine process lifecycle.
//!
//! The engine runs as a child process started with an admin-only bootstrap
//! configuration; all real configuration arrives later through `/load`.
//! Its stderr is drained into the daemon's structured log.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{Error, Result};

use super::client::AdminClient;
use super::translate::RouteTable;
use super::{default_data_dir, DEFAULT_ADMIN_ADDR};

const READY_ATTEMPTS: u32 = 50;
const READY_POLL: Duration = Duration::from_millis(100);
const STOP_GRACE: Duration = Duration::from_secs(5);

/// How to run the embedded proxy engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Admin API address the engine binds.
    pub admin_addr: String,
    /// Engine binary on `$PATH` (or an absolute path).
    pub binary: String,
    /// Engine data directory holding cached PKI state.
    pub data_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            admin_addr: DEFAULT_ADMIN_ADDR.to_string(),
            binary: "caddy".to_string(),
            data_dir: default_data_dir(),
        }
    }
}

/// Manages one engine child process and its admin client.
pub struct ProxyServer {
    cfg: EngineConfig,
    client: AdminClient,
    child: Mutex<Option<Child>>,
}

impl ProxyServer {
    pub fn new(cfg: EngineConfig) -> Self {
        let client = AdminClient::new(cfg.admin_addr.clone());
        Self { cfg, client, child: Mutex::new(None) }
    }

    pub fn client(&self) -> &AdminClient {
        &self.client
    }

    /// Spawn the engine with an admin-only config and wait for the admin
    /// API to come up. Fails if the engine is already running, the binary
    /// cannot be spawned, or readiness never arrives.
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.child.lock().await;
        if slot.is_some() {
            return Err(Error::internal("proxy engine already running"));
        }

        let mut child = Command::new(&self.cfg.binary)
            .args(["run", "--config", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::transport(format!("spawning {}: {}", self.cfg.binary, e)))?;

        let bootstrap = serde_json::json!({ "admin": { "listen": self.cfg.admin_addr } });
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(bootstrap.to_string().as_bytes())
                .await
                .map_err(|e| Error::transport(format!("writing engine bootstrap config: {}", e)))?;
            // Closing stdin tells the engine the config document is complete.
            drop(stdin);
        }

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "hatch::proxy_engine", "{}", line);
                }
            });
        }

        for _ in 0..READY_ATTEMPTS {
            if self.client.ready().await {
                info!(admin_addr = %self.cfg.admin_addr, "proxy engine started");
                *slot = Some(child);
                return Ok(());
            }
            if let Ok(Some(status)) = child.try_wait() {
                return Err(Error::transport(format!(
                    "proxy engine exited during startup with {}",
                    status
                )));
            }
            tokio::time::sleep(READY_POLL).await;
        }

        let _ = child.kill().await;
        Err(Error::transport("proxy engine admin API not ready after polling"))
    }

    /// Replace the engine's configuration with a freshly translated table.
    pub async fn load_routes(&self, table: &RouteTable) -> Result<()> {
        self.client.load_routes(table).await
    }

    /// Gracefully stop the engine; escalates to kill after the grace
    /// period. No-op when not running.
    pub async fn stop(&self) -> Result<()> {
        let mut slot = self.child.lock().await;
        let Some(mut child) = slot.take() else {
            return Ok(());
        };

        if let Err(e) = self.client.stop_engine().await {
            debug!(error = %e, "graceful engine stop request failed");
        }

        match tokio::time::timeout(STOP_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                info!(%status, "proxy engine stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::transport(format!("waiting for proxy engine: {}", e))),
            Err(_) => {
                warn!("proxy engine did not exit in time, killing");
                child
                    .kill()
                    .await
                    .map_err(|e| Error::transport(format!("killing proxy engine: {}", e)))?;
                Ok(())
            }
        }
    }
}

/// Remove the engine's cached PKI authorities and issued leaf certificates
/// so newly supplied intermediate material takes effect on the next start.
pub fn clear_pki_cache(data_dir: &Path) -> Result<()> {
    for subtree in ["pki", "certificates"] {
        let path = data_dir.join(subtree);
        match std::fs::remove_dir_all(&path) {
            Ok(()) => debug!(path = %path.display(), "cleared proxy cache subtree"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Io(e));
            }
        }
    }
    Ok(())
}
