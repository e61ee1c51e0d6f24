//! Periodic TCP dialer behind the health API.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::errors::{Error, Result};

use super::{HealthState, ServiceKey, ServiceStatus, DEFAULT_INTERVAL, DEFAULT_TIMEOUT};

/// Fired on every state transition with `(key, from, to)`.
pub type OnChange = dyn Fn(&ServiceKey, HealthState, HealthState) + Send + Sync;

/// Tuning and hooks for a [`HealthMonitor`].
pub struct MonitorConfig {
    pub interval: std::time::Duration,
    pub timeout: std::time::Duration,
    pub on_change: Option<Box<OnChange>>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { interval: DEFAULT_INTERVAL, timeout: DEFAULT_TIMEOUT, on_change: None }
    }
}

#[derive(Default)]
struct Shared {
    targets: BTreeMap<ServiceKey, String>,
    statuses: BTreeMap<ServiceKey, ServiceStatus>,
}

/// Tracks per-service TCP reachability on a fixed interval.
///
/// The mutex around the status map is held only for map reads and writes,
/// never across a dial: each sweep snapshots the targets first, releases
/// the lock, dials, then writes results back. A result for a key that was
/// removed while dialing is discarded.
pub struct HealthMonitor {
    cfg: MonitorConfig,
    shared: Mutex<Shared>,
    runtime: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl HealthMonitor {
    pub fn new(cfg: MonitorConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            shared: Mutex::new(Shared::default()),
            runtime: Mutex::new(None),
        })
    }

    /// Extract dial targets from the config, run one immediate sweep, then
    /// re-check on every interval tick. Errors if already started.
    pub fn start(self: &Arc<Self>, cfg: &Config) -> Result<()> {
        {
            let mut runtime = self.runtime.lock().expect("health runtime lock poisoned");
            if runtime.is_some() {
                return Err(Error::internal("health monitor already running"));
            }

            self.apply_config(cfg);

            let token = CancellationToken::new();
            let monitor = Arc::clone(self);
            let loop_token = token.clone();
            let task = tokio::spawn(async move {
                monitor.sweep().await;
                let mut ticker = tokio::time::interval(monitor.cfg.interval);
                ticker.tick().await; // consume the immediate first tick
                loop {
                    tokio::select! {
                        _ = loop_token.cancelled() => return,
                        _ = ticker.tick() => monitor.sweep().await,
                    }
                }
            });
            *runtime = Some((token, task));
        }
        Ok(())
    }

    /// Stop the sweep loop; at most one in-flight dial timeout is awaited.
    /// No-op when not running.
    pub async fn stop(&self) {
        let handle = {
            let mut runtime = self.runtime.lock().expect("health runtime lock poisoned");
            runtime.take()
        };
        if let Some((token, task)) = handle {
            token.cancel();
            let _ = task.await;
        }
    }

    /// Diff the target set against a new config: statuses for vanished
    /// services are dropped, new services start `unknown`, and addresses
    /// are updated in place so `since` stays meaningful across reloads.
    pub fn update_config(&self, cfg: &Config) {
        self.apply_config(cfg);
    }

    /// Snapshot of all service statuses, safe to read without a lock.
    pub fn statuses(&self) -> BTreeMap<ServiceKey, ServiceStatus> {
        self.shared.lock().expect("health state lock poisoned").statuses.clone()
    }

    /// Current status for one service.
    pub fn status(&self, key: &ServiceKey) -> Option<ServiceStatus> {
        self.shared.lock().expect("health state lock poisoned").statuses.get(key).cloned()
    }

    fn apply_config(&self, cfg: &Config) {
        let mut new_targets = BTreeMap::new();
        for (project_name, project) in &cfg.projects {
            if !project.enabled {
                continue;
            }
            for (service_name, service) in &project.services {
                let key = ServiceKey::new(project_name.clone(), service_name.clone());
                new_targets.insert(key, service.dial_address());
            }
        }

        let mut shared = self.shared.lock().expect("health state lock poisoned");
        shared.statuses.retain(|key, _| new_targets.contains_key(key));

        let now = Utc::now();
        for (key, addr) in &new_targets {
            match shared.statuses.get_mut(key) {
                Some(status) => status.addr = addr.clone(),
                None => {
                    shared.statuses.insert(
                        key.clone(),
                        ServiceStatus {
                            state: HealthState::Unknown,
                            addr: addr.clone(),
                            since: now,
                            last_check: None,
                        },
                    );
                }
            }
        }

        shared.targets = new_targets;
    }

    async fn sweep(&self) {
        let snapshot: Vec<(ServiceKey, String)> = {
            let shared = self.shared.lock().expect("health state lock poisoned");
            shared.targets.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        for (key, addr) in snapshot {
            self.check_one(key, addr).await;
        }
    }

    async fn check_one(&self, key: ServiceKey, addr: String) {
        let dialed = tokio::time::timeout(self.cfg.timeout, TcpStream::connect(&addr)).await;
        let new_state = match dialed {
            Ok(Ok(_stream)) => HealthState::Healthy,
            _ => HealthState::Unhealthy,
        };

        let now = Utc::now();
        let transition = {
            let mut shared = self.shared.lock().expect("health state lock poisoned");
            let Some(status) = shared.statuses.get_mut(&key) else {
                return; // service removed while checking
            };

            let old_state = status.state;
            status.last_check = Some(now);
            if old_state != new_state {
                status.state = new_state;
                status.since = now;
                Some(old_state)
            } else {
                None
            }
        };

        if let Some(old_state) = transition {
            info!(
                project = %key.project,
                service = %key.service,
                addr = %addr,
                from = %old_state,
                to = %new_state,
                "service health changed"
            );
            if let Some(on_change) = &self.cfg.on_change {
                on_change(&key, old_state, new_state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::config::{Project, Service};

    fn config_with_service(name: &str, proxy: &str) -> Config {
        let mut cfg = Config::default();
        cfg.projects.insert(
            "acme".to_string(),
            Project {
                domain: "acme.test".to_string(),
                path: "/p".to_string(),
                enabled: true,
                services: BTreeMap::from([(
                    name.to_string(),
                    Service { proxy: proxy.to_string(), route: None, subdomain: None, websocket: false },
                )]),
            },
        );
        cfg
    }

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_millis(50),
            timeout: Duration::from_millis(250),
            on_change: None,
        }
    }

    async fn wait_for_state(
        monitor: &Arc<HealthMonitor>,
        key: &ServiceKey,
        state: HealthState,
    ) -> ServiceStatus {
        for _ in 0..100 {
            if let Some(status) = monitor.status(key) {
                if status.state == state {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("service never became {}", state);
    }

    #[tokio::test]
    async fn test_reachable_service_becomes_healthy() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let monitor = HealthMonitor::new(fast_config());
        monitor.start(&config_with_service("web", &format!("http://{}", addr))).unwrap();

        let key = ServiceKey::new("acme", "web");
        let status = wait_for_state(&monitor, &key, HealthState::Healthy).await;
        assert_eq!(status.addr, addr.to_string());
        assert!(status.last_check.is_some());
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_service_becomes_unhealthy() {
        // Bind-then-drop guarantees a free port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let monitor = HealthMonitor::new(fast_config());
        monitor.start(&config_with_service("web", &format!("http://{}", addr))).unwrap();

        let key = ServiceKey::new("acme", "web");
        wait_for_state(&monitor, &key, HealthState::Unhealthy).await;
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_transition_fires_on_change_callback() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, rx) = mpsc::channel();
        let monitor = HealthMonitor::new(MonitorConfig {
            on_change: Some(Box::new(move |key, from, to| {
                let _ = tx.send((key.clone(), from, to));
            })),
            ..fast_config()
        });
        monitor.start(&config_with_service("web", &format!("http://{}", addr))).unwrap();

        let (key, from, to) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(key, ServiceKey::new("acme", "web"));
        assert_eq!(from, HealthState::Unknown);
        assert_eq!(to, HealthState::Unhealthy);
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_since_only_moves_on_transition() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let monitor = HealthMonitor::new(fast_config());
        monitor.start(&config_with_service("web", &format!("http://{}", addr))).unwrap();

        let key = ServiceKey::new("acme", "web");
        let first = wait_for_state(&monitor, &key, HealthState::Unhealthy).await;

        // Let several more sweeps run; state is stable so `since` must not move.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let later = monitor.status(&key).unwrap();
        assert_eq!(later.since, first.since);
        assert!(later.last_check.unwrap() > first.last_check.unwrap());
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_update_config_diffs_targets() {
        let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = closed.local_addr().unwrap();
        drop(closed);

        // Long interval: only the immediate sweep runs during the test,
        // so `since` cannot move while we compare it.
        let monitor = HealthMonitor::new(MonitorConfig {
            interval: Duration::from_secs(600),
            timeout: Duration::from_millis(250),
            on_change: None,
        });
        monitor.start(&config_with_service("web", &format!("http://{}", addr))).unwrap();

        let old_key = ServiceKey::new("acme", "web");
        let old_since = wait_for_state(&monitor, &old_key, HealthState::Unhealthy).await.since;

        // Same key with a new address keeps its status entry in place.
        monitor.update_config(&config_with_service("web", "http://localhost:39992"));
        let updated = monitor.status(&old_key).unwrap();
        assert_eq!(updated.addr, "localhost:39992");
        assert_eq!(updated.since, old_since);

        // A different service replaces the old key entirely.
        monitor.update_config(&config_with_service("api", "http://localhost:39993"));
        assert!(monitor.status(&old_key).is_none());
        let new_status = monitor.status(&ServiceKey::new("acme", "api")).unwrap();
        assert_eq!(new_status.state, HealthState::Unknown);
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_disabled_projects_are_not_tracked() {
        let mut cfg = config_with_service("web", "http://localhost:39990");
        cfg.projects.get_mut("acme").unwrap().enabled = false;

        let monitor = HealthMonitor::new(fast_config());
        monitor.start(&cfg).unwrap();
        assert!(monitor.statuses().is_empty());
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_double_start_rejected_and_stop_idempotent() {
        let monitor = HealthMonitor::new(fast_config());
        monitor.start(&Config::default()).unwrap();
        assert!(monitor.start(&Config::default()).is_err());
        monitor.stop().await;
        monitor.stop().await;
    }
}
