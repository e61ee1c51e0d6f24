//! Axum router, handlers and server lifecycle for the control API.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::{validate, Config, ConfigStore, Project};
use crate::errors::{Error, Result};
use crate::health::HealthMonitor;

use super::error::ApiError;
use super::log_hub::LogHub;
use super::DaemonControl;

/// Default loopback listen address of the control API.
pub const DEFAULT_API_ADDR: &str = "127.0.0.1:42824";

/// Maximum accepted request body (1 MiB).
const MAX_BODY_BYTES: usize = 1 << 20;

/// Budget for in-flight requests to finish during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared state behind every handler.
#[derive(Clone)]
pub struct ApiState {
    store: Arc<ConfigStore>,
    health: Arc<HealthMonitor>,
    daemon: Arc<dyn DaemonControl>,
    log_hub: LogHub,
    version: &'static str,
    started_at: Instant,
    /// Serialises config read-modify-write sequences so concurrent API
    /// writes cannot interleave between load and save.
    cfg_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ApiState {
    pub fn new(
        store: Arc<ConfigStore>,
        health: Arc<HealthMonitor>,
        daemon: Arc<dyn DaemonControl>,
        log_hub: LogHub,
        version: &'static str,
    ) -> Self {
        Self {
            store,
            health,
            daemon,
            log_hub,
            version,
            started_at: Instant::now(),
            cfg_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/projects", get(list_projects).post(add_project))
        .route("/api/projects/{name}", axum::routing::put(update_project).delete(delete_project))
        .route("/api/projects/{name}/toggle", patch(toggle_project))
        .route("/api/health", get(get_health))
        .route("/api/logs", get(stream_logs))
        .route("/api/config", get(get_config_yaml).put(put_config_yaml))
        .route("/api/restart", post(restart))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Running control API server.
pub struct ApiServer {
    local_addr: SocketAddr,
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Listen address configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self { addr: DEFAULT_API_ADDR.parse().expect("default api addr parses") }
    }
}

impl ApiServer {
    /// Bind the loopback listener and start serving in a background task.
    pub async fn start(cfg: ApiServerConfig, state: ApiState) -> Result<Self> {
        let listener = TcpListener::bind(cfg.addr)
            .await
            .map_err(|e| Error::transport(format!("binding api listener {}: {}", cfg.addr, e)))?;
        let local_addr = listener.local_addr()?;

        let router = build_router(state);
        let token = CancellationToken::new();
        let serve_token = token.clone();
        let task = tokio::spawn(async move {
            let shutdown = async move { serve_token.cancelled().await };
            if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(shutdown).await {
                error!(error = %e, "api server error");
            }
        });

        info!(addr = %local_addr, "api server started");
        Ok(Self { local_addr, token, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Graceful shutdown with a bounded grace period.
    pub async fn stop(self) {
        self.token.cancel();
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, self.task).await;
    }
}

fn load_current(state: &ApiState) -> std::result::Result<Config, ApiError> {
    state
        .store
        .load()
        .map_err(|e| ApiError::Internal(format!("failed to load config: {}", e)))
}

fn save(state: &ApiState, cfg: &Config) -> std::result::Result<(), ApiError> {
    state
        .store
        .save(cfg)
        .map_err(|e| ApiError::Internal(format!("failed to save config: {}", e)))
}

async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "pid": std::process::id(),
        "uptime": format!("{}s", state.started_at.elapsed().as_secs()),
        "version": state.version,
    }))
}

async fn list_projects(
    State(state): State<ApiState>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let cfg = load_current(&state)?;
    Ok(Json(cfg.projects))
}

#[derive(Debug, Deserialize)]
struct AddProjectRequest {
    name: String,
    project: Project,
}

async fn add_project(
    State(state): State<ApiState>,
    Json(req): Json<AddProjectRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    if req.name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }

    let _guard = state.cfg_lock.lock().await;
    let mut cfg = load_current(&state)?;
    if cfg.projects.contains_key(&req.name) {
        return Err(ApiError::Conflict(format!("project {:?} already exists", req.name)));
    }
    cfg.projects.insert(req.name, req.project.clone());

    let errs = validate(&cfg);
    if !errs.is_empty() {
        return Err(ApiError::ValidationFailed(errs));
    }
    save(&state, &cfg)?;
    Ok((StatusCode::CREATED, Json(req.project)))
}

async fn update_project(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(project): Json<Project>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let _guard = state.cfg_lock.lock().await;
    let mut cfg = load_current(&state)?;
    if !cfg.projects.contains_key(&name) {
        return Err(ApiError::NotFound(format!("project {:?} not found", name)));
    }
    cfg.projects.insert(name, project.clone());

    let errs = validate(&cfg);
    if !errs.is_empty() {
        return Err(ApiError::ValidationFailed(errs));
    }
    save(&state, &cfg)?;
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let _guard = state.cfg_lock.lock().await;
    let mut cfg = load_current(&state)?;
    if cfg.projects.remove(&name).is_none() {
        return Err(ApiError::NotFound(format!("project {:?} not found", name)));
    }
    save(&state, &cfg)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_project(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let _guard = state.cfg_lock.lock().await;
    let mut cfg = load_current(&state)?;
    let enabled = match cfg.projects.get_mut(&name) {
        Some(project) => {
            project.enabled = !project.enabled;
            project.enabled
        }
        None => return Err(ApiError::NotFound(format!("project {:?} not found", name))),
    };
    save(&state, &cfg)?;
    Ok(Json(serde_json::json!({ "enabled": enabled })))
}

#[derive(Debug, Serialize)]
struct ServiceHealthBody {
    project: String,
    service: String,
    status: String,
    addr: String,
    since: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_check: Option<String>,
}

async fn get_health(State(state): State<ApiState>) -> impl IntoResponse {
    let entries: Vec<ServiceHealthBody> = state
        .health
        .statuses()
        .into_iter()
        .map(|(key, status)| ServiceHealthBody {
            project: key.project,
            service: key.service,
            status: status.state.to_string(),
            addr: status.addr,
            since: status.since.to_rfc3339(),
            last_check: status.last_check.map(|t| t.to_rfc3339()),
        })
        .collect();
    Json(entries)
}

async fn stream_logs(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.log_hub.subscribe())
        .filter_map(|line| line.ok().map(|l| Ok(Event::default().data(l))));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn get_config_yaml(
    State(state): State<ApiState>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let data = std::fs::read_to_string(state.store.paths().config_file())
        .map_err(|e| ApiError::Internal(format!("failed to read config: {}", e)))?;
    Ok(([(header::CONTENT_TYPE, "application/yaml")], data))
}

async fn put_config_yaml(
    State(state): State<ApiState>,
    body: String,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let cfg: Config = serde_yaml::from_str(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid YAML: {}", e)))?;

    let errs = validate(&cfg);
    if !errs.is_empty() {
        return Err(ApiError::ValidationFailed(errs));
    }

    let _guard = state.cfg_lock.lock().await;
    save(&state, &cfg)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn restart(State(state): State<ApiState>) -> std::result::Result<impl IntoResponse, ApiError> {
    state
        .daemon
        .reload_config()
        .await
        .map_err(|e| ApiError::Internal(format!("failed to reload config: {}", e)))?;
    Ok(Json(serde_json::json!({ "status": "reloaded" })))
}
