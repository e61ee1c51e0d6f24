//! `hatchd` — the Hatch daemon binary.
//!
//! Runs the supervisor until SIGINT/SIGTERM, logging to the rotated file
//! under the Hatch root. The CLI (`hatch up` / `down` / `add` / `link`)
//! is a separate thin client that edits the config file and manages the
//! OS service entry; this binary is what that service entry launches.

use std::path::PathBuf;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use hatch::api::LogHub;
use hatch::config::{ConfigStore, Paths};
use hatch::daemon::Supervisor;
use hatch::observability::{init_logging, LoggingConfig};
use hatch::VERSION;

#[derive(Parser, Debug)]
#[command(name = "hatchd", version, about = "Hatch daemon: local HTTPS for development projects")]
struct Args {
    /// Hatch root directory (defaults to $HATCH_HOME, then ~/.hatch)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Log to stderr instead of the rotated log file
    #[arg(long)]
    log_stderr: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let paths = match args.home {
        Some(dir) => Paths::at(dir),
        None => Paths::from_env(),
    };

    // The configured log level applies from the first line; an unreadable
    // config falls back to info and fails properly during startup.
    let level = ConfigStore::new(paths.clone())
        .load_raw()
        .map(|cfg| cfg.settings.log_level)
        .unwrap_or_else(|_| "info".to_string());

    let log_hub = LogHub::new();
    let log_dir = if args.log_stderr { None } else { Some(paths.logs_dir()) };
    let _log_guard = match init_logging(&LoggingConfig { level, dir: log_dir }, &log_hub) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("hatchd: {}", e);
            std::process::exit(1);
        }
    };

    info!(version = VERSION, root = %paths.root().display(), "hatchd starting");

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        signal_token.cancel();
    });

    let supervisor = Supervisor::new(paths, VERSION, log_hub);
    if let Err(e) = supervisor.run(token).await {
        error!(error = %e, "daemon failed");
        eprintln!("hatchd: {}", e);
        std::process::exit(1);
    }
}
