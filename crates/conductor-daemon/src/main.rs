//! `Conductor` Daemon
//!
//! Runs the process orchestrator and serves the JSON-RPC control protocol
//! over stdin/stdout. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::BufReader;
use tracing::{info, warn};

use conductor_core::config::{ConfigUpdate, load_config};
use conductor_core::workflow::merge_templates;
use conductor_daemon::orchestration::Orchestrator;
use conductor_daemon::server::ControlServer;
use conductor_daemon::storage::Database;
use conductor_daemon::subprocess::ProcessLauncher;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "conductor-daemon")]
#[command(version, about = "Conductor daemon - concurrency-bounded agent process orchestrator")]
struct Args {
    /// Project directory; `.conductor/settings.json` inside it is loaded
    #[arg(long, env = "CONDUCTOR_PROJECT_DIR")]
    project_dir: Option<PathBuf>,

    /// Maximum concurrent worker processes
    #[arg(long)]
    max_processes: Option<usize>,

    /// Path to the worker executable
    #[arg(long)]
    worker_path: Option<PathBuf>,

    /// Worker argument; `{prompt}`, `{task}` and `{role}` are substituted.
    /// Repeat for several arguments.
    #[arg(long = "worker-arg", allow_hyphen_values = true)]
    worker_args: Vec<String>,

    /// Ceiling on running time per process, in milliseconds
    #[arg(long)]
    process_timeout_ms: Option<u64>,

    /// Ceiling on time spent waiting for input, in milliseconds
    #[arg(long)]
    interaction_timeout_ms: Option<u64>,

    /// History database file path
    #[arg(long, env = "CONDUCTOR_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Do not archive finished processes
    #[arg(long)]
    no_history: bool,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "CONDUCTOR_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn config_overrides(&self) -> ConfigUpdate {
        ConfigUpdate {
            max_concurrent_processes: self.max_processes,
            process_timeout_ms: self.process_timeout_ms,
            interaction_timeout_ms: self.interaction_timeout_ms,
            worker_executable_path: self.worker_path.clone(),
            worker_args: (!self.worker_args.is_empty()).then(|| self.worker_args.clone()),
            ..Default::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run(args));
    // A pending stdin read would otherwise hold up runtime shutdown.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.project_dir.as_deref())?;
    config.orchestrator.apply(args.config_overrides());

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.daemon.log_level.clone());
    conductor_core::tracing_init::init_tracing(
        &format!("conductor_daemon={log_level},conductor_core={log_level}"),
        args.log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        max_processes = config.orchestrator.max_concurrent_processes,
        worker = ?config.orchestrator.worker_executable_path,
        "Starting conductor-daemon"
    );
    if config.orchestrator.worker_executable_path.is_none() {
        warn!("No worker executable configured; launches will fail until one is set");
    }

    let history = if args.no_history {
        None
    } else {
        let path = match args.db_path.clone().or_else(|| config.daemon.database_path.clone()) {
            Some(path) => path,
            None => default_db_path()?,
        };
        info!(path = %path.display(), "Opening history database");
        match Database::open(&path).await {
            Ok(db) => Some(db),
            Err(e) => {
                warn!(error = %e, "History archive unavailable, continuing without it");
                None
            }
        }
    };

    let launcher = Arc::new(ProcessLauncher::new());
    let orchestrator = match history.clone() {
        Some(db) => Orchestrator::with_history(config.orchestrator.clone(), launcher, db),
        None => Orchestrator::new(config.orchestrator.clone(), launcher),
    };
    orchestrator.start().await;

    let server = ControlServer::new(orchestrator.clone(), merge_templates(&config.workflows));

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // Notify systemd that the daemon is ready (unix only). The `true`
    // parameter unsets $NOTIFY_SOCKET so workers don't inherit it.
    #[cfg(unix)]
    if let Err(e) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %e, "Failed to notify systemd");
    }

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    info!("Control server ready on stdin/stdout");

    tokio::select! {
        result = server.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout()) => {
            result?;
            info!("Control input closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    orchestrator.stop_monitor().await;
    let active = orchestrator.active_count().await;
    if active > 0 {
        warn!(active, "Exiting with workers still running");
    }
    if let Some(db) = history {
        db.close().await;
    }

    info!("Daemon stopped");
    Ok(())
}

/// Default history path: ~/.conductor/history.db
fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".conductor").join("history.db"))
}
