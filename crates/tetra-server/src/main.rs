use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tetra_mesh::StarTetrahedralizer;
use tetra_server::config::ServerConfig;
use tetra_server::executor::WorkerCommand;
use tetra_server::frontend::Frontend;
use tetra_server::reload::{self, ExecutableWatcher};
use tetra_server::worker::{self, WorkerArgs};
use tetra_server::{AppState, app, app_with_frontend};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const SERVER_LOG_FILTER: &str = "info,tetra_server=debug,tetra_mesh=info";
const WORKER_LOG_FILTER: &str = "warn";
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(
    name = "tetra-server",
    version,
    about = "Tetrahedralize surface meshes over HTTP"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the HTTP API, the WebSocket feed and the UI.
    Start(ServerConfig),
    /// Mesh one encoded surface from stdin. Spawned by `start`.
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Stopped,
    Reload,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Worker(args) => {
            init_logging(WORKER_LOG_FILTER, true);
            worker::main(&StarTetrahedralizer, &args)
        }
        Commands::Start(config) => {
            init_logging(SERVER_LOG_FILTER, false);
            match start(config) {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    error!("{err:#}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

/// `RUST_LOG` wins over the built-in filter. Workers log to stderr so
/// stdout stays reserved for the grid.
fn init_logging(default_filter: &str, worker: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if worker {
        builder.with_writer(std::io::stderr).with_ansi(false).init();
    } else {
        builder.init();
    }
}

fn start(config: ServerConfig) -> Result<()> {
    config.validate().context("invalid configuration")?;

    let frontend = if config.headless {
        None
    } else {
        let frontend = Frontend::locate(&config.frontend_dir)
            .context("UI assets are missing; build them or pass --headless")?;
        Some(frontend)
    };
    let worker = WorkerCommand::current_exe().context("failed to locate the server executable")?;
    let watcher = if config.reload {
        let watcher =
            ExecutableWatcher::current_exe().context("failed to watch the server executable")?;
        info!(path = %watcher.path().display(), "auto-reload enabled");
        Some(watcher)
    } else {
        None
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build the async runtime")?;
    let exit = runtime.block_on(serve(config, worker, frontend, watcher));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    match exit? {
        Exit::Stopped => Ok(()),
        Exit::Reload => match reload::restart() {
            Ok(never) => match never {},
            Err(err) => Err(err).context("failed to restart the server"),
        },
    }
}

async fn serve(
    config: ServerConfig,
    worker: WorkerCommand,
    frontend: Option<Frontend>,
    watcher: Option<ExecutableWatcher>,
) -> Result<Exit> {
    let address = config.socket_addr();
    let state = AppState::new(&config, worker);
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(
        %address,
        pool_size = state.executor().pool_size(),
        frontend = ?frontend.as_ref().map(Frontend::root),
        reload = config.reload,
        "tetra-server listening"
    );
    let router = match &frontend {
        Some(frontend) => app_with_frontend(state, frontend),
        None => app(state),
    };

    let reload_requested = Arc::new(AtomicBool::new(false));
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(watcher, Arc::clone(&reload_requested)))
        .await
        .context("server terminated unexpectedly")?;

    if reload_requested.load(Ordering::SeqCst) {
        Ok(Exit::Reload)
    } else {
        info!("tetra-server stopped");
        Ok(Exit::Stopped)
    }
}

async fn shutdown_signal(watcher: Option<ExecutableWatcher>, reload_requested: Arc<AtomicBool>) {
    let interrupted = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let rebuilt = async move {
        match watcher {
            Some(mut watcher) => watcher.wait_for_change().await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        () = interrupted => info!("shutdown requested"),
        () = rebuilt => reload_requested.store(true, Ordering::SeqCst),
    }
}
