//! procwarden-daemon - privilege-gated process inspection broker.
//!
//! Binds the control socket, verifies the dispatch catalog, and serves
//! sessions until SIGTERM/SIGINT. Each connection handshakes, receives a
//! trust baseline from its socket credentials, and then has every request
//! priced by the catalog before a handler runs.
//!
//! # Startup order
//!
//! 1. Catalog verification: refuse to serve from a malformed dispatch table.
//! 2. Configuration: TOML file, with CLI flags overriding individual values.
//! 3. PID file claim with a start-time identity check, so a recycled pid
//!    cannot block startup and a live daemon cannot be displaced.
//! 4. Control socket bind (directory 0700, socket chmod, stale cleanup).
//! 5. Accept loop, metrics endpoint, signal watcher.
//!
//! # Shutdown
//!
//! On SIGTERM/SIGINT the accept loop stops taking connections, sessions
//! holding shutdown protection get up to a 30 s grace window, and then the
//! socket and PID files are removed.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use axum::Router;
use axum::routing::get;
use clap::Parser;
use procwarden_core::config::BrokerConfig;
use procwarden_core::token;
use procwarden_daemon::context::RuntimeContext;
use procwarden_daemon::metrics::{SharedMetricsRegistry, new_shared_registry};
use procwarden_daemon::protocol::catalog;
use procwarden_daemon::protocol::{
    Dispatcher, ProtocolServer, ServerConfig, SessionSettings, handle_connection,
};
use procwarden_daemon::state::{BrokerState, SHUTDOWN_PROTECTION_GRACE};
use procwarden_daemon::system::{ProcfsSystem, SystemFacade};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// How often the accept loop re-checks the shutdown flag while idle.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// procwarden daemon - privilege-gated process inspection broker
#[derive(Parser, Debug)]
#[command(name = "procwarden-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the broker configuration file
    #[arg(short, long, default_value = "procwarden.toml")]
    config: PathBuf,

    /// Control socket path (overrides the config file)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// PID file path (overrides the config file)
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Localhost port for the Prometheus /metrics endpoint (overrides the
    /// config file)
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Disable the metrics HTTP endpoint even when the config enables it
    #[arg(long)]
    no_metrics: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the built-in default configuration as TOML and exit
    #[arg(long)]
    dump_default_config: bool,
}

/// Load the configuration file and fold the CLI overrides into it.
fn load_config(args: &Args) -> Result<BrokerConfig> {
    let mut config = if args.config.exists() {
        BrokerConfig::from_file(&args.config)
            .with_context(|| format!("failed to load {}", args.config.display()))?
    } else {
        BrokerConfig::default()
    };

    if let Some(socket) = &args.socket {
        config.daemon.socket_path = socket.clone();
    }
    if let Some(pid_file) = &args.pid_file {
        config.daemon.pid_file = pid_file.clone();
    }
    if let Some(port) = args.metrics_port {
        config.daemon.metrics_port = Some(port);
    }
    if args.no_metrics {
        config.daemon.metrics_port = None;
    }

    // Overrides bypass the file parser, so the merged result is re-checked.
    config.validate().context("configuration failed validation")?;
    Ok(config)
}

/// Read the start time (field 22) from `/proc/{pid}/stat`.
///
/// A pid alone does not identify a process: after exit the kernel may hand
/// the same number to an unrelated newcomer. Recording the start time next
/// to the pid lets the next startup tell "this daemon is still running"
/// from "a recycled pid".
fn read_proc_start_time(pid: u32) -> Option<u64> {
    let contents = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // comm (field 2) is parenthesized and may contain spaces, so split
    // after the last ')'.
    let after_comm = contents.rsplit_once(')')?.1;
    // Fields after comm start at 3; starttime is field 22.
    after_comm.split_whitespace().nth(19)?.parse().ok()
}

fn parse_pid_entry(contents: &str) -> Option<(u32, u64)> {
    let (pid, start_time) = contents.trim().split_once(':')?;
    Some((pid.parse().ok()?, start_time.parse().ok()?))
}

/// Claim the PID file, refusing when a live daemon already holds it.
///
/// The file stores `pid:start_time`. A stale entry whose pid is gone, or
/// whose start time no longer matches the live process, is replaced.
fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => {
            if let Some((pid, start_time)) = parse_pid_entry(&contents) {
                if read_proc_start_time(pid) == Some(start_time) {
                    bail!(
                        "another procwarden-daemon is already running (pid {pid}, pid file {})",
                        path.display()
                    );
                }
                debug!(pid, "replacing stale pid file");
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    }

    let pid = std::process::id();
    let start_time = read_proc_start_time(pid).unwrap_or(0);
    std::fs::write(path, format!("{pid}:{start_time}\n"))
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(pid, path = %path.display(), "pid file written");
    Ok(())
}

fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), "failed to remove pid file: {e}");
        }
    }
}

/// Synchronous entry point.
///
/// `--dump-default-config` answers and exits before any runtime exists;
/// everything else runs on an explicitly constructed multi-thread runtime
/// so startup failures surface as plain `Err` returns.
fn main() -> Result<()> {
    let args = Args::parse();

    if args.dump_default_config {
        let rendered = BrokerConfig::default()
            .to_toml()
            .context("failed to render the default configuration")?;
        print!("{rendered}");
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    catalog::verify().context("dispatch catalog failed startup verification")?;

    if !args.config.exists() {
        info!(path = %args.config.display(), "no config file found, using defaults");
    }
    let config = load_config(&args)?;

    let metrics_registry = if config.daemon.metrics_port.is_some() {
        Some(new_shared_registry().context("failed to initialize metrics registry")?)
    } else {
        None
    };

    write_pid_file(&config.daemon.pid_file)?;

    // A configured but unloadable secret is fatal: starting without it would
    // silently disable token elevation that the operator asked for.
    let token_secret = match &config.daemon.token_secret {
        Some(path) => Some(
            token::load_secret(path)
                .with_context(|| format!("failed to load token secret {}", path.display()))?,
        ),
        None => None,
    };

    let system: Arc<dyn SystemFacade> = Arc::new(ProcfsSystem::new());
    let state = Arc::new(BrokerState::new());
    let mut ctx = RuntimeContext::new(system, Arc::clone(&state));
    if let Some(registry) = &metrics_registry {
        ctx = ctx.with_metrics(Arc::clone(registry));
    }
    if let Some(secret) = token_secret {
        ctx = ctx.with_token_secret(secret);
        info!("session token elevation enabled");
    }

    let settings = Arc::new(SessionSettings::from_config(&config));
    let dispatcher = Arc::new(Dispatcher::new(ctx));

    let server = Arc::new(
        ProtocolServer::bind(ServerConfig::from(&config.daemon))
            .context("failed to bind control socket")?,
    );

    info!(
        pid = std::process::id(),
        socket = %server.socket_path().display(),
        "procwarden daemon started"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut accept_task = tokio::spawn(run_accept_loop(
        Arc::clone(&server),
        Arc::clone(&dispatcher),
        Arc::clone(&settings),
        Arc::clone(&shutdown),
    ));

    let metrics_task = match (&metrics_registry, config.daemon.metrics_port) {
        (Some(registry), Some(port)) => {
            let addr: SocketAddr = ([127, 0, 0, 1], port).into();
            let registry = Arc::clone(registry);
            Some(tokio::spawn(async move {
                if let Err(e) = run_metrics_server(registry, addr).await {
                    error!("metrics server error: {e:#}");
                }
            }))
        }
        _ => None,
    };

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;
    let signal_task = tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    });

    tokio::select! {
        _ = signal_task => {}
        _ = &mut accept_task => {
            error!("accept loop exited on its own");
        }
        result = async {
            match metrics_task {
                Some(task) => task.await,
                None => std::future::pending().await,
            }
        } => {
            if let Err(e) = result {
                error!("metrics server task failed: {e}");
            }
        }
    }

    info!("shutting down");
    shutdown.store(true, Ordering::Release);
    if !accept_task.is_finished() {
        let _ = accept_task.await;
    }

    // Sessions holding shutdown protection get a grace window before the
    // socket goes away under them.
    if !state
        .wait_for_shutdown_clearance(SHUTDOWN_PROTECTION_GRACE)
        .await
    {
        warn!(
            held = state.shutdown_protection(),
            "shutdown grace period expired with protection still held"
        );
    }

    if let Err(e) = server.cleanup() {
        warn!("failed to remove control socket: {e}");
    }
    remove_pid_file(&config.daemon.pid_file);

    info!("daemon shutdown complete");
    Ok(())
}

/// Accept connections until the shutdown flag is raised.
///
/// Each accepted connection runs on its own task; the permit riding along
/// keeps the connection cap enforced without the loop tracking children.
async fn run_accept_loop(
    server: Arc<ProtocolServer>,
    dispatcher: Arc<Dispatcher>,
    settings: Arc<SessionSettings>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Acquire) {
        let (connection, permit) =
            match tokio::time::timeout(ACCEPT_POLL_INTERVAL, server.accept()).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    warn!("accept failed: {e}");
                    tokio::time::sleep(ACCEPT_POLL_INTERVAL).await;
                    continue;
                }
                Ok(Ok(accepted)) => accepted,
            };

        tokio::spawn(handle_connection(
            connection,
            permit,
            Arc::clone(&dispatcher),
            Arc::clone(&settings),
        ));
    }
    debug!("accept loop stopped");
}

/// Serve Prometheus metrics over HTTP.
///
/// Binds localhost only. Remote scrape access belongs behind a reverse
/// proxy with its own authentication.
async fn run_metrics_server(registry: SharedMetricsRegistry, addr: SocketAddr) -> Result<()> {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    let metrics_handler = {
        let registry = Arc::clone(&registry);
        move || {
            let registry = Arc::clone(&registry);
            async move {
                match registry.encode_text() {
                    Ok(body) => (
                        StatusCode::OK,
                        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                        body,
                    )
                        .into_response(),
                    Err(e) => {
                        error!("failed to encode metrics: {e}");
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            format!("failed to encode metrics: {e}"),
                        )
                            .into_response()
                    }
                }
            }
        }
    };

    let app = Router::new().route("/metrics", get(metrics_handler)).route(
        "/",
        get(|| async { "procwarden-daemon metrics\n\nGET /metrics - Prometheus text format\n" }),
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind metrics server")?;

    info!(%addr, "metrics HTTP server listening");

    axum::serve(listener, app)
        .await
        .context("metrics server error")?;
    Ok(())
}
