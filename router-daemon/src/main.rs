//! Standalone daemon entry point: parses CLI/env/file configuration,
//! wires the session router to the extension link and the local control
//! HTTP surface, and drives the create → serve → drain → destroy
//! lifecycle (§9).

mod config;
mod control;
mod health;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use astra_router_core::{CapabilityRegistry, Clock, RouterMetrics, TokioClock, ToolAdapter};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::{CliOverrides, ConfigError, DaemonConfig};

const EXIT_OK: i32 = 0;
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_LINK_BIND_FAILURE: i32 = 2;

#[derive(Parser, Debug, Clone)]
#[command(name = "router-daemon", about = "Session-multiplexed browser extension command router")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, env = "ROUTER_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address for the local control HTTP surface.
    #[arg(long, env = "ROUTER_CONTROL_BIND")]
    bind: Option<SocketAddr>,

    /// Bind address the browser extension dials into.
    #[arg(long, env = "ROUTER_EXTENSION_BIND")]
    extension_bind: Option<SocketAddr>,

    /// Shared secret required on the control HTTP surface, if set.
    #[arg(long, env = "ROUTER_SHARED_SECRET")]
    shared_secret: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "ROUTER_LOG")]
    log_level: Option<String>,

    /// Override the extension link's heartbeat interval, in seconds.
    #[arg(long, env = "ROUTER_HEARTBEAT_INTERVAL_SECS")]
    heartbeat_interval_secs: Option<u64>,

    /// Override the heartbeat timeout before the link is declared dead.
    #[arg(long, env = "ROUTER_HEARTBEAT_TIMEOUT_SECS")]
    heartbeat_timeout_secs: Option<u64>,
}

impl Cli {
    fn into_overrides(self) -> CliOverrides {
        CliOverrides {
            control_bind: self.bind,
            shared_secret: self.shared_secret,
            extension_bind: self.extension_bind,
            log_level: self.log_level,
            heartbeat_interval_secs: self.heartbeat_interval_secs,
            heartbeat_timeout_secs: self.heartbeat_timeout_secs,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_level))
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start tokio runtime: {err}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let exit_code = runtime.block_on(run(config));
    std::process::exit(exit_code);
}

fn load_config(cli: &Cli) -> Result<DaemonConfig, ConfigError> {
    let file = match &cli.config {
        Some(path) => Some(DaemonConfig::load_file(path)?),
        None => None,
    };
    DaemonConfig::resolve(file, cli.clone().into_overrides())
}

async fn run(config: DaemonConfig) -> i32 {
    info!(
        control_bind = %config.control_bind,
        extension_bind = %config.extension_bind,
        "router-daemon starting"
    );

    let extension_listener = match TcpListener::bind(config.extension_bind).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, addr = %config.extension_bind, "failed to bind extension link listener");
            return EXIT_LINK_BIND_FAILURE;
        }
    };
    let control_listener = match TcpListener::bind(config.control_bind).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, addr = %config.control_bind, "failed to bind control HTTP listener");
            return EXIT_LINK_BIND_FAILURE;
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(TokioClock);
    let metrics = Arc::new(RouterMetrics::default());
    let (router, router_join) = astra_router_core::router::spawn(config.router.clone(), clock.clone(), metrics.clone());

    let adapter = ToolAdapter::new(
        router.clone(),
        capability_registry(),
        clock,
        config.default_deadline(),
    );

    let accept_task = tokio::spawn(accept_extension_links(
        extension_listener,
        router.clone(),
        config.router.heartbeat_interval(),
    ));

    let state = Arc::new(control::AppState {
        adapter,
        router: router.clone(),
        metrics,
        shared_secret: config.shared_secret.clone(),
        started_at: Instant::now(),
    });
    let app = control::router(state);

    info!(addr = %config.control_bind, "control HTTP surface listening");
    let serve_result = axum::serve(control_listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(err) = serve_result {
        error!(error = %err, "control HTTP surface exited with an error");
    }

    info!("draining: ending in-flight sessions");
    accept_task.abort();
    router.shutdown().await;
    let _ = router_join.await;

    info!("router-daemon stopped");
    EXIT_OK
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

/// Accept extension connections one at a time for the daemon's lifetime,
/// binding each as the active link with a strictly increasing generation
/// so a reconnect supersedes the previous link cleanly (§4.2).
async fn accept_extension_links(listener: TcpListener, router: astra_router_core::RouterHandle, heartbeat_interval: std::time::Duration) {
    let mut generation: u64 = 0;
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                generation += 1;
                info!(generation, %peer, "extension link connected");
                let transport = astra_router_core::NdjsonTcpTransport::new(stream);
                router.bind_link(transport, heartbeat_interval, generation).await;
            }
            Err(err) => {
                warn!(error = %err, "failed to accept extension connection");
            }
        }
    }
}

fn capability_registry() -> CapabilityRegistry {
    astra_router_core::capability::default_registry()
}
