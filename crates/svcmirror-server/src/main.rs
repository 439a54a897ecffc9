//! svcmirror - coordination-store service mirror

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::future::IntoFuture;
use std::sync::Arc;
use svcmirror_core::{PathLayout, ServiceRegistry};
use svcmirror_server::api::{self, AppState};
use svcmirror_server::observability::{init_metrics, init_tracing, TracingConfig};
use svcmirror_server::store::etcd::EtcdConnector;
use svcmirror_server::{SyncActor, SyncConfig};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "svcmirror", version, about = "Mirror published services and serve them over HTTP")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect to the store, mirror the services tree and serve the HTTP API
    Run(RunArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Coordination-store servers, comma-separated
    #[arg(long, env = "SVCMIRROR_SERVERS", value_delimiter = ',')]
    servers: Option<Vec<String>>,

    /// Tree root the services layout lives under
    #[arg(long, env = "SVCMIRROR_ROOT")]
    root: Option<String>,

    /// HTTP listen address
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind_addr: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(TracingConfig::from_env()).map_err(|e| anyhow!("failed to init tracing: {e}"))?;

    match cli.command {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = SyncConfig::from_env();
    if let Some(servers) = args.servers {
        config.servers = servers;
    }
    if let Some(root) = args.root {
        config.root = root;
    }

    info!(
        servers = ?config.servers,
        root = %config.root,
        session_timeout_secs = config.session_timeout.as_secs(),
        bind_addr = %args.bind_addr,
        "Starting svcmirror"
    );

    let metrics_state = match init_metrics() {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        }
    };

    let registry = Arc::new(ServiceRegistry::new());
    let actor = SyncActor::new(
        EtcdConnector::new(config.clone()),
        PathLayout::new(&config.root),
        Arc::clone(&registry),
        config.sync_options(),
    );

    let state = AppState {
        directory: actor.directory(),
        session: actor.subscribe(),
        readiness: actor.readiness(),
        metrics_state,
    };

    let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
    let mut actor_task = tokio::spawn(actor.run(shutdown_rx));

    let listener = tokio::net::TcpListener::bind(&args.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", args.bind_addr))?;
    info!("Starting API server on {}", args.bind_addr);

    let server = axum::serve(listener, api::create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .into_future();

    tokio::select! {
        result = server => {
            result.context("HTTP server failed")?;
            info!("HTTP server stopped, stopping sync actor");
            let _ = shutdown_tx.send(());
            actor_task.await.context("sync actor panicked")??;
        }
        result = &mut actor_task => {
            let result = result.context("sync actor panicked")?;
            if let Err(e) = &result {
                error!(error = %e, "Sync actor stopped");
            }
            result?;
        }
    }

    info!("svcmirror stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
