//! docbase server.
//!
//! Loads the application context, applies class definitions, then serves
//! the REST API and, when a port is configured, the LiveQuery WebSocket
//! endpoint. Snapshots are flushed periodically and once more on shutdown.

mod config;

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use docbase_api::{AppState, Router, Server};
use docbase_core::context::AppContext;
use docbase_core::schema::defined::{ClassDefinition, DefinedSchemas, DefinedSchemasOptions};
use docbase_live::{spawn, websocket, LiveQueryServer};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::config::{Args, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();

    let config = ServerConfig::load(&args)?;
    let ctx = AppContext::from_config(config.database.clone()).context("Failed to open database")?;
    ctx.initialize().await.context("Failed to initialize database")?;

    if let Some(path) = &config.schemas {
        apply_schemas(&ctx, path, config.defined_schemas).await?;
    }

    let flush_task = spawn_flusher(ctx.clone());

    let live_task = match config.live_query.port {
        Some(port) => {
            let addr: SocketAddr = format!("{}:{}", config.host, port).parse()?;
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind LiveQuery on {}", addr))?;
            let server = LiveQueryServer::new(config.live_query_config());
            let (handle, _runtime) = spawn(server, ctx.pubsub.clone(), ctx.auth.clone());
            let keepalive = Duration::from_millis(config.live_query.websocket_timeout_ms);
            Some(tokio::spawn(async move {
                if let Err(e) = websocket::serve(listener, handle, keepalive).await {
                    error!("LiveQuery server error: {}", e);
                }
            }))
        }
        None => None,
    };

    let router = Router::new(AppState {
        ctx: ctx.clone(),
        request_timeout_ms: config.request_timeout_ms,
    });
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let server = Server::bind(addr, router)
        .await
        .with_context(|| format!("Failed to bind REST API on {}", addr))?;

    info!("Starting docbase server");
    info!("  Application: {}", config.database.app_id);
    info!("  REST: http://{}", addr);
    if let Some(port) = config.live_query.port {
        info!("  LiveQuery: ws://{}:{}", config.host, port);
    }
    match &config.database.data_dir {
        Some(dir) => info!("  Data directory: {}", dir.display()),
        None => info!("  Data directory: none (in-memory only)"),
    }

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        let stop = async {
            let _ = stop_rx.await;
        };
        if let Err(e) = server.run_until(stop).await {
            error!("Server error: {}", e);
        }
    });

    signal::ctrl_c().await.context("Failed to listen for ctrl_c")?;
    info!("Shutting down server...");
    let _ = stop_tx.send(());
    if let Err(e) = server_handle.await {
        error!("REST task failed: {}", e);
    }
    if let Some(task) = live_task {
        task.abort();
    }
    flush_task.abort();
    if ctx.flush().context("Final snapshot flush failed")? {
        info!("Final snapshot written");
    }
    Ok(())
}

async fn apply_schemas(ctx: &AppContext, path: &Path, options: DefinedSchemasOptions) -> anyhow::Result<()> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read class definitions {}", path.display()))?;
    let definitions: Vec<ClassDefinition> = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid class definitions {}", path.display()))?;
    let report = DefinedSchemas::new(ctx.database.clone(), definitions, options)
        .execute()
        .await
        .context("Failed to apply class definitions")?;
    if report.is_empty() {
        info!("Class definitions already up to date");
    } else {
        info!("Applied class definitions: {:?}", report);
    }
    Ok(())
}

/// Writes dirty data to the snapshot on the configured interval.
fn spawn_flusher(ctx: AppContext) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_millis(ctx.config.flush_interval_ms.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = ctx.flush() {
                error!("Snapshot flush failed: {}", e);
            }
        }
    })
}
