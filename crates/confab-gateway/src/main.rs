//! Gateway entry point.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use confab_gateway::{http, AppSettings, AppState};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "confab-gateway", version, about = "Multi-user chat gateway")]
struct Args {
    /// Listen port (overrides CONFAB_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Project root for config files and stdio server working directories.
    #[arg(long)]
    project_root: Option<PathBuf>,

    /// Emit JSON logs.
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = AppSettings::from_env();
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(root) = args.project_root {
        settings.project_root = root;
    }
    settings.json_logs |= args.json_logs;

    init_tracing(settings.json_logs);

    let state = AppState::build(settings.clone())
        .await
        .context("building application state")?;

    info!("discovering MCP servers");
    state.manager.initialize().await;

    let app = http::routes()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "confab gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await
    .context("server error")?;

    Ok(())
}
