//! Nexus console gateway daemon
//!
//! Serves the console WebSocket and the admin API, and keeps the session and
//! tunnel registries for every connected dashboard.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nx_core::config::{self, GatewayConfig};
use nx_gateway::{api, GatewayState};

#[derive(Parser)]
#[command(name = "nx-gateway", about = "Nexus remote console gateway", version)]
struct Args {
    /// Gateway config file; a missing default file is not an error
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, replaces `gateway.bind_address`
    #[arg(short, long)]
    bind: Option<String>,

    /// Debug logging regardless of --log-level
    #[arg(short, long)]
    foreground: bool,

    /// Default filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(default_filter: &str) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// An explicit path must load; the default path falls back to defaults
fn resolve_config(explicit: Option<&Path>) -> Result<GatewayConfig> {
    if let Some(path) = explicit {
        return config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path));
    }

    let path = config::default_config_path();
    if !path.exists() {
        tracing::info!("No config at {:?}, using defaults", path);
        return Ok(GatewayConfig::default());
    }
    Ok(config::load_config(&path).unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable config {:?}: {}", path, e);
        GatewayConfig::default()
    }))
}

#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::warn!("SIGTERM handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    let which = tokio::select! {
        _ = tokio::signal::ctrl_c() => "Ctrl+C",
        _ = sigterm() => "SIGTERM",
    };
    tracing::info!("{} received, stopping gateway", which);
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(if args.foreground {
        "debug"
    } else {
        &args.log_level
    });

    let config = resolve_config(args.config.as_deref())?;
    let bind_addr = args
        .bind
        .unwrap_or_else(|| config.gateway.bind_address.clone());

    let state = Arc::new(
        GatewayState::new(config).context("Failed to initialize gateway SSH identity")?,
    );
    tracing::info!(
        host = %state.hostname,
        console_enabled = state.settings.is_enabled(),
        "Gateway state ready"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("Listening on {}", bind_addr);

    axum::serve(listener, api::router(Arc::clone(&state)))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("HTTP server failed")?;

    state.shutdown().await;
    tracing::info!("Gateway stopped");
    Ok(())
}
