//! Switchboard daemon - loopback broker for local development

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use switchboard::{Broker, KeyRing};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "switchboardd")]
#[command(about = "Switchboard loopback broker")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:8080", env = "SWITCHBOARD_BIND")]
    bind: String,

    /// Project key accepted by the broker (repeatable)
    #[arg(short, long = "key", env = "SWITCHBOARD_KEYS", value_delimiter = ',', required = true)]
    keys: Vec<String>,

    /// Seconds a dropped session stays resumable
    #[arg(long, env = "SWITCHBOARD_SESSION_TTL", default_value_t = 300)]
    session_ttl_secs: u64,

    /// Log level
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    run_server(args).await
}

async fn run_server(args: Args) -> Result<()> {
    let key_ring = KeyRing::from_keys(args.keys.iter().map(|k| k.trim()).filter(|k| !k.is_empty()))
        .context("Invalid --key")?;
    if key_ring.is_empty() {
        warn!("No keys configured, every handshake will be rejected");
    }

    let bind_addr: SocketAddr = args.bind.parse().context("Invalid bind address")?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    info!(
        addr = %bind_addr,
        identities = key_ring.identity_count(),
        "Switchboard daemon starting"
    );

    Broker::new(key_ring)
        .with_session_ttl(Duration::from_secs(args.session_ttl_secs))
        .serve_with_shutdown(listener, shutdown_signal())
        .await?;

    info!("Switchboard daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, stopping server");
}
