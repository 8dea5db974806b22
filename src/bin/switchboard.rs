//! Switchboard CLI - publish and subscribe from the command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use switchboard_client::{SwitchboardClient, SwitchboardConfig};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Switchboard CLI - publish and subscribe")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Endpoint URL (overrides SWITCHBOARD_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Project key (repeatable, overrides SWITCHBOARD_KEYS)
    #[arg(short, long = "key", global = true)]
    keys: Vec<String>,

    /// Request timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a message
    ///
    /// Examples:
    ///   switchboard publish orders.created 'order 17'
    ///   switchboard publish orders.created 'order 18' --ack
    Publish {
        channel: String,

        message: String,

        /// Wait for the server to accept the message and print its id
        #[arg(long)]
        ack: bool,
    },

    /// Print messages from one or more channels until Ctrl+C
    Subscribe {
        #[arg(required = true)]
        channels: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize minimal tracing for CLI
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    let client = SwitchboardClient::new(config);
    client.on_error(|err| eprintln!("error: {}", err));
    client.connect().await.context("Failed to connect")?;

    let result = match cli.command {
        Commands::Publish {
            channel,
            message,
            ack,
        } => publish(&client, &channel, message, ack).await,
        Commands::Subscribe { channels } => subscribe(&client, &channels).await,
    };

    client.close().await?;
    result
}

fn build_config(cli: &Cli) -> Result<SwitchboardConfig> {
    let mut config = match (&cli.url, cli.keys.is_empty()) {
        (Some(url), false) => SwitchboardConfig::new(url.clone(), cli.keys.iter().cloned()),
        _ => SwitchboardConfig::from_env()
            .context("Set SWITCHBOARD_URL and SWITCHBOARD_KEYS, or pass --url and --key")?,
    };

    if let Some(url) = &cli.url {
        config.url = url.clone();
    }
    if !cli.keys.is_empty() {
        config.keys = cli.keys.clone();
    }
    if let Some(ms) = cli.timeout_ms {
        config = config.request_timeout(Duration::from_millis(ms));
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn publish(client: &SwitchboardClient, channel: &str, message: String, ack: bool) -> Result<()> {
    if ack {
        let id = client
            .publish_with_ack(channel, message)
            .await
            .context("Publish failed")?;
        println!("{}", id);
    } else {
        let seq = client.publish(channel, message).await.context("Publish failed")?;
        println!("sent (seq {})", seq);
    }
    Ok(())
}

async fn subscribe(client: &SwitchboardClient, channels: &[String]) -> Result<()> {
    for channel in channels {
        client
            .subscribe(channel, |record| {
                println!("[{}] {} {}", record.channel, record.id, record.message);
            })
            .await
            .with_context(|| format!("Subscribe to {} failed", channel))?;
    }
    eprintln!("Subscribed to {}; Ctrl+C to stop", channels.join(", "));

    signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    Ok(())
}
