//! mkbridge
//!
//! Connects to a notification server's streaming API, subscribes to one
//! channel, and pulses the actuators whenever a selected event arrives.
//! Runs until Ctrl-C or until the server closes the stream.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mkb_bridge::{DryRunActuator, Router};
use mkb_core::config::{self, BridgeConfig};
use mkb_core::traits::Actuator;
use mkb_core::SessionState;
use mkb_protocol::ChannelEventType;
use mkb_stream::{StreamSession, WebSocketConnector};

#[derive(Parser)]
#[command(name = "mkbridge")]
#[command(about = "Bridge real-time notifications to actuator commands")]
#[command(version)]
struct Args {
    /// Notification server host (e.g. misskey.example or wss://misskey.example)
    host: Option<String>,

    /// API token for the streaming connection
    token: Option<String>,

    /// Actuator server host
    #[arg(long)]
    actuator_host: Option<String>,

    /// Actuator server port
    #[arg(long)]
    actuator_port: Option<u16>,

    /// Comma-separated event types that trigger the actuators
    /// Example: mention,followed,notification
    #[arg(long, value_delimiter = ',')]
    types: Option<Vec<ChannelEventType>>,

    /// Actuator intensity (0-100)
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=100))]
    intensity: Option<u32>,

    /// Pulse duration in milliseconds
    #[arg(long)]
    duration: Option<u64>,

    /// Channel to subscribe to
    #[arg(long)]
    channel: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log every message sent and received (needs trace level)
    #[arg(long)]
    trace_wire: bool,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("mkbridge starting...");

    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let save = args.save_config;
    let config = load_config(&config_path, args)?;
    config.validate().context("Invalid configuration")?;

    if save {
        config::save_config(&config_path, &config)
            .with_context(|| format!("Failed to save config to {}", config_path.display()))?;
        tracing::info!("Configuration saved to {}", config_path.display());
        return Ok(());
    }

    let token = config.token.clone().unwrap_or_default();

    // Actuator side
    let actuator = Arc::new(DryRunActuator::new(
        config.actuator_address(),
        config.devices.as_slice(),
    ));
    actuator.connect().await.with_context(|| {
        format!(
            "Failed to connect to actuator server at {}",
            config.actuator_address()
        )
    })?;
    let devices = actuator
        .enumerate_devices()
        .await
        .context("Failed to enumerate devices")?;
    if devices.is_empty() {
        tracing::warn!("No devices available; events will be logged only");
    }

    // Ctrl-C cancels everything hanging off the root token
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received Ctrl-C, shutting down...");
                    shutdown.cancel();
                }
                Err(e) => tracing::warn!("Failed to listen for Ctrl-C: {}", e),
            }
        });
    }

    let router = Arc::new(Router::from_config(
        actuator.clone(),
        devices,
        &config,
        shutdown.clone(),
    ));

    // Stream side
    let connector = Arc::new(WebSocketConnector::new());
    let span = tracing::info_span!("stream", host = %config.stream.host);
    let session = StreamSession::with_span(config.stream.clone(), connector, span);

    session
        .connect(&token, &shutdown)
        .await
        .context("Failed to connect to notification server")?;

    if session.state() == SessionState::Open {
        let id = session
            .subscribe(&config.channel, router.callback())
            .await
            .with_context(|| format!("Failed to subscribe to channel '{}'", config.channel))?;
        tracing::info!(%id, channel = %config.channel, "Listening for events");

        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = session.wait_closed() => {
                tracing::warn!("Stream closed by server");
            }
        }
    }

    // Stop pending pulses before the final stop
    shutdown.cancel();
    let closed = session.close().await;

    if let Err(e) = actuator.stop_all().await {
        tracing::warn!("Failed to stop actuators: {}", e);
    }

    closed.context("Stream session ended with an error")?;
    tracing::info!("mkbridge stopped");
    Ok(())
}

/// Load the config file (if any) and apply command-line overrides
fn load_config(config_path: &Path, args: Args) -> Result<BridgeConfig> {
    let mut config: BridgeConfig = if config_path.exists() {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        tracing::debug!("No config file at {}, using defaults", config_path.display());
        BridgeConfig::default()
    };

    if let Some(host) = args.host {
        config.stream.host = host;
    }
    if let Some(token) = args.token {
        config.token = Some(token);
    }
    if let Some(host) = args.actuator_host {
        config.actuator_host = host;
    }
    if let Some(port) = args.actuator_port {
        config.actuator_port = port;
    }
    if let Some(types) = args.types {
        config.event_types = types;
    }
    if let Some(intensity) = args.intensity {
        config.intensity = intensity;
    }
    if let Some(duration) = args.duration {
        config.duration = Duration::from_millis(duration);
    }
    if let Some(channel) = args.channel {
        config.channel = channel;
    }
    if args.trace_wire {
        config.stream.trace_wire = true;
    }

    Ok(config)
}
