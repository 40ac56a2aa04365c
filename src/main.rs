use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rumqttc::AsyncClient;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

use tion2mqtt::mqtt::{self, MqttNotifier, Topics};
use tion2mqtt::transport_btleplug::TionTransportManagerBtleplug;
use tion2mqtt::{CommandHandler, ConnectionPolicy, Session};

/// Control a Tion breezer over Bluetooth LE from MQTT
#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Device Bluetooth address
    #[arg(long, env = "TION_DEVICE")]
    device: String,

    /// Keep the Bluetooth connection open between requests
    #[arg(long, env = "TION_KEEP_CONNECTION")]
    keep_connection: bool,

    /// Verbose logging, overridden by RUST_LOG
    #[arg(long, env = "TION_DEBUG")]
    debug: bool,

    /// Deadline for every device operation
    #[arg(long, env = "TION_TIMEOUT", value_name = "SECS", default_value_t = 7)]
    timeout: u64,

    /// MQTT broker
    #[arg(long, env = "TION_MQTT_URL", default_value = "mqtt://localhost:1883")]
    mqtt_url: String,

    /// MQTT client id
    #[arg(long, env = "TION_CLIENT_ID", default_value = "tion")]
    client_id: String,

    /// Prefix of the state, control and availability topics
    #[arg(long, env = "TION_TOPIC_PREFIX", default_value = "tion")]
    topic_prefix: String,

    /// Publish the device state this often, 0 disables polling
    #[arg(long, env = "TION_POLL_INTERVAL", value_name = "SECS", default_value_t = 60)]
    poll_interval: u64,
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // systemd journal already adds timestamps
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let timeout = Duration::from_secs(args.timeout);
    let (host, port) = mqtt::parse_mqtt_url(&args.mqtt_url)?;
    let topics = Topics::new(&args.topic_prefix);
    let policy = if args.keep_connection {
        ConnectionPolicy::KeepAlive
    } else {
        ConnectionPolicy::PerRequest
    };

    let manager = TionTransportManagerBtleplug::new()
        .await
        .context("Failed to initialize Bluetooth")?;
    let session = Arc::new(Session::new(manager, &args.device));
    if policy == ConnectionPolicy::KeepAlive {
        if let Err(e) = session.connect(timeout).await {
            warn!("Initial connection to {} failed: {}", args.device, e);
        }
    }

    let (client, eventloop) = AsyncClient::new(mqtt::options(&args.client_id, &host, port, &topics), 64);
    let notifier = MqttNotifier::new(client.clone(), &topics.state);
    let handler = Arc::new(CommandHandler::new(Arc::clone(&session), notifier, policy, timeout));
    let poll = (args.poll_interval > 0).then(|| Duration::from_secs(args.poll_interval));

    let mut sigterm = signal(SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    };

    info!("Bridging {} on {}:{} under `{}`", args.device, host, port, args.topic_prefix);
    mqtt::run(handler, client, eventloop, topics, poll, shutdown).await;

    if let Err(e) = session.disconnect(timeout).await {
        warn!("Failed to disconnect from {}: {}", args.device, e);
    }
    info!("Shutdown complete");
    Ok(())
}
