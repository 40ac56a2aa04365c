use crate::handler::{CommandHandler, StateNotifier};
use crate::message::{PartialUpdate, StateReport};
use crate::transport::TionTransportManager;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};

pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// Retained state reports
    pub state: String,
    /// Inbound partial updates
    pub control: String,
    pub availability: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Topics {
            state: format!("{prefix}/state"),
            control: format!("{prefix}/control"),
            availability: format!("{prefix}/availability"),
        }
    }
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
pub fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;
    anyhow::ensure!(!host.is_empty(), "MQTT URL is missing a host");

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}

pub fn options(client_id: &str, host: &str, port: u16, topics: &Topics) -> MqttOptions {
    let mut opts = MqttOptions::new(client_id, host, port);
    opts.set_keep_alive(Duration::from_secs(30));
    opts.set_last_will(LastWill::new(&topics.availability, OFFLINE, QoS::AtLeastOnce, true));
    opts
}

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) -> Result<()> {
    let json = serde_json::to_string(payload).context("Failed to serialize MQTT payload")?;
    client
        .publish(topic, QoS::AtLeastOnce, retain, json)
        .await
        .with_context(|| format!("Failed to publish to {topic}"))
}

/// Publishes state reports to the state topic
pub struct MqttNotifier {
    client: AsyncClient,
    topic: String,
}

impl MqttNotifier {
    pub fn new(client: AsyncClient, topic: impl Into<String>) -> Self {
        MqttNotifier {
            client,
            topic: topic.into(),
        }
    }
}

impl StateNotifier for MqttNotifier {
    async fn state_changed(&self, report: &StateReport) -> Result<()> {
        publish_json(&self.client, &self.topic, report, true).await
    }
}

/// Run the bridge until `shutdown` resolves, then announce `offline` and close the broker session.
pub async fn run<M, N>(
    handler: Arc<CommandHandler<M, N>>,
    client: AsyncClient,
    mut eventloop: EventLoop,
    topics: Topics,
    poll: Option<Duration>,
    shutdown: impl Future<Output = ()> + Send,
) where
    M: TionTransportManager,
    N: StateNotifier,
{
    let poller = poll.map(|every| {
        let handler = Arc::clone(&handler);
        let client = client.clone();
        let topic = topics.state.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                match handler.handle_read().await {
                    Ok(report) => {
                        if let Err(e) = publish_json(&client, &topic, &report, true).await {
                            error!("{:#}", e);
                        }
                    }
                    Err(e) => warn!("Status poll failed: {}", e),
                }
            }
        })
    });

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // rumqttc does not resubscribe after a broker reconnect
                        info!("MQTT: connected, subscribing to {}", topics.control);
                        if let Err(e) = client.subscribe(&topics.control, QoS::ExactlyOnce).await {
                            error!("Failed to subscribe to {}: {}", topics.control, e);
                        }
                        if let Err(e) = client.publish(&topics.availability, QoS::AtLeastOnce, true, ONLINE).await {
                            error!("Failed to publish availability: {}", e);
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) if msg.topic == topics.control => {
                        dispatch_control(&handler, &msg.payload);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT event loop error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    if let Some(poller) = poller {
        poller.abort();
    }
    if let Err(e) = client.publish(&topics.availability, QoS::AtLeastOnce, true, OFFLINE).await {
        warn!("Failed to publish availability: {}", e);
    }
    if let Err(e) = client.disconnect().await {
        warn!("Failed to disconnect from broker: {}", e);
    }
    let drain = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };
    if timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        warn!("Broker did not acknowledge shutdown in time");
    }
}

fn dispatch_control<M, N>(handler: &Arc<CommandHandler<M, N>>, payload: &[u8])
where
    M: TionTransportManager,
    N: StateNotifier,
{
    let request: PartialUpdate = match serde_json::from_slice(payload) {
        Ok(request) => request,
        Err(e) => {
            warn!("Failed to parse control message: {}", e);
            return;
        }
    };
    debug!(?request, "control request");
    let handler = Arc::clone(handler);
    tokio::spawn(async move {
        match handler.handle_update(request).await {
            Ok(applied) => info!(applied, "Control done"),
            Err(e) => error!("Control request failed: {}", e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_from_prefix() {
        let topics = Topics::new("home/tion/");
        assert_eq!(topics.state, "home/tion/state");
        assert_eq!(topics.control, "home/tion/control");
        assert_eq!(topics.availability, "home/tion/availability");
    }

    #[test]
    fn parses_broker_urls() {
        assert_eq!(parse_mqtt_url("mqtt://broker.lan:1883").unwrap(), ("broker.lan".to_string(), 1883));
        assert_eq!(parse_mqtt_url("tcp://10.0.0.2:8883").unwrap(), ("10.0.0.2".to_string(), 8883));
        assert_eq!(parse_mqtt_url("localhost:1884").unwrap(), ("localhost".to_string(), 1884));
        assert!(parse_mqtt_url("mqtt://broker.lan").is_err());
        assert!(parse_mqtt_url("mqtt://broker.lan:http").is_err());
        assert!(parse_mqtt_url("mqtt://:1883").is_err());
    }
}
