//! MQTT bridge
//!
//! One long-lived `rumqttc` client. The event loop runs in its own task and
//! only hands publishes over to the event processor; it never touches bridge
//! state. Subscriptions are renewed on every ConnAck since sessions are clean.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::{Backoff, ReconnectPolicy};
use super::BrokerLink;
use crate::config::MqttConfig;
use crate::error::{BridgeError, Result};
use crate::processor::{
    ProcessorHandle, TOPIC_BASE_CONFIG_STATE, TOPIC_RAW_DATA, TOPIC_SERVICE_CONFIG_STATE,
    TOPIC_STATUS,
};
use crate::resilience::CircuitBreaker;

/// Client options from configuration
pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username, password);
    }

    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    options.set_clean_session(true);
    options
}

/// Telemetry subscriptions for the fleet under `namespace`
pub fn subscriptions(namespace: &str) -> Vec<SubscribeFilter> {
    let filter = |kind: &str| format!("{namespace}/devices/+/{kind}");
    vec![
        SubscribeFilter::new(filter(TOPIC_STATUS), QoS::AtLeastOnce),
        SubscribeFilter::new(filter(TOPIC_SERVICE_CONFIG_STATE), QoS::AtLeastOnce),
        SubscribeFilter::new(filter(TOPIC_BASE_CONFIG_STATE), QoS::AtLeastOnce),
        SubscribeFilter::new(filter(TOPIC_RAW_DATA), QoS::AtMostOnce),
    ]
}

/// Publish side of the broker connection
pub struct MqttBridge {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    breaker: Arc<CircuitBreaker>,
}

impl MqttBridge {
    /// Client plus the event loop that drives it
    pub fn new(config: &MqttConfig, breaker: Arc<CircuitBreaker>) -> (Self, EventLoop) {
        let (client, eventloop) =
            AsyncClient::new(mqtt_options(config), config.request_capacity.max(1));
        let bridge = Self {
            client,
            connected: Arc::new(AtomicBool::new(false)),
            breaker,
        };
        (bridge, eventloop)
    }

    /// Create the client and spawn its event loop
    pub fn start(
        config: &MqttConfig,
        breaker: Arc<CircuitBreaker>,
        processor: ProcessorHandle,
        cancel: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (bridge, eventloop) = Self::new(config, breaker);
        info!(
            "Connecting to MQTT broker {}:{} as {}",
            config.host, config.port, config.client_id
        );

        let task = tokio::spawn(run_event_loop(
            eventloop,
            bridge.client.clone(),
            Arc::clone(&bridge.connected),
            subscriptions(&config.namespace),
            Backoff::new(ReconnectPolicy::from_secs(
                config.reconnect_min_secs,
                config.reconnect_max_secs,
            )),
            processor,
            cancel,
        ));

        (Arc::new(bridge), task)
    }
}

#[async_trait]
impl BrokerLink for MqttBridge {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::connection("MQTT broker not connected"));
        }

        let client = &self.client;
        self.breaker
            .call(|| async move {
                client
                    .try_publish(topic, QoS::AtLeastOnce, false, payload)
                    .map_err(BridgeError::from)
            })
            .await?;

        debug!("Published to {}", topic);
        Ok(())
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    filters: Vec<SubscribeFilter>,
    mut backoff: Backoff,
    processor: ProcessorHandle,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::Release);
                backoff.reset();
                info!("MQTT connected");
                if let Err(e) = client.try_subscribe_many(filters.clone()) {
                    error!("MQTT subscribe failed: {}", e);
                }
            },
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if processor
                    .broker_message(publish.topic, publish.payload)
                    .is_err()
                {
                    warn!("Event processor gone, stopping MQTT loop");
                    break;
                }
            },
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::Release);
                warn!("MQTT broker sent disconnect");
            },
            Ok(_) => {},
            Err(e) => {
                connected.store(false, Ordering::Release);
                let delay = backoff.next_delay();
                warn!(
                    "MQTT connection error: {} (attempt {}, retry in {:?})",
                    e,
                    backoff.attempts(),
                    delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {},
                }
            },
        }
    }

    connected.store(false, Ordering::Release);
    if let Err(e) = client.try_disconnect() {
        debug!("MQTT disconnect: {}", e);
    }
    info!("MQTT loop stopped");
}
