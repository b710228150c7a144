//! Command dispatch
//!
//! Sends a command to one station over the broker when it is connected and
//! over the station's direct connection otherwise.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BridgeError, Result};
use crate::processor::ProcessorHandle;
use crate::protocols::DeviceCommand;
use crate::transport::BrokerLink;

/// Channel a command went out on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Broker,
    Direct,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Broker => write!(f, "broker"),
            Channel::Direct => write!(f, "direct"),
        }
    }
}

/// Successful dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub status: String,
    pub channel: Channel,
    pub command: String,
}

impl Delivery {
    fn sent(channel: Channel, command: &DeviceCommand) -> Self {
        Self {
            status: "command_sent".to_string(),
            channel,
            command: command.command.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    broker: Arc<dyn BrokerLink>,
    processor: ProcessorHandle,
    namespace: String,
}

impl Dispatcher {
    pub fn new(
        broker: Arc<dyn BrokerLink>,
        processor: ProcessorHandle,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            processor,
            namespace: namespace.into(),
        }
    }

    pub fn broker_connected(&self) -> bool {
        self.broker.is_connected()
    }

    pub fn command_topic(&self, serial: &str) -> String {
        format!("{}/devices/{}/command", self.namespace, serial)
    }

    /// Deliver `command` to station `serial`
    pub async fn send(&self, serial: &str, command: &DeviceCommand) -> Result<Delivery> {
        let text = serde_json::to_string(command)?;

        if self.broker.is_connected() {
            let topic = self.command_topic(serial);
            match self.broker.publish(&topic, text.clone().into_bytes()).await {
                Ok(()) => {
                    info!("Sent {} to {} via broker", command.command, serial);
                    return Ok(Delivery::sent(Channel::Broker, command));
                },
                Err(e) => warn!("Broker publish to {} failed: {}, trying direct", serial, e),
            }
        } else {
            warn!("Broker down, trying direct connection for {}", serial);
        }

        if self.processor.send_direct(serial, text).await {
            info!("Sent {} to {} via direct connection", command.command, serial);
            return Ok(Delivery::sent(Channel::Direct, command));
        }

        warn!("Station {} unreachable on every channel", serial);
        Err(BridgeError::unreachable(serial))
    }
}
