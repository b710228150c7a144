//! Broker transport

pub mod backoff;
pub mod mqtt;

use async_trait::async_trait;

use crate::error::Result;

pub use backoff::{Backoff, ReconnectPolicy};
pub use mqtt::MqttBridge;

/// Outbound side of the broker connection as the dispatcher sees it
#[async_trait]
pub trait BrokerLink: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Publish at QoS 1, not retained
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}
