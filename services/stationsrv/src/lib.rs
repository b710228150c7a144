//! Station telemetry and command bridge
//!
//! Connects a fleet of GNSS reference stations to dashboard observers.
//! Telemetry arrives over MQTT or a station's direct websocket, is reconciled
//! into station records and fanned out to observers. Commands go back to a
//! station over the broker, falling back to its direct connection.
//!
//! - `protocols`: NMEA decoding, UBX and Unicore command encoding
//! - `processor`: the task owning registries, decoders and reconciliation
//! - `transport`: MQTT client and reconnect backoff
//! - `dispatcher`: channel selection for outbound commands
//! - `api`: axum routes and websocket adapters

pub mod api;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod processor;
pub mod protocols;
pub mod registry;
pub mod resilience;
pub mod transport;

pub use config::Config;
pub use device::{Device, MemoryReconciler, StateReconciler, Telemetry};
pub use dispatcher::{Channel, Delivery, Dispatcher};
pub use error::{BridgeError, Result};
pub use events::BroadcastEvent;
pub use processor::{EventProcessor, ProcessorHandle, ProcessorStats};
pub use transport::{BrokerLink, MqttBridge};
