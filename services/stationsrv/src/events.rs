//! Observer wire contract
//!
//! Every frame sent to dashboard observers is one of these, tagged by `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::Device;
use crate::protocols::NmeaReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastEvent {
    /// Station record after reconciliation
    StatusUpdate { data: Device },
    /// Decoded positioning data from a station's raw stream
    NmeaUpdate { serial: String, data: NmeaReport },
    /// Agent-reported base configuration, forwarded verbatim
    BaseConfigState { serial: String, data: Value },
    /// Agent-reported service configuration, forwarded verbatim
    ServiceConfigState { serial: String, data: Value },
    /// Record removed by the management layer
    DeviceDeleted { serial: String },
}

impl BroadcastEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            BroadcastEvent::StatusUpdate { .. } => "status_update",
            BroadcastEvent::NmeaUpdate { .. } => "nmea_update",
            BroadcastEvent::BaseConfigState { .. } => "base_config_state",
            BroadcastEvent::ServiceConfigState { .. } => "service_config_state",
            BroadcastEvent::DeviceDeleted { .. } => "device_deleted",
        }
    }

    pub fn serial(&self) -> &str {
        match self {
            BroadcastEvent::StatusUpdate { data } => &data.serial,
            BroadcastEvent::NmeaUpdate { serial, .. }
            | BroadcastEvent::BaseConfigState { serial, .. }
            | BroadcastEvent::ServiceConfigState { serial, .. }
            | BroadcastEvent::DeviceDeleted { serial } => serial,
        }
    }
}
