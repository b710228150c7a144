//! Station records and the state reconciler seam
//!
//! Persistence lives outside the bridge. The bridge hands every accepted
//! telemetry report to a [`StateReconciler`] and broadcasts whatever record
//! comes back. [`MemoryReconciler`] is the in-process implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{BridgeError, Result};

/// Station lifecycle status as reported by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
    Rebooting,
    RebootingForReset,
    #[default]
    #[serde(other)]
    Unknown,
}

impl DeviceStatus {
    /// Mid-reboot stations keep their status when the connection drops
    pub fn is_transitioning(self) -> bool {
        matches!(self, DeviceStatus::Rebooting | DeviceStatus::RebootingForReset)
    }
}

/// Normalized station record, `status_update.data` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub serial: String,
    pub name: String,
    pub status: DeviceStatus,
    /// Last report, epoch seconds
    pub timestamp: i64,
    /// Sum of per-mountpoint byte rates
    pub bps: i64,
    pub detected_chip_type: String,
    pub base_config: Value,
    pub service_config: Value,
    /// Owning user; never sent to observers
    #[serde(skip)]
    pub user_id: Option<i64>,
    pub is_locked: bool,
    pub ntrip_connected: bool,
    pub ntrip_status: Value,
}

/// `Pi-` plus the last four characters of the serial
pub fn default_name(serial: &str) -> String {
    let tail: String = {
        let chars: Vec<char> = serial.chars().collect();
        chars[chars.len().saturating_sub(4)..].iter().collect()
    };
    format!("Pi-{tail}")
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn default_true() -> bool {
    true
}

/// Agents report `time.time()`, which may carry a fraction
fn de_epoch_secs<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.map(|secs| secs as i64))
}

/// Telemetry report from a station agent
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Telemetry {
    #[serde(default)]
    pub serial: String,
    pub name: Option<String>,
    pub status: Option<DeviceStatus>,
    #[serde(default, deserialize_with = "de_epoch_secs")]
    pub timestamp: Option<i64>,
    pub detected_chip_type: Option<String>,
    pub base_config: Option<Value>,
    pub service_config: Option<Value>,
    pub ntrip_connected: Option<bool>,
    pub ntrip_status: Option<Value>,
    pub ntrip_stats: Option<Value>,
    pub is_locked: Option<bool>,
    /// `false` from an already known station means it was factory reset
    #[serde(default = "default_true")]
    pub is_provisioned: bool,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            serial: String::new(),
            name: None,
            status: None,
            timestamp: None,
            detected_chip_type: None,
            base_config: None,
            service_config: None,
            ntrip_connected: None,
            ntrip_status: None,
            ntrip_stats: None,
            is_locked: None,
            is_provisioned: true,
        }
    }
}

impl Telemetry {
    /// Sum of the per-mountpoint rates in `ntrip_stats`
    pub fn bps(&self) -> i64 {
        match &self.ntrip_stats {
            Some(Value::Object(stats)) => {
                stats.values().filter_map(Value::as_f64).sum::<f64>() as i64
            },
            _ => 0,
        }
    }

    fn into_new_device(self) -> Device {
        let bps = self.bps();
        Device {
            name: self.name.unwrap_or_else(|| default_name(&self.serial)),
            status: self.status.unwrap_or_default(),
            timestamp: self.timestamp.unwrap_or(0),
            bps,
            detected_chip_type: self
                .detected_chip_type
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            base_config: self.base_config.unwrap_or_else(empty_object),
            service_config: self.service_config.unwrap_or_else(empty_object),
            user_id: None,
            is_locked: self.is_locked.unwrap_or(false),
            ntrip_connected: self.ntrip_connected.unwrap_or(false),
            ntrip_status: self.ntrip_status.unwrap_or_else(empty_object),
            serial: self.serial,
        }
    }

    /// Last-write-wins update; unreported fields fall back to their defaults
    fn update(self, device: &mut Device) {
        let user_id = device.user_id;
        *device = self.into_new_device();
        device.user_id = user_id;
    }

    /// Factory reset: wipe configuration, ownership and NTRIP state, keep the lock
    fn reset(self, device: &mut Device) {
        device.name = default_name(&device.serial);
        device.status = self.status.unwrap_or_default();
        device.timestamp = self.timestamp.unwrap_or(0);
        device.detected_chip_type = self
            .detected_chip_type
            .unwrap_or_else(|| "UNKNOWN".to_string());
        device.base_config = empty_object();
        device.service_config = empty_object();
        device.user_id = None;
        device.bps = 0;
        device.ntrip_connected = false;
        device.ntrip_status = empty_object();
    }
}

/// Storage collaborator applying telemetry to station records.
///
/// Implementations must serialize writes for the same serial; calls for
/// different serials may run concurrently.
#[async_trait]
pub trait StateReconciler: Send + Sync {
    /// Upsert, or reset when an existing station reports `is_provisioned: false`
    async fn apply(&self, telemetry: Telemetry) -> Result<Device>;

    /// Direct connection dropped: mark offline with zero throughput and no
    /// NTRIP link. Returns `None` when the station is unknown or rebooting.
    async fn mark_offline(&self, serial: &str) -> Result<Option<Device>>;
}

/// In-memory reconciler; the DashMap entry lock serializes writes per serial
#[derive(Debug, Default)]
pub struct MemoryReconciler {
    devices: DashMap<String, Device>,
}

impl MemoryReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, serial: &str) -> Option<Device> {
        self.devices.get(serial).map(|entry| entry.value().clone())
    }

    /// Seed or overwrite a record, e.g. with ownership assigned elsewhere
    pub fn insert(&self, device: Device) {
        self.devices.insert(device.serial.clone(), device);
    }

    pub fn remove(&self, serial: &str) -> Option<Device> {
        self.devices.remove(serial).map(|(_, device)| device)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[async_trait]
impl StateReconciler for MemoryReconciler {
    async fn apply(&self, telemetry: Telemetry) -> Result<Device> {
        if telemetry.serial.is_empty() {
            return Err(BridgeError::data("telemetry without serial"));
        }

        let serial = telemetry.serial.clone();
        let device = match self.devices.entry(serial) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let device = entry.get_mut();
                if telemetry.is_provisioned {
                    telemetry.update(device);
                } else {
                    info!("Station {} reported factory reset, wiping config", device.serial);
                    telemetry.reset(device);
                }
                device.clone()
            },
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                debug!("New station {}", entry.key());
                entry.insert(telemetry.into_new_device()).value().clone()
            },
        };
        Ok(device)
    }

    async fn mark_offline(&self, serial: &str) -> Result<Option<Device>> {
        let Some(mut device) = self.devices.get_mut(serial) else {
            return Ok(None);
        };
        if device.status.is_transitioning() {
            debug!("Station {} is {:?}, keeping status", serial, device.status);
            return Ok(None);
        }
        device.status = DeviceStatus::Offline;
        device.bps = 0;
        device.ntrip_connected = false;
        Ok(Some(device.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    fn telemetry(value: Value) -> Telemetry {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_default_name() {
        assert_eq!(default_name("10000000abcd1234"), "Pi-1234");
        assert_eq!(default_name("ab"), "Pi-ab");
    }

    #[test]
    fn test_bps_sums_mountpoints() {
        let t = telemetry(json!({"serial": "S1", "ntrip_stats": {"MP1": 1200, "MP2": 800}}));
        assert_eq!(t.bps(), 2000);
        let t = telemetry(json!({"serial": "S1", "ntrip_stats": []}));
        assert_eq!(t.bps(), 0);
    }

    #[test]
    fn test_unknown_status_and_fractional_timestamp() {
        let t = telemetry(json!({"serial": "S1", "status": "provisioning", "timestamp": 1700000000.75}));
        assert_eq!(t.status, Some(DeviceStatus::Unknown));
        assert_eq!(t.timestamp, Some(1_700_000_000));
        assert!(t.is_provisioned);
    }

    #[tokio::test]
    async fn test_create_with_defaults() {
        let store = MemoryReconciler::new();
        let device = store
            .apply(telemetry(json!({"serial": "CORS00012345", "status": "online"})))
            .await
            .unwrap();
        assert_eq!(device.name, "Pi-2345");
        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(device.detected_chip_type, "UNKNOWN");
        assert_eq!(device.base_config, json!({}));
        assert!(!device.is_locked);
    }

    #[tokio::test]
    async fn test_reset_wipes_config_but_keeps_lock() {
        let store = MemoryReconciler::new();
        store
            .apply(telemetry(json!({
                "serial": "CORS0001",
                "name": "Rooftop",
                "status": "online",
                "is_locked": true,
                "base_config": {"mode": "FIXED"},
                "ntrip_connected": true,
                "ntrip_stats": {"MP1": 500}
            })))
            .await
            .unwrap();
        let mut owned = store.get("CORS0001").unwrap();
        owned.user_id = Some(7);
        store.insert(owned);

        let device = store
            .apply(telemetry(json!({
                "serial": "CORS0001",
                "status": "online",
                "is_provisioned": false,
                "detected_chip_type": "UBLOX"
            })))
            .await
            .unwrap();

        assert_eq!(device.name, "Pi-0001");
        assert!(device.is_locked);
        assert_eq!(device.base_config, json!({}));
        assert_eq!(device.user_id, None);
        assert_eq!(device.bps, 0);
        assert!(!device.ntrip_connected);
        assert_eq!(device.detected_chip_type, "UBLOX");
    }

    #[tokio::test]
    async fn test_unprovisioned_new_station_is_plain_create() {
        let store = MemoryReconciler::new();
        let device = store
            .apply(telemetry(json!({"serial": "NEW1", "name": "Fresh", "is_provisioned": false})))
            .await
            .unwrap();
        assert_eq!(device.name, "Fresh");
    }

    #[tokio::test]
    async fn test_update_keeps_owner() {
        let store = MemoryReconciler::new();
        store
            .apply(telemetry(json!({"serial": "S1"})))
            .await
            .unwrap();
        let mut device = store.get("S1").unwrap();
        device.user_id = Some(3);
        store.insert(device);

        let device = store
            .apply(telemetry(json!({"serial": "S1", "ntrip_stats": {"A": 10}})))
            .await
            .unwrap();
        assert_eq!(device.user_id, Some(3));
        assert_eq!(device.bps, 10);
    }

    #[tokio::test]
    async fn test_mark_offline_skips_rebooting() {
        let store = MemoryReconciler::new();
        store
            .apply(telemetry(json!({"serial": "S1", "status": "online", "ntrip_connected": true, "ntrip_stats": {"A": 5}})))
            .await
            .unwrap();
        let device = store.mark_offline("S1").await.unwrap().unwrap();
        assert_eq!(device.status, DeviceStatus::Offline);
        assert_eq!(device.bps, 0);
        assert!(!device.ntrip_connected);

        store
            .apply(telemetry(json!({"serial": "S2", "status": "rebooting_for_reset"})))
            .await
            .unwrap();
        assert!(store.mark_offline("S2").await.unwrap().is_none());
        assert_eq!(store.get("S2").unwrap().status, DeviceStatus::RebootingForReset);
        assert!(store.mark_offline("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_serial_rejected() {
        let store = MemoryReconciler::new();
        assert!(store.apply(telemetry(json!({"status": "online"}))).await.is_err());
    }

    #[test]
    fn test_device_wire_shape_hides_owner() {
        let device = Device {
            user_id: Some(9),
            ..Telemetry {
                serial: "S1".to_string(),
                ..Default::default()
            }
            .into_new_device()
        };
        let json = serde_json::to_value(&device).unwrap();
        assert!(json.get("user_id").is_none());
        assert_eq!(json["status"], "unknown");
        assert_eq!(json["ntrip_status"], json!({}));
    }
}
