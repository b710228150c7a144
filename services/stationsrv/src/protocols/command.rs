//! Device command assembly
//!
//! Picks the encoder for a chip family and wraps encoded frames into the JSON
//! command envelope the station agent executes.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ubx, unicore};
use crate::error::{BridgeError, Result};

/// Fixed-LLA accuracy when the request leaves it out
pub const DEFAULT_FIXED_ACCURACY_M: f64 = 10.0;

/// Receiver chip family, selected by the dashboard's sensor type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipFamily {
    /// u-blox, binary UBX frames
    Ublox,
    /// Unicore, ASCII commands
    Unicore,
}

impl FromStr for ChipFamily {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ublox" => Ok(ChipFamily::Ublox),
            "unicorecomm" | "unicore" => Ok(ChipFamily::Unicore),
            other => Err(BridgeError::validation(format!(
                "Unknown sensor type: {other}"
            ))),
        }
    }
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipFamily::Ublox => write!(f, "Ublox"),
            ChipFamily::Unicore => write!(f, "Unicorecomm"),
        }
    }
}

/// Survey-in command frames in transmit order
pub fn build_survey_in(family: ChipFamily, duration_secs: u32, accuracy_m: f64) -> Vec<Vec<u8>> {
    match family {
        ChipFamily::Ublox => ubx::survey_in(duration_secs, accuracy_m),
        ChipFamily::Unicore => unicore::survey_in(duration_secs, accuracy_m),
    }
}

/// Fixed-position command frames in transmit order
pub fn build_fixed_lla(
    family: ChipFamily,
    lat: f64,
    lon: f64,
    alt_m: f64,
    accuracy_m: f64,
) -> Vec<Vec<u8>> {
    match family {
        // Unicore takes no accuracy for a fixed base
        ChipFamily::Ublox => ubx::fixed_lla(lat, lon, alt_m, accuracy_m),
        ChipFamily::Unicore => unicore::fixed_lla(lat, lon, alt_m),
    }
}

// ============================================================================
// Command envelope
// ============================================================================

/// JSON command sent to a station over either channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub command: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_config: Option<Value>,
}

impl DeviceCommand {
    pub const EXECUTE_RAW_COMMANDS: &'static str = "EXECUTE_RAW_COMMANDS";
    pub const LOCK_DEVICE: &'static str = "LOCK_DEVICE";
    pub const UNLOCK_DEVICE: &'static str = "UNLOCK_DEVICE";
    pub const DELETE_DEVICE: &'static str = "DELETE_DEVICE";

    pub fn new(command: impl Into<String>, payload: Value) -> Self {
        Self {
            command: command.into(),
            payload,
            original_config: None,
        }
    }

    pub fn lock() -> Self {
        Self::new(Self::LOCK_DEVICE, json!({}))
    }

    pub fn unlock() -> Self {
        Self::new(Self::UNLOCK_DEVICE, json!({}))
    }

    /// Factory reset: the agent wipes its configuration and reboots
    pub fn factory_reset() -> Self {
        Self::new(Self::DELETE_DEVICE, json!({}))
    }

    /// Raw receiver frames, base64-encoded for the JSON transport
    pub fn raw_commands(frames: &[Vec<u8>], original_config: Option<Value>) -> Self {
        let encoded: Vec<String> = frames
            .iter()
            .filter(|frame| !frame.is_empty())
            .map(|frame| STANDARD.encode(frame))
            .collect();
        Self {
            command: Self::EXECUTE_RAW_COMMANDS.to_string(),
            payload: json!({ "commands_b64": encoded }),
            original_config,
        }
    }

    /// Number of raw frames carried, zero for non-raw commands
    pub fn frame_count(&self) -> usize {
        self.payload
            .get("commands_b64")
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }
}

// ============================================================================
// Chip configuration request
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChipParams {
    pub base_setup_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survey_in_duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survey_in_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coords: Option<Coords>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

/// Base station setup as submitted by the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChipConfigRequest {
    pub sensor_type: String,
    pub mode: String,
    pub params: ChipParams,
}

impl ChipConfigRequest {
    /// Encode the request into an `EXECUTE_RAW_COMMANDS` command, echoing the
    /// request under `original_config`
    pub fn to_command(&self) -> Result<DeviceCommand> {
        let family: ChipFamily = self.sensor_type.parse()?;
        if self.mode != "BASE" {
            return Err(BridgeError::validation(format!(
                "Unsupported chip mode: {}",
                self.mode
            )));
        }

        let frames = match self.params.base_setup_method.as_str() {
            "SURVEY_IN" => {
                let duration = self
                    .params
                    .survey_in_duration
                    .ok_or_else(|| BridgeError::validation("survey_in_duration is required"))?;
                let accuracy = self
                    .params
                    .survey_in_accuracy
                    .ok_or_else(|| BridgeError::validation("survey_in_accuracy is required"))?;
                build_survey_in(family, duration, accuracy)
            },
            "FIXED_LLA" => {
                let coords = self
                    .params
                    .coords
                    .ok_or_else(|| BridgeError::validation("coords are required for FIXED_LLA"))?;
                let accuracy = self.params.accuracy.unwrap_or(DEFAULT_FIXED_ACCURACY_M);
                build_fixed_lla(family, coords.lat, coords.lon, coords.alt, accuracy)
            },
            other => {
                return Err(BridgeError::validation(format!(
                    "Unsupported base setup method: {other}"
                )))
            },
        };

        let original = serde_json::to_value(self)?;
        Ok(DeviceCommand::raw_commands(&frames, Some(original)))
    }
}
