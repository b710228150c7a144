//! Error handling for the station bridge
//!
//! `BridgeError` covers everything the bridge can fail with. It converts into
//! `errors::ServiceError` at the binary and HTTP boundary.

use errors::ServiceError;
use thiserror::Error;

/// Station bridge error type
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Broker or direct connection errors
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Payload handling errors (JSON, field types)
    #[error("Data error: {0}")]
    DataError(String),

    /// State reconciler errors
    #[error("Storage error: {0}")]
    StorageError(String),

    /// A circuit breaker rejected the call without invoking it
    #[error("Circuit breaker '{0}' is open")]
    BreakerOpen(String),

    /// Neither the broker nor a direct connection could take the command
    #[error("Device '{serial}' unreachable via {}", attempted.join(", "))]
    DeviceUnreachable {
        serial: String,
        attempted: Vec<String>,
    },

    /// Validation errors (unknown chip family, bad command parameters)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Internal errors (processor gone)
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the station bridge
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn config(msg: impl Into<String>) -> Self {
        BridgeError::ConfigError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        BridgeError::ConnectionError(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        BridgeError::DataError(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        BridgeError::StorageError(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        BridgeError::ValidationError(msg.into())
    }

    /// Both delivery channels failed for `serial`
    pub fn unreachable(serial: impl Into<String>) -> Self {
        BridgeError::DeviceUnreachable {
            serial: serial.into(),
            attempted: vec!["broker".to_string(), "direct".to_string()],
        }
    }

    pub fn processor_gone() -> Self {
        BridgeError::InternalError("Event processor is not running".to_string())
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::ConnectionError(format!("IO: {err}"))
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::DataError(format!("JSON: {err}"))
    }
}

impl From<figment::Error> for BridgeError {
    fn from(err: figment::Error) -> Self {
        BridgeError::ConfigError(err.to_string())
    }
}

impl From<rumqttc::ClientError> for BridgeError {
    fn from(err: rumqttc::ClientError) -> Self {
        BridgeError::ConnectionError(format!("MQTT: {err}"))
    }
}

impl From<BridgeError> for ServiceError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::ConfigError(msg) => ServiceError::Configuration(msg),
            BridgeError::ConnectionError(msg) => ServiceError::Communication(msg),
            BridgeError::DataError(msg) => ServiceError::BadRequest(msg),
            BridgeError::StorageError(msg) => ServiceError::Storage(msg),
            BridgeError::BreakerOpen(name) => {
                ServiceError::ServiceUnavailable(format!("{name} circuit open"))
            },
            BridgeError::DeviceUnreachable { serial, attempted } => {
                ServiceError::DeviceUnreachable {
                    serial,
                    attempted: attempted.join(" and "),
                }
            },
            BridgeError::ValidationError(msg) => ServiceError::Validation(msg),
            BridgeError::InternalError(msg) => ServiceError::Internal(msg),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_names_serial_and_channels() {
        let err = BridgeError::unreachable("CORS0001");
        assert_eq!(
            err.to_string(),
            "Device 'CORS0001' unreachable via broker, direct"
        );

        let service: ServiceError = err.into();
        assert_eq!(service.status_code(), 503);
        let details = service.to_error_info().details.unwrap();
        assert_eq!(
            details,
            "Cannot send command to 'CORS0001'. Both broker and direct are unavailable."
        );
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let service: ServiceError = BridgeError::validation("unknown sensor type").into();
        assert_eq!(service.status_code(), 400);
    }

    #[test]
    fn test_json_error_conversion() {
        let err: BridgeError = serde_json::from_str::<serde_json::Value>("{bad")
            .unwrap_err()
            .into();
        assert!(matches!(err, BridgeError::DataError(msg) if msg.starts_with("JSON:")));
    }
}
