//! Unified error handling for station fleet services
//!
//! Service crates keep their own narrow error enums and convert into
//! [`ServiceError`] at the process boundary, where it maps onto an HTTP status
//! and the JSON error body the dashboard renders.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ErrorInfo - body of every failed API response
// ============================================================================

/// JSON error body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// HTTP status
    pub code: u16,
    /// Stable machine-readable kind, e.g. `DEVICE_UNREACHABLE`
    pub kind: String,
    pub message: String,
    /// Operator-facing explanation, when there is more to say than `message`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorInfo {
    pub fn new(code: u16, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: kind.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

// ============================================================================
// ServiceError
// ============================================================================

/// Error type shared by station fleet services
#[derive(Debug, Error)]
pub enum ServiceError {
    // Configuration and startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    // Device side
    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Device unreachable: {serial} (tried {attempted})")]
    DeviceUnreachable { serial: String, attempted: String },

    // Request side
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    // Dependencies
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    // Everything else
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using ServiceError
pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    /// HTTP status for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) | Self::Validation(_) => 400,
            Self::Communication(_) => 502,
            Self::DeviceUnreachable { .. } | Self::ServiceUnavailable(_) | Self::StartupFailed(_) => {
                503
            },
            Self::Configuration(_)
            | Self::Storage(_)
            | Self::Io(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Whether the same request may succeed later without changes
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Communication(_) | Self::DeviceUnreachable { .. } | Self::ServiceUnavailable(_)
        )
    }

    /// Stable machine-readable kind
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::StartupFailed(_) => "STARTUP_FAILED",
            Self::Communication(_) => "COMMUNICATION_ERROR",
            Self::DeviceUnreachable { .. } => "DEVICE_UNREACHABLE",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Error body for HTTP responses
    pub fn to_error_info(&self) -> ErrorInfo {
        let info = ErrorInfo::new(self.status_code(), self.error_code(), self.to_string());
        match self {
            Self::Validation(msg) | Self::BadRequest(msg) => info.with_details(msg.clone()),
            Self::DeviceUnreachable { serial, attempted } => info.with_details(format!(
                "Cannot send command to '{serial}'. Both {attempted} are unavailable."
            )),
            _ => info,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_maps_to_service_unavailable() {
        let err = ServiceError::DeviceUnreachable {
            serial: "CORS0001".to_string(),
            attempted: "broker and direct".to_string(),
        };
        assert_eq!(err.status_code(), 503);
        assert!(err.is_retryable());

        let info = err.to_error_info();
        assert_eq!(info.code, 503);
        assert_eq!(info.kind, "DEVICE_UNREACHABLE");
        assert!(info.details.unwrap().contains("CORS0001"));
    }

    #[test]
    fn test_validation_is_bad_request() {
        let err = ServiceError::Validation("unknown sensor type Trimble".to_string());
        assert_eq!(err.status_code(), 400);
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_error_info().details.as_deref(),
            Some("unknown sensor type Trimble")
        );
    }

    #[test]
    fn test_communication_error_is_bad_gateway() {
        let err = ServiceError::Communication("MQTT: request queue full".to_string());
        assert_eq!(err.status_code(), 502);
        assert!(err.is_retryable());
        assert_eq!(err.error_code(), "COMMUNICATION_ERROR");
    }

    #[test]
    fn test_error_info_skips_missing_details() {
        let info = ServiceError::Internal("boom".to_string()).to_error_info();
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["code"], 500);
        assert_eq!(json["kind"], "INTERNAL_ERROR");
        assert!(json.get("details").is_none());
    }
}
