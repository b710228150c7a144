//! Command routes and health
//!
//! Thin wrappers over the dispatcher. Authorization belongs to the
//! management layer in front of this service.

use axum::{
    extract::{Path, State},
    Json,
};
use errors::ServiceError;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiError, ApiResult, AppState};
use crate::dispatcher::{Channel, Delivery};
use crate::processor::ProcessorStats;
use crate::protocols::{ChipConfigRequest, DeviceCommand};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub broker_connected: bool,
    pub processor: ProcessorStats,
}

/// Reply for the named administrative commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub status: String,
    pub channel: Channel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChipConfigSent {
    pub status: String,
    pub channel: Channel,
    pub commands_sent: usize,
}

pub async fn health(State(state): State<AppState>) -> ApiResult<Health> {
    let processor = state.processor.stats().await?;
    Ok(Json(Health {
        status: "ok".to_string(),
        broker_connected: state.dispatcher.broker_connected(),
        processor,
    }))
}

/// `POST /api/devices/{serial}/commands`
pub async fn send_command(
    State(state): State<AppState>,
    Path(serial): Path<String>,
    Json(command): Json<DeviceCommand>,
) -> ApiResult<Delivery> {
    let delivery = state.dispatcher.send(&serial, &command).await?;
    Ok(Json(delivery))
}

/// `POST /api/devices/{serial}/configure-chip`
pub async fn configure_chip(
    State(state): State<AppState>,
    Path(serial): Path<String>,
    Json(request): Json<ChipConfigRequest>,
) -> ApiResult<ChipConfigSent> {
    let command = request.to_command()?;
    let commands_sent = command.frame_count();
    let delivery = state.dispatcher.send(&serial, &command).await?;
    info!(
        "Sent {} {} frames to {} via {}",
        commands_sent, request.sensor_type, serial, delivery.channel
    );
    Ok(Json(ChipConfigSent {
        status: "chip_config_sent".to_string(),
        channel: delivery.channel,
        commands_sent,
    }))
}

pub async fn lock(State(state): State<AppState>, Path(serial): Path<String>) -> ApiResult<CommandAck> {
    acknowledge(&state, &serial, DeviceCommand::lock(), "lock_command_sent").await
}

pub async fn unlock(
    State(state): State<AppState>,
    Path(serial): Path<String>,
) -> ApiResult<CommandAck> {
    acknowledge(&state, &serial, DeviceCommand::unlock(), "unlock_command_sent").await
}

/// Factory reset; the agent wipes its configuration and reboots
pub async fn reset(State(state): State<AppState>, Path(serial): Path<String>) -> ApiResult<CommandAck> {
    acknowledge(&state, &serial, DeviceCommand::factory_reset(), "reset_command_sent").await
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLevel {
    pub level: String,
}

/// `GET /api/log-level`
pub async fn get_log_level() -> ApiResult<LogLevel> {
    let level = common::logging::get_log_level()
        .ok_or_else(|| ApiError(ServiceError::ServiceUnavailable("logging not initialized".into())))?;
    Ok(Json(LogLevel { level }))
}

/// `PUT /api/log-level`, takes a level or a full filter directive
pub async fn set_log_level(Json(request): Json<LogLevel>) -> ApiResult<LogLevel> {
    common::logging::set_log_level(&request.level)
        .map_err(|e| ApiError(ServiceError::Validation(e)))?;
    Ok(Json(request))
}

async fn acknowledge(
    state: &AppState,
    serial: &str,
    command: DeviceCommand,
    status: &str,
) -> ApiResult<CommandAck> {
    let delivery = state.dispatcher.send(serial, &command).await?;
    info!("{} sent to {} via {}", command.command, serial, delivery.channel);
    Ok(Json(CommandAck {
        status: status.to_string(),
        channel: delivery.channel,
    }))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::device::MemoryReconciler;
    use crate::dispatcher::Dispatcher;
    use crate::error::Result;
    use crate::processor::{EventProcessor, ProcessorHandle};
    use crate::protocols::command::{ChipParams, Coords};
    use crate::registry::ChannelSink;
    use crate::resilience::{BreakerConfig, CircuitBreaker};
    use crate::transport::BrokerLink;
    use async_trait::async_trait;
    use axum::response::IntoResponse;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct OfflineBroker;

    #[async_trait]
    impl BrokerLink for OfflineBroker {
        fn is_connected(&self) -> bool {
            false
        }

        async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<()> {
            unreachable!("broker is offline")
        }
    }

    fn state() -> (AppState, ProcessorHandle) {
        let (processor, _task) = EventProcessor::spawn(
            "pi",
            Arc::new(MemoryReconciler::new()),
            Arc::new(CircuitBreaker::new("storage", BreakerConfig::default())),
            CancellationToken::new(),
        );
        let dispatcher = Dispatcher::new(Arc::new(OfflineBroker), processor.clone(), "pi");
        (AppState::new(processor.clone(), dispatcher), processor)
    }

    fn fixed_request(sensor_type: &str) -> ChipConfigRequest {
        ChipConfigRequest {
            sensor_type: sensor_type.to_string(),
            mode: "BASE".to_string(),
            params: ChipParams {
                base_setup_method: "FIXED_LLA".to_string(),
                survey_in_duration: None,
                survey_in_accuracy: None,
                coords: Some(Coords {
                    lat: 21.0285,
                    lon: 105.8542,
                    alt: 10.5,
                }),
                accuracy: None,
            },
        }
    }

    #[tokio::test]
    async fn test_configure_chip_over_direct_connection() {
        let (state, processor) = state();
        let (sink, mut rx) = ChannelSink::pair();
        processor.station_connected("S1".to_string(), Box::new(sink)).unwrap();

        let (reply, sent) = tokio::join!(
            configure_chip(State(state), Path("S1".to_string()), Json(fixed_request("UBLOX"))),
            rx.recv(),
        );
        let Json(reply) = reply.unwrap();
        assert_eq!(reply.status, "chip_config_sent");
        assert_eq!(reply.channel, Channel::Direct);
        assert_eq!(reply.commands_sent, 2);

        let sent: serde_json::Value = serde_json::from_str(&sent.unwrap()).unwrap();
        assert_eq!(sent["command"], "EXECUTE_RAW_COMMANDS");
        assert_eq!(sent["original_config"]["sensor_type"], "UBLOX");
        let first = STANDARD
            .decode(sent["payload"]["commands_b64"][0].as_str().unwrap())
            .unwrap();
        assert_eq!(&first[..2], &[0xB5, 0x62]);
    }

    #[tokio::test]
    async fn test_unknown_chip_is_bad_request() {
        let (state, _processor) = state();
        let err = configure_chip(
            State(state),
            Path("S1".to_string()),
            Json(fixed_request("Trimble")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), 400);
    }

    #[tokio::test]
    async fn test_lock_unreachable_is_503() {
        let (state, _processor) = state();
        let err = lock(State(state), Path("S1".to_string())).await.unwrap_err();
        assert_eq!(err.0.status_code(), 503);
        assert_eq!(err.into_response().status(), 503);
    }

    #[tokio::test]
    async fn test_reset_ack() {
        let (state, processor) = state();
        let (sink, mut rx) = ChannelSink::pair();
        processor.station_connected("S1".to_string(), Box::new(sink)).unwrap();

        let (ack, sent) = tokio::join!(reset(State(state), Path("S1".to_string())), rx.recv());
        let Json(ack) = ack.unwrap();
        assert_eq!(ack.status, "reset_command_sent");
        assert!(sent.unwrap().contains("DELETE_DEVICE"));
    }

    #[tokio::test]
    async fn test_log_level_without_subscriber() {
        // The test binary never installs the global subscriber
        let err = get_log_level().await.unwrap_err();
        assert_eq!(err.0.status_code(), 503);
        let err = set_log_level(Json(LogLevel {
            level: "debug".to_string(),
        }))
        .await
        .unwrap_err();
        assert_eq!(err.0.status_code(), 400);
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let (state, processor) = state();
        let (sink, _rx) = ChannelSink::pair();
        processor.observer_connected(Box::new(sink)).unwrap();

        let Json(health) = health(State(state)).await.unwrap();
        assert_eq!(health.status, "ok");
        assert!(!health.broker_connected);
        assert_eq!(health.processor.observers, 1);
        assert_eq!(health.processor.storage_breaker, "CLOSED");
    }
}
