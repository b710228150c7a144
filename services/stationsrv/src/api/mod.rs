//! HTTP and websocket surface

pub mod commands;
pub mod ws;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use errors::ServiceError;

use crate::dispatcher::Dispatcher;
use crate::error::BridgeError;
use crate::processor::ProcessorHandle;

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    pub processor: ProcessorHandle,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(processor: ProcessorHandle, dispatcher: Dispatcher) -> Self {
        Self {
            processor,
            dispatcher,
        }
    }
}

/// Handler error rendered as an `ErrorInfo` body
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_error_info())).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(commands::health))
        .route(
            "/api/log-level",
            get(commands::get_log_level).put(commands::set_log_level),
        )
        .route("/ws/updates", get(ws::observer_ws))
        .route("/ws/pi/{serial}", get(ws::station_ws))
        .route("/api/devices/{serial}/commands", post(commands::send_command))
        .route(
            "/api/devices/{serial}/configure-chip",
            post(commands::configure_chip),
        )
        .route("/api/devices/{serial}/lock", post(commands::lock))
        .route("/api/devices/{serial}/unlock", post(commands::unlock))
        .route("/api/devices/{serial}/reset", post(commands::reset))
        .with_state(state)
}
