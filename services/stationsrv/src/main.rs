//! Station bridge service

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use common::service_bootstrap::{self, ServiceInfo};
use common::ServiceArgs;
use errors::{ServiceError, ServiceResult};

use stationsrv::api::{self, AppState};
use stationsrv::config::{Config, DEFAULT_CONFIG_PATH};
use stationsrv::resilience::CircuitBreaker;
use stationsrv::{Dispatcher, EventProcessor, MemoryReconciler, MqttBridge, StateReconciler};

#[derive(Parser, Debug)]
#[command(author, version, about = "Station telemetry and command bridge")]
struct Args {
    #[command(flatten)]
    service: ServiceArgs,

    /// Override the MQTT broker host
    #[arg(long, env = "MQTT_HOST")]
    mqtt_host: Option<String>,

    /// Override the MQTT broker port
    #[arg(long, env = "MQTT_PORT")]
    mqtt_port: Option<u16>,
}

#[tokio::main]
async fn main() -> ServiceResult<()> {
    let args = Args::parse();
    let service_args = args.service;

    // An explicit --config must exist; the default path may be absent
    let config_path = service_args.config_path(DEFAULT_CONFIG_PATH);
    let mut config = match &service_args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    if let Some(bind) = &service_args.bind_address {
        config.service.bind_address = bind.clone();
    }
    if let Some(host) = args.mqtt_host {
        config.mqtt.host = host;
    }
    if let Some(port) = args.mqtt_port {
        config.mqtt.port = port;
    }

    let service_info = ServiceInfo::new(
        config.service.name.clone(),
        env!("CARGO_PKG_VERSION"),
        "Station telemetry and command bridge",
    );
    service_bootstrap::init_logging(
        &service_info,
        &service_args,
        &config.logging.level,
        config.logging.dir.as_deref(),
        config.logging.json,
    )
    .map_err(|e| ServiceError::StartupFailed(format!("logging: {e}")))?;
    if !service_args.no_banner {
        service_bootstrap::print_startup_banner(&service_info);
    }

    config.validate()?;
    if service_args.validate {
        info!("Configuration {} is valid", config_path);
        return Ok(());
    }

    let cancel = CancellationToken::new();

    let reconciler: Arc<dyn StateReconciler> = Arc::new(MemoryReconciler::new());
    let storage_breaker = Arc::new(CircuitBreaker::new("storage", config.breakers.storage.into()));
    let broker_breaker = Arc::new(CircuitBreaker::new("broker", config.breakers.broker.into()));

    let (processor, processor_task) = EventProcessor::spawn(
        config.mqtt.namespace.clone(),
        reconciler,
        storage_breaker,
        cancel.child_token(),
    );
    let (bridge, mqtt_task) = MqttBridge::start(
        &config.mqtt,
        broker_breaker,
        processor.clone(),
        cancel.child_token(),
    );
    let dispatcher = Dispatcher::new(bridge, processor.clone(), config.mqtt.namespace.clone());
    let app = api::router(AppState::new(processor, dispatcher));

    let listener = tokio::net::TcpListener::bind(&config.service.bind_address)
        .await
        .map_err(|e| {
            ServiceError::StartupFailed(format!(
                "cannot bind {}: {e}",
                config.service.bind_address
            ))
        })?;
    info!("Listening on {}", config.service.bind_address);

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        let signal = common::shutdown::wait_for_shutdown().await;
        info!("Received {}, shutting down", signal);
        signal_token.cancel();
    });

    let server_token = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await;

    cancel.cancel();
    if let Err(e) = mqtt_task.await {
        warn!("MQTT task ended abnormally: {}", e);
    }
    if let Err(e) = processor_task.await {
        warn!("Processor task ended abnormally: {}", e);
    }

    if let Err(e) = served {
        error!("Server error: {}", e);
        return Err(e.into());
    }
    info!("Shutdown complete");
    Ok(())
}
