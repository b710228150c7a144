//! End-to-end flows through the processor, dispatcher and codecs

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use stationsrv::device::{Device, StateReconciler, Telemetry};
use stationsrv::protocols::command::{ChipConfigRequest, ChipParams};
use stationsrv::registry::{ChannelSink, FrameReceiver, MessageSink};
use stationsrv::resilience::{BreakerConfig, CircuitBreaker};
use stationsrv::{
    BridgeError, BroadcastEvent, BrokerLink, Channel, Dispatcher, EventProcessor,
    MemoryReconciler, ProcessorHandle, Result,
};

struct DownBroker;

#[async_trait]
impl BrokerLink for DownBroker {
    fn is_connected(&self) -> bool {
        false
    }

    async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<()> {
        Err(BridgeError::connection("down"))
    }
}

/// Reconciler whose store is unavailable
struct FailingReconciler {
    calls: AtomicU32,
}

#[async_trait]
impl StateReconciler for FailingReconciler {
    async fn apply(&self, _telemetry: Telemetry) -> Result<Device> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BridgeError::storage("database unavailable"))
    }

    async fn mark_offline(&self, _serial: &str) -> Result<Option<Device>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BridgeError::storage("database unavailable"))
    }
}

fn spawn_with(reconciler: Arc<dyn StateReconciler>, breaker: BreakerConfig) -> ProcessorHandle {
    let (handle, _task) = EventProcessor::spawn(
        "pi",
        reconciler,
        Arc::new(CircuitBreaker::new("storage", breaker)),
        CancellationToken::new(),
    );
    handle
}

async fn observer(handle: &ProcessorHandle) -> FrameReceiver {
    let (sink, rx) = ChannelSink::pair();
    handle.observer_connected(Box::new(sink)).unwrap();
    handle.stats().await.unwrap();
    rx
}

async fn next_event(rx: &mut FrameReceiver) -> Value {
    let text = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event within 2s")
        .unwrap();
    serde_json::from_str(&text).unwrap()
}

async fn drained(handle: &ProcessorHandle) {
    for _ in 0..200 {
        if handle.stats().await.unwrap().pending_reconciliations == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("reconciliations never drained");
}

#[tokio::test]
async fn status_updates_for_one_station_broadcast_in_arrival_order() {
    let handle = spawn_with(Arc::new(MemoryReconciler::new()), BreakerConfig::default());
    let mut rx = observer(&handle).await;

    for ts in 1..=20 {
        let payload = json!({"serial": "CORS0001", "status": "online", "timestamp": ts});
        handle
            .broker_message(
                "pi/devices/CORS0001/status".to_string(),
                Bytes::from(payload.to_string()),
            )
            .unwrap();
    }

    for ts in 1..=20 {
        let event = next_event(&mut rx).await;
        assert_eq!(event["type"], "status_update");
        assert_eq!(event["data"]["timestamp"], ts);
    }
}

#[tokio::test]
async fn gsv_burst_from_two_talkers_released_after_quiet_period() {
    let handle = spawn_with(Arc::new(MemoryReconciler::new()), BreakerConfig::default());
    let mut rx = observer(&handle).await;
    let topic = "pi/devices/S1/raw_data".to_string();

    let burst = "$GPGSV,2,1,05,01,40,083,46,02,17,308,41,12,07,344,39,14,22,228,45*75\r\n\
                 $GPGSV,2,2,05,15,,,30*40\r\n\
                 $GLGSV,1,1,02,65,55,012,38,66,10,110,*62\r\n";
    handle.broker_message(topic.clone(), Bytes::from(burst)).unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    handle
        .broker_message(
            topic,
            Bytes::from("$GPGSA,A,3,04,05,,09,12,,,24,,,,,2.5,1.3,2.1*39\r\n"),
        )
        .unwrap();

    let event = next_event(&mut rx).await;
    assert_eq!(event["type"], "nmea_update");
    assert_eq!(event["serial"], "S1");
    assert_eq!(event["data"]["type"], "GSV");
    let prns: Vec<i64> = event["data"]["satellites"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["prn"].as_i64().unwrap())
        .collect();
    assert_eq!(prns.len(), 7);
    assert!(prns.contains(&65) && prns.contains(&15));
}

#[tokio::test]
async fn failing_store_opens_breaker_and_suppresses_broadcasts() {
    let reconciler = Arc::new(FailingReconciler {
        calls: AtomicU32::new(0),
    });
    let handle = spawn_with(
        reconciler.clone(),
        BreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        },
    );
    let mut rx = observer(&handle).await;

    for _ in 0..4 {
        handle
            .broker_message(
                "pi/devices/S1/status".to_string(),
                Bytes::from(r#"{"serial":"S1","status":"online"}"#),
            )
            .unwrap();
    }
    drained(&handle).await;

    // Two failures opened the breaker; the rest were rejected unseen
    assert_eq!(reconciler.calls.load(Ordering::SeqCst), 2);
    assert_eq!(handle.stats().await.unwrap().storage_breaker, "OPEN");

    handle
        .announce(BroadcastEvent::DeviceDeleted {
            serial: "S1".to_string(),
        })
        .unwrap();
    assert_eq!(next_event(&mut rx).await["type"], "device_deleted");
}

#[tokio::test]
async fn chip_config_reaches_station_over_direct_connection() {
    let handle = spawn_with(Arc::new(MemoryReconciler::new()), BreakerConfig::default());
    let dispatcher = Dispatcher::new(Arc::new(DownBroker), handle.clone(), "pi");

    let (station, mut station_rx) = ChannelSink::pair();
    handle
        .station_connected("CORS0007".to_string(), Box::new(station))
        .unwrap();

    let request = ChipConfigRequest {
        sensor_type: "UNICORECOMM".to_string(),
        mode: "BASE".to_string(),
        params: ChipParams {
            base_setup_method: "SURVEY_IN".to_string(),
            survey_in_duration: Some(300),
            survey_in_accuracy: Some(2.5),
            coords: None,
            accuracy: None,
        },
    };
    let command = request.to_command().unwrap();
    let (delivery, sent) = tokio::join!(dispatcher.send("CORS0007", &command), station_rx.recv());
    let delivery = delivery.unwrap();
    assert_eq!(delivery.channel, Channel::Direct);
    assert_eq!(delivery.command, "EXECUTE_RAW_COMMANDS");

    let sent: Value = serde_json::from_str(&sent.unwrap()).unwrap();
    let frame = STANDARD
        .decode(sent["payload"]["commands_b64"][0].as_str().unwrap())
        .unwrap();
    assert_eq!(frame, b"MODE BASE TIME 300 2.5\r\nSAVECONFIG\r\n".to_vec());
}

#[tokio::test]
async fn reconnected_station_survives_old_session_close() {
    let store = Arc::new(MemoryReconciler::new());
    let handle = spawn_with(store.clone(), BreakerConfig::default());
    let mut rx = observer(&handle).await;

    let (old, _old_rx) = ChannelSink::pair();
    let old_id = old.id();
    handle.station_connected("S1".to_string(), Box::new(old)).unwrap();
    handle
        .station_frame(
            "S1".to_string(),
            json!({"type": "status_update", "payload": {"status": "online"}}).to_string(),
        )
        .unwrap();
    assert_eq!(next_event(&mut rx).await["data"]["status"], "online");

    let (new, _new_rx) = ChannelSink::pair();
    handle.station_connected("S1".to_string(), Box::new(new)).unwrap();
    handle.station_closed("S1".to_string(), old_id).unwrap();
    drained(&handle).await;

    assert_eq!(
        store.get("S1").unwrap().status,
        stationsrv::device::DeviceStatus::Online
    );
    assert_eq!(handle.stats().await.unwrap().stations, 1);
}
