//! Event processor
//!
//! One task owns every piece of mutable bridge state: both connection
//! registries, the per-station NMEA decoders and the per-station
//! reconciliation queues. The MQTT event loop, websocket sessions and the
//! dispatcher only talk to it through [`ProcessorHandle`], which enqueues
//! [`Inbound`] messages.
//!
//! State reconciliation runs in spawned tasks behind the storage breaker so a
//! slow store never stalls other stations. Each station has a FIFO queue with
//! at most one reconciliation in flight, which keeps one station's updates in
//! arrival order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::device::{Device, StateReconciler, Telemetry};
use crate::error::{BridgeError, Result};
use crate::events::BroadcastEvent;
use crate::protocols::NmeaDecoder;
use crate::registry::{BoxedSink, ConnectionId, ObserverRegistry, StationRegistry, WriteReceipt};
use crate::resilience::{BreakerError, CircuitBreaker};

/// Telemetry topic kinds under `<namespace>/devices/<serial>/`
pub const TOPIC_STATUS: &str = "status";
pub const TOPIC_BASE_CONFIG_STATE: &str = "base_config_state";
pub const TOPIC_SERVICE_CONFIG_STATE: &str = "service_config_state";
pub const TOPIC_RAW_DATA: &str = "raw_data";

/// How long a direct send waits for the socket write before giving up
pub const DIRECT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Messages handled by the processor task
pub enum Inbound {
    /// Publish received from the broker
    Broker { topic: String, payload: Bytes },
    /// Station websocket session opened
    StationConnected { serial: String, sink: BoxedSink },
    /// Text frame from a station session
    StationFrame { serial: String, text: String },
    /// Station websocket session ended
    StationClosed { serial: String, conn: ConnectionId },
    ObserverConnected { sink: BoxedSink },
    ObserverClosed { conn: ConnectionId },
    /// Command delivery over a station's direct connection
    SendDirect {
        serial: String,
        text: String,
        reply: oneshot::Sender<Option<(ConnectionId, WriteReceipt)>>,
    },
    /// A direct write failed or stalled; the session is dropped
    DirectWriteFailed { serial: String, conn: ConnectionId },
    /// Event produced outside the bridge, broadcast as is
    Announce(BroadcastEvent),
    Stats { reply: oneshot::Sender<ProcessorStats> },
    /// A spawned reconciliation finished
    Reconciled {
        serial: String,
        outcome: Option<Device>,
    },
}

/// Snapshot for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorStats {
    pub stations: usize,
    pub observers: usize,
    /// Reconciliations queued or in flight
    pub pending_reconciliations: usize,
    pub storage_breaker: String,
    pub started_at: DateTime<Utc>,
}

/// Frame sent by a station agent over its direct connection
#[derive(Debug, Deserialize)]
struct StationMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

enum Job {
    Apply(Telemetry),
    MarkOffline,
}

#[derive(Default)]
struct SerialQueue {
    in_flight: bool,
    pending: VecDeque<Job>,
}

/// Split `<namespace>/devices/<serial>/<kind>`
pub fn parse_topic<'a>(namespace: &str, topic: &'a str) -> Option<(&'a str, &'a str)> {
    let rest = topic.strip_prefix(namespace)?.strip_prefix("/devices/")?;
    let (serial, kind) = rest.split_once('/')?;
    if serial.is_empty() || kind.is_empty() || kind.contains('/') {
        return None;
    }
    Some((serial, kind))
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable entry point into the processor task
#[derive(Clone)]
pub struct ProcessorHandle {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl ProcessorHandle {
    fn enqueue(&self, msg: Inbound) -> Result<()> {
        self.tx.send(msg).map_err(|_| BridgeError::processor_gone())
    }

    /// Hand a broker publish over to the processor
    pub fn broker_message(&self, topic: String, payload: Bytes) -> Result<()> {
        self.enqueue(Inbound::Broker { topic, payload })
    }

    pub fn station_connected(&self, serial: String, sink: BoxedSink) -> Result<()> {
        self.enqueue(Inbound::StationConnected { serial, sink })
    }

    pub fn station_frame(&self, serial: String, text: String) -> Result<()> {
        self.enqueue(Inbound::StationFrame { serial, text })
    }

    pub fn station_closed(&self, serial: String, conn: ConnectionId) -> Result<()> {
        self.enqueue(Inbound::StationClosed { serial, conn })
    }

    pub fn observer_connected(&self, sink: BoxedSink) -> Result<()> {
        self.enqueue(Inbound::ObserverConnected { sink })
    }

    pub fn observer_closed(&self, conn: ConnectionId) -> Result<()> {
        self.enqueue(Inbound::ObserverClosed { conn })
    }

    /// Deliver `text` over the station's direct connection and wait for the
    /// socket write. `false` when the station has no live connection or the
    /// write failed or stalled past [`DIRECT_WRITE_TIMEOUT`]; that session is
    /// then dropped.
    pub async fn send_direct(&self, serial: &str, text: String) -> bool {
        let (reply, rx) = oneshot::channel();
        let msg = Inbound::SendDirect {
            serial: serial.to_string(),
            text,
            reply,
        };
        if self.enqueue(msg).is_err() {
            return false;
        }
        let Ok(Some((conn, receipt))) = rx.await else {
            return false;
        };

        match tokio::time::timeout(DIRECT_WRITE_TIMEOUT, receipt).await {
            Ok(Ok(true)) => true,
            outcome => {
                if outcome.is_err() {
                    warn!("Direct write to {} stalled, dropping session {}", serial, conn);
                } else {
                    warn!("Direct write to {} failed, dropping session {}", serial, conn);
                }
                let _ = self.enqueue(Inbound::DirectWriteFailed {
                    serial: serial.to_string(),
                    conn,
                });
                false
            },
        }
    }

    /// Broadcast an event produced elsewhere (record deletion, heartbeat sweep)
    pub fn announce(&self, event: BroadcastEvent) -> Result<()> {
        self.enqueue(Inbound::Announce(event))
    }

    pub async fn stats(&self) -> Result<ProcessorStats> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(Inbound::Stats { reply })?;
        rx.await.map_err(|_| BridgeError::processor_gone())
    }
}

// ============================================================================
// Processor
// ============================================================================

pub struct EventProcessor {
    rx: mpsc::UnboundedReceiver<Inbound>,
    /// Completion path for spawned reconciliations; weak so the task ends once
    /// every handle is gone
    completions: mpsc::WeakUnboundedSender<Inbound>,
    namespace: String,
    stations: StationRegistry,
    observers: ObserverRegistry,
    decoders: HashMap<String, NmeaDecoder>,
    queues: HashMap<String, SerialQueue>,
    reconciler: Arc<dyn StateReconciler>,
    storage_breaker: Arc<CircuitBreaker>,
    started_at: DateTime<Utc>,
}

impl EventProcessor {
    pub fn new(
        namespace: impl Into<String>,
        reconciler: Arc<dyn StateReconciler>,
        storage_breaker: Arc<CircuitBreaker>,
    ) -> (Self, ProcessorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let processor = Self {
            rx,
            completions: tx.downgrade(),
            namespace: namespace.into(),
            stations: StationRegistry::new(),
            observers: ObserverRegistry::new(),
            decoders: HashMap::new(),
            queues: HashMap::new(),
            reconciler,
            storage_breaker,
            started_at: Utc::now(),
        };
        (processor, ProcessorHandle { tx })
    }

    /// Build and spawn the processor task
    pub fn spawn(
        namespace: impl Into<String>,
        reconciler: Arc<dyn StateReconciler>,
        storage_breaker: Arc<CircuitBreaker>,
        cancel: CancellationToken,
    ) -> (ProcessorHandle, JoinHandle<()>) {
        let (processor, handle) = Self::new(namespace, reconciler, storage_breaker);
        let task = tokio::spawn(processor.run(cancel));
        (handle, task)
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Event processor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.handle(msg),
                    None => break,
                },
            }
        }
        info!(
            "Event processor stopped ({} stations, {} observers connected)",
            self.stations.len(),
            self.observers.len()
        );
    }

    fn handle(&mut self, msg: Inbound) {
        match msg {
            Inbound::Broker { topic, payload } => self.on_broker(&topic, &payload),
            Inbound::StationConnected { serial, sink } => {
                info!("Station {} connected directly", serial);
                if self.stations.register(serial.clone(), sink).is_some() {
                    info!("Station {} reconnected, previous session superseded", serial);
                }
            },
            Inbound::StationFrame { serial, text } => self.on_station_frame(&serial, &text),
            Inbound::StationClosed { serial, conn } => {
                if self.stations.unregister(&serial, conn) {
                    self.station_lost(&serial);
                } else {
                    debug!("Superseded session {} of station {} closed", conn, serial);
                }
            },
            Inbound::DirectWriteFailed { serial, conn } => {
                if self.stations.unregister(&serial, conn) {
                    self.station_lost(&serial);
                }
            },
            Inbound::ObserverConnected { sink } => {
                let id = self.observers.register(sink);
                debug!("Observer {} connected ({} total)", id, self.observers.len());
            },
            Inbound::ObserverClosed { conn } => {
                self.observers.unregister(conn);
                debug!("Observer {} disconnected", conn);
            },
            Inbound::SendDirect {
                serial,
                text,
                reply,
            } => {
                let connected = self.stations.current(&serial).is_some();
                let queued = self.stations.send_with_receipt(&serial, &text);
                if connected && queued.is_none() {
                    self.station_lost(&serial);
                }
                let _ = reply.send(queued);
            },
            Inbound::Announce(event) => {
                if let BroadcastEvent::DeviceDeleted { serial } = &event {
                    self.decoders.remove(serial);
                }
                self.broadcast(&event);
            },
            Inbound::Stats { reply } => {
                let _ = reply.send(self.stats());
            },
            Inbound::Reconciled { serial, outcome } => {
                if let Some(device) = outcome {
                    self.broadcast(&BroadcastEvent::StatusUpdate { data: device });
                }
                if let Some(queue) = self.queues.get_mut(&serial) {
                    queue.in_flight = false;
                }
                self.start_next(&serial);
            },
        }
    }

    fn station_lost(&mut self, serial: &str) {
        info!("Station {} disconnected, marking offline", serial);
        self.enqueue_job(serial, Job::MarkOffline);
    }

    fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            stations: self.stations.len(),
            observers: self.observers.len(),
            pending_reconciliations: self
                .queues
                .values()
                .map(|q| q.pending.len() + usize::from(q.in_flight))
                .sum(),
            storage_breaker: self.storage_breaker.state().to_string(),
            started_at: self.started_at,
        }
    }

    // ------------------------------------------------------------------
    // Inbound routing
    // ------------------------------------------------------------------

    fn on_broker(&mut self, topic: &str, payload: &[u8]) {
        let Some((serial, kind)) = parse_topic(&self.namespace, topic) else {
            warn!("Ignoring message on unexpected topic {}", topic);
            return;
        };

        if kind == TOPIC_RAW_DATA {
            let text = String::from_utf8_lossy(payload);
            self.decode_nmea(serial, &text);
            return;
        }

        let data: Value = match serde_json::from_slice(payload) {
            Ok(data) => data,
            Err(e) => {
                warn!("Non-JSON payload on {}: {}", topic, e);
                return;
            },
        };

        match kind {
            TOPIC_STATUS => self.on_status(serial, data),
            TOPIC_BASE_CONFIG_STATE => self.broadcast(&BroadcastEvent::BaseConfigState {
                serial: serial.to_string(),
                data,
            }),
            TOPIC_SERVICE_CONFIG_STATE => self.broadcast(&BroadcastEvent::ServiceConfigState {
                serial: serial.to_string(),
                data,
            }),
            other => debug!("Ignoring topic kind '{}' from {}", other, serial),
        }
    }

    fn on_station_frame(&mut self, serial: &str, text: &str) {
        let msg: StationMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Malformed frame from station {}: {}", serial, e);
                return;
            },
        };

        match msg.kind.as_str() {
            "status_update" if msg.payload.is_object() => self.on_status(serial, msg.payload),
            "status_update" => debug!("status_update without payload from {}", serial),
            "nmea_update" => match msg.payload.as_str() {
                Some(line) if !line.is_empty() => self.decode_nmea(serial, line),
                _ => debug!("Empty nmea_update from {}", serial),
            },
            other => warn!("Unknown message type from station {}: {}", serial, other),
        }
    }

    /// Status payloads without a serial belong to the station they came from
    fn on_status(&mut self, source_serial: &str, mut data: Value) {
        if let Some(obj) = data.as_object_mut() {
            let missing = obj
                .get("serial")
                .and_then(Value::as_str)
                .map_or(true, str::is_empty);
            if missing {
                obj.insert("serial".to_string(), Value::from(source_serial));
            }
        }

        match serde_json::from_value::<Telemetry>(data) {
            Ok(telemetry) => {
                let serial = telemetry.serial.clone();
                self.enqueue_job(&serial, Job::Apply(telemetry));
            },
            Err(e) => warn!("Invalid status payload from {}: {}", source_serial, e),
        }
    }

    fn decode_nmea(&mut self, serial: &str, text: &str) {
        let decoder = self.decoders.entry(serial.to_string()).or_default();
        let reports: Vec<_> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| decoder.decode(line))
            .collect();

        for data in reports {
            self.broadcast(&BroadcastEvent::NmeaUpdate {
                serial: serial.to_string(),
                data,
            });
        }
    }

    fn broadcast(&mut self, event: &BroadcastEvent) {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize {} event: {}", event.kind(), e);
                return;
            },
        };
        let delivered = self.observers.broadcast(&text);
        debug!(
            "Broadcast {} for {} to {} observers",
            event.kind(),
            event.serial(),
            delivered
        );
    }

    // ------------------------------------------------------------------
    // Per-station reconciliation queues
    // ------------------------------------------------------------------

    fn enqueue_job(&mut self, serial: &str, job: Job) {
        let queue = self.queues.entry(serial.to_string()).or_default();
        queue.pending.push_back(job);
        if !queue.in_flight {
            self.start_next(serial);
        }
    }

    fn start_next(&mut self, serial: &str) {
        let Some(queue) = self.queues.get_mut(serial) else {
            return;
        };
        if queue.in_flight {
            return;
        }
        let Some(job) = queue.pending.pop_front() else {
            self.queues.remove(serial);
            return;
        };
        queue.in_flight = true;

        let reconciler = Arc::clone(&self.reconciler);
        let breaker = Arc::clone(&self.storage_breaker);
        let completions = self.completions.clone();
        let serial = serial.to_string();

        let work = tokio::spawn(reconcile(reconciler, breaker, serial.clone(), job));
        // Completion is reported even if the reconciler panics, so the queue moves on
        tokio::spawn(async move {
            let outcome = match work.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Reconciliation task for {} died: {}", serial, e);
                    None
                },
            };
            if let Some(tx) = completions.upgrade() {
                let _ = tx.send(Inbound::Reconciled { serial, outcome });
            }
        });
    }
}

async fn reconcile(
    reconciler: Arc<dyn StateReconciler>,
    breaker: Arc<CircuitBreaker>,
    serial: String,
    job: Job,
) -> Option<Device> {
    let result = match job {
        Job::Apply(telemetry) => breaker
            .call(|| reconciler.apply(telemetry))
            .await
            .map(Some),
        Job::MarkOffline => breaker.call(|| reconciler.mark_offline(&serial)).await,
    };

    match result {
        Ok(outcome) => outcome,
        Err(BreakerError::Open(name)) => {
            warn!("{} breaker open, state of {} left unchanged", name, serial);
            None
        },
        Err(BreakerError::Inner(e)) => {
            error!("Reconciliation failed for {}: {}", serial, e);
            None
        },
    }
}
