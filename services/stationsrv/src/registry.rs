//! Connection registries
//!
//! `StationRegistry` holds at most one direct connection per station serial.
//! `ObserverRegistry` holds dashboard observers. Both drop a connection as soon
//! as a send to it fails. They are owned by the event processor task and need
//! no locking.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

use crate::error::{BridgeError, Result};

/// Identity of one websocket session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolves to whether a queued frame reached the socket
pub type WriteReceipt = oneshot::Receiver<bool>;

/// Outbound half of a live connection
pub trait MessageSink: Send {
    fn id(&self) -> ConnectionId;

    /// Queue `text` for delivery; fails once the connection is gone
    fn try_send(&self, text: &str) -> Result<()>;

    /// Queue `text` and get a receipt that settles after the socket write
    fn send_with_receipt(&self, text: &str) -> Result<WriteReceipt>;
}

/// One queued outbound frame
#[derive(Debug)]
pub struct Frame {
    pub text: String,
    ack: Option<oneshot::Sender<bool>>,
}

impl Frame {
    /// Split into the text and the acknowledgement the writer settles
    pub fn into_parts(self) -> (String, WriteAck) {
        (self.text, WriteAck(self.ack))
    }
}

/// Writer side of a [`WriteReceipt`]; dropping it unsettled reads as a failure
#[derive(Debug)]
pub struct WriteAck(Option<oneshot::Sender<bool>>);

impl WriteAck {
    pub fn complete(self, written: bool) {
        if let Some(ack) = self.0 {
            let _ = ack.send(written);
        }
    }
}

/// Sink feeding a per-connection writer task
#[derive(Debug, Clone)]
pub struct ChannelSink {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Frame>,
}

impl ChannelSink {
    /// Sink plus the receiver its writer task drains
    pub fn pair() -> (Self, FrameReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            id: ConnectionId::new(),
            tx,
        };
        (sink, FrameReceiver { rx })
    }

    fn queue(&self, text: &str, ack: Option<oneshot::Sender<bool>>) -> Result<()> {
        let frame = Frame {
            text: text.to_string(),
            ack,
        };
        self.tx
            .send(frame)
            .map_err(|_| BridgeError::connection(format!("connection {} closed", self.id)))
    }
}

impl MessageSink for ChannelSink {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn try_send(&self, text: &str) -> Result<()> {
        self.queue(text, None)
    }

    fn send_with_receipt(&self, text: &str) -> Result<WriteReceipt> {
        let (ack, receipt) = oneshot::channel();
        self.queue(text, Some(ack))?;
        Ok(receipt)
    }
}

/// Receiving end of a [`ChannelSink`]
#[derive(Debug)]
pub struct FrameReceiver {
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl FrameReceiver {
    /// Next frame, for a writer that settles its acknowledgement after writing
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Next text, acknowledged as written on receipt
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await.map(delivered)
    }

    pub fn try_recv(&mut self) -> std::result::Result<String, mpsc::error::TryRecvError> {
        self.rx.try_recv().map(delivered)
    }
}

fn delivered(frame: Frame) -> String {
    let (text, ack) = frame.into_parts();
    ack.complete(true);
    text
}

pub type BoxedSink = Box<dyn MessageSink>;

// ============================================================================
// Shared core
// ============================================================================

struct Registry<K> {
    entries: HashMap<K, BoxedSink>,
}

impl<K> Registry<K>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn insert(&mut self, key: K, sink: BoxedSink) -> Option<BoxedSink> {
        self.entries.insert(key, sink)
    }

    fn broadcast(&mut self, text: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, sink| match sink.try_send(text) {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropping connection {}: {}", key, e);
                false
            },
        });
        let sent = self.entries.len();
        if sent < before {
            debug!("Broadcast pruned {} dead connections", before - sent);
        }
        sent
    }
}

// ============================================================================
// Station connections, keyed by serial
// ============================================================================

pub struct StationRegistry {
    inner: Registry<String>,
}

impl StationRegistry {
    pub fn new() -> Self {
        Self {
            inner: Registry::new(),
        }
    }

    /// Register a station connection, returning the superseded one if any
    pub fn register(&mut self, serial: impl Into<String>, sink: BoxedSink) -> Option<BoxedSink> {
        self.inner.insert(serial.into(), sink)
    }

    /// Remove the entry for `serial` only while it still belongs to session `id`
    pub fn unregister(&mut self, serial: &str, id: ConnectionId) -> bool {
        match self.inner.entries.get(serial) {
            Some(sink) if sink.id() == id => {
                self.inner.entries.remove(serial);
                true
            },
            _ => false,
        }
    }

    /// Current session id for `serial`
    pub fn current(&self, serial: &str) -> Option<ConnectionId> {
        self.inner.entries.get(serial).map(|sink| sink.id())
    }

    /// Queue `text` for `serial`, returning the session and its write receipt.
    /// A connection whose writer is gone is dropped.
    pub fn send_with_receipt(
        &mut self,
        serial: &str,
        text: &str,
    ) -> Option<(ConnectionId, WriteReceipt)> {
        let sink = self.inner.entries.get(serial)?;
        let id = sink.id();
        match sink.send_with_receipt(text) {
            Ok(receipt) => Some((id, receipt)),
            Err(e) => {
                debug!("Dropping connection {}: {}", serial, e);
                self.inner.entries.remove(serial);
                None
            },
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

impl Default for StationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Dashboard observers
// ============================================================================

pub struct ObserverRegistry {
    inner: Registry<ConnectionId>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            inner: Registry::new(),
        }
    }

    pub fn register(&mut self, sink: BoxedSink) -> ConnectionId {
        let id = sink.id();
        self.inner.insert(id, sink);
        id
    }

    pub fn unregister(&mut self, id: ConnectionId) -> bool {
        self.inner.entries.remove(&id).is_some()
    }

    /// Deliver to every current observer, returning how many accepted it
    pub fn broadcast(&mut self, text: &str) -> usize {
        self.inner.broadcast(text)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
