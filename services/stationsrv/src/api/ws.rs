//! Websocket adapters
//!
//! Each socket is split into a writer task and a reader task. The writer
//! drains the connection's sink channel and settles each frame's write
//! receipt; the reader feeds the event processor. When either side ends, the
//! other is aborted and the processor is told the session closed. A station
//! whose sink is dropped by the registry (superseded or pruned) therefore
//! loses its socket too.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tracing::debug;

use super::AppState;
use crate::processor::ProcessorHandle;
use crate::registry::{ChannelSink, FrameReceiver, MessageSink};

/// `/ws/pi/{serial}`: direct connection from a station agent
pub async fn station_ws(
    ws: WebSocketUpgrade,
    Path(serial): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_station(socket, serial, state.processor))
}

/// `/ws/updates`: dashboard observer
pub async fn observer_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_observer(socket, state.processor))
}

async fn handle_station(socket: WebSocket, serial: String, processor: ProcessorHandle) {
    let (sink, rx) = ChannelSink::pair();
    let conn = sink.id();
    if processor
        .station_connected(serial.clone(), Box::new(sink))
        .is_err()
    {
        return;
    }

    let (sender, mut receiver) = socket.split();
    let send_task = spawn_writer(sender, rx);

    let frames = processor.clone();
    let frame_serial = serial.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if frames
                        .station_frame(frame_serial.clone(), text.as_str().to_owned())
                        .is_err()
                    {
                        break;
                    }
                },
                Message::Close(_) => break,
                _ => {},
            }
        }
    });

    join_first(send_task, recv_task).await;
    debug!("Station {} socket {} closed", serial, conn);
    let _ = processor.station_closed(serial, conn);
}

async fn handle_observer(socket: WebSocket, processor: ProcessorHandle) {
    let (sink, rx) = ChannelSink::pair();
    let conn = sink.id();
    if processor.observer_connected(Box::new(sink)).is_err() {
        return;
    }

    let (sender, mut receiver) = socket.split();
    let send_task = spawn_writer(sender, rx);

    // Observers only listen; reading detects the close
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    join_first(send_task, recv_task).await;
    let _ = processor.observer_closed(conn);
}

fn spawn_writer(
    mut sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: FrameReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv_frame().await {
            let (text, ack) = frame.into_parts();
            let written = sender.send(Message::Text(text.into())).await.is_ok();
            ack.complete(written);
            if !written {
                break;
            }
        }
        let _ = sender.close().await;
    })
}

async fn join_first(mut send_task: JoinHandle<()>, mut recv_task: JoinHandle<()>) {
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }
}
