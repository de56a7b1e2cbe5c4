//! WebSocket event stream at `/events`.
//!
//! Every subscriber gets a `{type: connected}` frame on accept, then a
//! relay of both event topics in emission order. A failed write closes the
//! connection; there is no buffering beyond the per-subscriber mailbox in
//! the bus.

use std::sync::Arc;

use {
    axum::{
        extract::{
            State, WebSocketUpgrade,
            ws::{Message, WebSocket},
        },
        response::Response,
    },
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info},
};

use mcphost_events::Topic;

use crate::state::HostState;

pub async fn events_handler(
    State(state): State<Arc<HostState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<HostState>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "events: subscriber connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();

    // Write loop: forwards serialized frames to the socket; a write
    // failure ends the connection.
    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "events: write failed, closing");
                break;
            }
        }
    });

    let _ = frame_tx.send(serde_json::json!({ "type": "connected" }).to_string());

    let mut server_events = state.events.subscribe(Topic::ServerEvents);
    let mut app_events = state.events.subscribe(Topic::AppEvents);

    loop {
        let event = tokio::select! {
            event = server_events.recv() => event,
            event = app_events.recv() => event,
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Inbound data frames are ignored; this is a one-way stream.
                    Some(Ok(_)) => continue,
                }
            },
        };
        let Some(event) = event else {
            break;
        };
        let Ok(frame) = serde_json::to_string(&event) else {
            continue;
        };
        if frame_tx.send(frame).is_err() {
            break;
        }
    }

    drop(frame_tx);
    write_handle.abort();
    info!(conn_id = %conn_id, "events: subscriber disconnected");
}
