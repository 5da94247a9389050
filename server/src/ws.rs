//! WebSocket transport (spec §6.1).
//!
//! Grounded on the teacher's `processing_module.rs`: paired send/receive
//! tokio tasks joined with `tokio::select!`, aborting whichever task is
//! still running when the other completes. The teacher's binary command
//! tags are replaced by a single JSON text-frame shape (spec §6).

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use protocol::{PlayerId, RoomId};
use tokio::sync::{mpsc, Notify};

use crate::dispatch::{DispatchContext, Directive, Dispatcher};
use crate::session::{SessionRegistry, Transport, TransportError};

pub struct WsTransport {
    outbound: mpsc::Sender<String>,
    close_signal: Arc<Notify>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, payload: &str) -> Result<(), TransportError> {
        self.outbound.send(payload.to_string()).await.map_err(|e| TransportError(e.to_string()))
    }

    fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    async fn close(&self) {
        self.close_signal.notify_one();
    }
}

/// Drives one connection end-to-end: attach, pump send/receive tasks,
/// detach. `room_id` is the player's starting room subscription.
pub async fn serve(
    socket: WebSocket,
    player_id: PlayerId,
    display_name: String,
    room_id: RoomId,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<Dispatcher>,
) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(64);
    let close_signal = Arc::new(Notify::new());

    let transport = Arc::new(WsTransport { outbound: outbound_tx.clone(), close_signal: close_signal.clone() });
    registry.attach(player_id, &display_name, transport).await;
    registry.subscribe_room(player_id, room_id.clone()).await;

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                message = outbound_rx.recv() => {
                    match message {
                        Some(text) => {
                            if sink.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = close_signal.notified() => {
                    let _ = sink.close().await;
                    break;
                }
            }
        }
    });

    let recv_registry = registry.clone();
    let mut receive_task = tokio::spawn(async move {
        let mut room_id = room_id;
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let ctx = DispatchContext { player_id, display_name: display_name.clone(), room_id: room_id.clone() };
                    let reply = match dispatcher.handle(&text, &ctx).await {
                        Ok(outcome) => {
                            let logout = outcome.directive == Directive::Logout;
                            if let Some(new_room) = &outcome.room_change {
                                room_id = new_room.clone();
                            }
                            let payload = serde_json::json!({ "event_type": "command_response", "data": { "text": outcome.text } });
                            if logout {
                                recv_registry.mark_intentional(player_id).await;
                            }
                            (payload, logout)
                        }
                        Err(err) => {
                            let payload = serde_json::json!({ "event_type": "command_response", "data": { "error": err.to_string() } });
                            (payload, false)
                        }
                    };
                    if outbound_tx.send(reply.0.to_string()).await.is_err() {
                        break;
                    }
                    if reply.1 {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(player = %player_id, error = %err, "websocket read error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => { receive_task.abort(); }
        _ = &mut receive_task => { send_task.abort(); }
    }

    registry.detach(player_id).await;
}
