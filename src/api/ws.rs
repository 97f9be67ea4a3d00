//! WebSocket bridge between a browser socket and the broadcast hub.
//!
//! Each connection registers a [`ChannelSubscriber`] and then runs one loop
//! that:
//!
//! - forwards hub messages to the socket,
//! - echoes client text back as `{"info":"server-received","payload":...}`,
//! - sends `{"ping":"keepalive"}` after `keepalive` without client input.
//!
//! The connection ends on close, socket error, or when the hub prunes the
//! subscriber; it always unsubscribes on the way out.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::ApiState;
use crate::hub::ChannelSubscriber;

/// GET /ws/kpi
pub async fn kpi_stream(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Reply to a client text frame.
pub fn echo_message(text: &str) -> String {
    json!({ "info": "server-received", "payload": text }).to_string()
}

/// Frame sent after a quiet period.
pub fn keepalive_message() -> String {
    json!({ "ping": "keepalive" }).to_string()
}

async fn handle_socket(socket: WebSocket, state: ApiState) {
    let (subscriber, mut outbound) = ChannelSubscriber::channel(state.subscriber_buffer, "websocket");
    let id = match state.hub.subscribe(subscriber).await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "[WebSocket] Could not register subscriber");
            return;
        }
    };
    info!(subscriber = %id, "[WebSocket] Client connected");

    let (mut sink, mut stream) = socket.split();
    let idle = tokio::time::sleep(state.keepalive);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                // Pruned by the hub
                None => break,
            },
            incoming = stream.next() => {
                idle.as_mut().reset(Instant::now() + state.keepalive);
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if sink.send(Message::Text(echo_message(&text))).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(subscriber = %id, error = %e, "[WebSocket] Receive error");
                        break;
                    }
                }
            }
            _ = &mut idle => {
                if sink.send(Message::Text(keepalive_message())).await.is_err() {
                    break;
                }
                idle.as_mut().reset(Instant::now() + state.keepalive);
            }
        }
    }

    // Already gone if the hub pruned it
    let _ = state.hub.unsubscribe(id).await;
    info!(subscriber = %id, "[WebSocket] Client disconnected");
}
