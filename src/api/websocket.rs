use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use warp::ws::{Message, WebSocket};

use crate::classroom::{ClassroomServer, ClientMessage, ServerMessage, SignalingHandler};
use crate::config::ConnectionConfig;
use crate::error::ClassroomError;

/// Runs one client socket until it closes, errors or goes silent for
/// `connection.idle_timeout`. Any inbound frame, pongs included, counts as
/// activity; the server pings every `connection.ping_interval`.
pub async fn handle_websocket(websocket: WebSocket, server: Arc<ClassroomServer>, connection: ConnectionConfig) {
    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<ServerMessage>>();

    let mut signaling_handler = SignalingHandler::new(server, tx);
    let connection_id = signaling_handler.connection_id().to_string();
    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    // Writer: drains the connection's outbound queue in order, pinging between events
    let writer_id = connection_id.clone();
    let sender_task = tokio::spawn(async move {
        let mut heartbeat = time::interval_at(
            time::Instant::now() + connection.ping_interval,
            connection.ping_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let frame = tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    match serde_json::to_string(&*event) {
                        Ok(text) => Message::text(text),
                        Err(e) => {
                            tracing::error!(
                                connection_id = %writer_id,
                                event = event.event_name(),
                                error = %e,
                                "Failed to serialize event"
                            );
                            continue;
                        }
                    }
                }
                _ = heartbeat.tick() => Message::ping(Vec::new()),
            };
            if let Err(e) = ws_sender.send(frame).await {
                tracing::debug!(connection_id = %writer_id, error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    loop {
        let result = match time::timeout(connection.idle_timeout, ws_receiver.next()).await {
            Ok(Some(result)) => result,
            Ok(None) => break,
            Err(_) => {
                tracing::info!(
                    connection_id = %connection_id,
                    idle_timeout = ?connection.idle_timeout,
                    "WebSocket idle, dropping connection"
                );
                break;
            }
        };
        match result {
            Ok(message) if message.is_close() => break,
            Ok(message) => handle_websocket_message(&mut signaling_handler, message).await,
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    signaling_handler.cleanup();
    sender_task.abort();
    tracing::info!(connection_id = %connection_id, "WebSocket connection closed");
}

async fn handle_websocket_message(signaling_handler: &mut SignalingHandler, message: Message) {
    if message.is_ping() || message.is_pong() {
        return;
    }

    let text = match message.to_str() {
        Ok(text) => text,
        Err(()) => {
            signaling_handler.send_error(&ClassroomError::InvalidMessage(
                "expected a JSON text frame".to_string(),
            ));
            return;
        }
    };

    tracing::trace!(connection_id = %signaling_handler.connection_id(), raw_message = %text, "Received frame");

    match ClientMessage::from_json(text) {
        Ok(client_message) => signaling_handler.handle_message(client_message).await,
        Err(e) => {
            tracing::warn!(
                connection_id = %signaling_handler.connection_id(),
                error = %e,
                raw_message = %text,
                "Failed to parse client message"
            );
            signaling_handler.send_error(&e);
        }
    }
}
