use std::time::Duration;

use futures::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::session::{self, ClientSession, ConnectionState, JoinRejection};
use crate::classroom::{ClientMessage, Role, ServerMessage};
use crate::error::{ClassroomError, ErrorKind, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    State(ConnectionState),
    Message(ServerMessage),
    /// The server refused the join. Validation and not-found refusals stop
    /// the client; others are retried like a failed connect.
    Rejected { kind: ErrorKind, message: String },
    /// Reconnect attempts exhausted, or the join cannot succeed; the client
    /// is stopped
    GaveUp,
}

enum Disconnect {
    Lost { joined: bool },
    Rejected(JoinRejection),
    Closed,
}

/// Websocket client that keeps one room membership alive across
/// reconnects.
pub struct ClassroomClient {
    role: Role,
    commands: mpsc::UnboundedSender<ClientMessage>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl ClassroomClient {
    pub fn connect(url: impl Into<String>, session: ClientSession, policy: ReconnectPolicy) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let role = session.role();

        let task = tokio::spawn(run(url.into(), session, policy, command_rx, event_tx, state_tx));

        Self {
            role,
            commands,
            events,
            state,
            task,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Queue a command. Refused until the current connection has received
    /// its snapshot.
    pub fn send(&self, message: ClientMessage) -> Result<()> {
        session::check_outbound(self.state(), self.role, &message)?;
        self.commands
            .send(message)
            .map_err(|_| ClassroomError::internal("client task has stopped"))
    }

    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Resolves once joined, or with an error when the client gave up.
    pub async fn wait_joined(&mut self) -> Result<()> {
        self.state
            .wait_for(|state| *state == ConnectionState::Joined)
            .await
            .map(|_| ())
            .map_err(|_| ClassroomError::internal("client task has stopped"))
    }

    /// Close the socket and stop reconnecting.
    pub async fn close(self) {
        drop(self.commands);
        let _ = self.task.await;
    }
}

async fn run(
    url: String,
    mut session: ClientSession,
    policy: ReconnectPolicy,
    mut commands: mpsc::UnboundedReceiver<ClientMessage>,
    events: mpsc::UnboundedSender<ClientEvent>,
    state: watch::Sender<ConnectionState>,
) {
    let mut failures = 0;

    loop {
        session.begin_connect();
        publish(&session, &state, &events);

        match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                tracing::info!(url = %url, room_id = %session.room_id(), "Connected");
                match drive(socket, &mut session, &mut commands, &events, &state).await {
                    Disconnect::Closed => {
                        session.connection_lost();
                        publish(&session, &state, &events);
                        return;
                    }
                    Disconnect::Lost { joined: true } => {
                        failures = 0;
                        tracing::warn!(url = %url, "Connection lost");
                    }
                    Disconnect::Lost { joined: false } => {
                        failures += 1;
                        tracing::warn!(url = %url, attempt = failures, "Connection lost before joining");
                    }
                    Disconnect::Rejected(rejection) => {
                        failures += 1;
                        tracing::warn!(
                            url = %url,
                            room_id = %session.room_id(),
                            attempt = failures,
                            kind = ?rejection.kind,
                            reason = %rejection.message,
                            "Join refused"
                        );
                        let permanent = rejection.is_permanent();
                        let _ = events.send(ClientEvent::Rejected {
                            kind: rejection.kind,
                            message: rejection.message,
                        });
                        if permanent {
                            session.connection_lost();
                            publish(&session, &state, &events);
                            let _ = events.send(ClientEvent::GaveUp);
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(url = %url, attempt = failures, error = %e, "Connection failed");
            }
        }

        session.connection_lost();
        publish(&session, &state, &events);

        if failures >= policy.max_attempts {
            tracing::error!(url = %url, attempts = failures, "Giving up reconnecting");
            let _ = events.send(ClientEvent::GaveUp);
            return;
        }
        tokio::time::sleep(policy.delay).await;
    }
}

async fn drive(
    socket: Socket,
    session: &mut ClientSession,
    commands: &mut mpsc::UnboundedReceiver<ClientMessage>,
    events: &mpsc::UnboundedSender<ClientEvent>,
    state: &watch::Sender<ConnectionState>,
) -> Disconnect {
    let (mut write, mut read) = socket.split();
    let mut joined = false;

    if let Err(e) = send_frame(&mut write, &session.join_message()).await {
        tracing::warn!(error = %e, "Failed to send join");
        return Disconnect::Lost { joined };
    }

    loop {
        tokio::select! {
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return Disconnect::Lost { joined },
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket error");
                        return Disconnect::Lost { joined };
                    }
                };

                let message: ServerMessage = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(error = %e, raw_message = %text, "Unparseable server event");
                        continue;
                    }
                };

                let before = session.state();
                session.handle(&message);
                if session.state() != before {
                    publish(session, state, events);
                }
                joined |= session.state() == ConnectionState::Joined;
                if let Some(rejection) = session.rejection() {
                    let _ = write.close().await;
                    return Disconnect::Rejected(rejection.clone());
                }
                let _ = events.send(ClientEvent::Message(message));
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    let _ = write.close().await;
                    return Disconnect::Closed;
                };
                // Input queued before a reconnect is not replayed into the new session
                if let Err(e) = session.check_outbound(&command) {
                    tracing::debug!(event = command.event_name(), error = %e, "Dropping command");
                    continue;
                }
                if let Err(e) = send_frame(&mut write, &command).await {
                    tracing::warn!(error = %e, "Failed to send command");
                    return Disconnect::Lost { joined };
                }
            }
        }
    }
}

async fn send_frame<S>(write: &mut S, message: &ClientMessage) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(message)?;
    write
        .send(Message::Text(text))
        .await
        .map_err(|e| ClassroomError::internal(format!("websocket send failed: {e}")))
}

fn publish(session: &ClientSession, state: &watch::Sender<ConnectionState>, events: &mpsc::UnboundedSender<ClientEvent>) {
    let current = session.state();
    if *state.borrow() != current {
        state.send_replace(current);
        let _ = events.send(ClientEvent::State(current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay, Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 5);
    }

    #[tokio::test]
    async fn test_gives_up_when_unreachable() {
        // Reserve a port, then free it so nothing is listening there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = ClassroomClient::connect(
            format!("ws://127.0.0.1:{port}/ws"),
            ClientSession::new("R1", Role::Student),
            ReconnectPolicy {
                delay: Duration::from_millis(10),
                max_attempts: 2,
            },
        );

        let mut gave_up = false;
        while let Some(event) = client.next_event().await {
            if event == ClientEvent::GaveUp {
                gave_up = true;
            }
        }
        assert!(gave_up);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.send(ClientMessage::UpdatePage { page_number: 2 }).is_err());
    }
}
