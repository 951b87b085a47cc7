use std::sync::Arc;

use rand::Rng;

use super::actor::{Attachment, JoinRequest, RoomHandle};
use super::fanout::ConnectionSender;
use super::model::ParticipantId;
use super::protocol::{ClientMessage, ServerMessage};
use super::room::RoomAction;
use super::server::ClassroomServer;
use crate::error::{ClassroomError, Result};

struct Membership {
    handle: RoomHandle,
    attachment: Attachment,
}

impl Membership {
    fn leave(&self) {
        self.handle.leave(&self.attachment);
    }
}

/// Per-connection command router. A connection is a member of at most one
/// room at a time.
pub struct SignalingHandler {
    server: Arc<ClassroomServer>,
    connection_id: String,
    sender: ConnectionSender,
    membership: Option<Membership>,
}

impl SignalingHandler {
    pub fn new(server: Arc<ClassroomServer>, sender: ConnectionSender) -> Self {
        Self {
            server,
            connection_id: generate_connection_id(),
            sender,
            membership: None,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn room_id(&self) -> Option<&str> {
        self.membership.as_ref().map(|m| m.handle.room_id())
    }

    /// Participant this connection speaks for. Differs from the connection
    /// id after a resume.
    pub fn participant_id(&self) -> Option<&str> {
        self.membership.as_ref().map(|m| m.attachment.participant_id.as_str())
    }

    pub async fn handle_message(&mut self, message: ClientMessage) {
        let event = message.event_name();
        if let Err(e) = self.dispatch(message).await {
            tracing::warn!(
                connection_id = %self.connection_id,
                room_id = ?self.room_id(),
                event,
                error = %e,
                "Command failed"
            );
            self.send_error(&e);
        }
    }

    pub fn send_error(&self, error: &ClassroomError) {
        let _ = self.sender.send(Arc::new(ServerMessage::error(error)));
    }

    /// Leave the current room, if any. Called when the socket closes.
    pub fn cleanup(&mut self) {
        if let Some(membership) = self.membership.take() {
            tracing::info!(
                connection_id = %self.connection_id,
                room_id = %membership.handle.room_id(),
                participant_id = %membership.attachment.participant_id,
                "Connection lost, leaving room"
            );
            membership.leave();
        }
    }

    async fn dispatch(&mut self, message: ClientMessage) -> Result<()> {
        let message = match RoomAction::try_from(message) {
            Ok(action) => return self.apply(action),
            Err(message) => message,
        };

        match message {
            ClientMessage::Join {
                room_id,
                role,
                name,
                material_id,
                resume_token,
            } => {
                let request = JoinRequest::new(self.connection_id.clone(), role)
                    .with_name(name)
                    .with_resume_token(resume_token);
                self.join(room_id, material_id, request).await
            }
            ClientMessage::Leave { room_id } => self.leave(&room_id),
            ClientMessage::RequestState { room_id } => self.request_state(&room_id),
            other => Err(ClassroomError::internal(format!(
                "unrouted event {}",
                other.event_name()
            ))),
        }
    }

    async fn join(&mut self, room_id: String, material_id: Option<String>, request: JoinRequest) -> Result<()> {
        if let Some(current) = self.membership.take() {
            if current.handle.room_id() == room_id {
                // Same room: the room treats this as a rejoin
                self.membership = Some(current);
            } else {
                tracing::info!(
                    connection_id = %self.connection_id,
                    from = %current.handle.room_id(),
                    to = %room_id,
                    "Switching rooms"
                );
                current.leave();
            }
        }

        let result = self
            .server
            .join(&room_id, material_id.as_deref(), request, self.sender.clone())
            .await;

        match result {
            Ok((handle, outcome)) => {
                let attachment = Attachment::new(outcome.participant().id.clone(), self.connection_id.clone());
                self.membership = Some(Membership { handle, attachment });
                Ok(())
            }
            Err(e) => {
                // A failed rejoin leaves the existing attachment in place
                if self.room_id() != Some(room_id.as_str()) {
                    self.membership = None;
                }
                Err(e)
            }
        }
    }

    fn leave(&mut self, room_id: &str) -> Result<()> {
        match self.membership.take() {
            Some(membership) if membership.handle.room_id() == room_id => {
                membership.leave();
                Ok(())
            }
            other => {
                self.membership = other;
                Err(ClassroomError::NotJoined(room_id.to_string()))
            }
        }
    }

    fn request_state(&self, room_id: &str) -> Result<()> {
        if let Some(membership) = self.membership.as_ref().filter(|m| m.handle.room_id() == room_id) {
            return membership
                .handle
                .request_state(Some(&membership.attachment), self.sender.clone());
        }

        // Observers outside the room get the shared state without a participant id
        let handle = self
            .server
            .registry()
            .get(room_id)
            .ok_or_else(|| ClassroomError::RoomNotFound(room_id.to_string()))?;
        handle.request_state(None, self.sender.clone())
    }

    fn apply(&self, action: RoomAction) -> Result<()> {
        let membership = self.membership.as_ref().ok_or(ClassroomError::NoRoom)?;
        self.server.apply(&membership.handle, &membership.attachment, action)
    }
}

fn generate_connection_id() -> ParticipantId {
    let mut rng = rand::thread_rng();
    format!("conn_{:016x}", rng.gen::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::classroom::fanout::ConnectionReceiver;
    use crate::classroom::model::Role;
    use crate::classroom::registry::RegistrySettings;
    use crate::error::ErrorKind;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn server() -> Arc<ClassroomServer> {
        Arc::new(ClassroomServer::new(
            Arc::new(StaticCatalog::new().with_material("rebar-1", 9)),
            RegistrySettings {
                grace_period: Duration::from_secs(300),
                default_material_id: Some("rebar-1".to_string()),
            },
        ))
    }

    fn handler(server: &Arc<ClassroomServer>) -> (SignalingHandler, ConnectionReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SignalingHandler::new(server.clone(), tx), rx)
    }

    fn join(room_id: &str, role: Role) -> ClientMessage {
        ClientMessage::Join {
            room_id: room_id.to_string(),
            role,
            name: None,
            material_id: None,
            resume_token: None,
        }
    }

    async fn next(rx: &mut ConnectionReceiver) -> Arc<ServerMessage> {
        rx.recv().await.unwrap()
    }

    #[test]
    fn test_connection_id_format() {
        let id = generate_connection_id();
        assert!(id.starts_with("conn_"));
        assert_eq!(id.len(), 21);
    }

    #[tokio::test]
    async fn test_command_before_join_is_not_found() {
        let server = server();
        let (mut handler, mut rx) = handler(&server);
        handler.handle_message(ClientMessage::PageChange { page_number: 2 }).await;

        match &*next(&mut rx).await {
            ServerMessage::RoomError { kind, .. } => assert_eq!(*kind, ErrorKind::NotFound),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_sets_membership() {
        let server = server();
        let (mut handler, mut rx) = handler(&server);
        handler.handle_message(join("R1", Role::Instructor)).await;
        assert_eq!(handler.room_id(), Some("R1"));

        match &*next(&mut rx).await {
            ServerMessage::RoomState(snapshot) => {
                assert_eq!(snapshot.participant_id.as_deref(), Some(handler.connection_id()));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_joining_another_room_leaves_previous() {
        let server = server();
        let (mut teacher, mut teacher_rx) = handler(&server);
        let (mut student, _student_rx) = handler(&server);
        teacher.handle_message(join("R1", Role::Instructor)).await;
        student.handle_message(join("R1", Role::Student)).await;
        next(&mut teacher_rx).await;
        next(&mut teacher_rx).await;

        student.handle_message(join("R2", Role::Student)).await;
        assert_eq!(student.room_id(), Some("R2"));
        match &*next(&mut teacher_rx).await {
            ServerMessage::ParticipantLeft { id } => assert_eq!(id, student.connection_id()),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_instructor_claim_reports_authority() {
        let server = server();
        let (mut first, _rx) = handler(&server);
        let (mut second, mut second_rx) = handler(&server);
        first.handle_message(join("R1", Role::Instructor)).await;
        second.handle_message(join("R1", Role::Instructor)).await;

        assert_eq!(second.room_id(), None);
        match &*next(&mut second_rx).await {
            ServerMessage::RoomError { kind, .. } => assert_eq!(*kind, ErrorKind::Authority),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_state_from_outside() {
        let server = server();
        let (mut teacher, _rx) = handler(&server);
        teacher.handle_message(join("R1", Role::Instructor)).await;

        let (mut observer, mut observer_rx) = handler(&server);
        observer
            .handle_message(ClientMessage::RequestState { room_id: "R1".to_string() })
            .await;
        match &*next(&mut observer_rx).await {
            ServerMessage::RoomState(snapshot) => {
                assert!(snapshot.participant_id.is_none());
                assert_eq!(snapshot.participants.len(), 1);
            }
            other => panic!("unexpected event {other:?}"),
        }

        observer
            .handle_message(ClientMessage::RequestState { room_id: "nope".to_string() })
            .await;
        match &*next(&mut observer_rx).await {
            ServerMessage::RoomError { kind, .. } => assert_eq!(*kind, ErrorKind::NotFound),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cleanup_leaves_room() {
        let server = server();
        let (mut teacher, mut teacher_rx) = handler(&server);
        let (mut student, _student_rx) = handler(&server);
        teacher.handle_message(join("R1", Role::Instructor)).await;
        student.handle_message(join("R1", Role::Student)).await;
        next(&mut teacher_rx).await;
        next(&mut teacher_rx).await;

        let id = student.connection_id().to_string();
        student.cleanup();
        assert_eq!(student.room_id(), None);
        match &*next(&mut teacher_rx).await {
            ServerMessage::ParticipantLeft { id: left } => assert_eq!(*left, id),
            other => panic!("unexpected event {other:?}"),
        }
    }

    fn resume(room_id: &str, role: Role, token: &str) -> ClientMessage {
        ClientMessage::Join {
            room_id: room_id.to_string(),
            role,
            name: None,
            material_id: None,
            resume_token: Some(token.to_string()),
        }
    }

    async fn resume_token(rx: &mut ConnectionReceiver) -> String {
        match &*next(rx).await {
            ServerMessage::RoomState(snapshot) => snapshot.resume_token.clone().unwrap(),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resume_on_new_connection_keeps_participant() {
        let server = server();
        let (mut teacher, mut teacher_rx) = handler(&server);
        teacher.handle_message(join("R1", Role::Instructor)).await;
        let (mut old, mut old_rx) = handler(&server);
        old.handle_message(join("R1", Role::Student)).await;
        let token = resume_token(&mut old_rx).await;
        next(&mut teacher_rx).await;
        next(&mut teacher_rx).await;

        let (mut new, mut new_rx) = handler(&server);
        new.handle_message(resume("R1", Role::Student, &token)).await;
        assert_eq!(new.participant_id(), Some(old.connection_id()));
        match &*next(&mut new_rx).await {
            ServerMessage::RoomState(snapshot) => {
                assert_eq!(snapshot.participant_id.as_deref(), Some(old.connection_id()));
                assert_eq!(snapshot.participants.len(), 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
        match &*next(&mut old_rx).await {
            ServerMessage::RoomError { kind, .. } => assert_eq!(*kind, ErrorKind::NotFound),
            other => panic!("unexpected event {other:?}"),
        }

        // The stale socket closing later must not remove the resumed participant
        old.cleanup();
        teacher.handle_message(ClientMessage::SyncToggle { enabled: false }).await;
        assert_eq!(*next(&mut teacher_rx).await, ServerMessage::SyncToggled { enabled: false });
        new.handle_message(ClientMessage::UpdatePage { page_number: 4 }).await;
        match &*next(&mut teacher_rx).await {
            ServerMessage::ParticipantUpdated(p) => {
                assert_eq!(p.id, old.connection_id());
                assert_eq!(p.current_page_override, Some(4));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejoin_after_resume_keeps_identity() {
        let server = server();
        let (mut old, mut old_rx) = handler(&server);
        old.handle_message(join("R1", Role::Instructor)).await;
        let token = resume_token(&mut old_rx).await;

        let (mut new, mut new_rx) = handler(&server);
        new.handle_message(resume("R1", Role::Instructor, &token)).await;
        next(&mut new_rx).await;
        new.handle_message(join("R1", Role::Instructor)).await;

        match &*next(&mut new_rx).await {
            ServerMessage::RoomState(snapshot) => {
                assert_eq!(snapshot.participants.len(), 1);
                assert_eq!(snapshot.instructor_id.as_deref(), Some(old.connection_id()));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
