use crate::classroom::{ClientMessage, RoomSnapshot, Role, ServerMessage};
use crate::error::{ClassroomError, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Socket open or opening, snapshot not received yet
    Connecting,
    Joined,
}

/// Local copy of the room, rebuilt from every snapshot and kept current by
/// applying live events.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomView {
    pub state: RoomSnapshot,
}

impl RoomView {
    pub fn new(snapshot: RoomSnapshot) -> Self {
        Self { state: snapshot }
    }

    /// Apply one server event. Returns whether the view changed.
    pub fn apply(&mut self, message: &ServerMessage) -> bool {
        let state = &mut self.state;
        match message {
            ServerMessage::RoomState(snapshot) => {
                *state = snapshot.clone();
            }
            ServerMessage::PageChanged { page_number, .. } => {
                state.current_page = *page_number;
            }
            ServerMessage::SyncToggled { enabled } => {
                state.sync_enabled = *enabled;
            }
            ServerMessage::AnnotationAdded(annotation) => {
                if state.annotations.iter().any(|a| a.id == annotation.id) {
                    return false;
                }
                state.annotations.push(annotation.clone());
            }
            ServerMessage::AnnotationRemoved { id } => {
                let before = state.annotations.len();
                state.annotations.retain(|a| &a.id != id);
                return state.annotations.len() != before;
            }
            ServerMessage::AnnotationCleared { page_number } => {
                match page_number {
                    Some(page) => state.annotations.retain(|a| a.page_number != *page),
                    None => state.annotations.clear(),
                }
            }
            ServerMessage::ImportantShow(point) => {
                state.important_point = Some(point.clone());
            }
            ServerMessage::ImportantHide => {
                state.important_point = None;
            }
            ServerMessage::ParticipantJoined(participant) | ServerMessage::ParticipantUpdated(participant) => {
                match state.participants.iter_mut().find(|p| p.id == participant.id) {
                    Some(existing) => *existing = participant.clone(),
                    None => state.participants.push(participant.clone()),
                }
                if participant.role == Role::Instructor {
                    state.instructor_id = Some(participant.id.clone());
                } else if state.instructor_id.as_deref() == Some(participant.id.as_str()) {
                    state.instructor_id = None;
                }
            }
            ServerMessage::ParticipantLeft { id } => {
                state.participants.retain(|p| &p.id != id);
                if state.instructor_id.as_ref() == Some(id) {
                    state.instructor_id = None;
                }
            }
            ServerMessage::RoomError { .. } => return false,
        }
        true
    }
}

/// Why the server refused a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRejection {
    pub kind: ErrorKind,
    pub message: String,
}

impl JoinRejection {
    /// Retrying the same join cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self.kind, ErrorKind::Validation | ErrorKind::NotFound)
    }
}

/// Client side of one room membership across reconnects.
#[derive(Debug, Clone)]
pub struct ClientSession {
    room_id: String,
    role: Role,
    name: Option<String>,
    material_id: Option<String>,
    state: ConnectionState,
    view: Option<RoomView>,
    rejection: Option<JoinRejection>,
}

impl ClientSession {
    pub fn new(room_id: impl Into<String>, role: Role) -> Self {
        Self {
            room_id: room_id.into(),
            role,
            name: None,
            material_id: None,
            state: ConnectionState::Disconnected,
            view: None,
            rejection: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_material(mut self, material_id: impl Into<String>) -> Self {
        self.material_id = Some(material_id.into());
        self
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Last known room state. Stale while not joined.
    pub fn view(&self) -> Option<&RoomView> {
        self.view.as_ref()
    }

    pub fn participant_id(&self) -> Option<&str> {
        self.view.as_ref()?.state.participant_id.as_deref()
    }

    pub fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
        self.rejection = None;
    }

    /// Set when the last join was refused.
    pub fn rejection(&self) -> Option<&JoinRejection> {
        self.rejection.as_ref()
    }

    pub fn connection_lost(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// The frame that (re)attaches this session after a connect. Carries the
    /// resume token from the last snapshot so the server re-attaches the same
    /// participant.
    pub fn join_message(&self) -> ClientMessage {
        ClientMessage::Join {
            room_id: self.room_id.clone(),
            role: self.role,
            name: self.name.clone(),
            material_id: self.material_id.clone(),
            resume_token: self.view.as_ref().and_then(|view| view.state.resume_token.clone()),
        }
    }

    /// Feed a server event. Until the snapshot arrives after a connect, live
    /// events are ignored and an error means the join was refused, which
    /// drops the session back to `Disconnected`. Returns whether the local
    /// view changed.
    pub fn handle(&mut self, message: &ServerMessage) -> bool {
        match (self.state, message) {
            (ConnectionState::Disconnected, _) => false,
            (_, ServerMessage::RoomState(snapshot)) => {
                self.state = ConnectionState::Joined;
                self.view = Some(RoomView::new(snapshot.clone()));
                true
            }
            (ConnectionState::Connecting, ServerMessage::RoomError { kind, message }) => {
                self.state = ConnectionState::Disconnected;
                self.rejection = Some(JoinRejection {
                    kind: *kind,
                    message: message.clone(),
                });
                false
            }
            (ConnectionState::Connecting, _) => false,
            (ConnectionState::Joined, message) => match self.view.as_mut() {
                Some(view) => view.apply(message),
                None => false,
            },
        }
    }

    /// Whether `message` may be sent now.
    pub fn check_outbound(&self, message: &ClientMessage) -> Result<()> {
        check_outbound(self.state, self.role, message)
    }
}

/// Commands are only sent once joined, and shared-state commands only by an
/// instructor.
pub fn check_outbound(state: ConnectionState, role: Role, message: &ClientMessage) -> Result<()> {
    if state != ConnectionState::Joined {
        return Err(ClassroomError::NoRoom);
    }
    let instructor_only = !matches!(
        message,
        ClientMessage::Join { .. }
            | ClientMessage::Leave { .. }
            | ClientMessage::RequestState { .. }
            | ClientMessage::UpdatePage { .. }
    );
    if instructor_only && role != Role::Instructor {
        return Err(ClassroomError::Authority(format!("{role:?} client")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classroom::{Annotation, AnnotationData, AnnotationDraft, AnnotationKind, Participant, Room};

    fn snapshot() -> RoomSnapshot {
        let mut room = Room::new("R1", "rebar-1", 9);
        room.attach("teacher", Role::Instructor, None).unwrap();
        room.attach("s1", Role::Student, None).unwrap();
        room.snapshot(Some("s1"))
    }

    fn annotation(id: &str, page: u32) -> Annotation {
        AnnotationDraft {
            page_number: page,
            kind: AnnotationKind::Pin,
            data: AnnotationData::Pin { x: 1.0, y: 2.0, label: None, size: None },
            color: "red".into(),
            temporary: Some(false),
        }
        .into_annotation(id.to_string())
    }

    #[test]
    fn test_input_gated_until_snapshot() {
        let mut session = ClientSession::new("R1", Role::Student);
        let page = ClientMessage::UpdatePage { page_number: 2 };
        assert!(session.check_outbound(&page).is_err());

        session.begin_connect();
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert!(!session.handle(&ServerMessage::PageChanged { page_number: 3, timestamp: 0 }));
        assert!(session.check_outbound(&page).is_err());

        assert!(session.handle(&ServerMessage::RoomState(snapshot())));
        assert_eq!(session.state(), ConnectionState::Joined);
        assert_eq!(session.participant_id(), Some("s1"));
        assert!(session.check_outbound(&page).is_ok());
    }

    #[test]
    fn test_reconnect_requires_fresh_snapshot() {
        let mut session = ClientSession::new("R1", Role::Student);
        session.begin_connect();
        session.handle(&ServerMessage::RoomState(snapshot()));

        session.connection_lost();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.view().is_some());

        session.begin_connect();
        assert!(session.check_outbound(&ClientMessage::UpdatePage { page_number: 2 }).is_err());
        let mut fresh = snapshot();
        fresh.current_page = 7;
        session.handle(&ServerMessage::RoomState(fresh));
        assert_eq!(session.view().unwrap().state.current_page, 7);
    }

    #[test]
    fn test_student_cannot_send_instructor_commands() {
        let result = check_outbound(
            ConnectionState::Joined,
            Role::Student,
            &ClientMessage::PageChange { page_number: 2 },
        );
        assert!(matches!(result, Err(ClassroomError::Authority(_))));
        assert!(check_outbound(
            ConnectionState::Joined,
            Role::Instructor,
            &ClientMessage::PageChange { page_number: 2 }
        )
        .is_ok());
    }

    #[test]
    fn test_view_applies_events() {
        let mut view = RoomView::new(snapshot());
        view.apply(&ServerMessage::PageChanged { page_number: 4, timestamp: 0 });
        view.apply(&ServerMessage::SyncToggled { enabled: false });
        view.apply(&ServerMessage::AnnotationAdded(annotation("ann_1", 4)));
        view.apply(&ServerMessage::AnnotationAdded(annotation("ann_2", 5)));
        assert!(!view.apply(&ServerMessage::AnnotationAdded(annotation("ann_1", 4))));

        assert_eq!(view.state.current_page, 4);
        assert!(!view.state.sync_enabled);
        assert_eq!(view.state.annotations.len(), 2);

        view.apply(&ServerMessage::AnnotationCleared { page_number: Some(4) });
        assert_eq!(view.state.annotations.len(), 1);
        assert!(view.apply(&ServerMessage::AnnotationRemoved { id: "ann_2".into() }));
        assert!(!view.apply(&ServerMessage::AnnotationRemoved { id: "ann_2".into() }));
    }

    #[test]
    fn test_view_tracks_participants() {
        let mut view = RoomView::new(snapshot());
        view.apply(&ServerMessage::ParticipantLeft { id: "teacher".into() });
        assert!(view.state.instructor_id.is_none());
        assert_eq!(view.state.participants.len(), 1);

        let substitute = Participant::new("sub".into(), Role::Instructor, None);
        view.apply(&ServerMessage::ParticipantJoined(substitute));
        assert_eq!(view.state.instructor_id.as_deref(), Some("sub"));
        assert_eq!(view.state.participants.len(), 2);
    }

    #[test]
    fn test_refused_join_disconnects() {
        let mut session = ClientSession::new("R1", Role::Instructor);
        session.begin_connect();
        let refused = ServerMessage::error(&ClassroomError::InstructorAlreadyBound("R1".into()));
        assert!(!session.handle(&refused));

        assert_eq!(session.state(), ConnectionState::Disconnected);
        let rejection = session.rejection().unwrap();
        assert_eq!(rejection.kind, ErrorKind::Authority);
        assert!(!rejection.is_permanent());

        session.begin_connect();
        assert!(session.rejection().is_none());
    }

    #[test]
    fn test_error_after_join_keeps_session() {
        let mut session = ClientSession::new("R1", Role::Student);
        session.begin_connect();
        session.handle(&ServerMessage::RoomState(snapshot()));
        session.handle(&ServerMessage::error(&ClassroomError::Authority("s1".into())));
        assert_eq!(session.state(), ConnectionState::Joined);
        assert!(session.rejection().is_none());
    }

    #[test]
    fn test_join_message_carries_resume_token() {
        let mut session = ClientSession::new("R1", Role::Student);
        match session.join_message() {
            ClientMessage::Join { resume_token, .. } => assert!(resume_token.is_none()),
            other => panic!("unexpected message {other:?}"),
        }

        session.begin_connect();
        let mut state = snapshot();
        state.resume_token = Some("rsm_1".into());
        session.handle(&ServerMessage::RoomState(state));
        match session.join_message() {
            ClientMessage::Join { resume_token, .. } => assert_eq!(resume_token.as_deref(), Some("rsm_1")),
            other => panic!("unexpected message {other:?}"),
        }
    }
}
