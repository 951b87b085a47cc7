use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::Rng;

use super::authority::AuthorityGuard;
use super::model::{
    check_page, Annotation, AnnotationDraft, AnnotationId, ImportantPoint, Participant, ParticipantId, Role,
};
use super::protocol::ClientMessage;
use super::snapshot::RoomSnapshot;
use crate::error::{ClassroomError, Result};

/// In-room commands from an attached participant.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomAction {
    ChangePage { page_number: u32 },
    ToggleSync { enabled: bool },
    AddAnnotation(AnnotationDraft),
    RemoveAnnotation { id: AnnotationId },
    ClearAnnotations { page_number: Option<u32> },
    DisplayImportant { title: String, points: Vec<String> },
    DismissImportant,
    UpdatePage { page_number: u32 },
}

impl RoomAction {
    /// Everything except a student's own page tracking mutates shared state.
    pub fn requires_authority(&self) -> bool {
        !matches!(self, RoomAction::UpdatePage { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            RoomAction::ChangePage { .. } => "page:change",
            RoomAction::ToggleSync { .. } => "sync:toggle",
            RoomAction::AddAnnotation(_) => "annotation:add",
            RoomAction::RemoveAnnotation { .. } => "annotation:remove",
            RoomAction::ClearAnnotations { .. } => "annotation:clear",
            RoomAction::DisplayImportant { .. } => "important:display",
            RoomAction::DismissImportant => "important:dismiss",
            RoomAction::UpdatePage { .. } => "participant:update-page",
        }
    }
}

impl TryFrom<ClientMessage> for RoomAction {
    type Error = ClientMessage;

    /// Room-membership messages (join, leave, request-state) are not actions
    /// and are handed back unchanged.
    fn try_from(message: ClientMessage) -> std::result::Result<Self, Self::Error> {
        Ok(match message {
            ClientMessage::PageChange { page_number } => RoomAction::ChangePage { page_number },
            ClientMessage::SyncToggle { enabled } => RoomAction::ToggleSync { enabled },
            ClientMessage::AnnotationAdd(draft) => RoomAction::AddAnnotation(draft),
            ClientMessage::AnnotationRemove { id } => RoomAction::RemoveAnnotation { id },
            ClientMessage::AnnotationClear { page_number } => RoomAction::ClearAnnotations { page_number },
            ClientMessage::ImportantDisplay { title, points } => RoomAction::DisplayImportant { title, points },
            ClientMessage::ImportantDismiss => RoomAction::DismissImportant,
            ClientMessage::UpdatePage { page_number } => RoomAction::UpdatePage { page_number },
            other => return Err(other),
        })
    }
}

/// Result of attaching a participant.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// New participant
    Joined(Participant),
    /// Same connection joined again with the same role
    Rejoined(Participant),
    /// Same connection joined again with a different role
    RoleChanged(Participant),
}

impl JoinOutcome {
    pub fn participant(&self) -> &Participant {
        match self {
            JoinOutcome::Joined(p) | JoinOutcome::Rejoined(p) | JoinOutcome::RoleChanged(p) => p,
        }
    }
}

/// Shared state of one room. Every method is synchronous; the room actor
/// serializes calls and turns results into broadcasts.
#[derive(Debug)]
pub struct Room {
    pub id: String,
    pub material_id: String,
    pub total_pages: u32,
    pub current_page: u32,
    pub sync_enabled: bool,
    pub annotations: Vec<Annotation>,
    pub participants: HashMap<ParticipantId, Participant>,
    pub important_point: Option<ImportantPoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    authority: AuthorityGuard,
    /// Secret handed to each participant in its own snapshot
    resume_tokens: HashMap<ParticipantId, String>,
}

impl Room {
    pub fn new(id: impl Into<String>, material_id: impl Into<String>, total_pages: u32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            material_id: material_id.into(),
            total_pages,
            current_page: 1,
            sync_enabled: true,
            annotations: Vec::new(),
            participants: HashMap::new(),
            important_point: None,
            created_at: now,
            updated_at: now,
            authority: AuthorityGuard::new(),
            resume_tokens: HashMap::new(),
        }
    }

    pub fn instructor_id(&self) -> Option<&str> {
        self.authority.bound()
    }

    pub fn is_headless(&self) -> bool {
        self.authority.is_headless()
    }

    pub fn participant(&self, participant_id: &str) -> Option<&Participant> {
        self.participants.get(participant_id)
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn resume_token(&self, participant_id: &str) -> Option<&str> {
        self.resume_tokens.get(participant_id).map(String::as_str)
    }

    /// The attached participant a resume token belongs to.
    pub fn resolve_resume(&self, token: &str) -> Option<&str> {
        self.resume_tokens
            .iter()
            .find(|(_, issued)| issued.as_str() == token)
            .map(|(participant_id, _)| participant_id.as_str())
    }

    /// Attach a participant, binding authority for instructors.
    pub fn attach(&mut self, participant_id: &str, role: Role, name: Option<String>) -> Result<JoinOutcome> {
        if let Some(existing) = self.participants.get(participant_id) {
            let previous_role = existing.role;
            match (previous_role, role) {
                (Role::Student, Role::Instructor) => self.authority.claim(&self.id, participant_id)?,
                (Role::Instructor, Role::Student) => {
                    self.authority.release(participant_id);
                }
                (Role::Instructor, Role::Instructor) => {
                    // A previously rejected claim may now succeed
                    self.authority.claim(&self.id, participant_id)?
                }
                (Role::Student, Role::Student) => {}
            }

            let participant = self
                .participants
                .get_mut(participant_id)
                .ok_or_else(|| ClassroomError::internal("participant vanished during rejoin"))?;
            if name.is_some() {
                participant.name = name;
            }
            participant.role = role;
            participant.touch();
            let participant = participant.clone();
            self.touch();

            return Ok(if previous_role == role {
                JoinOutcome::Rejoined(participant)
            } else {
                JoinOutcome::RoleChanged(participant)
            });
        }

        if role == Role::Instructor {
            self.authority.claim(&self.id, participant_id)?;
        }

        let participant = Participant::new(participant_id.to_string(), role, name);
        self.participants.insert(participant_id.to_string(), participant.clone());
        self.resume_tokens
            .insert(participant_id.to_string(), generate_resume_token());
        self.touch();
        Ok(JoinOutcome::Joined(participant))
    }

    /// Remove a participant. Returns it when it was attached.
    pub fn detach(&mut self, participant_id: &str) -> Option<Participant> {
        let participant = self.participants.remove(participant_id)?;
        self.resume_tokens.remove(participant_id);
        if self.authority.release(participant_id) {
            tracing::info!(room_id = %self.id, participant_id = %participant_id, "Instructor left, room is headless");
        }
        self.touch();
        Some(participant)
    }

    /// Refresh `lastSeenAt` and check instructor authority when required.
    pub fn authorize(&mut self, participant_id: &str, action: &RoomAction) -> Result<()> {
        let participant = self
            .participants
            .get_mut(participant_id)
            .ok_or_else(|| ClassroomError::NotJoined(self.id.clone()))?;
        participant.touch();

        if action.requires_authority() {
            self.authority.authorize(participant)?;
        }
        Ok(())
    }

    pub fn change_page(&mut self, page_number: u32) -> Result<()> {
        check_page(page_number, self.total_pages)?;
        self.current_page = page_number;
        self.touch();
        Ok(())
    }

    pub fn toggle_sync(&mut self, enabled: bool) {
        self.sync_enabled = enabled;
        self.touch();
    }

    pub fn add_annotation(&mut self, draft: AnnotationDraft, id: AnnotationId) -> Result<Annotation> {
        draft.validate(self.total_pages)?;
        let annotation = draft.into_annotation(id);
        self.annotations.push(annotation.clone());
        self.touch();
        Ok(annotation)
    }

    pub fn remove_annotation(&mut self, id: &str) -> Option<Annotation> {
        let index = self.annotations.iter().position(|a| a.id == id)?;
        let annotation = self.annotations.remove(index);
        self.touch();
        Some(annotation)
    }

    /// Removes every annotation, or only those on `page_number`. Returns the
    /// removed ids.
    pub fn clear_annotations(&mut self, page_number: Option<u32>) -> Result<Vec<AnnotationId>> {
        if let Some(page) = page_number {
            check_page(page, self.total_pages)?;
        }

        let mut removed = Vec::new();
        self.annotations.retain(|annotation| {
            let matches = page_number.map_or(true, |page| annotation.page_number == page);
            if matches {
                removed.push(annotation.id.clone());
            }
            !matches
        });
        self.touch();
        Ok(removed)
    }

    pub fn display_important(&mut self, id: String, title: String, points: Vec<String>) -> Result<ImportantPoint> {
        if title.trim().is_empty() {
            return Err(ClassroomError::validation("important point title is empty"));
        }
        let point = ImportantPoint {
            id,
            title,
            points,
            displayed_at: Utc::now(),
        };
        self.important_point = Some(point.clone());
        self.touch();
        Ok(point)
    }

    pub fn dismiss_important(&mut self) -> Option<ImportantPoint> {
        let dismissed = self.important_point.take();
        self.touch();
        dismissed
    }

    /// Track a student's own page while sync is off. Returns the updated
    /// participant when the override changed.
    pub fn update_participant_page(&mut self, participant_id: &str, page_number: u32) -> Result<Option<Participant>> {
        check_page(page_number, self.total_pages)?;

        let sync_enabled = self.sync_enabled;
        let participant = self
            .participants
            .get_mut(participant_id)
            .ok_or_else(|| ClassroomError::NotJoined(self.id.clone()))?;

        if participant.role == Role::Instructor {
            return Err(ClassroomError::validation(
                "the instructor's page is the room page, use page:change",
            ));
        }
        if sync_enabled {
            return Ok(None);
        }
        if participant.current_page_override == Some(page_number) {
            return Ok(None);
        }

        participant.current_page_override = Some(page_number);
        Ok(Some(participant.clone()))
    }

    /// The page a participant should be looking at.
    pub fn effective_page(&self, participant_id: &str) -> Option<u32> {
        let participant = self.participants.get(participant_id)?;
        if self.sync_enabled || participant.role == Role::Instructor {
            Some(self.current_page)
        } else {
            Some(participant.current_page_override.unwrap_or(self.current_page))
        }
    }

    pub fn snapshot(&self, recipient: Option<&str>) -> RoomSnapshot {
        RoomSnapshot::capture(self, recipient)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn generate_resume_token() -> String {
    let mut rng = rand::thread_rng();
    format!("rsm_{:032x}", rng.gen::<u128>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classroom::model::{AnnotationData, AnnotationKind};

    fn room() -> Room {
        Room::new("R1", "rebar-1", 9)
    }

    fn pin(page: u32) -> AnnotationDraft {
        AnnotationDraft {
            page_number: page,
            kind: AnnotationKind::Pin,
            data: AnnotationData::Pin { x: 10.0, y: 10.0, label: None, size: None },
            color: "red".to_string(),
            temporary: None,
        }
    }

    #[test]
    fn test_new_room_defaults() {
        let room = room();
        assert_eq!(room.current_page, 1);
        assert!(room.sync_enabled);
        assert!(room.annotations.is_empty());
        assert!(room.is_headless());
    }

    #[test]
    fn test_attach_binds_first_instructor() {
        let mut room = room();
        let outcome = room.attach("teacher", Role::Instructor, Some("Sato".into())).unwrap();
        assert!(matches!(outcome, JoinOutcome::Joined(_)));
        assert_eq!(room.instructor_id(), Some("teacher"));

        let err = room.attach("other", Role::Instructor, None).unwrap_err();
        assert!(matches!(err, ClassroomError::InstructorAlreadyBound(_)));
        assert!(room.participant("other").is_none());
    }

    #[test]
    fn test_rejoin_is_idempotent() {
        let mut room = room();
        room.attach("s1", Role::Student, Some("Aoi".into())).unwrap();
        let outcome = room.attach("s1", Role::Student, None).unwrap();
        assert!(matches!(outcome, JoinOutcome::Rejoined(ref p) if p.name.as_deref() == Some("Aoi")));
        assert_eq!(room.participants.len(), 1);
    }

    #[test]
    fn test_resume_token_lifecycle() {
        let mut room = room();
        room.attach("s1", Role::Student, None).unwrap();
        room.attach("s2", Role::Student, None).unwrap();

        let token = room.resume_token("s1").unwrap().to_string();
        assert!(token.starts_with("rsm_"));
        assert_ne!(room.resume_token("s2"), Some(token.as_str()));
        assert_eq!(room.resolve_resume(&token), Some("s1"));
        assert_eq!(room.resolve_resume("rsm_forged"), None);

        // A rejoin keeps the token
        room.attach("s1", Role::Student, None).unwrap();
        assert_eq!(room.resume_token("s1"), Some(token.as_str()));

        room.detach("s1");
        assert_eq!(room.resolve_resume(&token), None);
    }

    #[test]
    fn test_rejoin_with_role_change() {
        let mut room = room();
        room.attach("p1", Role::Student, None).unwrap();
        let outcome = room.attach("p1", Role::Instructor, None).unwrap();
        assert!(matches!(outcome, JoinOutcome::RoleChanged(_)));
        assert_eq!(room.instructor_id(), Some("p1"));

        room.attach("p1", Role::Student, None).unwrap();
        assert!(room.is_headless());
    }

    #[test]
    fn test_detach_instructor_makes_room_headless() {
        let mut room = room();
        room.attach("teacher", Role::Instructor, None).unwrap();
        room.attach("s1", Role::Student, None).unwrap();
        room.change_page(4).unwrap();

        assert!(room.detach("teacher").is_some());
        assert!(room.is_headless());
        assert_eq!(room.current_page, 4);
        assert!(room.detach("teacher").is_none());

        room.attach("substitute", Role::Instructor, None).unwrap();
        assert_eq!(room.instructor_id(), Some("substitute"));
    }

    #[test]
    fn test_authorize_gates_mutations() {
        let mut room = room();
        room.attach("teacher", Role::Instructor, None).unwrap();
        room.attach("s1", Role::Student, None).unwrap();

        let action = RoomAction::ChangePage { page_number: 2 };
        assert!(room.authorize("teacher", &action).is_ok());
        assert!(matches!(room.authorize("s1", &action), Err(ClassroomError::Authority(_))));
        assert!(matches!(room.authorize("ghost", &action), Err(ClassroomError::NotJoined(_))));

        let own_page = RoomAction::UpdatePage { page_number: 2 };
        assert!(room.authorize("s1", &own_page).is_ok());
    }

    #[test]
    fn test_change_page_bounds() {
        let mut room = room();
        room.change_page(5).unwrap();
        assert_eq!(room.current_page, 5);

        assert!(matches!(room.change_page(15), Err(ClassroomError::PageOutOfRange { .. })));
        assert!(room.change_page(0).is_err());
        assert_eq!(room.current_page, 5);
    }

    #[test]
    fn test_annotations_keep_insertion_order() {
        let mut room = room();
        room.add_annotation(pin(2), "ann_1".into()).unwrap();
        room.add_annotation(pin(1), "ann_2".into()).unwrap();
        room.add_annotation(pin(2), "ann_3".into()).unwrap();

        let ids: Vec<_> = room.annotations.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["ann_1", "ann_2", "ann_3"]);

        assert!(room.add_annotation(pin(10), "ann_4".into()).is_err());
        assert_eq!(room.annotations.len(), 3);
    }

    #[test]
    fn test_remove_unknown_annotation_is_noop() {
        let mut room = room();
        room.add_annotation(pin(1), "ann_1".into()).unwrap();
        assert!(room.remove_annotation("ann_404").is_none());
        assert_eq!(room.annotations.len(), 1);
        assert!(room.remove_annotation("ann_1").is_some());
        assert!(room.annotations.is_empty());
    }

    #[test]
    fn test_clear_by_page() {
        let mut room = room();
        room.add_annotation(pin(1), "ann_1".into()).unwrap();
        room.add_annotation(pin(2), "ann_2".into()).unwrap();
        room.add_annotation(pin(1), "ann_3".into()).unwrap();

        let removed = room.clear_annotations(Some(1)).unwrap();
        assert_eq!(removed, vec!["ann_1".to_string(), "ann_3".to_string()]);
        assert_eq!(room.annotations.len(), 1);

        assert!(room.clear_annotations(Some(42)).is_err());

        let removed = room.clear_annotations(None).unwrap();
        assert_eq!(removed, vec!["ann_2".to_string()]);
        assert!(room.annotations.is_empty());
    }

    #[test]
    fn test_important_point_lifecycle() {
        let mut room = room();
        assert!(room.display_important("imp_1".into(), " ".into(), vec![]).is_err());

        let point = room
            .display_important("imp_1".into(), "Cover depth".into(), vec!["40mm minimum".into()])
            .unwrap();
        assert_eq!(room.important_point.as_ref(), Some(&point));

        let replaced = room.display_important("imp_2".into(), "Spacing".into(), vec![]).unwrap();
        assert_eq!(room.important_point.as_ref().map(|p| p.id.as_str()), Some("imp_2"));
        assert_eq!(room.dismiss_important(), Some(replaced));
        assert!(room.important_point.is_none());
    }

    #[test]
    fn test_participant_page_only_when_unsynced() {
        let mut room = room();
        room.attach("teacher", Role::Instructor, None).unwrap();
        room.attach("s1", Role::Student, None).unwrap();
        room.change_page(3).unwrap();

        // Sync on: ignored
        assert_eq!(room.update_participant_page("s1", 5).unwrap(), None);
        assert_eq!(room.effective_page("s1"), Some(3));

        room.toggle_sync(false);
        let updated = room.update_participant_page("s1", 5).unwrap().unwrap();
        assert_eq!(updated.current_page_override, Some(5));
        assert_eq!(room.effective_page("s1"), Some(5));
        assert_eq!(room.effective_page("teacher"), Some(3));

        // Same page again is not a change
        assert_eq!(room.update_participant_page("s1", 5).unwrap(), None);

        assert!(room.update_participant_page("s1", 10).is_err());
        assert!(room.update_participant_page("teacher", 2).is_err());

        // Re-enabling sync keeps overrides but everyone follows the room page
        room.toggle_sync(true);
        assert_eq!(room.effective_page("s1"), Some(3));
        assert_eq!(room.participant("s1").unwrap().current_page_override, Some(5));
    }

    #[test]
    fn test_action_from_client_message() {
        let action = RoomAction::try_from(ClientMessage::PageChange { page_number: 2 }).unwrap();
        assert_eq!(action, RoomAction::ChangePage { page_number: 2 });
        assert!(action.requires_authority());

        let leave = ClientMessage::Leave { room_id: "R1".into() };
        assert_eq!(RoomAction::try_from(leave.clone()), Err(leave));
    }
}
