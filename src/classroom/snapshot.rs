//! Full room state sent to joining and reconnecting clients.
//!
//! A snapshot is captured and queued by the room actor itself while it
//! handles the join, so it lands in the connection's outbound queue ahead of
//! every event produced by later commands. Nothing accepted after the capture
//! can be missed, and nothing accepted before it is delivered twice.

use serde::{Deserialize, Serialize};

use super::fanout::Fanout;
use super::model::{Annotation, ImportantPoint, Participant, ParticipantId};
use super::protocol::ServerMessage;
use super::room::Room;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: String,
    pub material_id: String,
    pub total_pages: u32,
    pub current_page: u32,
    pub sync_enabled: bool,
    #[serde(default)]
    pub instructor_id: Option<ParticipantId>,
    pub annotations: Vec<Annotation>,
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub important_point: Option<ImportantPoint>,
    /// The recipient's own participant id, when it is attached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<ParticipantId>,
    /// Presented in a later `room:join` to re-attach as the same participant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
}

impl RoomSnapshot {
    pub fn capture(room: &Room, recipient: Option<&str>) -> Self {
        let mut participants: Vec<Participant> = room.participants.values().cloned().collect();
        participants.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));

        Self {
            room_id: room.id.clone(),
            material_id: room.material_id.clone(),
            total_pages: room.total_pages,
            current_page: room.current_page,
            sync_enabled: room.sync_enabled,
            instructor_id: room.instructor_id().map(str::to_string),
            annotations: room.annotations.clone(),
            participants,
            important_point: room.important_point.clone(),
            participant_id: recipient
                .filter(|id| room.participants.contains_key(*id))
                .map(str::to_string),
            resume_token: recipient
                .and_then(|id| room.resume_token(id))
                .map(str::to_string),
        }
    }

    /// Same room state with the recipient-specific fields cleared.
    pub fn shared_state(&self) -> Self {
        Self {
            participant_id: None,
            resume_token: None,
            ..self.clone()
        }
    }
}

/// Queue a snapshot for an attached participant.
pub fn deliver_to_participant(room: &Room, fanout: &Fanout, participant_id: &str) -> bool {
    let snapshot = room.snapshot(Some(participant_id));
    let delivered = fanout.send_to(participant_id, ServerMessage::RoomState(snapshot));
    if delivered {
        tracing::debug!(room_id = %room.id, participant_id = %participant_id, "Delivered room snapshot");
    }
    delivered
}
