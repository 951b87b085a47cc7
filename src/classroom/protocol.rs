//! Wire format: JSON text frames shaped `{"event": "...", "data": {...}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::{Annotation, AnnotationDraft, AnnotationId, ImportantPoint, Participant, ParticipantId, Role};
use super::snapshot::RoomSnapshot;
use crate::error::{ClassroomError, ErrorKind, Result};

/// Commands sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "room:join", rename_all = "camelCase")]
    Join {
        room_id: String,
        role: Role,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Material to bind when this join creates the room
        #[serde(default, skip_serializing_if = "Option::is_none")]
        material_id: Option<String>,
        /// Token from an earlier `room:state`; re-attaches that participant
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_token: Option<String>,
    },

    #[serde(rename = "room:leave", rename_all = "camelCase")]
    Leave { room_id: String },

    #[serde(rename = "room:request-state", rename_all = "camelCase")]
    RequestState { room_id: String },

    #[serde(rename = "page:change", rename_all = "camelCase")]
    PageChange { page_number: u32 },

    #[serde(rename = "sync:toggle")]
    SyncToggle { enabled: bool },

    #[serde(rename = "annotation:add")]
    AnnotationAdd(AnnotationDraft),

    #[serde(rename = "annotation:remove")]
    AnnotationRemove { id: AnnotationId },

    #[serde(rename = "annotation:clear", rename_all = "camelCase")]
    AnnotationClear {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_number: Option<u32>,
    },

    #[serde(rename = "important:display")]
    ImportantDisplay { title: String, points: Vec<String> },

    #[serde(rename = "important:dismiss")]
    ImportantDismiss,

    #[serde(rename = "participant:update-page", rename_all = "camelCase")]
    UpdatePage { page_number: u32 },
}

impl ClientMessage {
    /// Parses a text frame. Payload-less events may arrive with `data`
    /// missing, `null` or `{}`; all three are accepted.
    pub fn from_json(text: &str) -> Result<Self> {
        let mut value: Value = serde_json::from_str(text)
            .map_err(|e| ClassroomError::InvalidMessage(e.to_string()))?;

        if let Some(frame) = value.as_object_mut() {
            match frame.get("event").and_then(Value::as_str) {
                Some("important:dismiss") => {
                    frame.remove("data");
                }
                Some("annotation:clear") => {
                    let empty = frame.get("data").map_or(true, Value::is_null);
                    if empty {
                        frame.insert("data".to_string(), Value::Object(Default::default()));
                    }
                }
                _ => {}
            }
        }

        serde_json::from_value(value).map_err(|e| ClassroomError::InvalidMessage(e.to_string()))
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "room:join",
            ClientMessage::Leave { .. } => "room:leave",
            ClientMessage::RequestState { .. } => "room:request-state",
            ClientMessage::PageChange { .. } => "page:change",
            ClientMessage::SyncToggle { .. } => "sync:toggle",
            ClientMessage::AnnotationAdd(_) => "annotation:add",
            ClientMessage::AnnotationRemove { .. } => "annotation:remove",
            ClientMessage::AnnotationClear { .. } => "annotation:clear",
            ClientMessage::ImportantDisplay { .. } => "important:display",
            ClientMessage::ImportantDismiss => "important:dismiss",
            ClientMessage::UpdatePage { .. } => "participant:update-page",
        }
    }
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "room:state")]
    RoomState(RoomSnapshot),

    #[serde(rename = "room:error")]
    RoomError { kind: ErrorKind, message: String },

    #[serde(rename = "page:changed", rename_all = "camelCase")]
    PageChanged { page_number: u32, timestamp: i64 },

    #[serde(rename = "sync:toggled")]
    SyncToggled { enabled: bool },

    #[serde(rename = "annotation:added")]
    AnnotationAdded(Annotation),

    #[serde(rename = "annotation:removed")]
    AnnotationRemoved { id: AnnotationId },

    #[serde(rename = "annotation:cleared", rename_all = "camelCase")]
    AnnotationCleared {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_number: Option<u32>,
    },

    #[serde(rename = "important:show")]
    ImportantShow(ImportantPoint),

    #[serde(rename = "important:hide")]
    ImportantHide,

    #[serde(rename = "participant:joined")]
    ParticipantJoined(Participant),

    #[serde(rename = "participant:left")]
    ParticipantLeft { id: ParticipantId },

    #[serde(rename = "participant:updated")]
    ParticipantUpdated(Participant),
}

impl ServerMessage {
    pub fn error(err: &ClassroomError) -> Self {
        ServerMessage::RoomError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::RoomState(_) => "room:state",
            ServerMessage::RoomError { .. } => "room:error",
            ServerMessage::PageChanged { .. } => "page:changed",
            ServerMessage::SyncToggled { .. } => "sync:toggled",
            ServerMessage::AnnotationAdded(_) => "annotation:added",
            ServerMessage::AnnotationRemoved { .. } => "annotation:removed",
            ServerMessage::AnnotationCleared { .. } => "annotation:cleared",
            ServerMessage::ImportantShow(_) => "important:show",
            ServerMessage::ImportantHide => "important:hide",
            ServerMessage::ParticipantJoined(_) => "participant:joined",
            ServerMessage::ParticipantLeft { .. } => "participant:left",
            ServerMessage::ParticipantUpdated(_) => "participant:updated",
        }
    }
}
