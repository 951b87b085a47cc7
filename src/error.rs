use thiserror::Error;

/// Custom error types for the classroom sync server
#[derive(Debug, Error)]
pub enum ClassroomError {
    /// Authority errors
    #[error("Participant {0} is not the room's instructor")]
    Authority(String),

    #[error("Room {0} already has an instructor")]
    InstructorAlreadyBound(String),

    /// Validation errors
    #[error("Invalid command: {0}")]
    Validation(String),

    #[error("Page {page} is outside 1..={total_pages}")]
    PageOutOfRange { page: u32, total_pages: u32 },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Lookup errors
    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Material {0} not found")]
    MaterialNotFound(String),

    #[error("Connection has not joined room {0}")]
    NotJoined(String),

    #[error("Connection has not joined a room")]
    NoRoom,

    #[error("Room {0} is closed")]
    RoomClosed(String),

    #[error("Session in room {0} was resumed on another connection")]
    SessionSuperseded(String),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to load material catalog: {0}")]
    CatalogLoadFailed(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using ClassroomError
pub type Result<T> = std::result::Result<T, ClassroomError>;

/// Coarse category reported to clients in `room:error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authority,
    Validation,
    NotFound,
    Internal,
}

impl ClassroomError {
    /// Helper to create Validation errors with context
    pub fn validation(msg: impl Into<String>) -> Self {
        ClassroomError::Validation(msg.into())
    }

    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        ClassroomError::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClassroomError::Authority(_) | ClassroomError::InstructorAlreadyBound(_) => {
                ErrorKind::Authority
            }
            ClassroomError::Validation(_)
            | ClassroomError::PageOutOfRange { .. }
            | ClassroomError::InvalidMessage(_) => ErrorKind::Validation,
            ClassroomError::RoomNotFound(_)
            | ClassroomError::MaterialNotFound(_)
            | ClassroomError::NotJoined(_)
            | ClassroomError::NoRoom
            | ClassroomError::RoomClosed(_)
            | ClassroomError::SessionSuperseded(_) => ErrorKind::NotFound,
            _ => ErrorKind::Internal,
        }
    }
}
