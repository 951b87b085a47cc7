use super::model::{Participant, ParticipantId, Role};
use crate::error::{ClassroomError, Result};

/// Tracks which participant, if any, holds instructor authority in a room.
///
/// The first instructor to join binds the room. While bound, other instructor
/// claims are rejected. When the bound instructor leaves the room is headless
/// and the next instructor to join takes over.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuthorityGuard {
    bound: Option<ParticipantId>,
}

impl AuthorityGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound(&self) -> Option<&str> {
        self.bound.as_deref()
    }

    pub fn is_headless(&self) -> bool {
        self.bound.is_none()
    }

    /// Bind `participant_id` as the room's instructor. Re-claiming by the
    /// current holder is a no-op.
    pub fn claim(&mut self, room_id: &str, participant_id: &str) -> Result<()> {
        match &self.bound {
            Some(holder) if holder == participant_id => Ok(()),
            Some(_) => Err(ClassroomError::InstructorAlreadyBound(room_id.to_string())),
            None => {
                self.bound = Some(participant_id.to_string());
                Ok(())
            }
        }
    }

    /// Releases authority if `participant_id` holds it. Returns whether the
    /// room became headless.
    pub fn release(&mut self, participant_id: &str) -> bool {
        if self.bound.as_deref() == Some(participant_id) {
            self.bound = None;
            true
        } else {
            false
        }
    }

    /// Gate for mutating commands.
    pub fn authorize(&self, participant: &Participant) -> Result<()> {
        let is_holder = self.bound.as_deref() == Some(participant.id.as_str());
        if participant.role == Role::Instructor && is_holder {
            Ok(())
        } else {
            Err(ClassroomError::Authority(participant.id.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(id: &str, role: Role) -> Participant {
        Participant::new(id.to_string(), role, None)
    }

    #[test]
    fn test_first_claim_binds() {
        let mut guard = AuthorityGuard::new();
        assert!(guard.is_headless());
        guard.claim("R1", "teacher").unwrap();
        assert_eq!(guard.bound(), Some("teacher"));
    }

    #[test]
    fn test_second_claim_rejected() {
        let mut guard = AuthorityGuard::new();
        guard.claim("R1", "teacher").unwrap();
        let err = guard.claim("R1", "usurper").unwrap_err();
        assert!(matches!(err, ClassroomError::InstructorAlreadyBound(room) if room == "R1"));
        assert_eq!(guard.bound(), Some("teacher"));

        // Holder re-claiming is fine
        guard.claim("R1", "teacher").unwrap();
    }

    #[test]
    fn test_release_makes_room_headless() {
        let mut guard = AuthorityGuard::new();
        guard.claim("R1", "teacher").unwrap();

        assert!(!guard.release("student"));
        assert_eq!(guard.bound(), Some("teacher"));

        assert!(guard.release("teacher"));
        assert!(guard.is_headless());

        // A new instructor can take over a headless room
        guard.claim("R1", "substitute").unwrap();
        assert_eq!(guard.bound(), Some("substitute"));
    }

    #[test]
    fn test_authorize() {
        let mut guard = AuthorityGuard::new();
        guard.claim("R1", "teacher").unwrap();

        assert!(guard.authorize(&participant("teacher", Role::Instructor)).is_ok());
        assert!(matches!(
            guard.authorize(&participant("student", Role::Student)),
            Err(ClassroomError::Authority(_))
        ));
        // Instructor role without the binding is not enough
        assert!(guard.authorize(&participant("other", Role::Instructor)).is_err());
        // Neither is the binding with a student role
        assert!(guard.authorize(&participant("teacher", Role::Student)).is_err());
    }

    #[test]
    fn test_headless_rejects_everyone() {
        let guard = AuthorityGuard::new();
        assert!(guard.authorize(&participant("teacher", Role::Instructor)).is_err());
    }
}
