//! Room synchronization engine.

mod actor;
pub mod authority;
pub mod expiry;
pub mod fanout;
pub mod model;
pub mod protocol;
mod registry;
pub mod room;
mod server;
mod signaling;
pub mod snapshot;

pub use actor::{Attachment, JoinRequest, RoomHandle};
pub use expiry::ANNOTATION_TTL;
pub use fanout::{ConnectionReceiver, ConnectionSender};
pub use model::{Annotation, AnnotationData, AnnotationDraft, AnnotationKind, ImportantPoint, Participant, Point, Role};
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::{IdSequence, RegistrySettings, RoomRegistry};
pub use room::{JoinOutcome, Room, RoomAction};
pub use server::ClassroomServer;
pub use signaling::SignalingHandler;
pub use snapshot::RoomSnapshot;
