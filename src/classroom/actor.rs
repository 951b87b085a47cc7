//! One task per room.
//!
//! Every command, snapshot request, timer firing and teardown check goes
//! through the room's mailbox and is handled to completion before the next
//! one. That single queue is what makes broadcasts totally ordered per room
//! and snapshots consistent with the live event stream.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::expiry::ExpiryScheduler;
use super::fanout::{ConnectionSender, Fanout};
use super::model::{AnnotationId, ParticipantId, Role};
use super::protocol::ServerMessage;
use super::registry::{self, IdSequence, RoomMap};
use super::room::{JoinOutcome, Room, RoomAction};
use super::snapshot::{self, RoomSnapshot};
use crate::error::{ClassroomError, Result};

/// A connection's request to enter a room.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRequest {
    pub connection_id: String,
    pub role: Role,
    pub name: Option<String>,
    /// Re-attach the participant this token was issued to
    pub resume_token: Option<String>,
}

impl JoinRequest {
    pub fn new(connection_id: impl Into<String>, role: Role) -> Self {
        Self {
            connection_id: connection_id.into(),
            role,
            name: None,
            resume_token: None,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_resume_token(mut self, token: Option<String>) -> Self {
        self.resume_token = token;
        self
    }
}

/// A participant as reached through one connection. After a resume only the
/// newest connection speaks for the participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub participant_id: ParticipantId,
    pub connection_id: String,
}

impl Attachment {
    pub fn new(participant_id: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            connection_id: connection_id.into(),
        }
    }
}

pub(crate) enum RoomCommand {
    Join {
        request: JoinRequest,
        sender: ConnectionSender,
        reply: oneshot::Sender<Result<JoinOutcome>>,
    },
    Leave {
        attachment: Attachment,
    },
    RequestState {
        attachment: Option<Attachment>,
        sender: ConnectionSender,
    },
    Apply {
        attachment: Attachment,
        action: RoomAction,
    },
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
    AnnotationExpired {
        id: AnnotationId,
    },
    GracePeriodElapsed {
        epoch: u64,
    },
    Shutdown,
}

/// Counters the registry reads under its lock to decide whether a room can
/// be torn down.
#[derive(Debug, Default)]
pub(crate) struct Presence {
    participants: AtomicUsize,
    pending_joins: AtomicUsize,
}

impl Presence {
    pub(crate) fn is_idle(&self) -> bool {
        self.participants.load(Ordering::SeqCst) == 0 && self.pending_joins.load(Ordering::SeqCst) == 0
    }
}

/// Cloneable address of a running room.
#[derive(Clone, Debug)]
pub struct RoomHandle {
    room_id: String,
    material_id: String,
    total_pages: u32,
    serial: u64,
    sender: mpsc::UnboundedSender<RoomCommand>,
    presence: Arc<Presence>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn material_id(&self) -> &str {
        &self.material_id
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn participant_count(&self) -> usize {
        self.presence.participants.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.presence.is_idle()
    }

    /// Must be called with the registry lock held so that teardown cannot
    /// slip in between routing and delivery.
    pub(crate) fn send_join(
        &self,
        request: JoinRequest,
        sender: ConnectionSender,
    ) -> Result<oneshot::Receiver<Result<JoinOutcome>>> {
        let (reply, receiver) = oneshot::channel();
        self.presence.pending_joins.fetch_add(1, Ordering::SeqCst);

        let command = RoomCommand::Join { request, sender, reply };
        if self.sender.send(command).is_err() {
            self.presence.pending_joins.fetch_sub(1, Ordering::SeqCst);
            return Err(ClassroomError::RoomClosed(self.room_id.clone()));
        }
        Ok(receiver)
    }

    /// Ignored by the room when `attachment` was superseded by a resume.
    pub fn leave(&self, attachment: &Attachment) {
        let _ = self.sender.send(RoomCommand::Leave {
            attachment: attachment.clone(),
        });
    }

    pub fn apply(&self, attachment: &Attachment, action: RoomAction) -> Result<()> {
        self.send(RoomCommand::Apply {
            attachment: attachment.clone(),
            action,
        })
    }

    /// Queue a `room:state` for `sender`, ordered with the room's live events.
    pub fn request_state(&self, attachment: Option<&Attachment>, sender: ConnectionSender) -> Result<()> {
        self.send(RoomCommand::RequestState {
            attachment: attachment.cloned(),
            sender,
        })
    }

    pub async fn snapshot(&self) -> Result<RoomSnapshot> {
        let (reply, receiver) = oneshot::channel();
        self.send(RoomCommand::Snapshot { reply })?;
        receiver
            .await
            .map_err(|_| ClassroomError::RoomClosed(self.room_id.clone()))
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.sender.send(RoomCommand::Shutdown);
    }

    fn send(&self, command: RoomCommand) -> Result<()> {
        self.sender
            .send(command)
            .map_err(|_| ClassroomError::RoomClosed(self.room_id.clone()))
    }
}

/// Pending teardown of an empty room.
struct Teardown {
    epoch: u64,
    timer: JoinHandle<()>,
}

pub(crate) struct RoomActor {
    room: Room,
    fanout: Fanout,
    expiry: ExpiryScheduler<RoomCommand>,
    ids: Arc<IdSequence>,
    presence: Arc<Presence>,
    rooms: Weak<Mutex<RoomMap>>,
    serial: u64,
    grace_period: Duration,
    teardown: Option<Teardown>,
    teardown_epoch: u64,
    mailbox: mpsc::WeakUnboundedSender<RoomCommand>,
}

impl RoomActor {
    pub(crate) fn spawn(
        room: Room,
        serial: u64,
        ids: Arc<IdSequence>,
        rooms: Weak<Mutex<RoomMap>>,
        grace_period: Duration,
    ) -> RoomHandle {
        let (sender, receiver) = mpsc::unbounded_channel();
        let presence = Arc::new(Presence::default());

        let handle = RoomHandle {
            room_id: room.id.clone(),
            material_id: room.material_id.clone(),
            total_pages: room.total_pages,
            serial,
            sender: sender.clone(),
            presence: presence.clone(),
        };

        let actor = Self {
            fanout: Fanout::new(room.id.clone()),
            expiry: ExpiryScheduler::new(&sender, |id| RoomCommand::AnnotationExpired { id }),
            room,
            ids,
            presence,
            rooms,
            serial,
            grace_period,
            teardown: None,
            teardown_epoch: 0,
            mailbox: sender.downgrade(),
        };

        tokio::spawn(actor.run(receiver));
        handle
    }

    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<RoomCommand>) {
        tracing::info!(
            room_id = %self.room.id,
            material_id = %self.room.material_id,
            total_pages = self.room.total_pages,
            "Room started"
        );

        // A room created without a join starts out empty
        self.review_teardown();

        while let Some(command) = receiver.recv().await {
            if self.handle(command).is_break() {
                break;
            }
            self.review_teardown();
        }

        receiver.close();
        self.expiry.cancel_all();
        if let Some(teardown) = self.teardown.take() {
            teardown.timer.abort();
        }
        while let Ok(command) = receiver.try_recv() {
            self.reject_after_close(command);
        }

        tracing::info!(room_id = %self.room.id, "Room closed");
    }

    fn handle(&mut self, command: RoomCommand) -> ControlFlow<()> {
        match command {
            RoomCommand::Join { request, sender, reply } => {
                let result = self.join(request, sender);
                self.presence
                    .participants
                    .store(self.room.participants.len(), Ordering::SeqCst);
                self.presence.pending_joins.fetch_sub(1, Ordering::SeqCst);
                let _ = reply.send(result);
            }
            RoomCommand::Leave { attachment } => {
                self.leave(&attachment);
                self.presence
                    .participants
                    .store(self.room.participants.len(), Ordering::SeqCst);
            }
            RoomCommand::RequestState { attachment, sender } => {
                let recipient = attachment
                    .as_ref()
                    .filter(|a| self.fanout.is_current(&a.participant_id, &a.connection_id))
                    .map(|a| a.participant_id.as_str());
                if let Some(participant) = recipient.and_then(|id| self.room.participants.get_mut(id)) {
                    participant.touch();
                }
                let _ = sender.send(Arc::new(ServerMessage::RoomState(self.room.snapshot(recipient))));
            }
            RoomCommand::Apply { attachment, action } => {
                let Attachment {
                    participant_id,
                    connection_id,
                } = attachment;
                if !self.fanout.is_current(&participant_id, &connection_id) {
                    tracing::debug!(
                        room_id = %self.room.id,
                        participant_id = %participant_id,
                        connection_id = %connection_id,
                        command = action.name(),
                        "Dropping command from superseded connection"
                    );
                    return ControlFlow::Continue(());
                }

                let name = action.name();
                if let Err(err) = self.apply(&participant_id, action) {
                    tracing::warn!(
                        room_id = %self.room.id,
                        participant_id = %participant_id,
                        command = name,
                        error = %err,
                        "Rejected room command"
                    );
                    self.fanout.send_to(&participant_id, ServerMessage::error(&err));
                }
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.room.snapshot(None));
            }
            RoomCommand::AnnotationExpired { id } => self.expire(&id),
            RoomCommand::GracePeriodElapsed { epoch } => return self.grace_period_elapsed(epoch),
            RoomCommand::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn join(&mut self, request: JoinRequest, sender: ConnectionSender) -> Result<JoinOutcome> {
        let JoinRequest {
            connection_id,
            role,
            name,
            resume_token,
        } = request;

        let resumed = resume_token
            .as_deref()
            .and_then(|token| self.room.resolve_resume(token))
            .map(str::to_string);
        if resume_token.is_some() && resumed.is_none() {
            tracing::debug!(
                room_id = %self.room.id,
                connection_id = %connection_id,
                "Unknown resume token, joining as a new participant"
            );
        }
        // A connection already carrying a resumed participant rejoins as it
        let participant_id = resumed
            .or_else(|| self.fanout.participant_on(&connection_id).map(str::to_string))
            .unwrap_or_else(|| connection_id.clone());

        let outcome = self.room.attach(&participant_id, role, name)?;

        // Snapshot first, then anything else this connection will see
        if let Some(previous) = self.fanout.subscribe(&participant_id, &connection_id, sender) {
            let superseded = ClassroomError::SessionSuperseded(self.room.id.clone());
            let _ = previous.send(Arc::new(ServerMessage::error(&superseded)));
            tracing::info!(
                room_id = %self.room.id,
                participant_id = %participant_id,
                connection_id = %connection_id,
                "Participant resumed on a new connection"
            );
        }
        snapshot::deliver_to_participant(&self.room, &self.fanout, &participant_id);

        match &outcome {
            JoinOutcome::Joined(participant) => {
                self.fanout
                    .send(ServerMessage::ParticipantJoined(participant.clone()), Some(participant_id.as_str()));
            }
            JoinOutcome::RoleChanged(participant) => {
                self.fanout
                    .send(ServerMessage::ParticipantUpdated(participant.clone()), Some(participant_id.as_str()));
            }
            JoinOutcome::Rejoined(_) => {}
        }

        tracing::info!(
            room_id = %self.room.id,
            participant_id = %participant_id,
            role = ?role,
            participants = self.room.participants.len(),
            "Participant joined room"
        );
        Ok(outcome)
    }

    fn leave(&mut self, attachment: &Attachment) {
        let participant_id = attachment.participant_id.as_str();
        if !self.fanout.is_current(participant_id, &attachment.connection_id) {
            tracing::debug!(
                room_id = %self.room.id,
                participant_id = %participant_id,
                connection_id = %attachment.connection_id,
                "Ignoring leave from superseded connection"
            );
            return;
        }

        self.fanout.unsubscribe(participant_id);
        if let Some(participant) = self.room.detach(participant_id) {
            self.fanout.send(
                ServerMessage::ParticipantLeft {
                    id: participant.id.clone(),
                },
                None,
            );
            tracing::info!(
                room_id = %self.room.id,
                participant_id = %participant_id,
                role = ?participant.role,
                participants = self.room.participants.len(),
                "Participant left room"
            );
        }
    }

    fn apply(&mut self, participant_id: &str, action: RoomAction) -> Result<()> {
        self.room.authorize(participant_id, &action)?;

        match action {
            RoomAction::ChangePage { page_number } => {
                self.room.change_page(page_number)?;
                self.fanout.send(
                    ServerMessage::PageChanged {
                        page_number,
                        timestamp: Utc::now().timestamp_millis(),
                    },
                    None,
                );
                tracing::debug!(room_id = %self.room.id, page_number, "Page changed");
            }
            RoomAction::ToggleSync { enabled } => {
                self.room.toggle_sync(enabled);
                self.fanout.send(ServerMessage::SyncToggled { enabled }, None);
                tracing::debug!(room_id = %self.room.id, enabled, "Sync toggled");
            }
            RoomAction::AddAnnotation(draft) => {
                let annotation = self.room.add_annotation(draft, self.ids.next_annotation_id())?;
                let id = annotation.id.clone();
                let temporary = annotation.temporary;
                self.fanout.send(ServerMessage::AnnotationAdded(annotation), None);
                if temporary {
                    self.expiry.schedule(&id);
                }
            }
            RoomAction::RemoveAnnotation { id } => {
                self.expiry.cancel(&id);
                if self.room.remove_annotation(&id).is_some() {
                    self.fanout.send(ServerMessage::AnnotationRemoved { id }, None);
                }
            }
            RoomAction::ClearAnnotations { page_number } => {
                let removed = self.room.clear_annotations(page_number)?;
                for id in &removed {
                    self.expiry.cancel(id);
                }
                self.fanout.send(ServerMessage::AnnotationCleared { page_number }, None);
                tracing::debug!(room_id = %self.room.id, page_number = ?page_number, removed = removed.len(), "Annotations cleared");
            }
            RoomAction::DisplayImportant { title, points } => {
                let point = self.room.display_important(self.ids.next_important_id(), title, points)?;
                self.fanout.send(ServerMessage::ImportantShow(point), None);
            }
            RoomAction::DismissImportant => {
                self.room.dismiss_important();
                self.fanout.send(ServerMessage::ImportantHide, None);
            }
            RoomAction::UpdatePage { page_number } => {
                let updated = self.room.update_participant_page(participant_id, page_number)?;
                if let (Some(participant), Some(instructor_id)) = (updated, self.room.instructor_id()) {
                    self.fanout
                        .send_to(instructor_id, ServerMessage::ParticipantUpdated(participant));
                }
            }
        }
        Ok(())
    }

    fn expire(&mut self, id: &str) {
        if !self.expiry.claim(id) {
            return;
        }
        if self.room.remove_annotation(id).is_some() {
            self.fanout
                .send(ServerMessage::AnnotationRemoved { id: id.to_string() }, None);
            tracing::debug!(room_id = %self.room.id, annotation_id = %id, "Temporary annotation expired");
        }
    }

    /// Start the grace timer when the room empties, stop it when someone is
    /// back.
    fn review_teardown(&mut self) {
        if !self.room.is_empty() {
            if let Some(teardown) = self.teardown.take() {
                teardown.timer.abort();
                tracing::debug!(room_id = %self.room.id, "Room teardown cancelled");
            }
            return;
        }
        if self.teardown.is_some() {
            return;
        }

        self.teardown_epoch += 1;
        let epoch = self.teardown_epoch;
        let mailbox = self.mailbox.clone();
        let grace_period = self.grace_period;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            if let Some(sender) = mailbox.upgrade() {
                let _ = sender.send(RoomCommand::GracePeriodElapsed { epoch });
            }
        });
        self.teardown = Some(Teardown { epoch, timer });
        tracing::debug!(
            room_id = %self.room.id,
            grace_period_secs = grace_period.as_secs(),
            "Room is empty, teardown scheduled"
        );
    }

    fn grace_period_elapsed(&mut self, epoch: u64) -> ControlFlow<()> {
        let current = self.teardown.as_ref().map(|t| t.epoch);
        if current != Some(epoch) || !self.room.is_empty() {
            return ControlFlow::Continue(());
        }
        self.teardown = None;

        let retired = match self.rooms.upgrade() {
            Some(rooms) => registry::retire(&rooms, &self.room.id, self.serial),
            // Registry is gone, nothing can reach this room any more
            None => true,
        };

        if retired {
            tracing::info!(room_id = %self.room.id, "Grace period elapsed, destroying room");
            ControlFlow::Break(())
        } else {
            // A join is in flight; it will cancel or restart the teardown
            ControlFlow::Continue(())
        }
    }

    fn reject_after_close(&self, command: RoomCommand) {
        let closed = || ClassroomError::RoomClosed(self.room.id.clone());
        match command {
            RoomCommand::Join { reply, .. } => {
                self.presence.pending_joins.fetch_sub(1, Ordering::SeqCst);
                let _ = reply.send(Err(closed()));
            }
            RoomCommand::RequestState { sender, .. } => {
                let _ = sender.send(Arc::new(ServerMessage::error(&closed())));
            }
            _ => {}
        }
    }
}
