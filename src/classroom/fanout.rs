//! Per-room broadcast to subscribed connections.
//!
//! Each connection owns an unbounded outbound queue drained by its websocket
//! writer task. The room actor is the only producer for room events, so every
//! subscriber sees events in the order the actor emitted them.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::model::ParticipantId;
use super::protocol::ServerMessage;

/// Outbound queue of a single connection.
pub type ConnectionSender = mpsc::UnboundedSender<Arc<ServerMessage>>;
pub type ConnectionReceiver = mpsc::UnboundedReceiver<Arc<ServerMessage>>;

struct Subscription {
    connection_id: String,
    sender: ConnectionSender,
}

pub struct Fanout {
    room_id: String,
    subscribers: HashMap<ParticipantId, Subscription>,
}

impl Fanout {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            subscribers: HashMap::new(),
        }
    }

    /// Routes `participant_id`'s events to `sender`. Returns the sender it
    /// replaced when that one belonged to another connection.
    pub fn subscribe(
        &mut self,
        participant_id: &str,
        connection_id: &str,
        sender: ConnectionSender,
    ) -> Option<ConnectionSender> {
        let previous = self.subscribers.insert(
            participant_id.to_string(),
            Subscription {
                connection_id: connection_id.to_string(),
                sender,
            },
        )?;
        (previous.connection_id != connection_id).then_some(previous.sender)
    }

    pub fn unsubscribe(&mut self, participant_id: &str) -> bool {
        self.subscribers.remove(participant_id).is_some()
    }

    /// Whether `connection_id` is the connection currently carrying
    /// `participant_id`.
    pub fn is_current(&self, participant_id: &str, connection_id: &str) -> bool {
        self.subscribers
            .get(participant_id)
            .is_some_and(|subscription| subscription.connection_id == connection_id)
    }

    /// Participant currently carried by `connection_id`, if any.
    pub fn participant_on(&self, connection_id: &str) -> Option<&str> {
        self.subscribers
            .iter()
            .find(|(_, subscription)| subscription.connection_id == connection_id)
            .map(|(participant_id, _)| participant_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Delivers `message` to every subscriber except `exclude`. Returns the
    /// number of connections that accepted it.
    pub fn send(&self, message: ServerMessage, exclude: Option<&str>) -> usize {
        let message = Arc::new(message);
        let mut delivered = 0;

        for (participant_id, subscription) in &self.subscribers {
            if exclude == Some(participant_id.as_str()) {
                continue;
            }
            if subscription.sender.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                // Writer is gone; the disconnect path removes the participant.
                tracing::debug!(
                    room_id = %self.room_id,
                    participant_id = %participant_id,
                    event = message.event_name(),
                    "Dropping event for closed connection"
                );
            }
        }

        tracing::trace!(
            room_id = %self.room_id,
            event = message.event_name(),
            delivered,
            "Broadcast event"
        );
        delivered
    }

    /// Delivers `message` to one subscriber.
    pub fn send_to(&self, participant_id: &str, message: ServerMessage) -> bool {
        match self.subscribers.get(participant_id) {
            Some(subscription) => subscription.sender.send(Arc::new(message)).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> (ConnectionSender, ConnectionReceiver) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_send_reaches_all_subscribers() {
        let mut fanout = Fanout::new("R1");
        let (tx_a, mut rx_a) = connection();
        let (tx_b, mut rx_b) = connection();
        fanout.subscribe("a", "conn_a", tx_a);
        fanout.subscribe("b", "conn_b", tx_b);

        let delivered = fanout.send(ServerMessage::SyncToggled { enabled: false }, None);
        assert_eq!(delivered, 2);
        assert_eq!(*rx_a.try_recv().unwrap(), ServerMessage::SyncToggled { enabled: false });
        assert_eq!(*rx_b.try_recv().unwrap(), ServerMessage::SyncToggled { enabled: false });
    }

    #[test]
    fn test_send_excludes_sender() {
        let mut fanout = Fanout::new("R1");
        let (tx_a, mut rx_a) = connection();
        let (tx_b, mut rx_b) = connection();
        fanout.subscribe("a", "conn_a", tx_a);
        fanout.subscribe("b", "conn_b", tx_b);

        fanout.send(ServerMessage::ImportantHide, Some("a"));
        assert!(rx_a.try_recv().is_err());
        assert_eq!(*rx_b.try_recv().unwrap(), ServerMessage::ImportantHide);
    }

    #[test]
    fn test_order_is_preserved_per_connection() {
        let mut fanout = Fanout::new("R1");
        let (tx, mut rx) = connection();
        fanout.subscribe("a", "conn_a", tx);

        for page in 1..=5 {
            fanout.send(ServerMessage::PageChanged { page_number: page, timestamp: 0 }, None);
        }
        for page in 1..=5 {
            match &*rx.try_recv().unwrap() {
                ServerMessage::PageChanged { page_number, .. } => assert_eq!(*page_number, page),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn test_closed_connection_is_skipped() {
        let mut fanout = Fanout::new("R1");
        let (tx_a, rx_a) = connection();
        let (tx_b, mut rx_b) = connection();
        fanout.subscribe("a", "conn_a", tx_a);
        fanout.subscribe("b", "conn_b", tx_b);
        drop(rx_a);

        assert_eq!(fanout.send(ServerMessage::ImportantHide, None), 1);
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_send_to_and_unsubscribe() {
        let mut fanout = Fanout::new("R1");
        let (tx, mut rx) = connection();
        fanout.subscribe("a", "conn_a", tx);

        assert!(fanout.send_to("a", ServerMessage::ImportantHide));
        assert!(rx.try_recv().is_ok());
        assert!(!fanout.send_to("ghost", ServerMessage::ImportantHide));

        assert!(fanout.unsubscribe("a"));
        assert!(!fanout.unsubscribe("a"));
        assert!(fanout.is_empty());
    }

    #[test]
    fn test_resubscribe_from_new_connection_returns_old_sender() {
        let mut fanout = Fanout::new("R1");
        let (old_tx, mut old_rx) = connection();
        let (new_tx, mut new_rx) = connection();

        assert!(fanout.subscribe("a", "conn_1", old_tx.clone()).is_none());
        // Same connection again: nothing to hand back
        assert!(fanout.subscribe("a", "conn_1", old_tx).is_none());
        assert!(fanout.is_current("a", "conn_1"));

        let replaced = fanout.subscribe("a", "conn_2", new_tx).unwrap();
        assert!(fanout.is_current("a", "conn_2"));
        assert!(!fanout.is_current("a", "conn_1"));
        assert_eq!(fanout.participant_on("conn_2"), Some("a"));
        assert_eq!(fanout.participant_on("conn_1"), None);
        assert_eq!(fanout.len(), 1);

        fanout.send(ServerMessage::ImportantHide, None);
        assert!(new_rx.try_recv().is_ok());
        assert!(old_rx.try_recv().is_err());
        assert!(replaced.send(Arc::new(ServerMessage::ImportantHide)).is_ok());
    }
}
