use std::sync::Arc;

use super::actor::{Attachment, JoinRequest, RoomHandle};
use super::fanout::ConnectionSender;
use super::registry::{RegistrySettings, RoomRegistry};
use super::room::{JoinOutcome, RoomAction};
use super::snapshot::RoomSnapshot;
use crate::catalog::{Material, MaterialCatalog};
use crate::error::{ClassroomError, Result};

/// Entry point shared by the websocket gateway and the HTTP API.
pub struct ClassroomServer {
    registry: RoomRegistry,
}

impl ClassroomServer {
    pub fn new(catalog: Arc<dyn MaterialCatalog>, settings: RegistrySettings) -> Self {
        Self {
            registry: RoomRegistry::new(catalog, settings),
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Join `room_id`, creating it on first use. The connection receives its
    /// snapshot before this returns.
    pub async fn join(
        &self,
        room_id: &str,
        material_id: Option<&str>,
        request: JoinRequest,
        sender: ConnectionSender,
    ) -> Result<(RoomHandle, JoinOutcome)> {
        let (handle, reply) = self.registry.join(room_id, material_id, request, sender)?;
        let outcome = reply
            .await
            .map_err(|_| ClassroomError::RoomClosed(room_id.to_string()))??;
        Ok((handle, outcome))
    }

    pub fn apply(&self, handle: &RoomHandle, attachment: &Attachment, action: RoomAction) -> Result<()> {
        tracing::debug!(
            room_id = %handle.room_id(),
            participant_id = %attachment.participant_id,
            command = action.name(),
            "Dispatching room command"
        );
        handle.apply(attachment, action)
    }

    pub fn create_room(&self, room_id: Option<&str>, material_id: &str) -> Result<RoomHandle> {
        let handle = self.registry.create(room_id, material_id)?;
        tracing::info!(
            room_id = %handle.room_id(),
            material_id = %handle.material_id(),
            total_pages = handle.total_pages(),
            "Room ready"
        );
        Ok(handle)
    }

    pub async fn room_snapshot(&self, room_id: &str) -> Result<RoomSnapshot> {
        let handle = self
            .registry
            .get(room_id)
            .ok_or_else(|| ClassroomError::RoomNotFound(room_id.to_string()))?;
        handle.snapshot().await
    }

    /// Snapshots of every running room. Rooms that close while being asked
    /// are skipped.
    pub async fn list_rooms(&self) -> Vec<RoomSnapshot> {
        let mut snapshots = Vec::new();
        for handle in self.registry.list() {
            match handle.snapshot().await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => tracing::debug!(room_id = %handle.room_id(), error = %e, "Skipping closed room"),
            }
        }
        snapshots
    }

    pub fn materials(&self) -> Vec<Material> {
        self.registry.catalog().materials()
    }

    pub fn material(&self, material_id: &str) -> Result<Material> {
        self.registry
            .catalog()
            .material(material_id)
            .ok_or_else(|| ClassroomError::MaterialNotFound(material_id.to_string()))
    }

    pub fn room_count(&self) -> usize {
        self.registry.len()
    }
}
