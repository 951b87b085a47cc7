use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::oneshot;

use super::actor::{JoinRequest, RoomActor, RoomHandle};
use super::fanout::ConnectionSender;
use super::model::AnnotationId;
use super::room::{JoinOutcome, Room};
use crate::catalog::MaterialCatalog;
use crate::config::RoomConfig;
use crate::error::{ClassroomError, Result};

pub(crate) type RoomMap = HashMap<String, RoomHandle>;

/// Server-wide id source for annotations and important points.
#[derive(Debug, Default)]
pub struct IdSequence {
    next: AtomicU64,
}

impl IdSequence {
    pub fn next_annotation_id(&self) -> AnnotationId {
        format!("ann_{}", self.next())
    }

    pub fn next_important_id(&self) -> String {
        format!("imp_{}", self.next())
    }

    fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub grace_period: Duration,
    pub default_material_id: Option<String>,
}

impl From<&crate::config::Config> for RegistrySettings {
    fn from(config: &crate::config::Config) -> Self {
        Self::new(&config.rooms, config.catalog.default_material_id.clone())
    }
}

impl RegistrySettings {
    pub fn new(rooms: &RoomConfig, default_material_id: Option<String>) -> Self {
        Self {
            grace_period: rooms.grace_period,
            default_material_id,
        }
    }
}

/// Maps room ids to running room actors.
#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<Mutex<RoomMap>>,
    catalog: Arc<dyn MaterialCatalog>,
    ids: Arc<IdSequence>,
    serials: Arc<AtomicU64>,
    settings: RegistrySettings,
}

impl RoomRegistry {
    pub fn new(catalog: Arc<dyn MaterialCatalog>, settings: RegistrySettings) -> Self {
        Self {
            rooms: Arc::new(Mutex::new(HashMap::new())),
            catalog,
            ids: Arc::new(IdSequence::default()),
            serials: Arc::new(AtomicU64::new(0)),
            settings,
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub fn catalog(&self) -> &Arc<dyn MaterialCatalog> {
        &self.catalog
    }

    /// Returns the running room, creating it on first use.
    ///
    /// `material_id` only matters when the room does not exist yet; it falls
    /// back to the configured default material.
    pub fn get_or_create(&self, room_id: &str, material_id: Option<&str>) -> Result<RoomHandle> {
        let mut rooms = self.rooms.lock();
        self.get_or_create_locked(&mut rooms, room_id, material_id)
    }

    /// Creates a room bound to `material_id`. Without a `room_id` a random
    /// six-digit id is generated.
    pub fn create(&self, room_id: Option<&str>, material_id: &str) -> Result<RoomHandle> {
        let mut rooms = self.rooms.lock();

        let room_id = match room_id {
            Some(id) if id.trim().is_empty() => {
                return Err(ClassroomError::validation("roomId must not be empty"));
            }
            Some(id) => id.to_string(),
            None => loop {
                let candidate = generate_room_id();
                if !rooms.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        self.get_or_create_locked(&mut rooms, &room_id, Some(material_id))
    }

    /// Routes a join to the room actor, creating the room if needed.
    ///
    /// The join is queued while the registry lock is held, so a concurrent
    /// teardown either happens entirely before (and the join lands in a new
    /// room) or sees the pending join and backs off.
    pub fn join(
        &self,
        room_id: &str,
        material_id: Option<&str>,
        request: JoinRequest,
        sender: ConnectionSender,
    ) -> Result<(RoomHandle, oneshot::Receiver<Result<JoinOutcome>>)> {
        let mut rooms = self.rooms.lock();
        let handle = self.get_or_create_locked(&mut rooms, room_id, material_id)?;
        let reply = handle.send_join(request, sender)?;
        Ok((handle, reply))
    }

    pub fn get(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms
            .lock()
            .get(room_id)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    /// Running rooms ordered by id.
    pub fn list(&self) -> Vec<RoomHandle> {
        let mut handles: Vec<RoomHandle> = self
            .rooms
            .lock()
            .values()
            .filter(|handle| !handle.is_closed())
            .cloned()
            .collect();
        handles.sort_by(|a, b| a.room_id().cmp(b.room_id()));
        handles
    }

    pub fn len(&self) -> usize {
        self.rooms.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.lock().is_empty()
    }

    /// Removes a room that has no participants and no join in flight.
    pub fn destroy(&self, room_id: &str) -> bool {
        let mut rooms = self.rooms.lock();
        match rooms.get(room_id) {
            Some(handle) if handle.is_idle() => {
                handle.shutdown();
                rooms.remove(room_id);
                tracing::info!(room_id = %room_id, "Room destroyed");
                true
            }
            _ => false,
        }
    }

    fn get_or_create_locked(&self, rooms: &mut RoomMap, room_id: &str, material_id: Option<&str>) -> Result<RoomHandle> {
        if room_id.trim().is_empty() {
            return Err(ClassroomError::validation("roomId must not be empty"));
        }

        if let Some(handle) = rooms.get(room_id) {
            if !handle.is_closed() {
                if let Some(requested) = material_id {
                    if requested != handle.material_id() {
                        tracing::debug!(
                            room_id = %room_id,
                            material_id = %handle.material_id(),
                            requested = %requested,
                            "Room already bound to another material"
                        );
                    }
                }
                return Ok(handle.clone());
            }
            tracing::warn!(room_id = %room_id, "Replacing stopped room");
        }

        let material_id = material_id
            .map(str::to_string)
            .or_else(|| self.settings.default_material_id.clone())
            .ok_or_else(|| ClassroomError::validation("materialId is required to create a room"))?;
        let total_pages = self
            .catalog
            .total_pages(&material_id)
            .ok_or_else(|| ClassroomError::MaterialNotFound(material_id.clone()))?;

        let serial = self.serials.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = RoomActor::spawn(
            Room::new(room_id, material_id, total_pages),
            serial,
            self.ids.clone(),
            Arc::downgrade(&self.rooms),
            self.settings.grace_period,
        );
        rooms.insert(room_id.to_string(), handle.clone());
        Ok(handle)
    }
}

/// Removes the room if it is still the instance identified by `serial` and
/// nobody is in it or on the way in.
pub(crate) fn retire(rooms: &Mutex<RoomMap>, room_id: &str, serial: u64) -> bool {
    let mut rooms = rooms.lock();
    match rooms.get(room_id) {
        Some(handle) if handle.serial() == serial => {
            if !handle.is_idle() {
                return false;
            }
            rooms.remove(room_id);
            true
        }
        // Already replaced or destroyed
        _ => true,
    }
}

fn generate_room_id() -> String {
    let mut rng = rand::thread_rng();
    format!("{:06}", rng.gen_range(0..1_000_000))
}
