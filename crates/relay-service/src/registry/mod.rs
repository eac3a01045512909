//! Room registry.
//!
//! Concurrency-safe store of rooms keyed by room identifier, with a secondary
//! lookup by member. One `tokio::sync::RwLock` guards the whole table; each
//! call takes it once, holds it briefly and never awaits anything else while
//! holding it. Every returned `Room` is an owned snapshot.
//!
//! `RoomNotFound` / `ClientNotFound` are ordinary control flow here.

mod room;

pub use room::{Client, ClientId, Room};

use crate::errors::SignalingError;
use crate::observability::metrics;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a room.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` if no such room exists.
    pub async fn get(&self, room_id: &str) -> Result<Room, SignalingError> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| SignalingError::RoomNotFound(room_id.to_string()))
    }

    /// Insert `room` unless a room with the same identifier already exists.
    ///
    /// Returns the stored room: the argument if it was inserted, otherwise the
    /// existing room unchanged (first write wins).
    pub async fn create(&self, room: Room) -> Room {
        let (stored, count) = {
            let mut rooms = self.rooms.write().await;
            let stored = rooms.entry(room.id.clone()).or_insert(room).clone();
            (stored, rooms.len())
        };
        metrics::set_rooms_active(count);
        stored
    }

    /// Apply `mutation` to the stored room in place and return the result.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` if the room was deleted (possibly concurrently).
    pub async fn update<F>(&self, room_id: &str, mutation: F) -> Result<Room, SignalingError>
    where
        F: FnOnce(&mut Room),
    {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| SignalingError::RoomNotFound(room_id.to_string()))?;
        mutation(room);
        Ok(room.clone())
    }

    /// Remove a room regardless of membership.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` if no such room exists.
    pub async fn delete(&self, room_id: &str) -> Result<(), SignalingError> {
        let (removed, count) = {
            let mut rooms = self.rooms.write().await;
            (rooms.remove(room_id), rooms.len())
        };
        match removed {
            Some(_) => {
                metrics::set_rooms_active(count);
                debug!(target: "relay.registry", room_id = %room_id, "Room deleted");
                Ok(())
            }
            None => Err(SignalingError::RoomNotFound(room_id.to_string())),
        }
    }

    /// Remove the room only if it has no members, checked under the same lock.
    /// Returns whether the room was removed.
    pub async fn delete_if_empty(&self, room_id: &str) -> bool {
        let (removed, count) = {
            let mut rooms = self.rooms.write().await;
            let empty = rooms.get(room_id).is_some_and(Room::is_empty);
            let removed = empty && rooms.remove(room_id).is_some();
            (removed, rooms.len())
        };
        if removed {
            metrics::set_rooms_active(count);
            debug!(target: "relay.registry", room_id = %room_id, "Empty room deleted");
        }
        removed
    }

    /// Snapshot of the room containing `client_id`.
    ///
    /// # Errors
    ///
    /// `ClientNotFound` if the client is in no local room.
    pub async fn find_by_member(&self, client_id: &ClientId) -> Result<Room, SignalingError> {
        let rooms = self.rooms.read().await;
        rooms
            .values()
            .find(|room| room.contains(client_id))
            .cloned()
            .ok_or_else(|| SignalingError::ClientNotFound(client_id.to_string()))
    }

    /// Number of rooms.
    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }
}
