mod playback;

pub use playback::*;

use futures_util::future::join_all;
use log::{info, warn};
use thiserror::Error;

use crate::{
    ChannelOperation, CollabContext, CollabEvent, DatabaseError, NewRoom, RoomData, UserData,
};

pub struct RoomManager {
    context: CollabContext,
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("{0} {1} doesn't exist")]
    NotFound(&'static str, String),
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("Permission denied: {0}")]
    PermissionDenied(&'static str),
    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),
    #[error(transparent)]
    Database(DatabaseError),
}

impl From<DatabaseError> for RoomError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::NotFound {
                resource,
                identifier,
            } => Self::NotFound(resource, identifier),
            other => Self::Database(other),
        }
    }
}

impl RoomManager {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Creates a new room, with the owner as its only member
    pub async fn create_room(&self, new_room: NewRoom) -> Result<RoomData, RoomError> {
        if new_room.name.trim().is_empty() {
            return Err(RoomError::InvalidInput("room name is required"));
        }

        // The owner has to exist
        self.context.database.user_by_id(&new_room.owner_id).await?;

        let room = self.context.database.create_room(new_room).await?;
        info!("Room {} ({}) created by {}", room.id, room.name, room.owner_id);

        self.context.channel.dispatch(
            &room.channel_id,
            ChannelOperation::AddMembers(vec![room.owner_id.clone()]),
        );

        Ok(room)
    }

    /// Adds a user to a room. Joining a room twice returns it unchanged.
    pub async fn join(&self, room_id: &str, user_id: &str) -> Result<RoomData, RoomError> {
        self.context.database.user_by_id(user_id).await?;
        self.context.database.room_by_id(room_id).await?;

        let guard = self.context.locks.acquire(room_id).await;
        let mut room = self.context.database.room_by_id(room_id).await?;

        if room.is_member(user_id) {
            return Ok(room);
        }

        room.members.push(user_id.to_string());
        let room = self.context.database.update_room(room).await?;
        self.publish_members(&room);

        // Queued in commit order, performed once the lock is released
        self.context.channel.dispatch(
            &room.channel_id,
            ChannelOperation::AddMembers(vec![user_id.to_string()]),
        );

        drop(guard);
        info!("User {} joined room {}", user_id, room.id);

        Ok(room)
    }

    /// Removes a user from a room. Leaving a room one isn't in does nothing.
    pub async fn leave(&self, room_id: &str, user_id: &str) -> Result<(), RoomError> {
        self.context.database.room_by_id(room_id).await?;

        let guard = self.context.locks.acquire(room_id).await;
        let mut room = self.context.database.room_by_id(room_id).await?;

        if room.owner_id == user_id {
            return Err(RoomError::InvalidOperation("the owner cannot leave their room"));
        }

        if !room.is_member(user_id) {
            return Ok(());
        }

        room.members.retain(|m| m != user_id);
        let room = self.context.database.update_room(room).await?;
        self.publish_members(&room);

        self.context.channel.dispatch(
            &room.channel_id,
            ChannelOperation::RemoveMembers(vec![user_id.to_string()]),
        );

        drop(guard);
        info!("User {} left room {}", user_id, room.id);

        Ok(())
    }

    /// Returns the members of a room in join order
    pub async fn members(&self, room_id: &str) -> Result<Vec<UserData>, RoomError> {
        let room = self.context.database.room_by_id(room_id).await?;

        let lookups = room
            .members
            .iter()
            .map(|id| self.context.database.user_by_id(id));

        let mut members = Vec::with_capacity(room.members.len());

        for (id, result) in room.members.iter().zip(join_all(lookups).await) {
            match result {
                Ok(user) => members.push(user),
                Err(DatabaseError::NotFound { .. }) => {
                    warn!("Room {} lists unknown member {}", room.id, id)
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(members)
    }

    pub async fn room_by_id(&self, room_id: &str) -> Result<RoomData, RoomError> {
        Ok(self.context.database.room_by_id(room_id).await?)
    }

    /// Get all rooms, oldest first
    pub async fn list_rooms(&self) -> Result<Vec<RoomData>, RoomError> {
        Ok(self.context.database.list_rooms().await?)
    }

    /// Must be called with the room's lock held, so subscribers see updates in commit order.
    fn publish_members(&self, room: &RoomData) {
        self.context.bus.publish(
            &room.id,
            CollabEvent::MembersUpdated {
                room_id: room.id.clone(),
                members: room.members.clone(),
            },
        );
    }
}
