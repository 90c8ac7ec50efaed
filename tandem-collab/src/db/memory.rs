use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use log::debug;

use crate::util::random_string;

use super::{
    Database, DatabaseError, NewRoom, Result, RoomData, SessionData, TokenData, UserData,
};

const ROOM_ID_LENGTH: usize = 16;

/// An in-process [Database] for single instance deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    users: DashMap<String, UserData>,
    /// Session token to user id
    sessions: DashMap<String, String>,
    rooms: DashMap<String, RoomData>,
    tokens: DashMap<String, TokenData>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an account created by the external auth service
    pub fn insert_user(&self, user: UserData) {
        self.users.insert(user.id.clone(), user);
    }

    /// Registers a login session issued by the external auth service
    pub fn insert_session(&self, token: impl Into<String>, user_id: impl Into<String>) {
        self.sessions.insert(token.into(), user_id.into());
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn user_by_id(&self, user_id: &str) -> Result<UserData> {
        self.users
            .get(user_id)
            .map(|u| u.clone())
            .ok_or_else(|| DatabaseError::not_found("user", user_id))
    }

    async fn session_by_token(&self, token: &str) -> Result<SessionData> {
        let user_id = self
            .sessions
            .get(token)
            .map(|s| s.clone())
            .ok_or_else(|| DatabaseError::not_found("session", "token"))?;

        let user = self.user_by_id(&user_id).await?;

        Ok(SessionData {
            token: token.to_string(),
            user,
        })
    }

    async fn room_by_id(&self, room_id: &str) -> Result<RoomData> {
        self.rooms
            .get(room_id)
            .map(|r| r.clone())
            .ok_or_else(|| DatabaseError::not_found("room", room_id))
    }

    async fn list_rooms(&self) -> Result<Vec<RoomData>> {
        let mut rooms: Vec<_> = self.rooms.iter().map(|r| r.value().clone()).collect();
        rooms.sort_by_key(|r| r.created_at);

        Ok(rooms)
    }

    async fn create_room(&self, new_room: NewRoom) -> Result<RoomData> {
        let id = random_string(ROOM_ID_LENGTH);

        let room = RoomData {
            id: id.clone(),
            name: new_room.name,
            description: new_room.description,
            cover_image: new_room.cover_image,
            members: vec![new_room.owner_id.clone()],
            owner_id: new_room.owner_id,
            is_open: new_room.is_open,
            channel_id: id.clone(),
            now_playing: None,
            created_at: Utc::now(),
        };

        if self.rooms.contains_key(&id) {
            return Err(DatabaseError::Conflict {
                resource: "room",
                field: "id",
                value: id,
            });
        }

        self.rooms.insert(id, room.clone());
        debug!("Stored room {}", room.id);

        Ok(room)
    }

    async fn update_room(&self, room: RoomData) -> Result<RoomData> {
        let mut stored = self
            .rooms
            .get_mut(&room.id)
            .ok_or_else(|| DatabaseError::not_found("room", room.id.clone()))?;

        *stored = room.clone();

        Ok(room)
    }

    async fn token_by_user_id(&self, user_id: &str) -> Result<TokenData> {
        self.tokens
            .get(user_id)
            .map(|t| t.clone())
            .ok_or_else(|| DatabaseError::not_found("token", user_id))
    }

    async fn save_token(&self, user_id: &str, token: TokenData) -> Result<()> {
        self.tokens.insert(user_id.to_string(), token);
        Ok(())
    }

    async fn delete_token(&self, user_id: &str) -> Result<()> {
        self.tokens.remove(user_id);
        Ok(())
    }
}
