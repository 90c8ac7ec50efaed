use async_trait::async_trait;
use thiserror::Error;

mod data;
pub use data::*;

mod memory;
pub use memory::*;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A resource already exists
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: String,
    },
}

impl DatabaseError {
    pub fn not_found(resource: &'static str, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            identifier: identifier.into(),
        }
    }
}

/// Helper trait to reduce boilerplate
pub trait DatabaseResult<T> {
    /// Turns a not found error into `Ok(None)`
    fn optional(self) -> Result<Option<T>>;
}

impl<T> DatabaseResult<T> for Result<T> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(DatabaseError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Represents the keyed store tandem keeps rooms and music provider tokens in.
///
/// Room documents are always written back whole. Callers that read-modify-write a room
/// must hold that room's lock, see [crate::LockMap].
#[async_trait]
pub trait Database: Send + Sync {
    async fn user_by_id(&self, user_id: &str) -> Result<UserData>;
    async fn session_by_token(&self, token: &str) -> Result<SessionData>;

    async fn room_by_id(&self, room_id: &str) -> Result<RoomData>;
    async fn list_rooms(&self) -> Result<Vec<RoomData>>;
    async fn create_room(&self, new_room: NewRoom) -> Result<RoomData>;
    async fn update_room(&self, room: RoomData) -> Result<RoomData>;

    async fn token_by_user_id(&self, user_id: &str) -> Result<TokenData>;
    async fn save_token(&self, user_id: &str, token: TokenData) -> Result<()>;
    async fn delete_token(&self, user_id: &str) -> Result<()>;
}
