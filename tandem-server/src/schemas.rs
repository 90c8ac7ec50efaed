use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};
use tandem_collab::{CommandAction, PlaybackCommand};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::errors::ServerError;

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewRoomSchema {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 1024))]
    pub description: String,
    #[serde(default)]
    #[validate(length(max = 2048))]
    pub cover_image: String,
    /// Whether anyone may join the room
    #[serde(default)]
    pub is_open: bool,
}

#[derive(Debug, Clone, Copy, ToSchema, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackActionSchema {
    Play,
    Pause,
    ChangeTrack,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NowPlayingSchema {
    /// Required unless pausing the current track
    #[validate(length(min = 1, max = 256))]
    pub track_uri: Option<String>,
    #[validate(length(max = 512))]
    pub track_name: Option<String>,
    #[validate(length(max = 512))]
    pub artist_name: Option<String>,
    /// Where in the track playback starts or pauses
    #[serde(default)]
    pub position_ms: u64,
    pub action: PlaybackActionSchema,
    /// The owner's device, defaults to their active device
    #[validate(length(min = 1, max = 128))]
    pub device_id: Option<String>,
}

impl From<NowPlayingSchema> for PlaybackCommand {
    fn from(value: NowPlayingSchema) -> Self {
        Self {
            track_uri: value.track_uri,
            track_name: value.track_name,
            artist_name: value.artist_name,
            position_ms: value.position_ms,
            action: match value.action {
                PlaybackActionSchema::Play => CommandAction::Play,
                PlaybackActionSchema::Pause => CommandAction::Pause,
                PlaybackActionSchema::ChangeTrack => CommandAction::ChangeTrack,
            },
            device_id: value.device_id,
        }
    }
}

/// Tokens from the music provider's authorization code exchange
#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MusicGrantSchema {
    #[validate(length(min = 1, max = 2048))]
    pub access_token: String,
    #[validate(length(min = 1, max = 2048))]
    pub refresh_token: String,
    /// Lifetime of the access token, in seconds, at most a year
    #[validate(range(min = 1, max = 31_536_000))]
    pub expires_in: u64,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// What to search for
    pub q: String,
    /// How many tracks to return, 5 by default
    pub limit: Option<u8>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EventsQuery {
    /// Comma separated ids of the rooms to receive events of
    pub rooms: Option<String>,
}

impl EventsQuery {
    pub fn room_ids(&self) -> Vec<String> {
        self.rooms
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect()
    }
}

pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let extracted_json: Json<T> = Json::from_request(req, state)
            .await
            .map_err(|e| ServerError::InvalidInput(e.body_text()))?;

        extracted_json
            .0
            .validate()
            .map_err(|e| ServerError::InvalidInput(format!("Request body is invalid: {}", e)))?;

        Ok(Self(extracted_json.0))
    }
}
