//! All schemas that are exposed from endpoints are defined here
//! along with the ToSerialized impls

use chrono::{DateTime, Utc};
use serde::Serialize;
use tandem_collab::{
    EffectivePlayback, PlaybackAction, PlaybackUpdate, RoomData, TrackSummary, UserData, Warning,
    WarningCode,
};
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    id: String,
    username: String,
    display_name: String,
    profile_pic: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    id: String,
    name: String,
    description: String,
    cover_image: String,
    owner_id: String,
    /// Member ids in join order, the owner first
    members: Vec<String>,
    is_open: bool,
    channel_id: String,
    now_playing: Option<Playback>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    Playing,
    Paused,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Playback {
    track_uri: String,
    track_name: String,
    artist_name: String,
    /// The expected position of the track at the time of the response
    position_ms: u64,
    action: PlayState,
    started_at: DateTime<Utc>,
    initiated_by: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum WarningKind {
    ExternalProviderError,
    ReauthRequired,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PlaybackWarning {
    code: WarningKind,
    message: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NowPlayingResult {
    now_playing: Option<Playback>,
    /// False if a newer update was committed first
    applied: bool,
    /// Side effects that failed, the update itself still took effect
    warnings: Vec<PlaybackWarning>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Track {
    id: String,
    name: String,
    artist: String,
    album: String,
    image: Option<String>,
    uri: String,
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T>
where
    T: Serialize,
{
    fn to_serialized(&self) -> T;
}

impl<I, O> ToSerialized<Vec<O>> for Vec<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Vec<O> {
        self.iter().map(|x| x.to_serialized()).collect()
    }
}

impl<I, O> ToSerialized<Option<O>> for Option<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Option<O> {
        self.as_ref().map(|x| x.to_serialized())
    }
}

impl ToSerialized<User> for UserData {
    fn to_serialized(&self) -> User {
        User {
            id: self.id.clone(),
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            profile_pic: self.profile_pic.clone(),
        }
    }
}

impl ToSerialized<Room> for RoomData {
    fn to_serialized(&self) -> Room {
        let now = Utc::now();

        Room {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            cover_image: self.cover_image.clone(),
            owner_id: self.owner_id.clone(),
            members: self.members.clone(),
            is_open: self.is_open,
            channel_id: self.channel_id.clone(),
            now_playing: self
                .now_playing
                .as_ref()
                .map(|s| EffectivePlayback::at(s, now).to_serialized()),
            created_at: self.created_at,
        }
    }
}

impl ToSerialized<Playback> for EffectivePlayback {
    fn to_serialized(&self) -> Playback {
        Playback {
            track_uri: self.track_uri.clone(),
            track_name: self.track_name.clone(),
            artist_name: self.artist_name.clone(),
            position_ms: self.position_ms,
            action: match self.action {
                PlaybackAction::Playing => PlayState::Playing,
                PlaybackAction::Paused => PlayState::Paused,
            },
            started_at: self.started_at,
            initiated_by: self.initiated_by.clone(),
        }
    }
}

impl ToSerialized<PlaybackWarning> for Warning {
    fn to_serialized(&self) -> PlaybackWarning {
        PlaybackWarning {
            code: match self.code {
                WarningCode::ExternalProviderError => WarningKind::ExternalProviderError,
                WarningCode::ReauthRequired => WarningKind::ReauthRequired,
            },
            message: self.message.clone(),
        }
    }
}

impl ToSerialized<NowPlayingResult> for PlaybackUpdate {
    fn to_serialized(&self) -> NowPlayingResult {
        NowPlayingResult {
            now_playing: self.now_playing.to_serialized(),
            applied: self.applied,
            warnings: self.warnings.to_serialized(),
        }
    }
}

impl ToSerialized<Track> for TrackSummary {
    fn to_serialized(&self) -> Track {
        Track {
            id: self.id.clone(),
            name: self.name.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
            image: self.image.clone(),
            uri: self.uri.clone(),
        }
    }
}
