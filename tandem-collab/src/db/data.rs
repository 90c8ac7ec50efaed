use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The type used for user keys in the store.
pub type UserId = String;
/// The type used for room keys in the store.
pub type RoomId = String;

/// A tandem account. Accounts are managed elsewhere, tandem only reads them.
#[derive(Debug, Clone, PartialEq)]
pub struct UserData {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    pub profile_pic: String,
}

/// Login session data for authentication
#[derive(Debug, Clone)]
pub struct SessionData {
    /// The session token, or key if you will
    pub token: String,
    /// The user that is logged in
    pub user: UserData,
}

/// A tandem room
#[derive(Debug, Clone)]
pub struct RoomData {
    pub id: RoomId,
    pub name: String,
    pub description: String,
    pub cover_image: String,
    pub owner_id: UserId,
    /// Members in join order. The owner is always the first entry.
    pub members: Vec<UserId>,
    /// If this is true, anyone can join without an invitation
    pub is_open: bool,
    /// The id of the room's channel on the external call/chat provider
    pub channel_id: String,
    pub now_playing: Option<PlaybackData>,
    pub created_at: DateTime<Utc>,
}

/// Fields required to create a room
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub name: String,
    pub description: String,
    pub cover_image: String,
    pub is_open: bool,
    pub owner_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackAction {
    Playing,
    Paused,
}

/// What is logically playing in a room, and since when.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackData {
    pub track_uri: String,
    pub track_name: String,
    pub artist_name: String,
    /// Position within the track at `started_at`
    pub base_position_ms: u64,
    pub started_at: DateTime<Utc>,
    pub action: PlaybackAction,
    pub initiated_by: UserId,
}

/// The music provider credentials of a user
#[derive(Clone, PartialEq)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoomData {
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }
}

impl PlaybackData {
    /// Returns the expected position of the track at the given time.
    ///
    /// A paused track stays at its base position. A playing track has advanced by the
    /// wall-clock time elapsed since it was started; a query time before `started_at`
    /// counts as no elapsed time.
    pub fn position_at(&self, at: DateTime<Utc>) -> u64 {
        match self.action {
            PlaybackAction::Paused => self.base_position_ms,
            PlaybackAction::Playing => {
                let elapsed = (at - self.started_at).num_milliseconds().max(0) as u64;
                self.base_position_ms.saturating_add(elapsed)
            }
        }
    }
}

impl TokenData {
    /// A token is only usable if it's set and won't expire within the skew margin.
    pub fn is_valid(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        if self.access_token.is_empty() {
            return false;
        }

        self.expires_at
            .map(|expires_at| now < expires_at - skew)
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for TokenData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenData")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playback(action: PlaybackAction, started_at: DateTime<Utc>) -> PlaybackData {
        PlaybackData {
            track_uri: "spotify:track:1".into(),
            track_name: "Track".into(),
            artist_name: "Artist".into(),
            base_position_ms: 30_000,
            started_at,
            action,
            initiated_by: "owner".into(),
        }
    }

    #[test]
    fn playing_position_advances_with_wall_clock() {
        let started_at = Utc::now();
        let state = playback(PlaybackAction::Playing, started_at);

        let position = state.position_at(started_at + Duration::milliseconds(10_000));

        assert!((39_900..=40_100).contains(&position), "got {position}");
    }

    #[test]
    fn paused_position_stays_at_base() {
        let started_at = Utc::now();
        let state = playback(PlaybackAction::Paused, started_at);

        assert_eq!(state.position_at(started_at + Duration::seconds(90)), 30_000);
    }

    #[test]
    fn position_before_start_is_base() {
        let started_at = Utc::now();
        let state = playback(PlaybackAction::Playing, started_at);

        assert_eq!(state.position_at(started_at - Duration::seconds(5)), 30_000);
    }

    #[test]
    fn token_inside_skew_margin_is_invalid() {
        let now = Utc::now();
        let token = TokenData {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at: Some(now + Duration::seconds(30)),
        };

        assert!(!token.is_valid(now, Duration::seconds(60)));
        assert!(token.is_valid(now, Duration::seconds(10)));
    }

    #[test]
    fn empty_token_is_invalid() {
        let token = TokenData {
            access_token: String::new(),
            refresh_token: "refresh".into(),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        };

        assert!(!token.is_valid(Utc::now(), Duration::zero()));
    }
}
