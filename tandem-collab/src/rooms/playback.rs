use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::{
    ChannelMessage, ChannelOperation, CollabContext, CollabEvent, DatabaseResult, ExternalError,
    PlaybackAction, PlaybackAttachment, PlaybackData, RoomData, TokenError, UserId,
};

use super::RoomError;

/// What the room owner asked the player to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    Play,
    Pause,
    ChangeTrack,
}

impl CommandAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::ChangeTrack => "changeTrack",
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Self::Play => "started",
            Self::Pause => "paused",
            Self::ChangeTrack => "switched to",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackCommand {
    pub track_uri: Option<String>,
    pub track_name: Option<String>,
    pub artist_name: Option<String>,
    pub position_ms: u64,
    pub action: CommandAction,
    /// The owner's device to control, the active device is used if unset
    pub device_id: Option<String>,
}

/// The playback state of a room, positioned at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivePlayback {
    pub track_uri: String,
    pub track_name: String,
    pub artist_name: String,
    pub position_ms: u64,
    pub action: PlaybackAction,
    pub started_at: DateTime<Utc>,
    pub initiated_by: UserId,
}

impl EffectivePlayback {
    pub fn at(state: &PlaybackData, at: DateTime<Utc>) -> Self {
        Self {
            track_uri: state.track_uri.clone(),
            track_name: state.track_name.clone(),
            artist_name: state.artist_name.clone(),
            position_ms: state.position_at(at),
            action: state.action,
            started_at: state.started_at,
            initiated_by: state.initiated_by.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Paused,
}

impl From<Option<&PlaybackData>> for PlaybackStatus {
    fn from(value: Option<&PlaybackData>) -> Self {
        match value.map(|s| s.action) {
            None => Self::Idle,
            Some(PlaybackAction::Playing) => Self::Playing,
            Some(PlaybackAction::Paused) => Self::Paused,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningCode {
    ExternalProviderError,
    ReauthRequired,
}

/// A side effect of a playback update that didn't go through
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub code: WarningCode,
    pub message: String,
}

impl Warning {
    fn provider(what: &str, error: &ExternalError) -> Self {
        Self {
            code: WarningCode::ExternalProviderError,
            message: format!("{}: {}", what, error),
        }
    }
}

/// The outcome of [NowPlaying::update_now_playing]
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackUpdate {
    /// The committed state, positioned now
    pub now_playing: Option<EffectivePlayback>,
    /// False if a newer update was committed first and this one was dropped
    pub applied: bool,
    pub warnings: Vec<Warning>,
}

/// Owns the now-playing state machine of every room.
///
/// A room is idle until its owner starts a track. Every committed state records when
/// it started, so any client can work out the current position from it instead of
/// relying on the position it was last told about.
pub struct NowPlaying {
    context: CollabContext,
}

impl NowPlaying {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Changes what a room is playing. Only the room owner may do this.
    pub async fn update_now_playing(
        &self,
        room_id: &str,
        requester_id: &str,
        command: PlaybackCommand,
    ) -> Result<PlaybackUpdate, RoomError> {
        let requested_at = Utc::now();
        self.context.database.room_by_id(room_id).await?;

        let guard = self.context.locks.acquire(room_id).await;
        let mut room = self.context.database.room_by_id(room_id).await?;

        if room.owner_id != requester_id {
            return Err(RoomError::PermissionDenied(
                "only the room owner can control playback",
            ));
        }

        let state = new_state(&room, requester_id, &command, requested_at)?;
        let applied = self.commit(&mut room, state.clone()).await?;

        drop(guard);

        let now_playing = room
            .now_playing
            .as_ref()
            .map(|s| EffectivePlayback::at(s, Utc::now()));

        if !applied {
            return Ok(PlaybackUpdate {
                now_playing,
                applied,
                warnings: vec![],
            });
        }

        info!(
            "Room {} is now {:?}: {} at {}ms",
            room.id,
            PlaybackStatus::from(Some(&state)),
            state.track_uri,
            state.base_position_ms
        );

        let (player, channel) = tokio::join!(
            self.sync_player(&room, &state, command.device_id.as_deref()),
            self.post_to_channel(&room, &state, command.action)
        );

        let warnings = [player, channel]
            .into_iter()
            .filter_map(Result::err)
            .collect();

        Ok(PlaybackUpdate {
            now_playing,
            applied,
            warnings,
        })
    }

    /// Returns what a room is playing right now, or [None] if it's idle.
    pub async fn effective_playback(
        &self,
        room_id: &str,
    ) -> Result<Option<EffectivePlayback>, RoomError> {
        let room = self.context.database.room_by_id(room_id).await?;

        Ok(room
            .now_playing
            .as_ref()
            .map(|s| EffectivePlayback::at(s, Utc::now())))
    }

    /// Commits a state unless the room already has a newer one.
    /// Returns whether the state was committed.
    pub async fn apply_playback(
        &self,
        room_id: &str,
        state: PlaybackData,
    ) -> Result<bool, RoomError> {
        self.context.database.room_by_id(room_id).await?;

        let _guard = self.context.locks.acquire(room_id).await;
        let mut room = self.context.database.room_by_id(room_id).await?;

        self.commit(&mut room, state).await
    }

    /// Must be called with the room's lock held.
    async fn commit(&self, room: &mut RoomData, state: PlaybackData) -> Result<bool, RoomError> {
        if let Some(current) = &room.now_playing {
            if current.started_at > state.started_at {
                debug!(
                    "Dropped playback update for room {}, a newer one is committed",
                    room.id
                );
                return Ok(false);
            }
        }

        let mut updated = room.clone();
        updated.now_playing = Some(state.clone());
        *room = self.context.database.update_room(updated).await?;

        self.context.bus.publish(
            &room.id,
            CollabEvent::PlaybackUpdate {
                room_id: room.id.clone(),
                playback: EffectivePlayback::at(&state, state.started_at),
            },
        );

        Ok(true)
    }

    /// Makes the owner's device play what the room is playing
    async fn sync_player(
        &self,
        room: &RoomData,
        state: &PlaybackData,
        device_id: Option<&str>,
    ) -> Result<(), Warning> {
        let token = match self.context.tokens.valid_access_token(&room.owner_id).await {
            Ok(token) => token,
            Err(TokenError::ReauthRequired) => {
                return Err(Warning {
                    code: WarningCode::ReauthRequired,
                    message: "music provider authorization is required".into(),
                })
            }
            Err(error) => {
                warn!("Could not get a token for {}: {}", room.owner_id, error);
                return Err(Warning {
                    code: WarningCode::ExternalProviderError,
                    message: error.to_string(),
                });
            }
        };

        let music = &self.context.music;
        let timeout = self.context.config.external_timeout;

        let request = async {
            match state.action {
                PlaybackAction::Playing => {
                    music
                        .play(&token, device_id, &state.track_uri, state.base_position_ms)
                        .await
                }
                PlaybackAction::Paused => music.pause(&token, device_id).await,
            }
        };

        let result = tokio::time::timeout(timeout, request)
            .await
            .unwrap_or(Err(ExternalError::Timeout(timeout)));

        result.map_err(|error| {
            warn!("Player of room {} is out of sync: {}", room.id, error);
            Warning::provider("player", &error)
        })
    }

    /// Tells the room's chat what changed
    async fn post_to_channel(
        &self,
        room: &RoomData,
        state: &PlaybackData,
        action: CommandAction,
    ) -> Result<(), Warning> {
        let lookup = self.context.database.user_by_id(&state.initiated_by).await;

        let name = match lookup.optional() {
            Ok(Some(user)) => user.display_name,
            Ok(None) => state.initiated_by.clone(),
            Err(error) => {
                warn!(
                    "Could not look up {} for the playback message: {}",
                    state.initiated_by, error
                );
                state.initiated_by.clone()
            }
        };

        let message = ChannelMessage {
            text: format!("{} {} {}", name, action.verb(), state.track_name),
            user_id: state.initiated_by.clone(),
            attachments: vec![PlaybackAttachment {
                kind: "playback".into(),
                title: state.track_name.clone(),
                artist: state.artist_name.clone(),
                uri: state.track_uri.clone(),
                position: state.base_position_ms,
                action: action.as_str().into(),
                started_at: state.started_at,
                initiated_by: state.initiated_by.clone(),
            }],
        };

        self.context
            .channel
            .deliver(&room.channel_id, &ChannelOperation::SendMessage(message))
            .await
            .map_err(|error| {
                warn!("Could not post playback to channel {}: {}", room.channel_id, error);
                Warning::provider("channel", &error)
            })
    }
}

fn new_state(
    room: &RoomData,
    requester_id: &str,
    command: &PlaybackCommand,
    started_at: DateTime<Utc>,
) -> Result<PlaybackData, RoomError> {
    let current = room.now_playing.as_ref();

    let (track_uri, track_name, artist_name) = match (&command.track_uri, command.action) {
        (Some(uri), _) if !uri.trim().is_empty() => (
            uri.clone(),
            command.track_name.clone().unwrap_or_default(),
            command.artist_name.clone().unwrap_or_default(),
        ),
        // Pausing without a track pauses whatever is playing
        (_, CommandAction::Pause) => {
            let current = current.ok_or(RoomError::InvalidInput(
                "trackUri is required, nothing is playing",
            ))?;

            (
                current.track_uri.clone(),
                command
                    .track_name
                    .clone()
                    .unwrap_or_else(|| current.track_name.clone()),
                command
                    .artist_name
                    .clone()
                    .unwrap_or_else(|| current.artist_name.clone()),
            )
        }
        _ => return Err(RoomError::InvalidInput("trackUri is required")),
    };

    let action = match command.action {
        CommandAction::Play | CommandAction::ChangeTrack => PlaybackAction::Playing,
        CommandAction::Pause => PlaybackAction::Paused,
    };

    Ok(PlaybackData {
        track_uri,
        track_name,
        artist_name,
        base_position_ms: command.position_ms,
        started_at,
        action,
        initiated_by: requester_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::testing::{
        eventually, user, ChannelCall, FakeMusicProvider, Harness, PlayerCall, RecordingChannel,
    };
    use crate::{
        Collab, CollabConfig, Database, DatabaseError, MemoryDatabase, NewRoom, SessionData,
        TokenData, UserData,
    };

    /// A store whose user lookups fail once `broken` is set
    #[derive(Default)]
    struct BrokenUsers {
        inner: MemoryDatabase,
        broken: AtomicBool,
    }

    #[async_trait]
    impl Database for BrokenUsers {
        async fn user_by_id(&self, user_id: &str) -> crate::db::Result<UserData> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(DatabaseError::Internal("users are unavailable".into()));
            }

            self.inner.user_by_id(user_id).await
        }

        async fn session_by_token(&self, token: &str) -> crate::db::Result<SessionData> {
            self.inner.session_by_token(token).await
        }

        async fn room_by_id(&self, room_id: &str) -> crate::db::Result<RoomData> {
            self.inner.room_by_id(room_id).await
        }

        async fn list_rooms(&self) -> crate::db::Result<Vec<RoomData>> {
            self.inner.list_rooms().await
        }

        async fn create_room(&self, new_room: NewRoom) -> crate::db::Result<RoomData> {
            self.inner.create_room(new_room).await
        }

        async fn update_room(&self, room: RoomData) -> crate::db::Result<RoomData> {
            self.inner.update_room(room).await
        }

        async fn token_by_user_id(&self, user_id: &str) -> crate::db::Result<TokenData> {
            self.inner.token_by_user_id(user_id).await
        }

        async fn save_token(&self, user_id: &str, token: TokenData) -> crate::db::Result<()> {
            self.inner.save_token(user_id, token).await
        }

        async fn delete_token(&self, user_id: &str) -> crate::db::Result<()> {
            self.inner.delete_token(user_id).await
        }
    }

    fn play(track_uri: &str, position_ms: u64) -> PlaybackCommand {
        PlaybackCommand {
            track_uri: Some(track_uri.into()),
            track_name: Some("Song".into()),
            artist_name: Some("Band".into()),
            position_ms,
            action: CommandAction::Play,
            device_id: None,
        }
    }

    fn pause(position_ms: u64) -> PlaybackCommand {
        PlaybackCommand {
            track_uri: None,
            track_name: None,
            artist_name: None,
            position_ms,
            action: CommandAction::Pause,
            device_id: None,
        }
    }

    async fn room(harness: &Harness) -> RoomData {
        harness
            .collab
            .rooms
            .create_room(NewRoom {
                name: "Room".into(),
                description: String::new(),
                cover_image: String::new(),
                is_open: true,
                owner_id: "u1".into(),
            })
            .await
            .unwrap()
    }

    async fn grant(harness: &Harness, user_id: &str) {
        harness
            .collab
            .tokens
            .store_initial_grant(user_id, "owner-access".into(), "owner-refresh".into(), 3600)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn new_room_is_idle() {
        let harness = Harness::new();
        let room = room(&harness).await;

        let playback = harness.collab.playback.effective_playback(&room.id).await.unwrap();

        assert_eq!(playback, None);
        assert_eq!(PlaybackStatus::from(room.now_playing.as_ref()), PlaybackStatus::Idle);
    }

    #[tokio::test]
    async fn owner_play_commits_and_drives_device() {
        let harness = Harness::new();
        let room = room(&harness).await;
        grant(&harness, "u1").await;

        let mut command = play("spotify:track:1", 15_000);
        command.device_id = Some("speaker".into());

        let update = harness
            .collab
            .playback
            .update_now_playing(&room.id, "u1", command)
            .await
            .unwrap();

        assert!(update.applied);
        assert!(update.warnings.is_empty(), "{:?}", update.warnings);

        let now_playing = update.now_playing.unwrap();
        assert_eq!(now_playing.action, PlaybackAction::Playing);
        assert_eq!(now_playing.initiated_by, "u1");

        assert_eq!(
            harness.music.player_calls(),
            vec![PlayerCall::Play {
                access_token: "owner-access".into(),
                device_id: Some("speaker".into()),
                track_uri: "spotify:track:1".into(),
                position_ms: 15_000,
            }]
        );

        let calls = harness.channel.calls();
        let Some((channel_id, message)) = calls.iter().find_map(|call| match call {
            ChannelCall::SendMessage(channel_id, message) => Some((channel_id, message)),
            _ => None,
        }) else {
            panic!("expected a chat message, got {:?}", calls);
        };
        assert_eq!(channel_id, &room.channel_id);
        assert_eq!(message.text, "User u1 started Song");
        assert_eq!(message.attachments[0].kind, "playback");
        assert_eq!(message.attachments[0].action, "play");
        assert_eq!(message.attachments[0].position, 15_000);
    }

    #[tokio::test]
    async fn non_owner_update_is_denied() {
        let harness = Harness::new();
        let room = room(&harness).await;
        harness.collab.rooms.join(&room.id, "u2").await.unwrap();

        let result = harness
            .collab
            .playback
            .update_now_playing(&room.id, "u2", play("spotify:track:1", 0))
            .await;

        assert!(matches!(result, Err(RoomError::PermissionDenied(_))));
        assert_eq!(
            harness.collab.playback.effective_playback(&room.id).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn play_requires_track() {
        let harness = Harness::new();
        let room = room(&harness).await;

        let mut command = play("", 0);
        command.track_uri = None;

        let result = harness
            .collab
            .playback
            .update_now_playing(&room.id, "u1", command)
            .await;

        assert!(matches!(result, Err(RoomError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn pausing_idle_room_requires_track() {
        let harness = Harness::new();
        let room = room(&harness).await;

        let result = harness
            .collab
            .playback
            .update_now_playing(&room.id, "u1", pause(0))
            .await;

        assert!(matches!(result, Err(RoomError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn pause_keeps_current_track_and_position() {
        let harness = Harness::new();
        let room = room(&harness).await;
        let playback = &harness.collab.playback;

        playback
            .update_now_playing(&room.id, "u1", play("spotify:track:1", 0))
            .await
            .unwrap();
        playback
            .update_now_playing(&room.id, "u1", pause(42_000))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        let effective = playback.effective_playback(&room.id).await.unwrap().unwrap();
        assert_eq!(effective.action, PlaybackAction::Paused);
        assert_eq!(effective.track_uri, "spotify:track:1");
        assert_eq!(effective.track_name, "Song");
        assert_eq!(effective.position_ms, 42_000);
    }

    #[tokio::test]
    async fn older_state_is_not_applied() {
        let harness = Harness::new();
        let room = room(&harness).await;
        let playback = &harness.collab.playback;

        playback
            .update_now_playing(&room.id, "u1", play("spotify:track:new", 0))
            .await
            .unwrap();

        let stale = PlaybackData {
            track_uri: "spotify:track:old".into(),
            track_name: "Old".into(),
            artist_name: "Band".into(),
            base_position_ms: 0,
            started_at: Utc::now() - chrono::Duration::seconds(30),
            action: PlaybackAction::Playing,
            initiated_by: "u1".into(),
        };

        let applied = playback.apply_playback(&room.id, stale).await.unwrap();

        assert!(!applied);
        let effective = playback.effective_playback(&room.id).await.unwrap().unwrap();
        assert_eq!(effective.track_uri, "spotify:track:new");
    }

    #[tokio::test]
    async fn late_joiner_sees_drifted_position() {
        let harness = Harness::new();
        let room = room(&harness).await;
        let playback = &harness.collab.playback;

        let started = PlaybackData {
            track_uri: "spotify:track:1".into(),
            track_name: "Song".into(),
            artist_name: "Band".into(),
            base_position_ms: 30_000,
            started_at: Utc::now() - chrono::Duration::seconds(10),
            action: PlaybackAction::Playing,
            initiated_by: "u1".into(),
        };
        assert!(playback.apply_playback(&room.id, started).await.unwrap());

        let effective = playback.effective_playback(&room.id).await.unwrap().unwrap();

        assert!(
            (39_900..=40_100).contains(&effective.position_ms),
            "got {}",
            effective.position_ms
        );
    }

    #[tokio::test]
    async fn subscribers_get_playback_updates() {
        let harness = Harness::new();
        let room = room(&harness).await;

        let bus = harness.collab.bus();
        let mut subscription = bus.connect();
        bus.subscribe(&room.id, subscription.id());

        harness
            .collab
            .playback
            .update_now_playing(&room.id, "u1", play("spotify:track:1", 5_000))
            .await
            .unwrap();

        let Some(CollabEvent::PlaybackUpdate { room_id, playback }) = subscription.try_recv()
        else {
            panic!("expected a playback update");
        };

        assert_eq!(room_id, room.id);
        assert_eq!(playback.track_uri, "spotify:track:1");
        assert_eq!(playback.position_ms, 5_000);
    }

    #[tokio::test]
    async fn provider_failures_are_warnings() {
        let harness = Harness::with_music(FakeMusicProvider::new().without_device());
        let room = room(&harness).await;
        grant(&harness, "u1").await;

        let update = harness
            .collab
            .playback
            .update_now_playing(&room.id, "u1", play("spotify:track:1", 0))
            .await
            .unwrap();

        assert!(update.applied);
        assert_eq!(update.warnings.len(), 1);
        assert_eq!(update.warnings[0].code, WarningCode::ExternalProviderError);

        let effective = harness
            .collab
            .playback
            .effective_playback(&room.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(effective.track_uri, "spotify:track:1");
    }

    #[tokio::test]
    async fn revoked_owner_grant_is_a_reauth_warning() {
        let harness = Harness::with_music(FakeMusicProvider::new().rejecting_refresh());
        let room = room(&harness).await;

        harness
            .database
            .save_token(
                "u1",
                TokenData {
                    access_token: "expired".into(),
                    refresh_token: "revoked".into(),
                    expires_at: Some(Utc::now() - chrono::Duration::hours(1)),
                },
            )
            .await
            .unwrap();

        let update = harness
            .collab
            .playback
            .update_now_playing(&room.id, "u1", play("spotify:track:1", 0))
            .await
            .unwrap();

        assert!(update.applied);
        assert_eq!(
            update.warnings.iter().map(|w| w.code).collect::<Vec<_>>(),
            vec![WarningCode::ReauthRequired]
        );
    }

    #[tokio::test]
    async fn shared_session_scenario() {
        let harness = Harness::new();
        let collab = &harness.collab;
        let room = room(&harness).await;

        collab.rooms.join(&room.id, "u2").await.unwrap();

        let mut command = play("t1", 0);
        command.track_name = Some("First".into());
        collab
            .playback
            .update_now_playing(&room.id, "u1", command)
            .await
            .unwrap();

        let effective = collab.playback.effective_playback(&room.id).await.unwrap().unwrap();
        assert_eq!(effective.action, PlaybackAction::Playing);
        assert!(effective.position_ms < 1_000, "got {}", effective.position_ms);

        let denied = collab
            .playback
            .update_now_playing(&room.id, "u2", play("t2", 0))
            .await;
        assert!(matches!(denied, Err(RoomError::PermissionDenied(_))));

        let unchanged = collab.playback.effective_playback(&room.id).await.unwrap().unwrap();
        assert_eq!(unchanged.track_uri, "t1");

        collab.rooms.leave(&room.id, "u2").await.unwrap();

        let members = collab.rooms.members(&room.id).await.unwrap();
        assert_eq!(
            members.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["u1"]
        );

        let channel = harness.channel.clone();
        assert!(
            eventually(|| {
                let removed = channel
                    .calls()
                    .iter()
                    .any(|c| matches!(c, ChannelCall::RemoveMembers(_, users) if users == &["u2"]));
                async move { removed }
            })
            .await
        );
    }

    #[tokio::test]
    async fn unreadable_initiator_is_named_by_id() {
        let database = Arc::new(BrokenUsers::default());
        database.inner.insert_user(user("u1"));
        let channel = Arc::new(RecordingChannel::new());

        let collab = Collab::new(
            CollabConfig::default(),
            database.clone(),
            channel.clone(),
            Arc::new(FakeMusicProvider::new()),
        );

        let room = collab
            .rooms
            .create_room(NewRoom {
                name: "Room".into(),
                description: String::new(),
                cover_image: String::new(),
                is_open: true,
                owner_id: "u1".into(),
            })
            .await
            .unwrap();

        database.broken.store(true, Ordering::SeqCst);

        let update = collab
            .playback
            .update_now_playing(&room.id, "u1", play("spotify:track:1", 0))
            .await
            .unwrap();

        assert!(update.applied);

        let text = channel.calls().into_iter().find_map(|call| match call {
            ChannelCall::SendMessage(_, message) => Some(message.text),
            _ => None,
        });
        assert_eq!(text.as_deref(), Some("u1 started Song"));
    }
}
