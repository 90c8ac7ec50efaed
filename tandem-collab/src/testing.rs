//! Fakes for the external providers, shared by the tests of this crate and the server.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    CallChannel, ChannelMessage, Collab, CollabConfig, ExternalError, MemoryDatabase,
    MusicProvider, RefreshedToken, TrackSummary, UserData, UserId,
};

/// A call the [RecordingChannel] completed
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelCall {
    AddMembers(String, Vec<UserId>),
    RemoveMembers(String, Vec<UserId>),
    SendMessage(String, ChannelMessage),
}

/// A [CallChannel] that records every successful call.
#[derive(Default)]
pub struct RecordingChannel {
    failures_left: AtomicUsize,
    delay: Option<Duration>,
    add_delay: Option<Duration>,
    attempts: AtomicUsize,
    calls: Mutex<Vec<ChannelCall>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the first `count` attempts with a 503
    pub fn failing(count: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(count),
            ..Default::default()
        }
    }

    /// Takes `delay` to answer every call
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    /// Takes `delay` to answer `add_members` only
    pub fn slow_to_add(delay: Duration) -> Self {
        Self {
            add_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<ChannelCall> {
        self.calls.lock().clone()
    }

    async fn record(&self, call: ChannelCall) -> Result<(), ExternalError> {
        let delay = match call {
            ChannelCall::AddMembers(..) => self.add_delay.or(self.delay),
            _ => self.delay,
        };

        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();

        if failed {
            return Err(ExternalError::Unexpected(503));
        }

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl CallChannel for RecordingChannel {
    async fn add_members(
        &self,
        channel_id: &str,
        user_ids: &[UserId],
    ) -> Result<(), ExternalError> {
        self.record(ChannelCall::AddMembers(channel_id.into(), user_ids.to_vec()))
            .await
    }

    async fn remove_members(
        &self,
        channel_id: &str,
        user_ids: &[UserId],
    ) -> Result<(), ExternalError> {
        self.record(ChannelCall::RemoveMembers(channel_id.into(), user_ids.to_vec()))
            .await
    }

    async fn send_message(
        &self,
        channel_id: &str,
        message: &ChannelMessage,
    ) -> Result<(), ExternalError> {
        self.record(ChannelCall::SendMessage(channel_id.into(), message.clone()))
            .await
    }
}

/// A player command the [FakeMusicProvider] received
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCall {
    Play {
        access_token: String,
        device_id: Option<String>,
        track_uri: String,
        position_ms: u64,
    },
    Pause {
        access_token: String,
        device_id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RefreshOutcome {
    Succeed,
    Reject,
    Fail,
}

/// A [MusicProvider] that hands out numbered access tokens.
///
/// The n-th successful refresh returns `access-n`.
pub struct FakeMusicProvider {
    refresh_outcome: RefreshOutcome,
    refresh_delay: Option<Duration>,
    expires_in: u64,
    refreshes: AtomicUsize,
    player_fails: bool,
    player_calls: Mutex<Vec<PlayerCall>>,
    tracks: Vec<TrackSummary>,
}

impl Default for FakeMusicProvider {
    fn default() -> Self {
        Self {
            refresh_outcome: RefreshOutcome::Succeed,
            refresh_delay: None,
            expires_in: 3600,
            refreshes: AtomicUsize::new(0),
            player_fails: false,
            player_calls: Default::default(),
            tracks: vec![],
        }
    }
}

impl FakeMusicProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = Some(delay);
        self
    }

    /// Refreshed tokens claim to live `expires_in` seconds
    pub fn with_expires_in(mut self, expires_in: u64) -> Self {
        self.expires_in = expires_in;
        self
    }

    /// Refreshes fail as if the refresh token was revoked
    pub fn rejecting_refresh(mut self) -> Self {
        self.refresh_outcome = RefreshOutcome::Reject;
        self
    }

    /// Refreshes fail as if the provider was down
    pub fn failing_refresh(mut self) -> Self {
        self.refresh_outcome = RefreshOutcome::Fail;
        self
    }

    /// Play and pause fail as if the owner had no active device
    pub fn without_device(mut self) -> Self {
        self.player_fails = true;
        self
    }

    pub fn with_tracks(mut self, tracks: Vec<TrackSummary>) -> Self {
        self.tracks = tracks;
        self
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn player_calls(&self) -> Vec<PlayerCall> {
        self.player_calls.lock().clone()
    }

    fn player(&self, call: PlayerCall) -> Result<(), ExternalError> {
        if self.player_fails {
            return Err(ExternalError::Unexpected(404));
        }

        self.player_calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl MusicProvider for FakeMusicProvider {
    async fn play(
        &self,
        access_token: &str,
        device_id: Option<&str>,
        track_uri: &str,
        position_ms: u64,
    ) -> Result<(), ExternalError> {
        self.player(PlayerCall::Play {
            access_token: access_token.into(),
            device_id: device_id.map(Into::into),
            track_uri: track_uri.into(),
            position_ms,
        })
    }

    async fn pause(
        &self,
        access_token: &str,
        device_id: Option<&str>,
    ) -> Result<(), ExternalError> {
        self.player(PlayerCall::Pause {
            access_token: access_token.into(),
            device_id: device_id.map(Into::into),
        })
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedToken, ExternalError> {
        let count = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(delay) = self.refresh_delay {
            tokio::time::sleep(delay).await;
        }

        match self.refresh_outcome {
            RefreshOutcome::Succeed => Ok(RefreshedToken {
                access_token: format!("access-{}", count),
                refresh_token: None,
                expires_in: self.expires_in,
            }),
            RefreshOutcome::Reject => Err(ExternalError::Rejected(400)),
            RefreshOutcome::Fail => Err(ExternalError::Unexpected(503)),
        }
    }

    async fn search_tracks(
        &self,
        _access_token: &str,
        query: &str,
        limit: u8,
    ) -> Result<Vec<TrackSummary>, ExternalError> {
        let query = query.to_lowercase();

        Ok(self
            .tracks
            .iter()
            .filter(|t| t.name.to_lowercase().contains(&query))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

/// A user fixture, with the display name derived from the id
pub fn user(id: &str) -> UserData {
    UserData {
        id: id.to_string(),
        username: id.to_string(),
        display_name: format!("User {}", id),
        profile_pic: format!("https://pics/{}.png", id),
    }
}

/// Polls `condition` until it holds, for at most a second.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return true;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

/// A [Collab] over an in-memory store with users `u1` to `u4` and fake providers.
pub struct Harness {
    pub collab: Collab,
    pub database: Arc<MemoryDatabase>,
    pub channel: Arc<RecordingChannel>,
    pub music: Arc<FakeMusicProvider>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(RecordingChannel::new(), FakeMusicProvider::new())
    }

    pub fn with_channel(channel: RecordingChannel) -> Self {
        Self::build(channel, FakeMusicProvider::new())
    }

    pub fn with_music(music: FakeMusicProvider) -> Self {
        Self::build(RecordingChannel::new(), music)
    }

    fn build(channel: RecordingChannel, music: FakeMusicProvider) -> Self {
        let database = Arc::new(MemoryDatabase::new());
        let channel = Arc::new(channel);
        let music = Arc::new(music);

        for id in ["u1", "u2", "u3", "u4"] {
            database.insert_user(user(id));
        }

        let config = CollabConfig {
            external_timeout: Duration::from_millis(500),
            ..Default::default()
        };

        let collab = Collab::new(config, database.clone(), channel.clone(), music.clone());

        Self {
            collab,
            database,
            channel,
            music,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
