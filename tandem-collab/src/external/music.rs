use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::json;

use super::{check_status, ExternalError};

pub const DEFAULT_SPOTIFY_API_URL: &str = "https://api.spotify.com";
pub const DEFAULT_SPOTIFY_ACCOUNTS_URL: &str = "https://accounts.spotify.com";

/// The music service streaming audio to a room owner's device.
#[async_trait]
pub trait MusicProvider: Send + Sync {
    /// Starts `track_uri` at `position_ms` on the device, or the active device if none is given.
    async fn play(
        &self,
        access_token: &str,
        device_id: Option<&str>,
        track_uri: &str,
        position_ms: u64,
    ) -> Result<(), ExternalError>;

    async fn pause(&self, access_token: &str, device_id: Option<&str>)
        -> Result<(), ExternalError>;

    /// Exchanges a refresh token for a new access token
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, ExternalError>;

    async fn search_tracks(
        &self,
        access_token: &str,
        query: &str,
        limit: u8,
    ) -> Result<Vec<TrackSummary>, ExternalError>;
}

#[derive(Clone, PartialEq)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Set if the provider rotated the refresh token
    pub refresh_token: Option<String>,
    /// Lifetime of the access token, in seconds
    pub expires_in: u64,
}

impl std::fmt::Debug for RefreshedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedToken")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// A catalog entry, as shown in search results
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSummary {
    pub id: String,
    pub name: String,
    /// All artists, comma separated
    pub artist: String,
    pub album: String,
    pub image: Option<String>,
    pub uri: String,
}

#[derive(Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_url: String,
    pub accounts_url: String,
}

impl SpotifyConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_url: DEFAULT_SPOTIFY_API_URL.to_string(),
            accounts_url: DEFAULT_SPOTIFY_ACCOUNTS_URL.to_string(),
        }
    }
}

impl std::fmt::Debug for SpotifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("accounts_url", &self.accounts_url)
            .finish()
    }
}

/// [MusicProvider] backed by the Spotify Web API
pub struct SpotifyClient {
    client: reqwest::Client,
    config: SpotifyConfig,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    tracks: SearchTracks,
}

#[derive(Deserialize)]
struct SearchTracks {
    items: Vec<SearchTrack>,
}

#[derive(Deserialize)]
struct SearchTrack {
    id: String,
    name: String,
    uri: String,
    artists: Vec<SearchArtist>,
    album: SearchAlbum,
}

#[derive(Deserialize)]
struct SearchArtist {
    name: String,
}

#[derive(Deserialize)]
struct SearchAlbum {
    name: String,
    #[serde(default)]
    images: Vec<SearchImage>,
}

#[derive(Deserialize)]
struct SearchImage {
    url: String,
}

impl SpotifyClient {
    pub fn new(config: SpotifyConfig, timeout: Duration) -> Result<Self, ExternalError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExternalError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn player_url(&self, action: &str) -> String {
        format!("{}/v1/me/player/{}", self.config.api_url, action)
    }
}

#[async_trait]
impl MusicProvider for SpotifyClient {
    async fn play(
        &self,
        access_token: &str,
        device_id: Option<&str>,
        track_uri: &str,
        position_ms: u64,
    ) -> Result<(), ExternalError> {
        let mut request = self
            .client
            .put(self.player_url("play"))
            .bearer_auth(access_token)
            .json(&json!({ "uris": [track_uri], "position_ms": position_ms }));

        if let Some(device_id) = device_id {
            request = request.query(&[("device_id", device_id)]);
        }

        let response = request.send().await?;
        check_status(response.status())
    }

    async fn pause(
        &self,
        access_token: &str,
        device_id: Option<&str>,
    ) -> Result<(), ExternalError> {
        let mut request = self
            .client
            .put(self.player_url("pause"))
            .bearer_auth(access_token);

        if let Some(device_id) = device_id {
            request = request.query(&[("device_id", device_id)]);
        }

        let response = request.send().await?;
        check_status(response.status())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, ExternalError> {
        let response = self
            .client
            .post(format!("{}/api/token", self.config.accounts_url))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        if let Err(error) = check_status(response.status()) {
            warn!("Spotify refused to refresh a token: {}", error);
            return Err(error);
        }

        let body: TokenResponse = response.json().await?;
        debug!("Spotify token refreshed, expires in {}s", body.expires_in);

        Ok(RefreshedToken {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_in: body.expires_in,
        })
    }

    async fn search_tracks(
        &self,
        access_token: &str,
        query: &str,
        limit: u8,
    ) -> Result<Vec<TrackSummary>, ExternalError> {
        let limit = limit.to_string();

        let response = self
            .client
            .get(format!("{}/v1/search", self.config.api_url))
            .bearer_auth(access_token)
            .query(&[("q", query), ("type", "track"), ("limit", limit.as_str())])
            .send()
            .await?;

        check_status(response.status())?;

        let body: SearchResponse = response.json().await?;

        let tracks = body
            .tracks
            .items
            .into_iter()
            .map(|track| TrackSummary {
                id: track.id,
                name: track.name,
                artist: track
                    .artists
                    .into_iter()
                    .map(|a| a.name)
                    .collect::<Vec<_>>()
                    .join(", "),
                album: track.album.name,
                image: track.album.images.into_iter().next().map(|i| i.url),
                uri: track.uri,
            })
            .collect();

        Ok(tracks)
    }
}
