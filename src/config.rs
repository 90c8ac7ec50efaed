use std::{env, path::PathBuf, str::FromStr, time::Duration};

use log::LevelFilter;
use tandem_collab::{
    CollabConfig, SpotifyConfig, DEFAULT_SPOTIFY_ACCOUNTS_URL, DEFAULT_SPOTIFY_API_URL,
};
use tandem_server::ServerConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything the launcher reads from the environment
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: LevelFilter,
    pub server: ServerConfig,
    pub collab: CollabConfig,
    /// Where the call/chat channel gateway lives, channel sync is disabled if unset
    pub channel_endpoint: Option<String>,
    pub channel_api_key: Option<String>,
    pub spotify: SpotifyConfig,
    /// A RON file of users and sessions to put in the store on startup
    pub seed_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let defaults = CollabConfig::default();

        let port = parse(&lookup, "TANDEM_SERVER_PORT")?.unwrap_or(tandem_server::DEFAULT_PORT);
        let log_level = parse(&lookup, "TANDEM_LOG_LEVEL")?.unwrap_or(LevelFilter::Info);

        let token_skew = parse::<u64>(&lookup, "TANDEM_TOKEN_SKEW_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.token_skew);

        let external_timeout = parse::<u64>(&lookup, "TANDEM_EXTERNAL_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.external_timeout);

        if external_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "TANDEM_EXTERNAL_TIMEOUT_MS",
                value: "0".into(),
                reason: "must be greater than zero".into(),
            });
        }

        let spotify = SpotifyConfig {
            client_id: lookup("SPOTIFY_CLIENT_ID").unwrap_or_default(),
            client_secret: lookup("SPOTIFY_CLIENT_SECRET").unwrap_or_default(),
            api_url: lookup("SPOTIFY_API_URL").unwrap_or_else(|| DEFAULT_SPOTIFY_API_URL.into()),
            accounts_url: lookup("SPOTIFY_ACCOUNTS_URL")
                .unwrap_or_else(|| DEFAULT_SPOTIFY_ACCOUNTS_URL.into()),
        };

        Ok(Self {
            log_level,
            server: ServerConfig { port },
            collab: CollabConfig {
                token_skew,
                external_timeout,
                ..defaults
            },
            channel_endpoint: lookup("TANDEM_CHANNEL_ENDPOINT"),
            channel_api_key: lookup("TANDEM_CHANNEL_API_KEY"),
            spotify,
            seed_file: lookup("TANDEM_SEED_FILE").map(PathBuf::from),
        })
    }
}

fn parse<T>(lookup: impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(var)
        .map(|value| {
            value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}
