use std::time::Duration;

/// Default safety buffer subtracted from a token's expiry.
pub const DEFAULT_TOKEN_SKEW: Duration = Duration::from_secs(60);

/// Default bound on a single call to an external provider.
pub const DEFAULT_EXTERNAL_TIMEOUT: Duration = Duration::from_secs(4);

/// Default number of undelivered events a realtime connection may have queued.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// The configuration of the collab system
#[derive(Debug, Clone)]
pub struct CollabConfig {
    /// Tokens expiring within this margin are refreshed before use
    pub token_skew: Duration,
    /// How long a call to the call/chat channel or music provider may take
    pub external_timeout: Duration,
    /// Queue size per realtime connection, events beyond this are dropped
    pub subscriber_buffer: usize,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            token_skew: DEFAULT_TOKEN_SKEW,
            external_timeout: DEFAULT_EXTERNAL_TIMEOUT,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

impl CollabConfig {
    pub fn token_skew(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.token_skew).unwrap_or(chrono::Duration::zero())
    }
}
