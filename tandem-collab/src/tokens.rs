use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use thiserror::Error;

use crate::{
    Database, DatabaseError, DatabaseResult, ExternalError, LockMap, MusicProvider, TokenData,
};

/// Longest access token lifetime accepted, a year
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum TokenError {
    /// The user has no usable grant and has to authorize the music provider again
    #[error("Music provider authorization is required")]
    ReauthRequired,
    #[error("Invalid grant: {0}")]
    InvalidGrant(&'static str),
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// Hands out music provider access tokens, refreshing them when they're about to expire.
///
/// Refreshes are serialized per user. A refresh may rotate the refresh token, so two
/// concurrent refreshes for the same user would invalidate each other. Callers that
/// arrive while a refresh is in flight wait for it and reuse its result.
pub struct TokenManager {
    database: Arc<dyn Database>,
    provider: Arc<dyn MusicProvider>,
    skew: Duration,
    refresh_locks: LockMap,
}

impl TokenManager {
    pub fn new(
        database: Arc<dyn Database>,
        provider: Arc<dyn MusicProvider>,
        skew: Duration,
    ) -> Self {
        Self {
            database,
            provider,
            skew,
            refresh_locks: Default::default(),
        }
    }

    /// Returns a usable access token for the user, refreshing it if needed.
    pub async fn valid_access_token(&self, user_id: &str) -> Result<String, TokenError> {
        if let Some(token) = self.cached(user_id).await? {
            return Ok(token);
        }

        let _guard = self.refresh_locks.acquire(user_id).await;

        // Whoever held the lock before us may have refreshed already
        let Some(record) = self.database.token_by_user_id(user_id).await.optional()? else {
            return Err(TokenError::ReauthRequired);
        };

        if record.is_valid(Utc::now(), self.skew) {
            return Ok(record.access_token);
        }

        self.refresh(user_id, record).await
    }

    /// Stores the tokens received from the authorization code exchange.
    pub async fn store_initial_grant(
        &self,
        user_id: &str,
        access_token: String,
        refresh_token: String,
        expires_in: u64,
    ) -> Result<(), TokenError> {
        if access_token.is_empty() {
            return Err(TokenError::InvalidGrant("access token is empty"));
        }

        if refresh_token.is_empty() {
            return Err(TokenError::InvalidGrant("refresh token is empty"));
        }

        let expires_at = expiry(expires_in)
            .ok_or(TokenError::InvalidGrant("token lifetime is out of range"))?;

        let record = TokenData {
            access_token,
            refresh_token,
            expires_at: Some(expires_at),
        };

        let _guard = self.refresh_locks.acquire(user_id).await;

        self.database.save_token(user_id, record).await?;
        info!("Stored music provider grant for user {}", user_id);

        Ok(())
    }

    async fn cached(&self, user_id: &str) -> Result<Option<String>, TokenError> {
        let record = self.database.token_by_user_id(user_id).await.optional()?;

        Ok(record
            .filter(|r| r.is_valid(Utc::now(), self.skew))
            .map(|r| r.access_token))
    }

    /// Must be called with the user's refresh lock held.
    async fn refresh(&self, user_id: &str, record: TokenData) -> Result<String, TokenError> {
        if record.refresh_token.is_empty() {
            self.database.delete_token(user_id).await?;
            return Err(TokenError::ReauthRequired);
        }

        match self.provider.refresh(&record.refresh_token).await {
            Ok(refreshed) => {
                let lifetime = refreshed.expires_in.min(MAX_TOKEN_LIFETIME_SECS);

                let Some(expires_at) = expiry(lifetime) else {
                    warn!("Refreshed token of user {} can't expire, clearing grant", user_id);

                    self.database.delete_token(user_id).await?;
                    return Err(TokenError::ReauthRequired);
                };

                let updated = TokenData {
                    access_token: refreshed.access_token,
                    refresh_token: refreshed.refresh_token.unwrap_or(record.refresh_token),
                    expires_at: Some(expires_at),
                };

                self.database.save_token(user_id, updated.clone()).await?;
                info!("Refreshed music provider token for user {}", user_id);

                Ok(updated.access_token)
            }
            Err(ExternalError::Rejected(status)) => {
                warn!(
                    "Refresh token of user {} was rejected ({}), clearing grant",
                    user_id, status
                );

                self.database.delete_token(user_id).await?;
                Err(TokenError::ReauthRequired)
            }
            Err(error) => {
                // The refresh token may have been consumed even if we never saw the answer
                warn!(
                    "Could not refresh token of user {}, clearing grant: {}",
                    user_id, error
                );

                self.database.delete_token(user_id).await?;
                Err(TokenError::ReauthRequired)
            }
        }
    }
}

/// When a token living `expires_in` seconds from now expires, if that's a sane time
fn expiry(expires_in: u64) -> Option<DateTime<Utc>> {
    if expires_in > MAX_TOKEN_LIFETIME_SECS {
        return None;
    }

    let lifetime = Duration::try_seconds(i64::try_from(expires_in).ok()?)?;
    Utc::now().checked_add_signed(lifetime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMusicProvider;
    use crate::MemoryDatabase;

    type Setup = (Arc<MemoryDatabase>, Arc<FakeMusicProvider>, Arc<TokenManager>);

    async fn setup(provider: FakeMusicProvider) -> Setup {
        let database = Arc::new(MemoryDatabase::new());
        let provider = Arc::new(provider);
        let manager = Arc::new(TokenManager::new(
            database.clone(),
            provider.clone(),
            Duration::seconds(60),
        ));

        (database, provider, manager)
    }

    fn expired() -> TokenData {
        TokenData {
            access_token: "stale".into(),
            refresh_token: "refresh-1".into(),
            expires_at: Some(Utc::now() - Duration::minutes(5)),
        }
    }

    #[tokio::test]
    async fn valid_token_is_served_from_cache() {
        let (_, provider, manager) = setup(FakeMusicProvider::new()).await;

        manager
            .store_initial_grant("u1", "fresh".into(), "refresh-1".into(), 3600)
            .await
            .unwrap();

        assert_eq!(manager.valid_access_token("u1").await.unwrap(), "fresh");
        assert_eq!(provider.refresh_count(), 0);
    }

    #[tokio::test]
    async fn token_inside_skew_margin_is_refreshed() {
        let (database, provider, manager) = setup(FakeMusicProvider::new()).await;

        manager
            .store_initial_grant("u1", "almost-expired".into(), "refresh-1".into(), 30)
            .await
            .unwrap();

        let token = manager.valid_access_token("u1").await.unwrap();

        assert_eq!(token, "access-1");
        assert_eq!(provider.refresh_count(), 1);

        let stored = database.token_by_user_id("u1").await.unwrap();
        assert_eq!(stored.access_token, "access-1");
        // The provider didn't rotate it, so the old refresh token is kept
        assert_eq!(stored.refresh_token, "refresh-1");
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_refresh() {
        let provider =
            FakeMusicProvider::new().with_refresh_delay(std::time::Duration::from_millis(50));
        let (database, provider, manager) = setup(provider).await;
        database.save_token("u1", expired()).await.unwrap();

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.valid_access_token("u1").await }
        });
        let second = tokio::spawn({
            let manager = manager.clone();
            async move { manager.valid_access_token("u1").await }
        });

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        assert_eq!(provider.refresh_count(), 1);
        assert_eq!(first, second);
        assert_eq!(first, "access-1");
    }

    #[tokio::test]
    async fn different_users_refresh_independently() {
        let (database, provider, manager) = setup(FakeMusicProvider::new()).await;
        database.save_token("u1", expired()).await.unwrap();
        database.save_token("u2", expired()).await.unwrap();

        manager.valid_access_token("u1").await.unwrap();
        manager.valid_access_token("u2").await.unwrap();

        assert_eq!(provider.refresh_count(), 2);
    }

    #[tokio::test]
    async fn rejected_refresh_clears_grant() {
        let (database, _, manager) = setup(FakeMusicProvider::new().rejecting_refresh()).await;
        database.save_token("u1", expired()).await.unwrap();

        let result = manager.valid_access_token("u1").await;

        assert!(matches!(result, Err(TokenError::ReauthRequired)));
        assert!(matches!(
            database.token_by_user_id("u1").await,
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn failed_refresh_is_not_retried() {
        let (database, provider, manager) = setup(FakeMusicProvider::new().failing_refresh()).await;
        database.save_token("u1", expired()).await.unwrap();

        let first = manager.valid_access_token("u1").await;
        let second = manager.valid_access_token("u1").await;

        assert!(matches!(first, Err(TokenError::ReauthRequired)));
        assert!(matches!(second, Err(TokenError::ReauthRequired)));
        assert_eq!(provider.refresh_count(), 1);
    }

    #[tokio::test]
    async fn user_without_grant_must_reauthorize() {
        let (_, provider, manager) = setup(FakeMusicProvider::new()).await;

        let result = manager.valid_access_token("nobody").await;

        assert!(matches!(result, Err(TokenError::ReauthRequired)));
        assert_eq!(provider.refresh_count(), 0);
    }

    #[tokio::test]
    async fn empty_grant_is_refused() {
        let (_, _, manager) = setup(FakeMusicProvider::new()).await;

        let result = manager
            .store_initial_grant("u1", String::new(), "refresh".into(), 3600)
            .await;

        assert!(matches!(result, Err(TokenError::InvalidGrant(_))));
    }

    #[tokio::test]
    async fn endless_grant_is_refused() {
        let (database, _, manager) = setup(FakeMusicProvider::new()).await;

        let result = manager
            .store_initial_grant("u1", "access".into(), "refresh".into(), u64::MAX)
            .await;

        assert!(matches!(result, Err(TokenError::InvalidGrant(_))));
        assert!(database.token_by_user_id("u1").await.is_err());
    }

    #[tokio::test]
    async fn refreshed_lifetime_is_capped() {
        let provider = FakeMusicProvider::new().with_expires_in(u64::MAX);
        let (database, _, manager) = setup(provider).await;
        database.save_token("u1", expired()).await.unwrap();

        let token = manager.valid_access_token("u1").await.unwrap();

        assert_eq!(token, "access-1");

        let stored = database.token_by_user_id("u1").await.unwrap();
        let latest = Utc::now() + Duration::seconds(MAX_TOKEN_LIFETIME_SECS as i64);
        assert!(stored.expires_at.unwrap() <= latest);
    }

    #[tokio::test]
    async fn refresh_locks_are_released() {
        let (database, _, manager) = setup(FakeMusicProvider::new()).await;
        database.save_token("u1", expired()).await.unwrap();

        manager.valid_access_token("u1").await.unwrap();
        manager.valid_access_token("nobody").await.unwrap_err();

        assert!(manager.refresh_locks.is_empty());
    }
}
