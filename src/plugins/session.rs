//! Bearer session cache with single-flight refresh
//!
//! Providers authenticate lazily: the first call that needs a token performs
//! the login exchange and later calls reuse the cached token until it is
//! close to expiry.

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::Result;

/// Refresh this far ahead of expiry so in-flight calls never race a token
/// that dies under them
const EXPIRY_BUFFER_MINUTES: i64 = 5;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Cached bearer token for one provider instance
///
/// The cache lock is held across the login exchange, so concurrent callers
/// racing on a missing or expiring token wait for a single refresh instead
/// of each submitting credentials.
#[derive(Debug, Default)]
pub struct SessionCache {
    token: Mutex<Option<CachedToken>>,
}

impl SessionCache {
    /// Create an empty session cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a valid token, refreshing through `login` when the cached one
    /// is absent or within the expiry buffer
    ///
    /// `login` performs the credential exchange and returns the bearer token
    /// together with its relative expiry in seconds.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `login`.
    pub async fn token<F, Fut>(&self, login: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, i64)>>,
    {
        let mut guard = self.token.lock().await;

        if let Some(cached) = guard.as_ref() {
            if Utc::now() < cached.expires_at - Duration::minutes(EXPIRY_BUFFER_MINUTES) {
                return Ok(cached.token.clone());
            }
        }

        let (token, expires_in) = login().await?;
        let expires_at = Utc::now() + Duration::seconds(expires_in);
        *guard = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });

        tracing::debug!(expires_at = %expires_at, "session token refreshed");
        Ok(token)
    }

    /// Drop any cached token
    pub async fn clear(&self) {
        *self.token.lock().await = None;
    }
}
