use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token returned by a refresh call, with its advertised lifetime.
pub struct FreshToken {
    pub value: String,
    pub expires_in_secs: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Async cache for a single bearer token. The slot lock is held across
/// the refresh future, so concurrent callers of an expired cache queue
/// behind one refresh instead of racing their own.
pub struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
    early_refresh: Duration,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::with_early_refresh(Duration::from_secs(60))
    }

    /// `early_refresh` is subtracted from the advertised lifetime so a
    /// token is replaced before it actually expires.
    pub fn with_early_refresh(early_refresh: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            early_refresh,
        }
    }

    pub async fn get_or_refresh<F, Fut, E>(&self, refresh: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FreshToken, E>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.value.clone());
            }
        }

        let fresh = refresh().await?;
        let lifetime =
            Duration::from_secs(fresh.expires_in_secs).saturating_sub(self.early_refresh);
        *slot = Some(CachedToken {
            value: fresh.value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(fresh.value)
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}
