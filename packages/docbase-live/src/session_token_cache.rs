//! LRU memoization of session token to user id lookups.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use docbase_core::auth::AuthResolver;
use docbase_core::{DbError, ErrorCode};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

/// Bounded cache in front of an [`AuthResolver`]. Failed lookups are not cached.
pub struct SessionTokenCache {
    resolver: Arc<dyn AuthResolver>,
    entries: Mutex<LruCache<String, (String, Instant)>>,
    ttl: Duration,
}

impl SessionTokenCache {
    pub fn new(resolver: Arc<dyn AuthResolver>, max_size: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            resolver,
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn resolver(&self) -> &Arc<dyn AuthResolver> {
        &self.resolver
    }

    /// Returns the user owning `session_token`.
    pub async fn get_user_id(&self, session_token: &str) -> Result<String, DbError> {
        if session_token.is_empty() {
            return Err(DbError::new(ErrorCode::InvalidSessionToken, "Empty sessionToken"));
        }
        if let Some(user_id) = self.cached(session_token) {
            debug!("Fetched user id from session token cache");
            return Ok(user_id);
        }

        let user_id = self.resolver.user_for_session_token(session_token).await?;
        self.entries.lock().put(
            session_token.to_string(),
            (user_id.clone(), Instant::now() + self.ttl),
        );
        Ok(user_id)
    }

    fn cached(&self, session_token: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(session_token) {
            Some((user_id, expires)) if *expires > Instant::now() => Some(user_id.clone()),
            Some(_) => {
                entries.pop(session_token);
                None
            }
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
