//! # Session Cache
//!
//! Bounded LRU of resolved sessions keyed by credential digest.
//!
//! - Entries expire `ttl` after resolution; an expired entry is evicted on
//!   access and the credential re-resolved.
//! - Every eviction (capacity, expiry, explicit) releases the entry's scoped
//!   client exactly once.
//! - Failed resolutions are never cached.
//! - Resolution runs outside the cache lock; concurrent misses for the same
//!   credential each call the resolver.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;

use super::errors::{SessionError, SessionResult};
use super::identity::{credential_digest, CredentialDigest, IdentityResolver, ResolvedSession};
use crate::observability::{Logger, MetricsRegistry};

/// Cache sizing
#[derive(Debug, Clone)]
pub struct SessionCacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl: Duration::from_secs(600),
        }
    }
}

struct CachedSession {
    session: ResolvedSession,
    expires_at: Instant,
}

impl CachedSession {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Credential → session cache in front of an `IdentityResolver`
pub struct SessionCache {
    entries: Mutex<LruCache<CredentialDigest, CachedSession>>,
    resolver: Arc<dyn IdentityResolver>,
    ttl: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl SessionCache {
    pub fn new(
        config: SessionCacheConfig,
        resolver: Arc<dyn IdentityResolver>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            resolver,
            ttl: config.ttl,
            metrics,
        }
    }

    /// Resolve a credential, serving from cache while fresh
    pub async fn resolve(&self, credential: &str) -> SessionResult<ResolvedSession> {
        let digest = credential_digest(credential);

        let expired = {
            let mut entries = self.lock()?;
            let now = Instant::now();
            let fresh = entries
                .get(&digest)
                .map(|cached| (!cached.is_expired(now)).then(|| cached.session.clone()));
            match fresh {
                Some(Some(session)) => return Ok(session),
                Some(None) => entries.pop(&digest),
                None => None,
            }
        };
        if let Some(stale) = expired {
            self.release(vec![stale], "expired");
        }

        let session = match self.resolver.resolve(credential).await {
            Ok(session) => session,
            Err(err) => {
                if err == SessionError::Unauthenticated {
                    self.metrics.increment_sessions_rejected();
                }
                return Err(err);
            }
        };
        self.metrics.increment_sessions_resolved();

        let displaced = {
            let mut entries = self.lock()?;
            entries.push(
                digest,
                CachedSession {
                    session: session.clone(),
                    expires_at: Instant::now() + self.ttl,
                },
            )
        };
        if let Some((_, old)) = displaced {
            self.release(vec![old], "capacity");
        }

        Ok(session)
    }

    /// Evict every expired entry, returning how many were released
    pub fn purge_expired(&self) -> usize {
        let expired: Vec<CachedSession> = match self.entries.lock() {
            Ok(mut entries) => {
                let now = Instant::now();
                let keys: Vec<CredentialDigest> = entries
                    .iter()
                    .filter(|(_, cached)| cached.is_expired(now))
                    .map(|(key, _)| *key)
                    .collect();
                keys.iter().filter_map(|key| entries.pop(key)).collect()
            }
            Err(_) => return 0,
        };
        let count = expired.len();
        self.release(expired, "expired");
        count
    }

    /// Drop one credential's entry
    pub fn invalidate(&self, credential: &str) -> bool {
        let digest = credential_digest(credential);
        let removed = self.entries.lock().ok().and_then(|mut e| e.pop(&digest));
        match removed {
            Some(cached) => {
                self.release(vec![cached], "invalidated");
                true
            }
            None => false,
        }
    }

    /// Drop everything
    pub fn clear(&self) -> usize {
        let drained: Vec<CachedSession> = match self.entries.lock() {
            Ok(mut entries) => std::iter::from_fn(|| entries.pop_lru().map(|(_, v)| v)).collect(),
            Err(_) => return 0,
        };
        let count = drained.len();
        self.release(drained, "cleared");
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> SessionResult<std::sync::MutexGuard<'_, LruCache<CredentialDigest, CachedSession>>> {
        self.entries
            .lock()
            .map_err(|_| SessionError::Resolver("session cache lock poisoned".into()))
    }

    fn release(&self, evicted: Vec<CachedSession>, reason: &str) {
        if evicted.is_empty() {
            return;
        }
        for cached in &evicted {
            cached.session.client.release();
        }
        self.metrics.add_sessions_evicted(evicted.len() as u64);
        Logger::trace(
            "SESSIONS_EVICTED",
            &[("count", &evicted.len().to_string()), ("reason", reason)],
        );
    }
}
