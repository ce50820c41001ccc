/*!
# cred-session

`SessionCache`: short-lived, one-shot storage for `IdentitySessionCore`
correlation state, keyed `auth:session:<sessionId>`.

## Architectural Tenets
- `Exists` then `Remove` is consume-once: a session value is handed out at
  most one time, mirroring the credential platform's "no replay" posture
  used throughout `VerificationCore`.
- Duplicate `Remove` calls are idempotent no-ops rather than errors — a
  retried callback must not be able to crash the session flow.
- A background sweep drops TTL-expired entries; `get`/`remove` also check
  expiry inline so a caller never observes a stale value between sweeps.
*/

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

fn cache_key(session_id: &str) -> String {
    format!("auth:session:{session_id}")
}

struct Entry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
}

pub struct SessionCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
    stats: RwLock<CacheStats>,
}

impl SessionCache {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs),
            entries: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn put(&self, session_id: &str, value: Vec<u8>) {
        let key = cache_key(session_id);
        let expires_at = Utc::now() + self.ttl;
        self.entries.write().unwrap().insert(key, Entry { value, expires_at });
    }

    fn is_live(entry: &Entry, now: DateTime<Utc>) -> bool {
        entry.expires_at > now
    }

    pub fn exists(&self, session_id: &str) -> bool {
        let key = cache_key(session_id);
        let now = Utc::now();
        let entries = self.entries.read().unwrap();
        entries.get(&key).map(|e| Self::is_live(e, now)).unwrap_or(false)
    }

    /// Consume-once read: removes the entry as part of retrieval so a second
    /// caller for the same `sessionId` always observes a miss.
    pub fn remove(&self, session_id: &str) -> Option<Vec<u8>> {
        let key = cache_key(session_id);
        let now = Utc::now();
        let mut entries = self.entries.write().unwrap();
        let mut stats = self.stats.write().unwrap();
        match entries.remove(&key) {
            Some(entry) if Self::is_live(&entry, now) => {
                stats.hits += 1;
                Some(entry.value)
            }
            Some(_) => {
                stats.expirations += 1;
                None
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    /// Drops every entry whose TTL has elapsed. Intended to run on an
    /// interval from whatever owns the cache's lifetime; `remove`/`exists`
    /// are correct without it, this just bounds memory growth.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, e| Self::is_live(e, now));
        let removed = before - entries.len();
        if removed > 0 {
            self.stats.write().unwrap().expirations += removed as u64;
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.read().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_remove_is_one_shot() {
        let cache = SessionCache::new(60);
        cache.put("sess-1", b"payload".to_vec());
        assert!(cache.exists("sess-1"));
        assert_eq!(cache.remove("sess-1"), Some(b"payload".to_vec()));
        assert!(!cache.exists("sess-1"));
        assert_eq!(cache.remove("sess-1"), None);
    }

    #[test]
    fn duplicate_remove_is_idempotent_not_an_error() {
        let cache = SessionCache::new(60);
        cache.put("sess-1", b"x".to_vec());
        assert!(cache.remove("sess-1").is_some());
        assert!(cache.remove("sess-1").is_none());
        assert!(cache.remove("sess-1").is_none());
    }

    #[test]
    fn expired_entries_are_treated_as_absent() {
        let cache = SessionCache::new(-1);
        cache.put("sess-1", b"x".to_vec());
        assert!(!cache.exists("sess-1"));
        assert_eq!(cache.remove("sess-1"), None);
    }

    #[test]
    fn sweep_drops_only_expired_entries() {
        let cache = SessionCache::new(60);
        cache.put("fresh", b"x".to_vec());
        let stale_cache = SessionCache::new(-1);
        stale_cache.put("stale", b"y".to_vec());

        assert_eq!(cache.sweep_expired(), 0);
        assert_eq!(stale_cache.sweep_expired(), 1);
        assert!(cache.exists("fresh"));
    }
}
