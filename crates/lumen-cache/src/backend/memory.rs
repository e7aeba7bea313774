//! In-process backend for local development and tests.

use super::CacheBackend;
use async_trait::async_trait;
use lumen_core::LumenResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// A `HashMap`-backed store with Redis-like TTL semantics.
///
/// Expiry is checked lazily on access, using the tokio clock so paused-time
/// tests can drive it.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value without expiry.
    pub fn insert_persistent(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.lock().insert(
            key.into(),
            Entry {
                value: value.into(),
                expires_at: None,
            },
        );
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.len()
    }

    /// Returns true when no live entries remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            other => other.cloned(),
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> LumenResult<Option<String>> {
        Ok(self.live(key).map(|entry| entry.value))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> LumenResult<()> {
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs.max(1));
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> LumenResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let removed = keys
            .iter()
            .filter_map(|key| entries.remove(key))
            .filter(|entry| !entry.is_expired(now))
            .count();
        Ok(removed as u64)
    }

    async fn keys(&self, pattern: &str) -> LumenResult<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| !entry.is_expired(now));

        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| glob_match(pattern.as_bytes(), key.as_bytes()))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> LumenResult<i64> {
        let ttl = match self.live(key) {
            None => -2,
            Some(Entry { expires_at: None, .. }) => -1,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(Instant::now());
                // Redis rounds the remaining time to the nearest second
                ((remaining.as_millis() + 500) / 1000) as i64
            }
        };
        Ok(ttl)
    }

    async fn dbsize(&self) -> LumenResult<u64> {
        Ok(self.len() as u64)
    }

    async fn ping(&self) -> LumenResult<String> {
        Ok("PONG".to_string())
    }

    async fn info(&self, section: &str) -> LumenResult<String> {
        Ok(format!(
            "# {}\r\nbackend:memory\r\nkeys:{}\r\n",
            section,
            self.len()
        ))
    }
}

/// Redis-style glob matching supporting `*`, `?` and `\` escapes.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
                continue;
            }
            Some(b'?') => {
                p += 1;
                t += 1;
                continue;
            }
            Some(b'\\') if pattern.get(p + 1) == Some(&text[t]) => {
                p += 2;
                t += 1;
                continue;
            }
            Some(&c) if c != b'\\' && c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }

        match backtrack {
            Some((star, matched)) => {
                p = star + 1;
                t = matched + 1;
                backtrack = Some((star, matched + 1));
            }
            None => return false,
        }
    }

    pattern[p.min(pattern.len())..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"lumen:*", b"lumen:query:abc"));
        assert!(glob_match(b"lumen:user_data:*", b"lumen:user_data:7"));
        assert!(!glob_match(b"lumen:user_data:*", b"lumen:event_data:7"));
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"a?c", b"abc"));
        assert!(!glob_match(b"a?c", b"ac"));
        assert!(glob_match(b"*:7", b"lumen:user_data:7"));
        assert!(glob_match(b"a\\*", b"a*"));
        assert!(!glob_match(b"a\\*", b"ab"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let backend = MemoryBackend::new();
        backend.set_ex("k", "v", 10).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(backend.ttl("k").await.unwrap(), 10);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(backend.ttl("k").await.unwrap(), 6);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert_eq!(backend.ttl("k").await.unwrap(), -2);
        assert_eq!(backend.dbsize().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persistent_entries_report_no_expiry() {
        let backend = MemoryBackend::new();
        backend.insert_persistent("lumen:config:site", "{}");
        assert_eq!(backend.ttl("lumen:config:site").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_keys_and_del() {
        let backend = MemoryBackend::new();
        backend.set_ex("lumen:query:a", "1", 60).await.unwrap();
        backend.set_ex("lumen:query:b", "2", 60).await.unwrap();
        backend.set_ex("lumen:user_data:1", "3", 60).await.unwrap();

        let keys = backend.keys("lumen:query:*").await.unwrap();
        assert_eq!(keys, vec!["lumen:query:a", "lumen:query:b"]);

        let removed = backend
            .del(&["lumen:query:a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(backend.dbsize().await.unwrap(), 2);
    }
}
