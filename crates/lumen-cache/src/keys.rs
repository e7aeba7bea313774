//! Cache categories and key construction.

use lumen_config::CacheTtlConfig;
use lumen_core::SqlParam;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Write as _};

/// One segment of a cache key.
pub type KeyPart<'a> = &'a (dyn Display + Sync);

/// Kind of data stored in the cache; selects the key namespace and TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCategory {
    /// Memoized query results.
    Query,
    /// User records.
    UserData,
    /// Event records.
    EventData,
    /// Media metadata.
    MediaData,
    /// Configuration values.
    Config,
}

impl CacheCategory {
    /// All categories, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Query,
        Self::UserData,
        Self::EventData,
        Self::MediaData,
        Self::Config,
    ];

    /// Key segment for this category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::UserData => "user_data",
            Self::EventData => "event_data",
            Self::MediaData => "media_data",
            Self::Config => "config",
        }
    }

    /// Configured TTL for this category in seconds.
    #[must_use]
    pub const fn ttl_secs(self, ttl: &CacheTtlConfig) -> u64 {
        match self {
            Self::Query => ttl.query,
            Self::UserData => ttl.user_data,
            Self::EventData => ttl.event_data,
            Self::MediaData => ttl.media_data,
            Self::Config => ttl.config,
        }
    }
}

impl Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds namespaced cache keys.
#[derive(Debug, Clone)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The namespace prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `{prefix}:{category}:{part}:{part}...`
    #[must_use]
    pub fn entry(&self, category: CacheCategory, parts: &[KeyPart<'_>]) -> String {
        let mut key = format!("{}:{}", self.prefix, category);
        for part in parts {
            let _ = write!(key, ":{}", part);
        }
        key
    }

    /// Pattern matching every key of a category.
    #[must_use]
    pub fn category_pattern(&self, category: CacheCategory) -> String {
        format!("{}:{}:*", self.prefix, category)
    }

    /// Pattern matching every key this cache owns.
    #[must_use]
    pub fn all_pattern(&self) -> String {
        format!("{}:*", self.prefix)
    }

    /// Stable key for a query and its parameters.
    ///
    /// Whitespace differences in the query text map to the same key.
    #[must_use]
    pub fn query(&self, query: &str, params: &[SqlParam]) -> String {
        let params_json = serde_json::to_string(params).unwrap_or_else(|_| "[]".to_string());
        let material = format!("{}|{}", normalize_query(query), params_json);
        format!("{}:{}:{}", self.prefix, CacheCategory::Query, hex_encode(material.as_bytes()))
    }
}

/// Collapses whitespace runs to a single space and trims the ends.
#[must_use]
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_keys() {
        let keys = CacheKeys::new("lumen");
        assert_eq!(keys.entry(CacheCategory::UserData, &[&42]), "lumen:user_data:42");
        assert_eq!(
            keys.entry(CacheCategory::MediaData, &[&"event", &7, &"cover"]),
            "lumen:media_data:event:7:cover"
        );
        assert_eq!(keys.entry(CacheCategory::Config, &[]), "lumen:config");
        assert_eq!(keys.category_pattern(CacheCategory::EventData), "lumen:event_data:*");
    }

    #[test]
    fn test_ttl_lookup() {
        let ttl = CacheTtlConfig::default();
        assert_eq!(CacheCategory::Query.ttl_secs(&ttl), 300);
        assert_eq!(CacheCategory::UserData.ttl_secs(&ttl), 1800);
        assert_eq!(CacheCategory::EventData.ttl_secs(&ttl), 600);
        assert_eq!(CacheCategory::MediaData.ttl_secs(&ttl), 3600);
        assert_eq!(CacheCategory::Config.ttl_secs(&ttl), 86_400);
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(
            normalize_query("  SELECT *\n   FROM t\tWHERE id=?  "),
            "SELECT * FROM t WHERE id=?"
        );
    }

    #[test]
    fn test_query_key_is_whitespace_insensitive() {
        let keys = CacheKeys::new("lumen");
        let a = keys.query("SELECT * FROM t WHERE id=?", &[json!(1)]);
        let b = keys.query("SELECT *   FROM t\n  WHERE id=?", &[json!(1)]);
        assert_eq!(a, b);
        assert!(a.starts_with("lumen:query:"));

        let c = keys.query("SELECT * FROM t WHERE id=?", &[json!(2)]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hex_encode() {
        assert_eq!(hex_encode(b"a|[1]"), "617c5b315d");
    }
}
