//! Backing store for the distributed components.
//!
//! [`KvStore`] exposes exactly the operations the rate limiter, response
//! cache and invalidator need, nothing more:
//!
//! - an atomic sliding-window hit (purge, insert, count, expire)
//! - get / set-with-expiry on opaque byte values
//! - cursor-based key scanning and bulk delete
//!
//! Two implementations ship with the crate:
//!
//! - [`RedisStore`] (feature `redis`): `ConnectionManager`-based async Redis,
//!   shared between every process serving the API.
//! - [`MemoryStore`]: process-local, for tests and single-node development.
//!
//! Callers own timeouts; implementations do not retry.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::{RedisStore, RedisStoreConfig};

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// One request recorded against a sliding-window log.
#[derive(Debug, Clone)]
pub struct WindowHit {
    /// Score of the new entry (epoch nanoseconds).
    pub now_nanos: i64,
    /// Entries with a score at or below this are purged first.
    pub window_start_nanos: i64,
    /// Unique member name for the new entry.
    pub member: String,
    /// Expiry applied to the whole log after the insert.
    pub expire: Duration,
}

/// One page of a cursor scan. A `cursor` of 0 means the scan is complete.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// Key-value store operations used by the edge layer.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store name for logging/debugging.
    fn name(&self) -> &str;

    /// Record `hit` in the sorted log at `key` and return the number of
    /// entries left in the window, including the new one.
    ///
    /// Purge, insert, count and expire must happen atomically with respect
    /// to other calls for the same key.
    async fn record_hit(&self, key: &str, hit: &WindowHit) -> Result<u64>;

    /// Fetch a value. Missing or expired keys return `None`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value that expires after `ttl`.
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Return up to roughly `count` keys matching the glob `pattern`,
    /// starting from `cursor` (0 to begin).
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage>;

    /// Delete `keys`, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;
}

/// Match `key` against a glob supporting `*` (any run) and `?` (one char).
///
/// Mirrors the subset of Redis `MATCH` syntax the invalidator emits.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();
    let (mut pi, mut ki) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == k[ki]) {
            pi += 1;
            ki += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ki));
            pi += 1;
        } else if let Some((sp, sk)) = star {
            pi = sp + 1;
            ki = sk + 1;
            star = Some((sp, sk + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_prefix_star() {
        assert!(glob_match("cache:api:*", "cache:api:abcd"));
        assert!(glob_match("cache:api:*", "cache:api:"));
        assert!(!glob_match("cache:api:*", "cache:other:abcd"));
    }

    #[test]
    fn glob_exact_and_question_mark() {
        assert!(glob_match("ratelimit:api:1.2.3.4", "ratelimit:api:1.2.3.4"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "abbc"));
    }

    #[test]
    fn glob_inner_star() {
        assert!(glob_match("cache:*:menu*", "cache:api:menus"));
        assert!(!glob_match("cache:*:menu*", "cache:api:config"));
    }
}
