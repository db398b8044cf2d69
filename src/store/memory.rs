//! Process-local [`KvStore`].
//!
//! Same observable semantics as the Redis backend for the operations the
//! edge layer uses: sorted-set sliding-window logs, byte values with
//! expiry, cursor scans stable under concurrent deletes. Every operation
//! takes one mutex, which makes `record_hit` trivially atomic.
//!
//! State lives only as long as the process, so this is only suitable for a
//! single API instance.
//!
//! Expired keys read as absent immediately. Their memory is reclaimed by a
//! full sweep that runs on the write path at most once per [`SWEEP_INTERVAL`],
//! so logs of clients that never return do not accumulate.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::{KvStore, ScanPage, WindowHit, glob_match};
use crate::{EdgeError, Result};

/// Minimum time between two full sweeps of expired keys.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug)]
enum Value {
    Bytes(Vec<u8>),
    Log(BTreeSet<(i64, String)>),
}

#[derive(Debug)]
struct Slot {
    seq: u64,
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    next_seq: u64,
    last_sweep: Option<Instant>,
}

impl Inner {
    /// Drop `key` if it has expired, so callers only ever see live slots.
    fn reap(&mut self, key: &str, now: Instant) {
        if self.slots.get(key).is_some_and(|s| !s.is_live(now)) {
            self.slots.remove(key);
        }
    }

    /// Drop every expired slot.
    fn purge(&mut self, now: Instant) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.is_live(now));
        self.last_sweep = Some(now);
        before - self.slots.len()
    }

    /// Sweep on the write path once [`SWEEP_INTERVAL`] has passed.
    fn maybe_purge(&mut self, now: Instant) {
        let due = self
            .last_sweep
            .is_none_or(|at| now.saturating_duration_since(at) >= SWEEP_INTERVAL);
        if due {
            let purged = self.purge(now);
            if purged > 0 {
                debug!(purged, remaining = self.slots.len(), "swept expired memory store keys");
            }
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// In-memory store. Cheap to construct; share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .slots
            .values()
            .filter(|s| s.is_live(now))
            .count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time to live of `key`, if it exists and has an expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let inner = self.inner.lock();
        let slot = inner.slots.get(key).filter(|s| s.is_live(now))?;
        slot.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Reclaim every expired key now, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.inner.lock().purge(Instant::now())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn record_hit(&self, key: &str, hit: &WindowHit) -> Result<u64> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.maybe_purge(now);
        inner.reap(key, now);

        if !inner.slots.contains_key(key) {
            let seq = inner.next_seq();
            inner.slots.insert(
                key.to_string(),
                Slot {
                    seq,
                    value: Value::Log(BTreeSet::new()),
                    expires_at: None,
                },
            );
        }

        let slot = inner
            .slots
            .get_mut(key)
            .ok_or_else(|| EdgeError::Store(format!("slot vanished for {key}")))?;
        let Value::Log(log) = &mut slot.value else {
            return Err(EdgeError::Store(WRONG_TYPE.to_string()));
        };

        log.retain(|(score, _)| *score > hit.window_start_nanos);
        log.insert((hit.now_nanos, hit.member.clone()));
        let count = log.len() as u64;
        slot.expires_at = Some(now + hit.expire);

        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.reap(key, now);

        match inner.slots.get(key) {
            None => Ok(None),
            Some(Slot {
                value: Value::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(_) => Err(EdgeError::Store(WRONG_TYPE.to_string())),
        }
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Err(EdgeError::Store("invalid expire time in 'set' command".into()));
        }
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.maybe_purge(now);
        inner.reap(key, now);

        let existing = inner.slots.get(key).map(|slot| slot.seq);
        let seq = match existing {
            Some(seq) => seq,
            None => inner.next_seq(),
        };
        inner.slots.insert(
            key.to_string(),
            Slot {
                seq,
                value: Value::Bytes(value.to_vec()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let now = Instant::now();
        let inner = self.inner.lock();

        // Keys are visited in creation order, so deleting already-returned
        // keys between pages never shifts the remaining ones.
        let mut candidates: Vec<(u64, &String)> = inner
            .slots
            .iter()
            .filter(|(_, s)| s.seq >= cursor && s.is_live(now))
            .map(|(k, s)| (s.seq, k))
            .collect();
        candidates.sort_unstable_by_key(|(seq, _)| *seq);

        let page_len = count.max(1);
        let exhausted = candidates.len() <= page_len;
        let visited = &candidates[..candidates.len().min(page_len)];

        let next_cursor = match (exhausted, visited.last()) {
            (false, Some((seq, _))) => seq + 1,
            _ => 0,
        };
        let keys = visited
            .iter()
            .filter(|(_, k)| glob_match(pattern, k))
            .map(|(_, k)| String::clone(k))
            .collect();

        Ok(ScanPage {
            cursor: next_cursor,
            keys,
        })
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let mut removed = 0;
        for key in keys {
            if inner.slots.remove(key).is_some_and(|s| s.is_live(now)) {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(now: i64, window: i64, member: &str) -> WindowHit {
        WindowHit {
            now_nanos: now,
            window_start_nanos: now - window,
            member: member.to_string(),
            expire: Duration::from_secs(120),
        }
    }

    #[tokio::test]
    async fn record_hit_counts_within_window() {
        let store = MemoryStore::new();
        assert_eq!(store.record_hit("k", &hit(100, 50, "a")).await.unwrap(), 1);
        assert_eq!(store.record_hit("k", &hit(130, 50, "b")).await.unwrap(), 2);
        // window now starts at 120, so 100 is purged
        assert_eq!(store.record_hit("k", &hit(170, 50, "c")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn record_hit_sets_expiry() {
        let store = MemoryStore::new();
        store.record_hit("k", &hit(1, 1, "a")).await.unwrap();
        let ttl = store.ttl("k").unwrap();
        assert!(ttl > Duration::from_secs(110) && ttl <= Duration::from_secs(120));
    }

    #[tokio::test]
    async fn wrong_type_is_an_error() {
        let store = MemoryStore::new();
        store
            .set_ex("k", b"v", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(store.record_hit("k", &hit(1, 1, "a")).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn values_expire() {
        let store = MemoryStore::new();
        store
            .set_ex("k", b"v", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_keys_are_reclaimed_by_later_writes() {
        let store = MemoryStore::new();
        for i in 0..1000 {
            let h = WindowHit {
                expire: Duration::from_secs(61),
                ..hit(1, 1, "a")
            };
            store
                .record_hit(&format!("ratelimit:api:10.0.{}.{}", i / 256, i % 256), &h)
                .await
                .unwrap();
        }
        assert_eq!(store.inner.lock().slots.len(), 1000);

        tokio::time::advance(Duration::from_secs(3600)).await;
        store
            .record_hit("ratelimit:api:active", &hit(2, 1, "b"))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.inner.lock().slots.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_are_rate_limited() {
        let store = MemoryStore::new();
        store
            .set_ex("a", b"v", Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        // Less than a sweep interval since the first write's sweep.
        store
            .set_ex("b", b"v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.inner.lock().slots.len(), 2);

        tokio::time::advance(SWEEP_INTERVAL).await;
        store
            .set_ex("c", b"v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.inner.lock().slots.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_reclaims_immediately() {
        let store = MemoryStore::new();
        store
            .set_ex("short", b"v", Duration::from_secs(1))
            .await
            .unwrap();
        store
            .set_ex("long", b"v", Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.inner.lock().slots.len(), 1);
    }

    #[tokio::test]
    async fn scan_pages_until_cursor_zero() {
        let store = MemoryStore::new();
        for i in 0..7 {
            store
                .set_ex(&format!("cache:api:{i}"), b"v", Duration::from_secs(60))
                .await
                .unwrap();
        }
        store
            .set_ex("other", b"v", Duration::from_secs(60))
            .await
            .unwrap();

        let mut cursor = 0;
        let mut seen = Vec::new();
        loop {
            let page = store.scan(cursor, "cache:api:*", 3).await.unwrap();
            seen.extend(page.keys);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        seen.sort();
        assert_eq!(seen.len(), 7);
        assert!(!seen.contains(&"other".to_string()));
    }
}
