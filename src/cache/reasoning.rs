//! In-process cache of generated recommendation reasons.
//!
//! Entries are keyed by a hash of `(mood, keywords, candidate)` and live for
//! a fixed TTL from insertion. The cache is bounded: inserting a new key into
//! a full cache evicts the entry closest to expiry. Expired entries read as
//! misses immediately and are physically removed by [`ReasoningCache::purge_expired`],
//! which the background sweeper calls on an interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::digest_hex;
use crate::telemetry;
use crate::{EdgeError, Result};

/// Configuration for [`ReasoningCache`].
#[derive(Debug, Clone)]
pub struct ReasoningCacheConfig {
    /// Lifetime of an entry from insertion. Default: 1 hour.
    pub ttl: Duration,
    /// Entry bound. Default: 1000.
    pub max_entries: usize,
    /// Interval of the background sweep. Default: 10 minutes.
    pub sweep_interval: Duration,
}

impl Default for ReasoningCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            max_entries: 1000,
            sweep_interval: Duration::from_secs(10 * 60),
        }
    }
}

impl ReasoningCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the entry bound.
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set the sweep interval.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

#[derive(Debug, Clone)]
struct Entry {
    text: String,
    expires_at: Instant,
}

/// Bounded TTL cache of recommendation reasons.
#[derive(Debug)]
pub struct ReasoningCache {
    entries: RwLock<HashMap<String, Entry>>,
    config: ReasoningCacheConfig,
}

impl ReasoningCache {
    /// Create a cache. Zero TTL, capacity or sweep interval is rejected.
    pub fn new(config: ReasoningCacheConfig) -> Result<Self> {
        if config.ttl.is_zero() {
            return Err(EdgeError::Configuration("reasoning cache TTL must be non-zero".into()));
        }
        if config.max_entries == 0 {
            return Err(EdgeError::Configuration(
                "reasoning cache max_entries must be non-zero".into(),
            ));
        }
        if config.sweep_interval.is_zero() {
            return Err(EdgeError::Configuration(
                "reasoning cache sweep interval must be non-zero".into(),
            ));
        }
        Ok(Self {
            entries: RwLock::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &ReasoningCacheConfig {
        &self.config
    }

    /// Cache key: 32 hex chars of SHA-256 over `mood|kw1,kw2|candidate`.
    ///
    /// Keyword order is significant.
    pub fn key_for(mood: &str, keywords: &[String], candidate: &str) -> String {
        let joined = keywords.join(",");
        digest_hex(
            &[
                mood.as_bytes(),
                b"|",
                joined.as_bytes(),
                b"|",
                candidate.as_bytes(),
            ],
            16,
        )
    }

    /// Look up a reason. Expired entries are misses.
    pub fn get(&self, mood: &str, keywords: &[String], candidate: &str) -> Option<String> {
        let key = Self::key_for(mood, keywords, candidate);
        let now = Instant::now();
        let hit = self
            .entries
            .read()
            .get(&key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.text.clone());

        if hit.is_some() {
            metrics::counter!(telemetry::REASON_CACHE_HITS_TOTAL).increment(1);
        } else {
            metrics::counter!(telemetry::REASON_CACHE_MISSES_TOTAL).increment(1);
        }
        hit
    }

    /// Insert or overwrite a reason with a fresh TTL.
    pub fn set(&self, mood: &str, keywords: &[String], candidate: &str, text: impl Into<String>) {
        let key = Self::key_for(mood, keywords, candidate);
        let entry = Entry {
            text: text.into(),
            expires_at: Instant::now() + self.config.ttl,
        };

        let mut entries = self.entries.write();
        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                entries.remove(&victim);
                debug!(key = %victim, "evicted reasoning cache entry");
            }
        }
        entries.insert(key, entry);
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Start the periodic sweep on the current runtime.
    ///
    /// The task holds a strong reference to the cache until
    /// [`SweeperHandle::shutdown`] is called or the handle is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let token = CancellationToken::new();
        let cache = Arc::clone(self);
        let cancelled = token.clone();
        let period = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = cache.purge_expired();
                        if purged > 0 {
                            debug!(purged, remaining = cache.len(), "swept reasoning cache");
                        }
                    }
                }
            }
        });

        SweeperHandle {
            token,
            handle: Some(handle),
        }
    }
}

/// Handle to the background sweep started by [`ReasoningCache::spawn_sweeper`].
///
/// Dropping the handle cancels the task without waiting for it.
#[derive(Debug)]
pub struct SweeperHandle {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "reasoning cache sweeper ended abnormally");
            }
        }
    }

    /// Whether the sweep task is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
