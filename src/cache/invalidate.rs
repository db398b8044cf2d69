//! Prefix-based eviction of response-cache entries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::with_timeout;
use crate::store::KvStore;
use crate::telemetry;
use crate::{EdgeError, Result};

/// Deletes response-cache entries whose key starts with a given prefix.
///
/// Response-cache keys are `<key_prefix>:<hash>`, so `invalidate_pattern("")`
/// clears the whole namespace and any non-empty prefix matches on the leading
/// hex characters of the hash. Deployments that want per-resource
/// invalidation give each resource its own `key_prefix`.
pub struct CacheInvalidator {
    store: Option<Arc<dyn KvStore>>,
    key_prefix: String,
    batch_size: usize,
    timeout: Duration,
}

impl CacheInvalidator {
    pub fn new(store: Option<Arc<dyn KvStore>>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            batch_size: 100,
            timeout: Duration::from_secs(2),
        }
    }

    /// Keys requested per SCAN round-trip. Clamped to at least 1.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Bound on each individual store call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delete every key under `<key_prefix>:<prefix>` and return how many
    /// were removed.
    ///
    /// Keys are deleted batch by batch as the scan returns them. Returns
    /// `Ok(0)` without a store; store errors are returned to the caller,
    /// after which some keys may already be gone.
    pub async fn invalidate_pattern(&self, prefix: &str) -> Result<u64> {
        let Some(store) = self.store.as_deref() else {
            return Ok(0);
        };
        if prefix.contains(['*', '?']) {
            return Err(EdgeError::Configuration(format!(
                "invalidation prefix must not contain glob characters: {prefix}"
            )));
        }

        let pattern = format!("{}:{prefix}*", self.key_prefix);
        let mut cursor = 0;
        let mut deleted = 0;
        loop {
            let page = with_timeout(
                "cache scan",
                self.timeout,
                store.scan(cursor, &pattern, self.batch_size),
            )
            .await
            .inspect_err(|_| {
                metrics::counter!(telemetry::STORE_ERRORS_TOTAL, "operation" => "scan")
                    .increment(1);
            })?;

            if !page.keys.is_empty() {
                let removed = with_timeout("cache delete", self.timeout, store.delete(&page.keys))
                    .await
                    .inspect_err(|_| {
                        metrics::counter!(telemetry::STORE_ERRORS_TOTAL, "operation" => "delete")
                            .increment(1);
                    })?;
                debug!(pattern, batch = page.keys.len(), removed, "deleted cache batch");
                deleted += removed;
            }

            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        metrics::counter!(telemetry::CACHE_INVALIDATED_KEYS_TOTAL).increment(deleted);
        info!(pattern, deleted, "invalidated response cache entries");
        Ok(deleted)
    }
}
