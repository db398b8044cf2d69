//! Caching subsystem.
//!
//! Three independent pieces:
//!
//! - [`response::DistributedResponseCache`]: full HTTP responses for
//!   idempotent reads, stored in the shared [`KvStore`](crate::store::KvStore)
//!   and replayed to every API instance. Wraps the handler chain as axum
//!   middleware.
//!
//! - [`invalidate::CacheInvalidator`]: prefix-based bulk eviction of
//!   response-cache entries after a write.
//!
//! - [`reasoning::ReasoningCache`]: process-local TTL cache of generated
//!   recommendation reasons, consulted by the
//!   [`RecommendationOrchestrator`](crate::recommend::RecommendationOrchestrator).
//!   Losing it only costs extra model calls.

pub mod invalidate;
pub mod reasoning;
pub mod response;

pub use invalidate::CacheInvalidator;
pub use reasoning::{ReasoningCache, ReasoningCacheConfig, SweeperHandle};
pub use response::{CachedResponse, DistributedResponseCache, ResponseCacheConfig, cache_key};

use sha2::{Digest, Sha256};

/// Hex-encode the first `bytes` bytes of SHA-256 over `parts` (concatenated).
pub(crate) fn digest_hex(parts: &[&[u8]], bytes: usize) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    digest
        .iter()
        .take(bytes)
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_hex_length() {
        assert_eq!(digest_hex(&[b"abc"], 8).len(), 16);
        assert_eq!(digest_hex(&[b"abc"], 16).len(), 32);
    }

    #[test]
    fn digest_hex_known_value() {
        // sha256("abc") = ba7816bf8f01cfea...
        assert_eq!(digest_hex(&[b"abc"], 8), "ba7816bf8f01cfea");
        assert_eq!(digest_hex(&[b"a", b"bc"], 8), "ba7816bf8f01cfea");
    }
}
