//! Concurrent generation of per-candidate recommendation reasons.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::ReasonGenerator;
use crate::cache::ReasoningCache;
use crate::telemetry;

/// Reason shown when generation fails. Never cached.
pub fn fallback_reason(candidate: &str) -> String {
    format!("{candidate}이(가) 지금 당신에게 딱 맞는 선택이에요!")
}

/// Fans out one generation task per uncached candidate and reassembles the
/// results in candidate order.
///
/// Cache hits are filled in before anything is spawned. Each miss runs on a
/// [`JoinSet`] under `generation_timeout`; a task that succeeds writes its own
/// result to the [`ReasoningCache`]. Failures, timeouts and panics leave the
/// slot with [`fallback_reason`], which is not cached, so the next request
/// for the same key tries the generator again.
///
/// Dropping the future returned by [`generate_rationales`](Self::generate_rationales)
/// aborts every task it spawned.
pub struct RecommendationOrchestrator {
    cache: Arc<ReasoningCache>,
    generator: Arc<dyn ReasonGenerator>,
    generation_timeout: Duration,
}

impl RecommendationOrchestrator {
    pub fn new(cache: Arc<ReasoningCache>, generator: Arc<dyn ReasonGenerator>) -> Self {
        Self {
            cache,
            generator,
            generation_timeout: Duration::from_secs(4),
        }
    }

    /// Bound on each generator call. Default: 4s.
    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &Arc<ReasoningCache> {
        &self.cache
    }

    /// One reason per candidate, in candidate order.
    pub async fn generate_rationales(
        &self,
        mood: &str,
        keywords: &[String],
        candidates: &[String],
    ) -> Vec<String> {
        self.generate_rationales_within(mood, keywords, candidates, None)
            .await
    }

    /// Like [`generate_rationales`](Self::generate_rationales), but gives up
    /// on outstanding tasks at `deadline`; their slots get the fallback.
    pub async fn generate_rationales_within(
        &self,
        mood: &str,
        keywords: &[String],
        candidates: &[String],
        deadline: Option<Instant>,
    ) -> Vec<String> {
        let mut reasons = Vec::with_capacity(candidates.len());
        let mut tasks = JoinSet::new();
        let shared_keywords: Arc<[String]> = Arc::from(keywords);

        for (index, candidate) in candidates.iter().enumerate() {
            if let Some(cached) = self.cache.get(mood, keywords, candidate) {
                reasons.push(cached);
                continue;
            }
            reasons.push(fallback_reason(candidate));

            let generator = Arc::clone(&self.generator);
            let cache = Arc::clone(&self.cache);
            let keywords = Arc::clone(&shared_keywords);
            let mood = mood.to_string();
            let candidate = candidate.clone();
            let timeout = self.generation_timeout;

            tasks.spawn(async move {
                let outcome = tokio::time::timeout(
                    timeout,
                    generator.generate_reason(&mood, &keywords, &candidate),
                )
                .await;
                match outcome {
                    Ok(Ok(reason)) if !reason.trim().is_empty() => {
                        cache.set(&mood, &keywords, &candidate, reason.clone());
                        (index, Some(reason))
                    }
                    Ok(Ok(_)) => {
                        warn!(candidate, "generator returned an empty reason");
                        (index, None)
                    }
                    Ok(Err(e)) => {
                        warn!(candidate, generator = generator.name(), error = %e, "reason generation failed");
                        (index, None)
                    }
                    Err(_) => {
                        warn!(candidate, ?timeout, "reason generation timed out");
                        (index, None)
                    }
                }
            });
        }

        let spawned = tasks.len();
        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(outstanding = tasks.len(), "reason generation deadline passed");
                        tasks.abort_all();
                        break;
                    }
                },
                None => tasks.join_next().await,
            };

            match next {
                None => break,
                Some(Ok((index, Some(reason)))) => {
                    metrics::counter!(telemetry::REASON_GENERATIONS_TOTAL, "status" => "ok")
                        .increment(1);
                    reasons[index] = reason;
                }
                Some(Ok((_, None))) => {
                    metrics::counter!(telemetry::REASON_GENERATIONS_TOTAL, "status" => "fallback")
                        .increment(1);
                }
                Some(Err(e)) => {
                    metrics::counter!(telemetry::REASON_GENERATIONS_TOTAL, "status" => "fallback")
                        .increment(1);
                    warn!(error = %e, "reason generation task failed");
                }
            }
        }

        debug!(
            candidates = candidates.len(),
            generated = spawned,
            "assembled recommendation reasons"
        );
        reasons
    }
}
