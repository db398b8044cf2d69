//! Recommendation reasons: generation and fan-out.

pub mod generator;
pub mod orchestrator;

pub use generator::{ChatReasonGenerator, ReasonGenerator};
pub use orchestrator::{RecommendationOrchestrator, fallback_reason};
