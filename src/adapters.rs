//! Collaborator adapter traits.
//!
//! ## Responsibility
//! Define the seams where external models plug into the pipeline: intent
//! classification, emotion detection, context prefetch, route policy, and
//! response generation. Each trait returns an explicit `Result` — adapter
//! failures are values, never exceptions, and the pipeline converts every
//! failure into a documented stage default.
//!
//! ## NOT Responsible For
//! - Stage orchestration and failure defaults (that belongs to `pipeline`)
//! - Weight computation (that belongs to `engine`)

use async_trait::async_trait;
use thiserror::Error;

use crate::{RequestContext, ScoreVector, WeightPair};

/// Error returned by any adapter.
///
/// The pipeline never propagates these — it logs them, records the stage in
/// the per-request error list, and applies the stage default.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// The adapter's backing model or service failed.
    #[error("adapter backend failed: {0}")]
    Backend(String),

    /// The adapter was given input it cannot process.
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    /// The adapter did not answer within its own deadline.
    #[error("adapter timed out after {0}ms")]
    Timeout(u64),
}

/// Classifies request text into a technical/emotional [`ScoreVector`].
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Score the request's intent.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] if the backing classifier fails; the pipeline
    /// substitutes [`ScoreVector::neutral`] in that case.
    async fn classify(&self, ctx: &RequestContext) -> Result<ScoreVector, AdapterError>;
}

/// A detected emotional state with confidence.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EmotionReading {
    /// Dominant emotion label (e.g. `"frustrated"`, `"calm"`).
    pub label: String,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Detects emotional state from raw audio bytes.
#[async_trait]
pub trait EmotionDetector: Send + Sync {
    /// Analyze audio and return an emotion reading.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] on failure; the pipeline leaves the emotion
    /// field absent in that case.
    async fn detect(&self, audio: &[u8]) -> Result<EmotionReading, AdapterError>;
}

/// Speculatively fetches context likely needed downstream.
#[async_trait]
pub trait Prefetcher: Send + Sync {
    /// Produce a prefetch hint for the request.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] on failure; the pipeline leaves the prefetch
    /// hint absent in that case.
    async fn prefetch(&self, ctx: &RequestContext) -> Result<String, AdapterError>;
}

/// Custom routing policy overriding the built-in threshold router.
///
/// Synchronous by design: routing is a pure decision over already-computed
/// scores and weights.
pub trait RoutePolicy: Send + Sync {
    /// Choose a route name for the request.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] on failure; the router falls back to the
    /// default threshold policy in that case.
    fn route(&self, scores: &ScoreVector, weights: &WeightPair) -> Result<String, AdapterError>;
}

/// Generates the response for a routed request.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate response tokens for the request on the chosen route.
    ///
    /// The pipeline joins tokens with single spaces to form the response
    /// text and reports the token count as the stream chunk count.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] on failure; the pipeline substitutes an
    /// empty response and records a `"generation"` error entry.
    async fn generate(
        &self,
        ctx: &RequestContext,
        route: &str,
    ) -> Result<Vec<String>, AdapterError>;
}

// ── In-crate implementations ──────────────────────────────────────────────

/// Keyword-heuristic classifier for tests, demos, and local development.
///
/// Scores are derived from marker-word density, question marks, and message
/// length. Deterministic for a given input.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    const HARD_MARKERS: &'static [&'static str] = &[
        "error", "bug", "crash", "stack", "panic", "compile", "deploy", "config", "api",
        "database", "query", "function", "code", "server", "build", "test", "debug",
    ];

    const SOFT_MARKERS: &'static [&'static str] = &[
        "feel", "frustrated", "upset", "worried", "confused", "stressed", "help", "please",
        "thanks", "sorry", "angry", "overwhelmed", "stuck", "anxious",
    ];

    const WEB_MARKERS: &'static [&'static str] =
        &["latest", "news", "today", "current", "recent", "2025", "2026"];

    fn density(words: &[&str], markers: &[&str]) -> f64 {
        if words.is_empty() {
            return 0.0;
        }
        let hits = words
            .iter()
            .filter(|w| {
                let lower = w.to_lowercase();
                markers.iter().any(|m| lower.contains(m))
            })
            .count();
        // Saturates quickly: a few marker hits are a strong signal.
        (hits as f64 * 3.0 / words.len() as f64).min(1.0)
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, ctx: &RequestContext) -> Result<ScoreVector, AdapterError> {
        let words: Vec<&str> = ctx.input.split_whitespace().collect();
        if words.is_empty() {
            return Ok(ScoreVector::neutral());
        }
        let hard = Self::density(&words, Self::HARD_MARKERS);
        let soft = Self::density(&words, Self::SOFT_MARKERS);
        let web = Self::density(&words, Self::WEB_MARKERS);
        Ok(ScoreVector::new(hard, soft, web))
    }
}

/// Echo generator that tokenizes the input back, with a configurable delay.
///
/// Used in tests and demos where a real generation backend is unavailable.
#[derive(Debug, Clone)]
pub struct EchoGenerator {
    /// Artificial per-request delay in milliseconds.
    pub delay_ms: u64,
}

impl Default for EchoGenerator {
    fn default() -> Self {
        Self { delay_ms: 0 }
    }
}

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(
        &self,
        ctx: &RequestContext,
        route: &str,
    ) -> Result<Vec<String>, AdapterError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        let mut tokens = vec![format!("[{route}]")];
        tokens.extend(ctx.input.split_whitespace().map(str::to_string));
        Ok(tokens)
    }
}
