//! # adaptive-router
//!
//! An adaptive request-routing and orchestration engine over Tokio.
//!
//! ## Architecture
//!
//! Each request flows through an ordered pipeline with optional concurrent
//! enrichment stages:
//! ```text
//! RequestContext → classify → weight → [emotion ∥ prefetch] → route → generate
//! ```
//!
//! Routing weights come from a hot-swappable [`engine::WeightEngine`] that
//! starts on a fixed rules table and transitions to a trained model once
//! enough routing feedback accumulates. The live engine is replaced
//! atomically by the [`reload::ReloadManager`] — in-flight computations
//! always complete against the single engine instance they captured at entry.

// ── Lint policy (aerospace-grade) ─────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod adapters;
pub mod cache;
pub mod config;
pub mod engine;
pub mod feedback;
pub mod metrics;
pub mod pipeline;
pub mod reload;
pub mod router;

// Re-exports for convenience
pub use engine::{AdaptiveWeights, EngineHandle, EngineMode, WeightEngine};
pub use pipeline::{EnrichedContext, Pipeline};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for production log aggregators
/// - anything else (including unset) — human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing() -> Result<(), OrchestratorError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| OrchestratorError::Other(format!("tracing init failed: {e}")))
}

/// Top-level orchestrator errors.
///
/// Adapter failures are deliberately *not* represented here — they are
/// handled locally at each stage boundary (see [`pipeline`]) and never
/// escape [`Pipeline::run`]. This enum covers construction-time and
/// infrastructure failures only.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// A configuration value is missing or invalid.
    ///
    /// Returned at construction time so that misconfiguration surfaces
    /// immediately rather than at the first request.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// An engine snapshot reload failed (corrupt or unreadable snapshot).
    #[error("reload failed: {0}")]
    Reload(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

/// Classifier output expressing technical vs. emotional intent.
///
/// Produced once per request and immutable thereafter. All components are
/// clamped to `[0.0, 1.0]` at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreVector {
    /// Technical ("hard") intent score.
    pub hard: f64,
    /// Emotional ("soft") intent score.
    pub soft: f64,
    /// Likelihood that the request needs a web lookup.
    #[serde(default)]
    pub web_query: f64,
}

impl ScoreVector {
    /// Create a score vector, clamping every component to `[0.0, 1.0]`.
    pub fn new(hard: f64, soft: f64, web_query: f64) -> Self {
        Self {
            hard: hard.clamp(0.0, 1.0),
            soft: soft.clamp(0.0, 1.0),
            web_query: web_query.clamp(0.0, 1.0),
        }
    }

    /// The neutral score used when the classifier adapter fails.
    pub fn neutral() -> Self {
        Self {
            hard: 0.5,
            soft: 0.5,
            web_query: 0.0,
        }
    }
}

/// Normalized routing weights between the technical-expert path (`alpha`)
/// and the empathetic path (`beta`).
///
/// Invariant: `alpha + beta == 1.0` (within floating tolerance) and both
/// components lie in `[0.0, 1.0]`. Construction through [`WeightPair::new`]
/// enforces this.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightPair {
    /// Weight toward the technical-expert route.
    pub alpha: f64,
    /// Weight toward the empathetic route.
    pub beta: f64,
}

impl WeightPair {
    /// Create a normalized weight pair from raw components.
    ///
    /// Negative or non-finite inputs are treated as zero. A degenerate
    /// all-zero input falls back to the balanced pair `(0.5, 0.5)`.
    pub fn new(alpha: f64, beta: f64) -> Self {
        let a = if alpha.is_finite() { alpha.max(0.0) } else { 0.0 };
        let b = if beta.is_finite() { beta.max(0.0) } else { 0.0 };
        let sum = a + b;
        if sum <= f64::EPSILON {
            return Self::balanced();
        }
        Self {
            alpha: a / sum,
            beta: b / sum,
        }
    }

    /// The balanced pair `(0.5, 0.5)`, used when the weight engine fails
    /// entirely at the pipeline boundary.
    pub fn balanced() -> Self {
        Self {
            alpha: 0.5,
            beta: 0.5,
        }
    }

    /// The conservative default `(0.6, 0.4)` produced when no rule matches
    /// or when an internal engine failure is recovered.
    pub fn fallback() -> Self {
        Self {
            alpha: 0.6,
            beta: 0.4,
        }
    }

    /// Return `true` if the invariant `alpha + beta == 1.0` holds within
    /// floating tolerance and both components are in `[0, 1]`.
    pub fn is_normalized(&self) -> bool {
        (self.alpha + self.beta - 1.0).abs() < 1e-9
            && (0.0..=1.0).contains(&self.alpha)
            && (0.0..=1.0).contains(&self.beta)
    }
}

/// A single incoming request as submitted by a client.
///
/// The `extensions` bag is an open key-value map that pipeline stages may
/// read and extend as the request flows through; it is carried verbatim
/// into the [`EnrichedContext`] output.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// The raw user-supplied input text.
    pub input: String,
    /// Optional raw audio bytes for emotion detection.
    pub audio: Option<Vec<u8>>,
    /// Arbitrary extension fields attached by the caller or by stages.
    pub extensions: HashMap<String, serde_json::Value>,
}

impl RequestContext {
    /// Create a request context from input text alone.
    pub fn from_text(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            audio: None,
            extensions: HashMap::new(),
        }
    }

    /// Attach audio bytes for the emotion detection stage.
    pub fn with_audio(mut self, audio: Vec<u8>) -> Self {
        self.audio = Some(audio);
        self
    }
}
