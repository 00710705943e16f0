//! Weight engine: maps classifier scores to normalized routing weights.
//!
//! ## Responsibility
//! Hold the active engine state — a tagged union of the rules table and the
//! learned model — and compute a [`WeightPair`] per request, consulting the
//! semantic cache first. The live engine is immutable once published; state
//! changes happen by building a new [`WeightEngine`] and swapping it through
//! the [`EngineHandle`].
//!
//! ## Guarantees
//! - `compute_weights` always returns a normalized pair; internal failures
//!   degrade to the `(0.6, 0.4)` fallback
//! - An in-flight computation runs entirely against the engine instance it
//!   captured at entry, even if a swap happens mid-flight
//! - The rules → learned transition fires exactly once, off the request path

pub mod learned;
pub mod retrain;
pub mod rules;

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::cache::SemanticCache;
use crate::feedback::{branch_success_rate, FeedbackRecord, FeedbackStore};
use crate::{ScoreVector, WeightPair};

pub use learned::LearnedParams;
pub use retrain::{spawn_retrain_worker, RetrainTrigger};
pub use rules::RulesConfig;

/// Which computation mode the engine is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    /// Fixed decision table plus feedback adjustment.
    Rules,
    /// Trained linear-softmax model.
    Learned,
}

/// The full serializable engine state, published atomically as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EngineState {
    /// Rules mode with its adjustment tunables.
    Rules {
        /// Adjustment tunables.
        config: RulesConfig,
    },
    /// Learned mode with trained model parameters.
    Learned {
        /// Trained model parameters.
        params: LearnedParams,
    },
}

impl EngineState {
    /// The mode this state represents.
    pub fn mode(&self) -> EngineMode {
        match self {
            EngineState::Rules { .. } => EngineMode::Rules,
            EngineState::Learned { .. } => EngineMode::Learned,
        }
    }
}

impl Default for EngineState {
    fn default() -> Self {
        EngineState::Rules {
            config: RulesConfig::default(),
        }
    }
}

/// An immutable weight engine instance.
///
/// Shares the feedback store and cache with its successors, so a swap
/// replaces the computation state without losing accumulated feedback or
/// cached entries.
pub struct WeightEngine {
    state: EngineState,
    feedback: FeedbackStore,
    cache: Arc<SemanticCache>,
}

impl WeightEngine {
    /// Build an engine over shared feedback and cache.
    pub fn new(state: EngineState, feedback: FeedbackStore, cache: Arc<SemanticCache>) -> Self {
        Self {
            state,
            feedback,
            cache,
        }
    }

    /// The engine's current mode.
    pub fn mode(&self) -> EngineMode {
        self.state.mode()
    }

    /// The engine's full state (for snapshotting).
    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Compute normalized weights for `scores`, using `context_text` as the
    /// cache key.
    ///
    /// Checks the semantic cache first; on a miss, computes per the active
    /// mode and populates the cache. Any internally produced non-normalized
    /// pair degrades to [`WeightPair::fallback`].
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn compute_weights(&self, scores: &ScoreVector, context_text: &str) -> WeightPair {
        if let Some(cached) = self.cache.get(context_text) {
            crate::metrics::inc_cache_lookup("hit");
            debug!(alpha = cached.alpha, beta = cached.beta, "weight cache hit");
            return cached;
        }
        crate::metrics::inc_cache_lookup("miss");

        let weights = match &self.state {
            EngineState::Rules { config } => rules::compute(scores, &self.feedback, config),
            EngineState::Learned { params } => {
                let recent = self.feedback.recent(10);
                let hard_rate =
                    branch_success_rate(&recent, |r| r.weights.alpha > 0.7).unwrap_or(0.5);
                let soft_rate =
                    branch_success_rate(&recent, |r| r.weights.beta > 0.7).unwrap_or(0.5);
                params.predict_weights(scores, hard_rate, soft_rate)
            }
        };

        let weights = if weights.is_normalized() {
            weights
        } else {
            WeightPair::fallback()
        };

        self.cache.insert(context_text, weights);
        weights
    }
}

/// Shared handle to the live engine; the single cross-request swap point.
///
/// Readers clone the inner `Arc` under a short read lock; the reload
/// manager replaces it under a short write lock. No computation ever runs
/// while a lock is held.
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<RwLock<Arc<WeightEngine>>>,
}

impl EngineHandle {
    /// Wrap an initial engine.
    pub fn new(engine: Arc<WeightEngine>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(engine)),
        }
    }

    /// The currently live engine.
    ///
    /// Falls back to a fresh default Rules engine only if the lock is
    /// poisoned, which cannot happen in this crate because no code panics
    /// while holding it.
    pub fn current(&self) -> Arc<WeightEngine> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Atomically replace the live engine.
    pub fn swap(&self, engine: Arc<WeightEngine>) {
        match self.inner.write() {
            Ok(mut guard) => *guard = engine,
            Err(poisoned) => *poisoned.into_inner() = engine,
        }
    }
}

/// The orchestrator-facing bundle: live engine handle, feedback store,
/// cache, and the retrain trigger.
///
/// This is the single seam the pipeline talks to for weights and outcome
/// recording.
#[derive(Clone)]
pub struct AdaptiveWeights {
    handle: EngineHandle,
    feedback: FeedbackStore,
    trigger: RetrainTrigger,
}

impl AdaptiveWeights {
    /// Assemble the bundle from its parts.
    pub fn new(handle: EngineHandle, feedback: FeedbackStore, trigger: RetrainTrigger) -> Self {
        Self {
            handle,
            feedback,
            trigger,
        }
    }

    /// Build a bundle from configuration: a rules-mode engine over a cache
    /// and feedback store sized per the config, plus an armed retrain
    /// trigger.
    ///
    /// Returns the bundle together with the cache (for wiring a
    /// [`crate::reload::ReloadManager`]) and the receiver to hand to
    /// [`spawn_retrain_worker`].
    pub fn from_config(
        config: &crate::config::OrchestratorConfig,
    ) -> (Self, Arc<SemanticCache>, tokio::sync::mpsc::Receiver<()>) {
        let cache = Arc::new(if config.cache.enabled {
            SemanticCache::new(
                Some(Arc::new(crate::cache::HashEmbedder)),
                std::time::Duration::from_secs(config.cache.ttl_s),
                config.cache.embedding_dim,
                config.cache.quant_levels,
                config.cache.max_entries,
            )
        } else {
            SemanticCache::disabled()
        });
        let feedback = FeedbackStore::new(config.weights.feedback_capacity);
        let handle = EngineHandle::new(Arc::new(WeightEngine::new(
            EngineState::default(),
            feedback.clone(),
            Arc::clone(&cache),
        )));
        let (trigger, rx) = RetrainTrigger::new(config.weights.min_samples);
        (Self::new(handle, feedback, trigger), cache, rx)
    }

    /// The live engine handle (for the reload manager).
    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    /// The shared feedback store.
    pub fn feedback(&self) -> &FeedbackStore {
        &self.feedback
    }

    /// Compute weights against the engine that is live right now.
    pub fn compute(&self, scores: &ScoreVector, context_text: &str) -> WeightPair {
        self.handle.current().compute_weights(scores, context_text)
    }

    /// The live engine's mode.
    pub fn mode(&self) -> EngineMode {
        self.handle.current().mode()
    }

    /// Record a routing outcome and, if the transition threshold is reached
    /// while still in rules mode, fire the one-shot retrain event.
    pub fn record_outcome(&self, scores: ScoreVector, weights: WeightPair, success: bool) {
        self.feedback
            .push(FeedbackRecord::now(scores, weights, success));
        self.trigger
            .maybe_fire(self.feedback.len(), self.mode());
    }
}
