//! The request pipeline: classify → weight → (emotion ∥ prefetch) → route →
//! generate.
//!
//! ## Responsibility
//! Drive one request through every stage and produce an [`EnrichedContext`].
//! [`Pipeline::run`] never fails: each stage failure is logged, counted, and
//! replaced by that stage's documented default.
//!
//! ## Guarantees
//! - Stage ordering: classify < weight < route < generate, always
//! - In parallel mode, emotion starts at request entry and prefetch starts
//!   after weights; both resolve before the output is assembled
//! - CPU-bound stages (classify, weight) run under a bounded semaphore sized
//!   `max(1, cores - 1)` so enrichment tasks keep a core available
//! - A request computes weights against exactly one engine instance
//!
//! ## NOT Responsible For
//! - Weight computation internals (that belongs to `engine`)
//! - Recording routing outcomes (callers do that via [`AdaptiveWeights`])

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapters::{
    AdapterError, Classifier, EmotionDetector, EmotionReading, Generator, Prefetcher,
};
use crate::config::OrchestratorConfig;
use crate::engine::AdaptiveWeights;
use crate::metrics::{self, PipelineMetrics, StageError};
use crate::router::Router;
use crate::{OrchestratorError, RequestContext, ScoreVector, WeightPair};

/// The fully processed output of one request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EnrichedContext {
    /// The original input text.
    pub input: String,
    /// Classifier scores (neutral on classifier failure).
    pub scores: ScoreVector,
    /// Routing weights used for this request.
    pub weights: WeightPair,
    /// The route the request took.
    pub route: String,
    /// Detected emotion, when the stage ran and succeeded.
    pub emotion: Option<EmotionReading>,
    /// Prefetched context hint, when the stage ran and succeeded.
    pub prefetch: Option<String>,
    /// Generated response text (empty on generator failure).
    pub response: String,
    /// Extension fields carried through from the request.
    pub extensions: std::collections::HashMap<String, serde_json::Value>,
    /// Agent name from configuration.
    pub agent: String,
    /// Per-request timing and error record.
    pub metrics: PipelineMetrics,
}

impl EnrichedContext {
    /// Serialize the context to a JSON value.
    ///
    /// Score and weight components are flattened to top-level keys
    /// (`hard`, `soft`, `web_query`, `alpha`, `beta`); the agent name and
    /// timing record are nested under `metadata`.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "input": self.input,
            "hard": self.scores.hard,
            "soft": self.scores.soft,
            "web_query": self.scores.web_query,
            "alpha": self.weights.alpha,
            "beta": self.weights.beta,
            "route": self.route,
            "emotion": self.emotion,
            "prefetch": self.prefetch,
            "response": self.response,
            "extensions": self.extensions,
            "metadata": {
                "agent": self.agent,
                "pipeline_metrics": self.metrics,
                "errors": self.metrics.errors,
            },
        })
    }
}

/// Builder for [`Pipeline`]. Classifier and generator are required; every
/// other collaborator is optional.
#[derive(Default)]
pub struct PipelineBuilder {
    classifier: Option<Arc<dyn Classifier>>,
    generator: Option<Arc<dyn Generator>>,
    emotion: Option<Arc<dyn EmotionDetector>>,
    prefetcher: Option<Arc<dyn Prefetcher>>,
    router: Option<Router>,
    weights: Option<AdaptiveWeights>,
    config: OrchestratorConfig,
}

impl PipelineBuilder {
    /// Set the intent classifier (required).
    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Set the response generator (required).
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Set the optional emotion detector.
    pub fn emotion_detector(mut self, detector: Arc<dyn EmotionDetector>) -> Self {
        self.emotion = Some(detector);
        self
    }

    /// Set the optional prefetcher.
    pub fn prefetcher(mut self, prefetcher: Arc<dyn Prefetcher>) -> Self {
        self.prefetcher = Some(prefetcher);
        self
    }

    /// Set the router (defaults to the built-in threshold router).
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    /// Set the weight engine bundle (required).
    pub fn weights(mut self, weights: AdaptiveWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Set the orchestrator configuration.
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Assemble the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ConfigError`] if a required collaborator
    /// is missing.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn build(self) -> Result<Pipeline, OrchestratorError> {
        let classifier = self
            .classifier
            .ok_or_else(|| OrchestratorError::ConfigError("classifier is required".into()))?;
        let generator = self
            .generator
            .ok_or_else(|| OrchestratorError::ConfigError("generator is required".into()))?;
        let weights = self
            .weights
            .ok_or_else(|| OrchestratorError::ConfigError("weight engine is required".into()))?;

        let router = self.router.unwrap_or_else(|| {
            Router::new().with_thresholds(
                self.config.router.expert_threshold,
                self.config.router.empathy_threshold,
            )
        });

        let cores = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        let cpu_permits = cores.saturating_sub(1).max(1);

        Ok(Pipeline {
            classifier,
            generator,
            emotion: self.emotion,
            prefetcher: self.prefetcher,
            router,
            weights,
            parallel_enabled: self.config.orchestrator.parallel_enabled,
            min_input_length: self.config.orchestrator.min_input_length,
            agent: self.config.orchestrator.agent.clone(),
            cpu_pool: Arc::new(Semaphore::new(cpu_permits)),
        })
    }
}

/// The request pipeline. Cheap to clone and share across request handlers.
#[derive(Clone)]
pub struct Pipeline {
    classifier: Arc<dyn Classifier>,
    generator: Arc<dyn Generator>,
    emotion: Option<Arc<dyn EmotionDetector>>,
    prefetcher: Option<Arc<dyn Prefetcher>>,
    router: Router,
    weights: AdaptiveWeights,
    parallel_enabled: bool,
    min_input_length: usize,
    agent: String,
    cpu_pool: Arc<Semaphore>,
}

type EmotionTask = JoinHandle<(Result<EmotionReading, AdapterError>, u64)>;
type PrefetchTask = JoinHandle<(Result<String, AdapterError>, u64)>;

impl Pipeline {
    /// Start building a pipeline.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// The shared weight engine bundle, for outcome recording.
    pub fn weights(&self) -> &AdaptiveWeights {
        &self.weights
    }

    /// Whether a given request would run in parallel mode.
    pub fn is_parallel(&self, ctx: &RequestContext) -> bool {
        self.parallel_enabled && ctx.input.len() >= self.min_input_length
    }

    /// Process one request end to end.
    ///
    /// Never fails: every stage failure degrades to its documented default
    /// and is recorded in the output's error list.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub async fn run(&self, ctx: RequestContext) -> EnrichedContext {
        let start = Instant::now();
        let parallel = self.is_parallel(&ctx);
        let mut errors: Vec<StageError> = Vec::new();

        // Emotion starts at request entry in parallel mode so audio analysis
        // overlaps the whole main flow.
        let emotion_task: Option<EmotionTask> = if parallel {
            self.spawn_emotion(&ctx)
        } else {
            None
        };

        // ── classify ──
        let classify_start = Instant::now();
        let scores = {
            let _permit = self.cpu_pool.acquire().await;
            match self.classifier.classify(&ctx).await {
                Ok(scores) => scores,
                Err(e) => {
                    warn!(error = %e, "classification failed, using neutral scores");
                    metrics::inc_error("classification", "adapter");
                    errors.push(StageError {
                        stage: "classification".into(),
                        message: e.to_string(),
                    });
                    ScoreVector::neutral()
                }
            }
        };
        let classify_ms = elapsed_ms(classify_start);
        metrics::inc_request("classification");
        metrics::record_stage_latency("classification", classify_start.elapsed());

        // ── weight ──
        let weights_start = Instant::now();
        let weights = {
            let _permit = self.cpu_pool.acquire().await;
            self.weights.compute(&scores, &ctx.input)
        };
        let weights_ms = elapsed_ms(weights_start);
        metrics::inc_request("weights");
        metrics::record_stage_latency("weights", weights_start.elapsed());
        debug!(
            alpha = weights.alpha,
            beta = weights.beta,
            duration_ms = weights_ms,
            "weights computed"
        );

        // Prefetch starts once weights exist, concurrent with routing.
        let prefetch_task: Option<PrefetchTask> = if parallel {
            self.spawn_prefetch(&ctx)
        } else {
            None
        };

        // Sequential mode runs the enrichment stages inline between weights
        // and routing, each waited in turn.
        let (mut emotion, mut emotion_ms) = (None, None);
        let (mut prefetch, mut prefetch_ms) = (None, None);
        if !parallel {
            if self.emotion.is_some() && ctx.audio.is_some() {
                let t = Instant::now();
                emotion = self.detect_emotion_inline(&ctx, &mut errors).await;
                emotion_ms = Some(elapsed_ms(t));
            }
            if let Some(prefetcher) = &self.prefetcher {
                let t = Instant::now();
                match prefetcher.prefetch(&ctx).await {
                    Ok(hint) => prefetch = Some(hint),
                    Err(e) => {
                        warn!(error = %e, "prefetch failed, continuing without hint");
                        metrics::inc_error("prefetch", "adapter");
                        errors.push(StageError {
                            stage: "prefetch".into(),
                            message: e.to_string(),
                        });
                    }
                }
                prefetch_ms = Some(elapsed_ms(t));
            }
        }

        // ── route ──
        let route_start = Instant::now();
        let route = self.router.route(&scores, &weights);
        let route_ms = elapsed_ms(route_start);
        metrics::inc_request("routing");
        metrics::record_stage_latency("routing", route_start.elapsed());
        metrics::inc_route(&route);

        // ── generate ──
        let generate_start = Instant::now();
        let (response, stream_chunks) = match self.generator.generate(&ctx, &route).await {
            Ok(tokens) => {
                let chunks = tokens.len();
                (tokens.join(" "), chunks)
            }
            Err(e) => {
                warn!(error = %e, route = %route, "generation failed, returning empty response");
                metrics::inc_error("generation", "adapter");
                errors.push(StageError {
                    stage: "generation".into(),
                    message: e.to_string(),
                });
                (String::new(), 0)
            }
        };
        let generate_ms = elapsed_ms(generate_start);
        metrics::inc_request("generation");
        metrics::record_stage_latency("generation", generate_start.elapsed());

        // Enrichment tasks resolve before the output merge.
        if let Some(task) = emotion_task {
            match task.await {
                Ok((Ok(reading), ms)) => {
                    emotion = Some(reading);
                    emotion_ms = Some(ms);
                }
                Ok((Err(e), ms)) => {
                    warn!(error = %e, "emotion detection failed, continuing without it");
                    metrics::inc_error("emotion", "adapter");
                    errors.push(StageError {
                        stage: "emotion".into(),
                        message: e.to_string(),
                    });
                    emotion_ms = Some(ms);
                }
                Err(e) => {
                    warn!(error = %e, "emotion task aborted");
                    metrics::inc_error("emotion", "join");
                    errors.push(StageError {
                        stage: "emotion".into(),
                        message: format!("task aborted: {e}"),
                    });
                }
            }
        }
        if let Some(task) = prefetch_task {
            match task.await {
                Ok((Ok(hint), ms)) => {
                    prefetch = Some(hint);
                    prefetch_ms = Some(ms);
                }
                Ok((Err(e), ms)) => {
                    warn!(error = %e, "prefetch failed, continuing without hint");
                    metrics::inc_error("prefetch", "adapter");
                    errors.push(StageError {
                        stage: "prefetch".into(),
                        message: e.to_string(),
                    });
                    prefetch_ms = Some(ms);
                }
                Err(e) => {
                    warn!(error = %e, "prefetch task aborted");
                    metrics::inc_error("prefetch", "join");
                    errors.push(StageError {
                        stage: "prefetch".into(),
                        message: format!("task aborted: {e}"),
                    });
                }
            }
        }

        let total_ms = elapsed_ms(start);
        info!(
            route = %route,
            parallel,
            total_ms,
            error_count = errors.len(),
            "request processed"
        );

        EnrichedContext {
            input: ctx.input,
            scores,
            weights,
            route: route.clone(),
            emotion,
            prefetch,
            response,
            extensions: ctx.extensions,
            agent: self.agent.clone(),
            metrics: PipelineMetrics {
                classify_ms,
                weights_ms,
                emotion_ms,
                prefetch_ms,
                route_ms,
                generate_ms,
                total_ms,
                route,
                stream_chunks,
                parallel,
                errors,
            },
        }
    }

    fn spawn_emotion(&self, ctx: &RequestContext) -> Option<EmotionTask> {
        let detector = Arc::clone(self.emotion.as_ref()?);
        let audio = ctx.audio.clone()?;
        Some(tokio::spawn(async move {
            let t = Instant::now();
            let result = detector.detect(&audio).await;
            (result, elapsed_ms(t))
        }))
    }

    fn spawn_prefetch(&self, ctx: &RequestContext) -> Option<PrefetchTask> {
        let prefetcher = Arc::clone(self.prefetcher.as_ref()?);
        let ctx = ctx.clone();
        Some(tokio::spawn(async move {
            let t = Instant::now();
            let result = prefetcher.prefetch(&ctx).await;
            (result, elapsed_ms(t))
        }))
    }

    async fn detect_emotion_inline(
        &self,
        ctx: &RequestContext,
        errors: &mut Vec<StageError>,
    ) -> Option<EmotionReading> {
        let detector = self.emotion.as_ref()?;
        let audio = ctx.audio.as_ref()?;
        match detector.detect(audio).await {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!(error = %e, "emotion detection failed, continuing without it");
                metrics::inc_error("emotion", "adapter");
                errors.push(StageError {
                    stage: "emotion".into(),
                    message: e.to_string(),
                });
                None
            }
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
