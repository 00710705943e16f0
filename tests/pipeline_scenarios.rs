//! End-to-end pipeline scenarios over the full crate surface.

use std::sync::Arc;

use adaptive_router::adapters::{
    AdapterError, Classifier, EchoGenerator, Generator, KeywordClassifier,
};
use adaptive_router::cache::{HashEmbedder, SemanticCache};
use adaptive_router::config::OrchestratorConfig;
use adaptive_router::engine::{
    EngineHandle, EngineState, RetrainTrigger, WeightEngine,
};
use adaptive_router::feedback::FeedbackStore;
use adaptive_router::{
    AdaptiveWeights, Pipeline, RequestContext, ScoreVector, WeightPair,
};
use async_trait::async_trait;

struct FixedClassifier(ScoreVector);

#[async_trait]
impl Classifier for FixedClassifier {
    async fn classify(&self, _: &RequestContext) -> Result<ScoreVector, AdapterError> {
        Ok(self.0)
    }
}

struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    async fn generate(&self, _: &RequestContext, _: &str) -> Result<Vec<String>, AdapterError> {
        Err(AdapterError::Backend("generation backend down".into()))
    }
}

fn weights_bundle() -> AdaptiveWeights {
    let feedback = FeedbackStore::new(1000);
    let cache = Arc::new(SemanticCache::new(
        Some(Arc::new(HashEmbedder)),
        std::time::Duration::from_secs(300),
        16,
        8,
        1024,
    ));
    let handle = EngineHandle::new(Arc::new(WeightEngine::new(
        EngineState::default(),
        feedback.clone(),
        cache,
    )));
    AdaptiveWeights::new(handle, feedback, RetrainTrigger::inert())
}

fn pipeline_with(classifier: Arc<dyn Classifier>) -> Pipeline {
    Pipeline::builder()
        .classifier(classifier)
        .generator(Arc::new(EchoGenerator::default()))
        .weights(weights_bundle())
        .config(OrchestratorConfig::default())
        .build()
        .expect("test: build pipeline")
}

// Scenario: a clearly technical request lands on the expert route with the
// strong-technical weight row.
#[tokio::test]
async fn technical_request_gets_expert_route() {
    let pipeline = pipeline_with(Arc::new(FixedClassifier(ScoreVector::new(0.9, 0.1, 0.0))));
    let out = pipeline
        .run(RequestContext::from_text("production deploy is failing"))
        .await;

    assert!((out.weights.alpha - 0.95).abs() < 1e-9);
    assert!((out.weights.beta - 0.05).abs() < 1e-9);
    assert_eq!(out.route, "expert");
    assert!(out.weights.is_normalized());
}

// Scenario: a clearly emotional request lands on the empathy route.
#[tokio::test]
async fn emotional_request_gets_empathy_route() {
    let pipeline = pipeline_with(Arc::new(FixedClassifier(ScoreVector::new(0.1, 0.85, 0.0))));
    let out = pipeline
        .run(RequestContext::from_text("I am completely overwhelmed right now"))
        .await;

    assert!((out.weights.alpha - 0.2).abs() < 1e-9);
    assert!((out.weights.beta - 0.8).abs() < 1e-9);
    assert_eq!(out.route, "empathy");
}

// Scenario: the generator fails; the request still completes with an empty
// response and a generation error entry.
#[tokio::test]
async fn generator_failure_degrades_gracefully() {
    let pipeline = Pipeline::builder()
        .classifier(Arc::new(KeywordClassifier))
        .generator(Arc::new(FailingGenerator))
        .weights(weights_bundle())
        .build()
        .expect("test: build pipeline");

    let out = pipeline.run(RequestContext::from_text("hello")).await;
    assert!(out.response.is_empty());
    assert_eq!(out.metrics.stream_chunks, 0);
    assert!(out.metrics.errors.iter().any(|e| e.stage == "generation"));
    assert!(!out.route.is_empty(), "routing still happened");
}

// Identical context text hits the semantic cache on the second request and
// returns identical weights.
#[tokio::test]
async fn repeated_request_hits_weight_cache() {
    let pipeline = pipeline_with(Arc::new(FixedClassifier(ScoreVector::new(0.9, 0.1, 0.0))));
    let ctx = RequestContext::from_text("kubernetes pod stuck in crash loop");

    let first = pipeline.run(ctx.clone()).await;
    let second = pipeline.run(ctx).await;
    assert_eq!(first.weights, second.weights);
    assert_eq!(first.route, second.route);
}

// Routing is a pure function of the weights: repeated runs with a fixed
// classifier always pick the same route.
#[tokio::test]
async fn routing_is_deterministic() {
    let pipeline = pipeline_with(Arc::new(FixedClassifier(ScoreVector::new(0.65, 0.3, 0.0))));
    let mut routes = Vec::new();
    for _ in 0..5 {
        let out = pipeline
            .run(RequestContext::from_text("same request every time"))
            .await;
        routes.push(out.route);
    }
    assert!(routes.windows(2).all(|w| w[0] == w[1]));
}

// Feedback that keeps failing on the technical branch shifts weights toward
// empathy on subsequent computations.
#[tokio::test]
async fn failing_technical_feedback_softens_weights() {
    // Cache disabled so the second computation cannot be answered from a
    // cached entry.
    let feedback = FeedbackStore::new(1000);
    let handle = EngineHandle::new(Arc::new(WeightEngine::new(
        EngineState::default(),
        feedback.clone(),
        Arc::new(SemanticCache::disabled()),
    )));
    let bundle = AdaptiveWeights::new(handle, feedback, RetrainTrigger::inert());
    let scores = ScoreVector::new(0.9, 0.1, 0.0);

    let before = bundle.compute(&scores, "before feedback");
    for _ in 0..10 {
        bundle.record_outcome(scores, WeightPair::new(0.95, 0.05), false);
    }
    let after = bundle.compute(&scores, "after feedback");

    assert!(
        after.beta > before.beta,
        "beta must strictly increase after failing technical feedback: {} vs {}",
        after.beta,
        before.beta
    );
    assert!(after.alpha <= 0.8);
    assert!(after.is_normalized());
}

// The output JSON carries the documented shape, including nested metadata.
#[tokio::test]
async fn output_json_has_expected_shape() {
    let pipeline = pipeline_with(Arc::new(KeywordClassifier));
    let mut ctx = RequestContext::from_text("fix the api error please");
    ctx.extensions
        .insert("tenant".into(), serde_json::json!("acme"));

    let out = pipeline.run(ctx).await;
    let json = out.to_json();

    assert_eq!(json["input"], "fix the api error please");
    assert_eq!(json["extensions"]["tenant"], "acme");
    for key in ["hard", "soft", "web_query", "alpha", "beta"] {
        assert!(
            json.get(key).is_some_and(serde_json::Value::is_number),
            "missing top-level key '{key}'"
        );
    }
    assert!(json["route"].is_string());
    assert!(json["metadata"]["pipeline_metrics"]["classify_ms"].is_number());
}

// Concurrent requests through a shared pipeline all complete with normalized
// weights and valid routes.
#[tokio::test]
async fn concurrent_requests_all_complete() {
    let pipeline = Arc::new(pipeline_with(Arc::new(KeywordClassifier)));
    let mut handles = Vec::new();
    for i in 0..32 {
        let pipeline = Arc::clone(&pipeline);
        handles.push(tokio::spawn(async move {
            pipeline
                .run(RequestContext::from_text(format!("request number {i} about a build error")))
                .await
        }));
    }
    for handle in handles {
        let out = handle.await.expect("test: task join");
        assert!(out.weights.is_normalized());
        assert!(["expert", "empathy", "balanced"].contains(&out.route.as_str()));
    }
}
