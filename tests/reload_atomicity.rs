//! Atomic engine reload and the rules → learned transition, end to end.

use std::sync::Arc;
use std::time::Duration;

use adaptive_router::cache::SemanticCache;
use adaptive_router::engine::{
    spawn_retrain_worker, EngineHandle, EngineMode, EngineState, LearnedParams, RetrainTrigger,
    WeightEngine,
};
use adaptive_router::feedback::FeedbackStore;
use adaptive_router::reload::ReloadManager;
use adaptive_router::{AdaptiveWeights, ScoreVector, WeightPair};

fn fresh_handle() -> (EngineHandle, FeedbackStore, Arc<SemanticCache>) {
    let feedback = FeedbackStore::new(1000);
    let cache = Arc::new(SemanticCache::disabled());
    let handle = EngineHandle::new(Arc::new(WeightEngine::new(
        EngineState::default(),
        feedback.clone(),
        Arc::clone(&cache),
    )));
    (handle, feedback, cache)
}

// Hammer compute_weights from many tasks while snapshots are swapped in
// concurrently: every result must be a valid normalized pair, never torn
// state.
#[tokio::test]
async fn concurrent_computes_survive_swaps() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let (handle, feedback, cache) = fresh_handle();
    let manager = Arc::new(ReloadManager::new(
        dir.path().join("engine.json"),
        dir.path().join("engine.signal"),
        handle.clone(),
        feedback,
        cache,
    ));

    let mut workers = Vec::new();
    for i in 0..8 {
        let handle = handle.clone();
        workers.push(tokio::spawn(async move {
            for j in 0..200 {
                let scores = ScoreVector::new(
                    (i as f64 / 8.0 + j as f64 / 200.0) % 1.0,
                    0.3,
                    0.0,
                );
                let engine = handle.current();
                let w = engine.compute_weights(&scores, "concurrency probe");
                assert!(w.is_normalized(), "torn or invalid weights observed");
            }
        }));
    }

    // Interleave swaps between rules and learned state.
    for round in 0..10 {
        let state = if round % 2 == 0 {
            EngineState::Learned {
                params: LearnedParams::default(),
            }
        } else {
            EngineState::default()
        };
        manager.publish(&state).expect("test: publish");
        manager.try_reload().expect("test: reload");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    for worker in workers {
        worker.await.expect("test: worker join");
    }
}

// The full transition path: record failing-and-succeeding outcomes until the
// threshold fires, let the retrain worker train and publish, and observe the
// live engine flip to learned mode exactly once.
#[tokio::test]
async fn feedback_threshold_triggers_one_way_learned_transition() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let (handle, feedback, cache) = fresh_handle();
    let manager = Arc::new(ReloadManager::new(
        dir.path().join("engine.json"),
        dir.path().join("engine.signal"),
        handle.clone(),
        feedback.clone(),
        cache,
    ));

    let (trigger, rx) = RetrainTrigger::new(100);
    let worker = spawn_retrain_worker(rx, feedback.clone(), Arc::clone(&manager), 0.05, 10);
    let bundle = AdaptiveWeights::new(handle.clone(), feedback, trigger.clone());

    assert_eq!(bundle.mode(), EngineMode::Rules);
    for i in 0..100 {
        bundle.record_outcome(
            ScoreVector::new(0.9, 0.1, 0.0),
            WeightPair::new(0.95, 0.05),
            i % 3 != 0,
        );
    }
    assert!(trigger.has_fired(), "threshold crossing must fire the event");

    // Wait for the worker to train and apply the reload.
    let mut flipped = false;
    for _ in 0..100 {
        if bundle.mode() == EngineMode::Learned {
            flipped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(flipped, "engine must transition to learned mode");

    // Further feedback must not fire again.
    for _ in 0..50 {
        bundle.record_outcome(
            ScoreVector::new(0.9, 0.1, 0.0),
            WeightPair::new(0.95, 0.05),
            true,
        );
    }
    assert_eq!(bundle.mode(), EngineMode::Learned);
    assert!(
        dir.path().join("engine.json").exists(),
        "learned snapshot persisted"
    );

    worker.abort();
}

// A corrupt snapshot never takes down the engine: computes continue on the
// previous state and the signal is cleared so the failure is not retried.
#[tokio::test]
async fn corrupt_snapshot_leaves_live_engine_serving() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let (handle, feedback, cache) = fresh_handle();
    let manager = Arc::new(ReloadManager::new(
        dir.path().join("engine.json"),
        dir.path().join("engine.signal"),
        handle.clone(),
        feedback,
        cache,
    ));

    std::fs::write(dir.path().join("engine.json"), "{{ definitely not json")
        .expect("test: write corrupt snapshot");
    std::fs::write(dir.path().join("engine.signal"), "reload").expect("test: write signal");

    assert!(manager.try_reload().is_err());
    assert_eq!(handle.current().mode(), EngineMode::Rules);
    assert!(
        !dir.path().join("engine.signal").exists(),
        "signal cleared after a failed reload"
    );

    let w = handle
        .current()
        .compute_weights(&ScoreVector::new(0.9, 0.1, 0.0), "still serving");
    assert!(w.is_normalized());
}

// The poller picks up an externally published snapshot without any explicit
// reload call, the way an operator-driven rollout works.
#[tokio::test]
async fn poller_applies_external_snapshot() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let (handle, feedback, cache) = fresh_handle();
    let manager = Arc::new(ReloadManager::new(
        dir.path().join("engine.json"),
        dir.path().join("engine.signal"),
        handle.clone(),
        feedback,
        cache,
    ));

    let poller = Arc::clone(&manager).spawn_poller(Duration::from_millis(10));

    let state = EngineState::Learned {
        params: LearnedParams::default(),
    };
    let json = serde_json::to_string(&state).expect("test: serialize");
    std::fs::write(dir.path().join("engine.json"), json).expect("test: write snapshot");
    std::fs::write(dir.path().join("engine.signal"), "reload").expect("test: write signal");

    let mut flipped = false;
    for _ in 0..100 {
        if handle.current().mode() == EngineMode::Learned {
            flipped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(flipped, "poller must apply the pending snapshot");
    poller.abort();
}
