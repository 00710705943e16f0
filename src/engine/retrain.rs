//! Background retrain worker.
//!
//! Recording feedback never trains a model on the request path. Instead, the
//! append that crosses the sample threshold fires a one-shot event; a
//! dedicated task picks it up, trains on a snapshot of the buffer inside
//! `spawn_blocking`, persists the learned state, and hands it to the live
//! engine through the atomic-reload mechanism.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::engine::{learned, EngineMode, EngineState};
use crate::feedback::FeedbackStore;
use crate::reload::ReloadManager;

/// Default number of feedback records required before the one-shot
/// rules → learned transition fires.
pub const DEFAULT_MIN_SAMPLES: usize = 100;

/// One-shot trigger for the rules → learned transition.
///
/// Cheap to clone; all clones share the same fired flag, so concurrent
/// appends crossing the threshold together still fire exactly one event.
#[derive(Clone)]
pub struct RetrainTrigger {
    tx: mpsc::Sender<()>,
    fired: Arc<AtomicBool>,
    min_samples: usize,
}

impl RetrainTrigger {
    /// Create a trigger and the receiving end for the retrain worker.
    pub fn new(min_samples: usize) -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                tx,
                fired: Arc::new(AtomicBool::new(false)),
                min_samples: min_samples.max(1),
            },
            rx,
        )
    }

    /// A trigger that can never fire, for tests and rules-only deployments.
    pub fn inert() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self {
            tx,
            fired: Arc::new(AtomicBool::new(true)),
            min_samples: usize::MAX,
        }
    }

    /// Whether the one-shot event has already fired.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Fire the retrain event if the buffer has reached the threshold while
    /// the live engine is still in rules mode. Idempotent: subsequent calls
    /// are no-ops.
    pub fn maybe_fire(&self, buffer_len: usize, mode: EngineMode) {
        if mode != EngineMode::Rules || buffer_len < self.min_samples {
            return;
        }
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(samples = buffer_len, "feedback threshold reached, scheduling retrain");
        if self.tx.try_send(()).is_err() {
            // Channel closed means no worker is running; the flag stays set
            // so the transition remains one-way.
            warn!("retrain worker unavailable, transition event dropped");
        }
    }
}

/// Spawn the retrain worker task.
///
/// For each received event the worker snapshots the feedback buffer, trains
/// the learned model on a blocking thread, publishes the snapshot + signal
/// through the reload manager, and immediately applies the reload so the
/// handoff is prompt and deterministic.
pub fn spawn_retrain_worker(
    mut rx: mpsc::Receiver<()>,
    feedback: FeedbackStore,
    manager: Arc<ReloadManager>,
    learning_rate: f64,
    epochs: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            let records = feedback.all();
            info!(samples = records.len(), "retrain starting");

            let trained =
                tokio::task::spawn_blocking(move || learned::train(&records, learning_rate, epochs))
                    .await;

            let params = match trained {
                Ok(params) => params,
                Err(e) => {
                    error!(error = %e, "retrain task failed, keeping current engine");
                    continue;
                }
            };

            let state = EngineState::Learned { params };
            if let Err(e) = manager.publish(&state) {
                error!(error = %e, "failed to publish learned snapshot");
                continue;
            }
            match manager.try_reload() {
                Ok(true) => info!("learned engine activated"),
                Ok(false) => warn!("published snapshot but no reload signal was pending"),
                Err(e) => error!(error = %e, "reload of learned snapshot failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_fires_once_at_threshold() {
        let (trigger, mut rx) = RetrainTrigger::new(100);
        trigger.maybe_fire(99, EngineMode::Rules);
        assert!(!trigger.has_fired());
        assert!(rx.try_recv().is_err());

        trigger.maybe_fire(100, EngineMode::Rules);
        assert!(trigger.has_fired());
        assert!(rx.try_recv().is_ok());

        trigger.maybe_fire(150, EngineMode::Rules);
        assert!(rx.try_recv().is_err(), "second fire must not happen");
    }

    #[tokio::test]
    async fn test_trigger_ignores_learned_mode() {
        let (trigger, mut rx) = RetrainTrigger::new(10);
        trigger.maybe_fire(500, EngineMode::Learned);
        assert!(!trigger.has_fired());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_trigger_clones_share_fired_flag() {
        let (trigger, mut rx) = RetrainTrigger::new(10);
        let clone = trigger.clone();
        trigger.maybe_fire(10, EngineMode::Rules);
        clone.maybe_fire(10, EngineMode::Rules);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "clones must fire a single event");
    }

    #[test]
    fn test_inert_trigger_never_fires() {
        let trigger = RetrainTrigger::inert();
        trigger.maybe_fire(usize::MAX, EngineMode::Rules);
        assert!(trigger.has_fired(), "inert trigger reports fired");
    }
}
