//! Bounded routing-feedback store.
//!
//! ## Responsibility
//! Retain the most recent routing outcomes in a capacity-bounded ring buffer
//! shared between request handlers, the rules-mode feedback adjustment, and
//! the retrain worker. When full, the oldest record is evicted first.
//!
//! ## Guarantees
//! - Capacity is enforced on every push (oldest-first eviction)
//! - Reads never remove records; training consumes snapshots, not the buffer
//! - Clones share the same underlying buffer
//!
//! ## NOT Responsible For
//! - Deciding when to retrain (that belongs to `engine::retrain`)
//! - Interpreting outcomes (that belongs to `engine::rules` / `engine::learned`)

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{ScoreVector, WeightPair};

/// Default maximum number of retained feedback records.
pub const DEFAULT_FEEDBACK_CAPACITY: usize = 1000;

/// One observed routing outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// Classifier scores for the interaction.
    pub scores: ScoreVector,
    /// Weights the engine produced for the interaction.
    pub weights: WeightPair,
    /// Whether the routed interaction succeeded.
    pub outcome_success: bool,
    /// Unix timestamp (seconds) when the outcome was recorded.
    pub timestamp_secs: u64,
}

impl FeedbackRecord {
    /// Build a record stamped with the current wall-clock time.
    pub fn now(scores: ScoreVector, weights: WeightPair, outcome_success: bool) -> Self {
        let timestamp_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            scores,
            weights,
            outcome_success,
            timestamp_secs,
        }
    }
}

/// Success rate over the records selected by `pick`, or `None` when no
/// record matches.
///
/// Shared by the rules-mode adjustment and the learned-mode rolling
/// features so the two branch definitions cannot drift.
pub fn branch_success_rate(
    records: &[FeedbackRecord],
    pick: impl Fn(&FeedbackRecord) -> bool,
) -> Option<f64> {
    let (total, successes) = records
        .iter()
        .filter(|r| pick(r))
        .fold((0usize, 0usize), |(t, s), r| {
            (t + 1, s + usize::from(r.outcome_success))
        });
    if total == 0 {
        None
    } else {
        Some(successes as f64 / total as f64)
    }
}

struct Inner {
    records: VecDeque<FeedbackRecord>,
    capacity: usize,
}

/// Thread-safe bounded buffer of [`FeedbackRecord`]s.
///
/// Cheap to clone: clones share the same buffer.
#[derive(Clone)]
pub struct FeedbackStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for FeedbackStore {
    fn default() -> Self {
        Self::new(DEFAULT_FEEDBACK_CAPACITY)
    }
}

impl FeedbackStore {
    /// Create a store retaining at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                records: VecDeque::with_capacity(capacity),
                capacity,
            })),
        }
    }

    /// Append a record, evicting the oldest if the buffer is full.
    pub fn push(&self, record: FeedbackRecord) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.records.len() >= inner.capacity {
                inner.records.pop_front();
            }
            inner.records.push_back(record);
        }
    }

    /// Current number of retained records.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.records.len()).unwrap_or(0)
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.inner.lock().map(|i| i.capacity).unwrap_or(0)
    }

    /// The most recent `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<FeedbackRecord> {
        self.inner
            .lock()
            .map(|inner| {
                let skip = inner.records.len().saturating_sub(n);
                inner.records.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of every retained record, oldest first.
    pub fn all(&self) -> Vec<FeedbackRecord> {
        self.inner
            .lock()
            .map(|inner| inner.records.iter().cloned().collect())
            .unwrap_or_default()
    }
}
