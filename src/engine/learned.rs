//! Learned-mode weight computation.
//!
//! A small linear layer over five request features, squashed through a
//! two-way softmax. The two class probabilities are used directly as the
//! `(alpha, beta)` weight pair. Training is a policy-gradient pass over the
//! feedback buffer: outcomes reinforce or suppress the probability of the
//! branch that was actually used.

use serde::{Deserialize, Serialize};

use crate::feedback::{branch_success_rate, FeedbackRecord};
use crate::{ScoreVector, WeightPair};

/// Number of input features to the linear layer.
pub const FEATURE_COUNT: usize = 5;

/// Default number of training epochs over the feedback buffer.
pub const DEFAULT_EPOCHS: usize = 10;

/// Default learning rate.
pub const DEFAULT_LEARNING_RATE: f64 = 0.05;

/// Window of preceding records used to compute rolling success features.
const ROLLING_WINDOW: usize = 10;

/// Serializable parameters of the linear-softmax model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedParams {
    /// One weight row per output class (technical, empathetic).
    pub weights: [[f64; FEATURE_COUNT]; 2],
    /// Per-class bias.
    pub bias: [f64; 2],
}

impl Default for LearnedParams {
    fn default() -> Self {
        Self {
            // Start at the identity-ish prior: hard pushes technical,
            // soft pushes empathetic, everything else neutral.
            weights: [[1.0, -1.0, 0.5, -0.5, 0.2], [-1.0, 1.0, -0.5, 0.5, -0.2]],
            bias: [0.0, 0.0],
        }
    }
}

/// Rolling success rates over the `window` records preceding index `upto`.
///
/// Returns `(hard_rate, soft_rate)`; a branch with no observations in the
/// window defaults to `0.5`.
fn rolling_success(records: &[FeedbackRecord], upto: usize, window: usize) -> (f64, f64) {
    let start = upto.saturating_sub(window);
    let slice = &records[start..upto];

    (
        branch_success_rate(slice, |r| r.weights.alpha > 0.7).unwrap_or(0.5),
        branch_success_rate(slice, |r| r.weights.beta > 0.7).unwrap_or(0.5),
    )
}

/// Build the five-component feature vector for a score vector plus rolling
/// success context.
pub fn features(scores: &ScoreVector, hard_success: f64, soft_success: f64) -> [f64; FEATURE_COUNT] {
    let urgency = if scores.web_query > 0.5 { 1.0 } else { 0.0 };
    [scores.hard, scores.soft, hard_success, soft_success, urgency]
}

fn softmax2(logits: [f64; 2]) -> [f64; 2] {
    let max = logits[0].max(logits[1]);
    let e0 = (logits[0] - max).exp();
    let e1 = (logits[1] - max).exp();
    let sum = e0 + e1;
    [e0 / sum, e1 / sum]
}

impl LearnedParams {
    fn logits(&self, x: &[f64; FEATURE_COUNT]) -> [f64; 2] {
        let mut logits = self.bias;
        for (class, row) in self.weights.iter().enumerate() {
            for (w, xi) in row.iter().zip(x.iter()) {
                logits[class] += w * xi;
            }
        }
        logits
    }

    /// Predict class probabilities for a feature vector.
    pub fn predict(&self, x: &[f64; FEATURE_COUNT]) -> [f64; 2] {
        softmax2(self.logits(x))
    }

    /// Predict a normalized weight pair for `scores` given rolling success
    /// context.
    pub fn predict_weights(
        &self,
        scores: &ScoreVector,
        hard_success: f64,
        soft_success: f64,
    ) -> WeightPair {
        let p = self.predict(&features(scores, hard_success, soft_success));
        WeightPair::new(p[0], p[1])
    }
}

/// Train a model from scratch on the full feedback buffer.
///
/// Each record contributes the loss `-outcome * ln(P(branch_used))`, where
/// `branch_used` is the technical class when the recorded `alpha >= 0.5` and
/// the empathetic class otherwise, and `outcome` is `+1` for success, `-1`
/// for failure. Rolling success features are computed from each record's
/// preceding window, mirroring what the engine will observe at inference.
pub fn train(records: &[FeedbackRecord], learning_rate: f64, epochs: usize) -> LearnedParams {
    let mut params = LearnedParams::default();
    if records.is_empty() {
        return params;
    }
    let lr = if learning_rate.is_finite() && learning_rate > 0.0 {
        learning_rate
    } else {
        DEFAULT_LEARNING_RATE
    };

    for _epoch in 0..epochs.max(1) {
        for (i, record) in records.iter().enumerate() {
            let (hard_rate, soft_rate) = rolling_success(records, i, ROLLING_WINDOW);
            let x = features(&record.scores, hard_rate, soft_rate);
            let p = params.predict(&x);

            let branch_used = usize::from(record.weights.alpha < 0.5);
            let outcome = if record.outcome_success { 1.0 } else { -1.0 };

            // dL/dlogit_j = -outcome * (1{j == branch_used} - p_j)
            for class in 0..2 {
                let indicator = if class == branch_used { 1.0 } else { 0.0 };
                let grad_logit = -outcome * (indicator - p[class]);
                for (w, xi) in params.weights[class].iter_mut().zip(x.iter()) {
                    *w -= lr * grad_logit * xi;
                }
                params.bias[class] -= lr * grad_logit;
            }
        }
    }
    params
}
