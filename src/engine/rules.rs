//! Rules-mode weight computation.
//!
//! A fixed decision table maps classifier scores to base weights, then the
//! most recent feedback shifts weights away from a branch that is failing.

use serde::{Deserialize, Serialize};

use crate::feedback::{branch_success_rate, FeedbackStore};
use crate::{ScoreVector, WeightPair};

/// Tunables for rules-mode adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesConfig {
    /// How many recent records the adjustment inspects.
    #[serde(default = "default_adjustment_window")]
    pub adjustment_window: usize,
    /// Minimum buffer size before any adjustment applies.
    #[serde(default = "default_min_feedback")]
    pub min_feedback: usize,
    /// How far a failing branch's dominant weight shifts per computation.
    #[serde(default = "default_adjustment_step")]
    pub adjustment_step: f64,
    /// Upper bound on the dominant weight after a downward shift.
    #[serde(default = "default_dominant_cap")]
    pub dominant_cap: f64,
}

fn default_adjustment_window() -> usize {
    10
}

fn default_min_feedback() -> usize {
    10
}

fn default_adjustment_step() -> f64 {
    0.1
}

fn default_dominant_cap() -> f64 {
    0.8
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            adjustment_window: default_adjustment_window(),
            min_feedback: default_min_feedback(),
            adjustment_step: default_adjustment_step(),
            dominant_cap: default_dominant_cap(),
        }
    }
}

/// The fixed decision table. First matching row wins.
pub fn base_weights(scores: &ScoreVector) -> WeightPair {
    let (hard, soft) = (scores.hard, scores.soft);
    if hard > 0.8 && soft < 0.3 {
        WeightPair::new(0.95, 0.05)
    } else if soft > 0.7 && hard < 0.4 {
        WeightPair::new(0.2, 0.8)
    } else if hard > 0.6 && soft < 0.5 {
        WeightPair::new(0.85, 0.15)
    } else if hard > 0.4 && hard < 0.7 && soft > 0.4 && soft < 0.7 {
        WeightPair::balanced()
    } else {
        WeightPair::fallback()
    }
}

/// Apply feedback-driven adjustment to `base` weights.
///
/// Inspects the most recent window of records. If the technical branch
/// (records with `alpha > 0.7`) is succeeding less than half the time and
/// the current weights lean technical, the alpha weight shifts one step
/// toward empathy, capped at `dominant_cap`; the empathetic branch is
/// handled symmetrically. The result is always re-normalized.
pub fn apply_feedback(base: WeightPair, feedback: &FeedbackStore, config: &RulesConfig) -> WeightPair {
    if feedback.len() < config.min_feedback {
        return base;
    }
    let recent = feedback.recent(config.adjustment_window);

    if base.alpha > 0.7 {
        if let Some(rate) = branch_success_rate(&recent, |r| r.weights.alpha > 0.7) {
            if rate < 0.5 {
                let alpha = (base.alpha - config.adjustment_step).clamp(0.0, config.dominant_cap);
                return WeightPair::new(alpha, 1.0 - alpha);
            }
        }
    } else if base.beta > 0.7 {
        if let Some(rate) = branch_success_rate(&recent, |r| r.weights.beta > 0.7) {
            if rate < 0.5 {
                let beta = (base.beta - config.adjustment_step).clamp(0.0, config.dominant_cap);
                return WeightPair::new(1.0 - beta, beta);
            }
        }
    }
    base
}

/// Compute rules-mode weights: decision table, then feedback adjustment.
pub fn compute(scores: &ScoreVector, feedback: &FeedbackStore, config: &RulesConfig) -> WeightPair {
    apply_feedback(base_weights(scores), feedback, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::FeedbackRecord;

    #[test]
    fn test_table_strong_technical() {
        let w = base_weights(&ScoreVector::new(0.9, 0.1, 0.0));
        assert!((w.alpha - 0.95).abs() < 1e-12);
        assert!((w.beta - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_table_strong_emotional() {
        let w = base_weights(&ScoreVector::new(0.1, 0.85, 0.0));
        assert!((w.alpha - 0.2).abs() < 1e-12);
        assert!((w.beta - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_table_moderate_technical() {
        let w = base_weights(&ScoreVector::new(0.65, 0.3, 0.0));
        assert!((w.alpha - 0.85).abs() < 1e-12);
    }

    #[test]
    fn test_table_mixed_midrange_is_balanced() {
        let w = base_weights(&ScoreVector::new(0.55, 0.55, 0.0));
        assert_eq!(w, WeightPair::balanced());
    }

    #[test]
    fn test_table_no_match_falls_back() {
        let w = base_weights(&ScoreVector::new(0.2, 0.2, 0.0));
        assert_eq!(w, WeightPair::fallback());
    }

    #[test]
    fn test_table_boundary_values_not_strict_matches() {
        // hard == 0.8 does not satisfy hard > 0.8
        let w = base_weights(&ScoreVector::new(0.8, 0.2, 0.0));
        assert!((w.alpha - 0.85).abs() < 1e-12, "falls to the third row");
    }

    fn failing_technical_feedback(n: usize) -> FeedbackStore {
        let store = FeedbackStore::new(100);
        for _ in 0..n {
            store.push(FeedbackRecord::now(
                ScoreVector::new(0.9, 0.1, 0.0),
                WeightPair::new(0.95, 0.05),
                false,
            ));
        }
        store
    }

    #[test]
    fn test_adjustment_requires_min_feedback() {
        let store = failing_technical_feedback(9);
        let base = WeightPair::new(0.95, 0.05);
        let adjusted = apply_feedback(base, &store, &RulesConfig::default());
        assert_eq!(adjusted, base, "below min_feedback nothing changes");
    }

    #[test]
    fn test_adjustment_shifts_failing_technical_branch_toward_empathy() {
        let store = failing_technical_feedback(10);
        let base = WeightPair::new(0.95, 0.05);
        let adjusted = apply_feedback(base, &store, &RulesConfig::default());
        assert!(adjusted.beta > base.beta, "beta must strictly increase");
        assert!(adjusted.alpha <= 0.8, "dominant weight capped at 0.8");
        assert!(adjusted.is_normalized());
    }

    #[test]
    fn test_adjustment_ignores_successful_branch() {
        let store = FeedbackStore::new(100);
        for _ in 0..10 {
            store.push(FeedbackRecord::now(
                ScoreVector::new(0.9, 0.1, 0.0),
                WeightPair::new(0.95, 0.05),
                true,
            ));
        }
        let base = WeightPair::new(0.95, 0.05);
        assert_eq!(apply_feedback(base, &store, &RulesConfig::default()), base);
    }

    #[test]
    fn test_adjustment_shifts_failing_empathy_branch() {
        let store = FeedbackStore::new(100);
        for _ in 0..10 {
            store.push(FeedbackRecord::now(
                ScoreVector::new(0.1, 0.9, 0.0),
                WeightPair::new(0.2, 0.8),
                false,
            ));
        }
        let base = WeightPair::new(0.2, 0.8);
        let adjusted = apply_feedback(base, &store, &RulesConfig::default());
        assert!(adjusted.alpha > base.alpha);
        assert!(adjusted.is_normalized());
    }

    #[test]
    fn test_adjustment_uses_only_recent_window() {
        let store = FeedbackStore::new(100);
        // Old failures followed by a recent window of pure successes.
        for _ in 0..10 {
            store.push(FeedbackRecord::now(
                ScoreVector::new(0.9, 0.1, 0.0),
                WeightPair::new(0.95, 0.05),
                false,
            ));
        }
        for _ in 0..10 {
            store.push(FeedbackRecord::now(
                ScoreVector::new(0.9, 0.1, 0.0),
                WeightPair::new(0.95, 0.05),
                true,
            ));
        }
        let base = WeightPair::new(0.95, 0.05);
        assert_eq!(apply_feedback(base, &store, &RulesConfig::default()), base);
    }

    #[test]
    fn test_adjustment_no_branch_records_leaves_base() {
        let store = FeedbackStore::new(100);
        for _ in 0..10 {
            store.push(FeedbackRecord::now(
                ScoreVector::new(0.5, 0.5, 0.0),
                WeightPair::balanced(),
                false,
            ));
        }
        let base = WeightPair::new(0.95, 0.05);
        assert_eq!(apply_feedback(base, &store, &RulesConfig::default()), base);
    }
}
