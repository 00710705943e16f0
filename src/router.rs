//! Weight-to-route mapping.
//!
//! Pure and deterministic: the same weight pair always yields the same
//! route. A custom [`RoutePolicy`] adapter may override the threshold
//! mapping; if it fails, the default mapping applies.

use std::sync::Arc;
use tracing::warn;

use crate::adapters::RoutePolicy;
use crate::{ScoreVector, WeightPair};

/// Route for strongly technical requests.
pub const ROUTE_EXPERT: &str = "expert";
/// Route for strongly emotional requests.
pub const ROUTE_EMPATHY: &str = "empathy";
/// Route for everything in between.
pub const ROUTE_BALANCED: &str = "balanced";

/// Default alpha threshold for the expert route.
pub const DEFAULT_EXPERT_THRESHOLD: f64 = 0.7;
/// Default beta threshold for the empathy route.
pub const DEFAULT_EMPATHY_THRESHOLD: f64 = 0.7;

/// The built-in threshold mapping with default thresholds.
pub fn default_route(weights: &WeightPair) -> &'static str {
    route_with_thresholds(weights, DEFAULT_EXPERT_THRESHOLD, DEFAULT_EMPATHY_THRESHOLD)
}

fn route_with_thresholds(weights: &WeightPair, expert: f64, empathy: f64) -> &'static str {
    if weights.alpha >= expert {
        ROUTE_EXPERT
    } else if weights.beta >= empathy {
        ROUTE_EMPATHY
    } else {
        ROUTE_BALANCED
    }
}

/// Maps a weight pair to a named route, with optional policy override.
#[derive(Clone)]
pub struct Router {
    policy: Option<Arc<dyn RoutePolicy>>,
    expert_threshold: f64,
    empathy_threshold: f64,
}

impl Router {
    /// A router using the built-in threshold mapping.
    pub fn new() -> Self {
        Self {
            policy: None,
            expert_threshold: DEFAULT_EXPERT_THRESHOLD,
            empathy_threshold: DEFAULT_EMPATHY_THRESHOLD,
        }
    }

    /// Override the default thresholds.
    pub fn with_thresholds(mut self, expert: f64, empathy: f64) -> Self {
        self.expert_threshold = expert;
        self.empathy_threshold = empathy;
        self
    }

    /// Install a custom routing policy.
    pub fn with_policy(mut self, policy: Arc<dyn RoutePolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Choose a route for the request.
    ///
    /// A failing custom policy falls back to the threshold mapping; the
    /// failure is logged, never surfaced.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn route(&self, scores: &ScoreVector, weights: &WeightPair) -> String {
        if let Some(policy) = &self.policy {
            match policy.route(scores, weights) {
                Ok(route) => return route,
                Err(e) => {
                    warn!(error = %e, "custom route policy failed, using default");
                }
            }
        }
        route_with_thresholds(weights, self.expert_threshold, self.empathy_threshold).to_string()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
