//! Declarative orchestrator configuration.
//!
//! ## Responsibility
//! Parse and validate TOML configuration for the pipeline, weight engine,
//! cache, and reload manager. Every field has either a required value or a
//! documented default, so a minimal file (or an empty one) yields a working
//! configuration.
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `OrchestratorConfig`
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Building the runtime pipeline from config (that belongs to `pipeline`)
//! - Applying engine reloads (that belongs to `reload`)

pub mod loader;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ── Default value functions ──────────────────────────────────────────────

/// Default agent name attached to output metadata.
fn default_agent() -> String {
    "adaptive-router".to_string()
}

/// Default parallel-mode state: enabled.
fn default_true() -> bool {
    true
}

/// Default minimum input length for parallel mode.
fn default_min_input_length() -> usize {
    20
}

/// Default feedback buffer capacity.
fn default_feedback_capacity() -> usize {
    1000
}

/// Default sample count that triggers the learned-mode transition.
fn default_min_samples() -> usize {
    100
}

/// Default training learning rate.
fn default_learning_rate() -> f64 {
    0.05
}

/// Default training epochs over the feedback buffer.
fn default_epochs() -> usize {
    10
}

/// Default cache entry TTL: 300 seconds (5 minutes).
fn default_ttl_s() -> u64 {
    300
}

/// Default embedding dimensionality for cache keys.
fn default_embedding_dim() -> usize {
    16
}

/// Default quantization levels per embedding dimension.
fn default_quant_levels() -> u8 {
    8
}

/// Default cache capacity.
fn default_max_entries() -> usize {
    10_000
}

/// Default engine snapshot path.
fn default_snapshot_path() -> String {
    "engine_state.json".to_string()
}

/// Default reload signal path.
fn default_signal_path() -> String {
    "engine_state.signal".to_string()
}

/// Default reload poll interval: 1000ms.
fn default_poll_interval_ms() -> u64 {
    1000
}

/// Default expert/empathy route threshold.
fn default_route_threshold() -> f64 {
    0.7
}

/// Default log format.
fn default_log_format() -> String {
    "pretty".to_string()
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for an orchestrator instance.
///
/// Deserialized from a TOML file and validated before use.
///
/// # Example
///
/// ```toml
/// [orchestrator]
/// parallel_enabled = true
/// min_input_length = 20
///
/// [weights]
/// min_samples = 100
///
/// [cache]
/// enabled = true
/// ttl_s = 300
/// ```
///
/// # Panics
///
/// This type never panics during construction or access.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct OrchestratorConfig {
    /// Pipeline-level settings.
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    /// Weight engine and training settings.
    #[serde(default)]
    pub weights: WeightsSection,
    /// Semantic cache settings.
    #[serde(default)]
    pub cache: CacheSection,
    /// Snapshot/signal reload settings.
    #[serde(default)]
    pub reload: ReloadSection,
    /// Route threshold settings.
    #[serde(default)]
    pub router: RouterSection,
    /// Observability: logging format.
    #[serde(default)]
    pub observability: ObservabilitySection,
}

/// Pipeline-level settings.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct OrchestratorSection {
    /// Whether emotion/prefetch may run concurrently with the main flow.
    #[serde(default = "default_true")]
    pub parallel_enabled: bool,
    /// Minimum input length (bytes) for parallel mode to engage.
    #[serde(default = "default_min_input_length")]
    pub min_input_length: usize,
    /// Agent name attached to output metadata.
    #[serde(default = "default_agent")]
    pub agent: String,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            parallel_enabled: default_true(),
            min_input_length: default_min_input_length(),
            agent: default_agent(),
        }
    }
}

/// Weight engine and training settings.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct WeightsSection {
    /// Feedback ring-buffer capacity.
    #[serde(default = "default_feedback_capacity")]
    pub feedback_capacity: usize,
    /// Sample count at which the one-shot learned-mode transition fires.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Training learning rate.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Training epochs over the feedback buffer.
    #[serde(default = "default_epochs")]
    pub epochs: usize,
}

impl Default for WeightsSection {
    fn default() -> Self {
        Self {
            feedback_capacity: default_feedback_capacity(),
            min_samples: default_min_samples(),
            learning_rate: default_learning_rate(),
            epochs: default_epochs(),
        }
    }
}

/// Semantic cache settings.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CacheSection {
    /// Whether weight caching is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Entry time-to-live in seconds.
    #[serde(default = "default_ttl_s")]
    pub ttl_s: u64,
    /// Embedding dimensionality for cache keys.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    /// Quantization levels per embedding dimension.
    #[serde(default = "default_quant_levels")]
    pub quant_levels: u8,
    /// Maximum number of cached entries.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            ttl_s: default_ttl_s(),
            embedding_dim: default_embedding_dim(),
            quant_levels: default_quant_levels(),
            max_entries: default_max_entries(),
        }
    }
}

/// Snapshot/signal reload settings.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ReloadSection {
    /// Engine snapshot file path.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    /// Reload signal file path.
    #[serde(default = "default_signal_path")]
    pub signal_path: String,
    /// Poll interval for pending reloads, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ReloadSection {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            signal_path: default_signal_path(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Route threshold settings.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RouterSection {
    /// Alpha threshold for the expert route.
    #[serde(default = "default_route_threshold")]
    pub expert_threshold: f64,
    /// Beta threshold for the empathy route.
    #[serde(default = "default_route_threshold")]
    pub empathy_threshold: f64,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            expert_threshold: default_route_threshold(),
            empathy_threshold: default_route_threshold(),
        }
    }
}

/// Observability settings.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ObservabilitySection {
    /// Log output format: `"pretty"` or `"json"`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
        }
    }
}

/// Export the configuration JSON Schema for IDE autocomplete and docs.
///
/// # Errors
///
/// Returns an error if schema serialization fails (practically unreachable).
///
/// # Panics
///
/// This function never panics.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(OrchestratorConfig);
    serde_json::to_string_pretty(&schema)
}
