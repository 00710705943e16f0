//! Prometheus metrics and the per-request metrics record.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup **before** serving requests.
//! The helper functions (`record_stage_latency`, `inc_request`, …) are no-ops
//! if `init_metrics` was never called, so the pipeline is always safe to run —
//! observability simply degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `router_requests_total` | Counter | `stage` |
//! | `router_errors_total` | Counter | `stage`, `err_type` |
//! | `router_stage_duration_seconds` | Histogram | `stage` |
//! | `router_routes_total` | Counter | `route` |
//! | `router_cache_lookups_total` | Counter | `outcome` |
//! | `router_reloads_total` | Counter | `outcome` |

use crate::OrchestratorError;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the router, bundled together so they can be
/// stored in a single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Total requests processed per stage.
    pub requests_total: CounterVec,
    /// Errors by stage and error type.
    pub errors_total: CounterVec,
    /// Stage processing latency histogram.
    pub stage_duration: HistogramVec,
    /// Routing decisions by route name.
    pub routes_total: CounterVec,
    /// Semantic-cache lookups by outcome (`hit`/`miss`).
    pub cache_lookups: CounterVec,
    /// Engine reloads by outcome (`ok`/`error`).
    pub reloads_total: CounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn register_counter(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<CounterVec, OrchestratorError> {
    let counter = CounterVec::new(Opts::new(name, help), labels)
        .map_err(|e| OrchestratorError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| OrchestratorError::Other(format!("metrics registration failed: {e}")))?;
    Ok(counter)
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all Prometheus metrics and register them with a private registry.
///
/// Must be called once at process startup before the pipeline serves traffic.
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if metric construction or registry
/// registration fails (e.g., duplicate descriptor names).
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), OrchestratorError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let requests_total = register_counter(
        &registry,
        "router_requests_total",
        "Total requests processed",
        &["stage"],
    )?;
    let errors_total = register_counter(
        &registry,
        "router_errors_total",
        "Errors by stage and type",
        &["stage", "err_type"],
    )?;
    let routes_total = register_counter(
        &registry,
        "router_routes_total",
        "Routing decisions by route",
        &["route"],
    )?;
    let cache_lookups = register_counter(
        &registry,
        "router_cache_lookups_total",
        "Semantic cache lookups by outcome",
        &["outcome"],
    )?;
    let reloads_total = register_counter(
        &registry,
        "router_reloads_total",
        "Engine reloads by outcome",
        &["outcome"],
    )?;

    let stage_duration = HistogramVec::new(
        HistogramOpts::new(
            "router_stage_duration_seconds",
            "Processing duration per stage",
        ),
        &["stage"],
    )
    .map_err(|e| OrchestratorError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(stage_duration.clone()))
        .map_err(|e| OrchestratorError::Other(format!("metrics registration failed: {e}")))?;

    let _ = METRICS.set(Metrics {
        registry,
        requests_total,
        errors_total,
        stage_duration,
        routes_total,
        cache_lookups,
        reloads_total,
    });
    Ok(())
}

// ── Recording helpers (no-op before init) ──────────────────────────────────

/// Increment the request counter for a stage.
pub fn inc_request(stage: &str) {
    if let Some(m) = METRICS.get() {
        m.requests_total.with_label_values(&[stage]).inc();
    }
}

/// Increment the error counter for a stage and error type.
pub fn inc_error(stage: &str, err_type: &str) {
    if let Some(m) = METRICS.get() {
        m.errors_total.with_label_values(&[stage, err_type]).inc();
    }
}

/// Record processing latency for a stage.
pub fn record_stage_latency(stage: &str, duration: Duration) {
    if let Some(m) = METRICS.get() {
        m.stage_duration
            .with_label_values(&[stage])
            .observe(duration.as_secs_f64());
    }
}

/// Count a routing decision.
pub fn inc_route(route: &str) {
    if let Some(m) = METRICS.get() {
        m.routes_total.with_label_values(&[route]).inc();
    }
}

/// Count a cache lookup outcome (`"hit"` or `"miss"`).
pub fn inc_cache_lookup(outcome: &str) {
    if let Some(m) = METRICS.get() {
        m.cache_lookups.with_label_values(&[outcome]).inc();
    }
}

/// Count an engine reload outcome (`"ok"` or `"error"`).
pub fn inc_reload(outcome: &str) {
    if let Some(m) = METRICS.get() {
        m.reloads_total.with_label_values(&[outcome]).inc();
    }
}

/// Render all registered metrics in Prometheus text exposition format.
///
/// Returns an empty string if [`init_metrics`] was never called.
///
/// # Panics
///
/// This function never panics.
pub fn gather() -> String {
    let Some(m) = METRICS.get() else {
        return String::new();
    };
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&m.registry.gather(), &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

// ── Per-request metrics record ─────────────────────────────────────────────

/// One stage failure noted in the per-request record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    /// Stage name (e.g. `"classification"`, `"generation"`).
    pub stage: String,
    /// Failure description.
    pub message: String,
}

/// Per-request timing and outcome record, embedded in the pipeline output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    /// Classification stage latency.
    pub classify_ms: u64,
    /// Weight computation latency.
    pub weights_ms: u64,
    /// Emotion detection latency, when the stage ran.
    pub emotion_ms: Option<u64>,
    /// Prefetch latency, when the stage ran.
    pub prefetch_ms: Option<u64>,
    /// Routing latency.
    pub route_ms: u64,
    /// Generation latency.
    pub generate_ms: u64,
    /// End-to-end latency.
    pub total_ms: u64,
    /// The route the request took.
    pub route: String,
    /// Number of streamed response chunks.
    pub stream_chunks: usize,
    /// Whether the request ran in parallel mode.
    pub parallel: bool,
    /// Stage failures absorbed during processing.
    pub errors: Vec<StageError>,
}
