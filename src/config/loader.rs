//! Configuration file loading and validation.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into an [`OrchestratorConfig`], and
//! run semantic validation before returning. This is the primary entry point
//! for loading configuration at startup.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - Validation collects *all* violations, not just the first
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message

use std::path::Path;
use thiserror::Error;

use super::OrchestratorConfig;

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{file}': {source}")]
    Io {
        /// The file path.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The TOML was malformed or had the wrong shape.
    #[error("failed to parse config '{file}': {source}")]
    Parse {
        /// The file path or source name.
        file: String,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic constraints were violated.
    #[error("config validation failed:\n{0}")]
    Validation(String),

    /// A single field holds an out-of-range value.
    #[error("invalid value for '{field}' ({value}): {reason}")]
    InvalidField {
        /// Dotted field path.
        field: String,
        /// The offending value, rendered.
        value: String,
        /// Why it is rejected.
        reason: String,
    },
}

/// Load an [`OrchestratorConfig`] from a TOML file.
///
/// # Errors
///
/// - [`ConfigError::Io`] if the file cannot be read.
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_file(path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;
    load_from_str(&content, &path.display().to_string())
}

/// Load an [`OrchestratorConfig`] from a TOML string.
///
/// Useful for testing or embedding configs without file I/O.
///
/// # Errors
///
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_str(content: &str, source_name: &str) -> Result<OrchestratorConfig, ConfigError> {
    let config: OrchestratorConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    let violations = validate(&config);
    if violations.is_empty() {
        Ok(config)
    } else {
        Err(ConfigError::Validation(
            violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n"),
        ))
    }
}

/// Check every semantic constraint, collecting all violations.
pub fn validate(config: &OrchestratorConfig) -> Vec<ConfigError> {
    let mut errors = Vec::new();

    if config.cache.enabled && config.cache.ttl_s == 0 {
        errors.push(ConfigError::InvalidField {
            field: "cache.ttl_s".into(),
            value: "0".into(),
            reason: "TTL must be positive when the cache is enabled".into(),
        });
    }
    if config.cache.enabled && config.cache.embedding_dim == 0 {
        errors.push(ConfigError::InvalidField {
            field: "cache.embedding_dim".into(),
            value: "0".into(),
            reason: "embedding dimension must be positive".into(),
        });
    }
    if config.cache.enabled && config.cache.quant_levels < 2 {
        errors.push(ConfigError::InvalidField {
            field: "cache.quant_levels".into(),
            value: config.cache.quant_levels.to_string(),
            reason: "quantization needs at least 2 levels".into(),
        });
    }
    if !config.weights.learning_rate.is_finite() || config.weights.learning_rate <= 0.0 {
        errors.push(ConfigError::InvalidField {
            field: "weights.learning_rate".into(),
            value: config.weights.learning_rate.to_string(),
            reason: "learning rate must be finite and positive".into(),
        });
    }
    if config.weights.epochs == 0 {
        errors.push(ConfigError::InvalidField {
            field: "weights.epochs".into(),
            value: "0".into(),
            reason: "at least one training epoch is required".into(),
        });
    }
    if config.weights.feedback_capacity < config.weights.min_samples {
        errors.push(ConfigError::InvalidField {
            field: "weights.feedback_capacity".into(),
            value: config.weights.feedback_capacity.to_string(),
            reason: format!(
                "capacity must be >= min_samples ({}) or the transition can never fire",
                config.weights.min_samples
            ),
        });
    }
    for (field, value) in [
        ("router.expert_threshold", config.router.expert_threshold),
        ("router.empathy_threshold", config.router.empathy_threshold),
    ] {
        if !(value > 0.5 && value <= 1.0) {
            errors.push(ConfigError::InvalidField {
                field: field.into(),
                value: value.to_string(),
                reason: "threshold must be in (0.5, 1.0]".into(),
            });
        }
    }
    if config.reload.snapshot_path.is_empty() {
        errors.push(ConfigError::InvalidField {
            field: "reload.snapshot_path".into(),
            value: "\"\"".into(),
            reason: "snapshot path must not be empty".into(),
        });
    }
    if config.reload.signal_path.is_empty() {
        errors.push(ConfigError::InvalidField {
            field: "reload.signal_path".into(),
            value: "\"\"".into(),
            reason: "signal path must not be empty".into(),
        });
    }
    if config.reload.snapshot_path == config.reload.signal_path {
        errors.push(ConfigError::InvalidField {
            field: "reload.signal_path".into(),
            value: config.reload.signal_path.clone(),
            reason: "signal path must differ from snapshot path".into(),
        });
    }
    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ConfigError::InvalidField {
            field: "observability.log_format".into(),
            value: config.observability.log_format.clone(),
            reason: "must be 'pretty' or 'json'".into(),
        });
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_TOML: &str = r#"
[orchestrator]
parallel_enabled = true
min_input_length = 20
agent = "support-bot"

[weights]
feedback_capacity = 1000
min_samples = 100
learning_rate = 0.05
epochs = 10

[cache]
enabled = true
ttl_s = 300

[reload]
snapshot_path = "engine.json"
signal_path = "engine.signal"

[router]
expert_threshold = 0.7
empathy_threshold = 0.7

[observability]
log_format = "pretty"
"#;

    #[test]
    fn test_load_from_str_valid_toml_succeeds() {
        let config = load_from_str(VALID_TOML, "test").expect("test: valid config");
        assert_eq!(config.orchestrator.agent, "support-bot");
    }

    #[test]
    fn test_load_from_str_invalid_toml_returns_parse_error() {
        let result = load_from_str("not valid toml [[[", "bad.toml");
        assert!(matches!(result.unwrap_err(), ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_from_str_source_name_appears_in_error() {
        let err = load_from_str("invalid [[[", "my-source.toml").unwrap_err();
        assert!(err.to_string().contains("my-source.toml"));
    }

    #[test]
    fn test_zero_ttl_with_cache_enabled_rejected() {
        let result = load_from_str("[cache]\nenabled = true\nttl_s = 0\n", "ttl.toml");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("cache.ttl_s"));
    }

    #[test]
    fn test_zero_ttl_with_cache_disabled_accepted() {
        let config = load_from_str("[cache]\nenabled = false\nttl_s = 0\n", "ttl.toml")
            .expect("test: disabled cache ignores ttl");
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_validation_collects_multiple_errors() {
        let toml_str = r#"
[weights]
learning_rate = -1.0
epochs = 0

[router]
expert_threshold = 0.2
"#;
        let err = load_from_str(toml_str, "multi.toml").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("weights.learning_rate"));
        assert!(msg.contains("weights.epochs"));
        assert!(msg.contains("router.expert_threshold"));
    }

    #[test]
    fn test_capacity_below_min_samples_rejected() {
        let toml_str = r#"
[weights]
feedback_capacity = 50
min_samples = 100
"#;
        let err = load_from_str(toml_str, "cap.toml").unwrap_err();
        assert!(err.to_string().contains("feedback_capacity"));
    }

    #[test]
    fn test_identical_snapshot_and_signal_paths_rejected() {
        let toml_str = r#"
[reload]
snapshot_path = "same.json"
signal_path = "same.json"
"#;
        let err = load_from_str(toml_str, "paths.toml").unwrap_err();
        assert!(err.to_string().contains("signal path must differ"));
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let err = load_from_str("[observability]\nlog_format = \"xml\"\n", "log.toml").unwrap_err();
        assert!(err.to_string().contains("log_format"));
    }

    #[test]
    fn test_load_from_file_valid_toml_succeeds() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, VALID_TOML).expect("test: write");

        let config = load_from_file(&path).expect("test: load");
        assert_eq!(config.weights.min_samples, 100);
    }

    #[test]
    fn test_load_from_file_missing_file_returns_io_error() {
        let result = load_from_file(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result.unwrap_err(), ConfigError::Io { .. }));
    }
}
