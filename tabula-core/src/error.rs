//! Error types for the Tabula core library.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering the text-generation backend, dataset loading, the stage cache,
//! configuration, rendering, and the pipeline's fatal conditions.

use std::path::PathBuf;

/// Top-level error type for the Tabula core library.
#[derive(Debug, thiserror::Error)]
pub enum TabulaError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from text-generation backend interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from reading the input dataset.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Dataset file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to read dataset {path}: {message}")]
    Unreadable { path: PathBuf, message: String },

    #[error("Dataset has no header row")]
    MissingHeader,

    #[error("Malformed CSV at line {line}: {message}")]
    Malformed { line: usize, message: String },
}

/// Errors from the disk-backed stage cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Invalid cache key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Cache entry '{key}' is corrupt: {message}")]
    Corrupt { key: String, message: String },

    #[error("Cache IO error for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from report rendering.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Template error: {message}")]
    Template { message: String },

    #[error("Chart '{chart_id}' could not be materialized: {message}")]
    Chart { chart_id: String, message: String },

    #[error("Failed to write report to {path}: {message}")]
    Write { path: PathBuf, message: String },
}

/// The only conditions that abort a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Dataset unavailable: {0}")]
    DatasetUnavailable(#[source] DatasetError),

    #[error("Text-generation backend unreachable for breadth questions: {0}")]
    BackendUnreachable(#[source] LlmError),

    #[error("No cached '{stage}' stage to render from")]
    MissingStage { stage: String },
}

/// A type alias for results using the top-level `TabulaError`.
pub type Result<T> = std::result::Result<T, TabulaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_llm() {
        let err = TabulaError::Llm(LlmError::ApiRequest {
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "LLM error: API request failed: connection refused"
        );
    }

    #[test]
    fn test_error_display_dataset() {
        let err = TabulaError::Dataset(DatasetError::NotFound {
            path: PathBuf::from("/data/missing.csv"),
        });
        assert_eq!(
            err.to_string(),
            "Dataset error: Dataset file not found: /data/missing.csv"
        );
    }

    #[test]
    fn test_error_display_cache_key() {
        let err = CacheError::InvalidKey {
            key: "../etc".into(),
            reason: "illegal character '/'".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid cache key '../etc': illegal character '/'"
        );
    }

    #[test]
    fn test_pipeline_error_wraps_llm() {
        let err = PipelineError::BackendUnreachable(LlmError::Timeout { timeout_secs: 30 });
        assert_eq!(
            err.to_string(),
            "Text-generation backend unreachable for breadth questions: Request timed out after 30s"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TabulaError = io_err.into();
        assert!(matches!(err, TabulaError::Io(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: TabulaError = serde_err.into();
        assert!(matches!(err, TabulaError::Serialization(_)));
    }

    #[test]
    fn test_llm_error_variants() {
        let err = LlmError::RateLimited {
            retry_after_secs: 60,
        };
        assert_eq!(err.to_string(), "Rate limited by provider, retry after 60s");
    }
}
