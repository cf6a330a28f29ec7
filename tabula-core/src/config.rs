//! Configuration system for Tabula.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! project config file -> environment -> CLI overrides. The user file lives at
//! `~/.config/tabula/config.toml`; the project file is `./tabula.toml` unless
//! an explicit path is given.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Top-level configuration for a Tabula run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TabulaConfig {
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub research: ResearchConfig,
    pub cache: CacheConfig,
    pub output: OutputConfig,
    pub curation: CurationConfig,
}

/// Text-generation backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name. Only OpenAI-compatible endpoints are built in.
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o-mini", "qwen2.5:14b").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 4096,
            temperature: 0.0,
        }
    }
}

/// Retry policy for transient backend failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retries after the first attempt.
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound for a single backoff.
    pub max_backoff_ms: u64,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
    /// Add up to 25% jitter to each backoff.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Shape and limits of the research tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Number of top-level (level 0) questions.
    pub breadth: usize,
    /// Number of follow-up questions generated per top-level question.
    pub depth: usize,
    /// Maximum concurrent units of work (depth batches or research pipelines).
    pub max_workers: usize,
    /// Timeout applied to every backend call.
    pub call_timeout_secs: u64,
    /// Computed results above this many records make a question unanswerable.
    pub max_records: usize,
    /// Distinct real values sampled per source column for transform prompts.
    pub sample_values: usize,
    /// Top-K frequencies kept per column in the dataset profile.
    pub profile_top_k: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            breadth: 4,
            depth: 3,
            max_workers: 8,
            call_timeout_secs: 120,
            max_records: 10_000,
            sample_values: 5,
            profile_top_k: 10,
        }
    }
}

/// Stage cache location and switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether stage outputs are read from and written to disk.
    pub enabled: bool,
    /// Directory holding one JSON file per stage.
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".tabula/cache"),
        }
    }
}

/// Output document settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Path of the generated HTML report.
    pub path: PathBuf,
    /// Script URLs referenced by the page for client-side chart rendering.
    pub chart_scripts: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("output.html"),
            chart_scripts: vec![
                "https://cdn.jsdelivr.net/npm/vega@5".to_string(),
                "https://cdn.jsdelivr.net/npm/vega-lite@5".to_string(),
                "https://cdn.jsdelivr.net/npm/vega-embed@6".to_string(),
            ],
        }
    }
}

/// How the curated results are put in reading order.
///
/// Exactly one strategy is used per run; there is no cross-strategy fallback.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArrangementStrategy {
    /// Group by category, longest title first within a category.
    #[default]
    CategoryTitleLength,
    /// Ask the backend for a permutation of result indices.
    Delegated,
}

impl std::str::FromStr for ArrangementStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "category_title_length" | "local" | "sort" => Ok(Self::CategoryTitleLength),
            "delegated" | "llm" => Ok(Self::Delegated),
            other => Err(ConfigError::Invalid {
                message: format!("unknown arrangement strategy '{other}'"),
            }),
        }
    }
}

/// Result curation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurationConfig {
    pub arrangement: ArrangementStrategy,
}

/// Sparse overrides applied on top of every other configuration layer.
///
/// Unset fields are skipped during serialization so they never mask values
/// from files or the environment.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    pub research: ResearchOverrides,
    pub cache: CacheOverrides,
    pub output: OutputOverrides,
    pub curation: CurationOverrides,
    pub llm: LlmOverrides,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResearchOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breadth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CurationOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrangement: Option<ArrangementStrategy>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LlmOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl TabulaConfig {
    /// Reject configurations the pipeline cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.research.breadth == 0 {
            return Err(ConfigError::Invalid {
                message: "research.breadth must be at least 1".to_string(),
            });
        }
        if self.research.max_workers == 0 {
            return Err(ConfigError::Invalid {
                message: "research.max_workers must be at least 1".to_string(),
            });
        }
        if self.research.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "research.call_timeout_secs must be at least 1".to_string(),
            });
        }
        if self.research.max_records == 0 {
            return Err(ConfigError::Invalid {
                message: "research.max_records must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Load configuration with layered merging.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `TABULA_`, `__` for nesting)
/// 3. Project config (`config_file`, or `./tabula.toml` when present)
/// 4. User config (`~/.config/tabula/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    config_file: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<TabulaConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(TabulaConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "tabula", "tabula") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    match config_file {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            let local = Path::new("tabula.toml");
            if local.exists() {
                figment = figment.merge(Toml::file(local));
            }
        }
    }

    // TABULA_RESEARCH__BREADTH, TABULA_LLM__MODEL, etc.
    figment = figment.merge(Env::prefixed("TABULA_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: TabulaConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_research_config_defaults() {
        let config = ResearchConfig::default();
        assert_eq!(config.breadth, 4);
        assert_eq!(config.depth, 3);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.max_records, 10_000);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(TabulaConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_breadth_rejected() {
        let mut config = TabulaConfig::default();
        config.research.breadth = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_arrangement_from_str() {
        assert_eq!(
            "delegated".parse::<ArrangementStrategy>().unwrap(),
            ArrangementStrategy::Delegated
        );
        assert_eq!(
            "category-title-length".parse::<ArrangementStrategy>().unwrap(),
            ArrangementStrategy::CategoryTitleLength
        );
        assert!("random".parse::<ArrangementStrategy>().is_err());
    }

    #[test]
    fn test_load_config_from_file_with_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [research]
            breadth = 2
            depth = 1

            [curation]
            arrangement = "delegated"
            "#
        )
        .unwrap();

        let overrides = ConfigOverrides {
            research: ResearchOverrides {
                depth: Some(5),
                ..Default::default()
            },
            ..Default::default()
        };

        let config = load_config(Some(file.path()), Some(&overrides)).unwrap();
        assert_eq!(config.research.breadth, 2);
        assert_eq!(config.research.depth, 5);
        assert_eq!(config.research.max_workers, 8);
        assert_eq!(config.curation.arrangement, ArrangementStrategy::Delegated);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config(Some(Path::new("/nonexistent/tabula.toml")), None);
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = TabulaConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: TabulaConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.research.breadth, config.research.breadth);
        assert_eq!(back.output.path, config.output.path);
    }
}
