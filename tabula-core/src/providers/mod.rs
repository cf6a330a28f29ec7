//! Text-generation backends and the shared retry policy.
//!
//! Use `create_generator()` to instantiate the backend named in config.

pub mod openai_compat;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::brain::TextGenerator;
use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;

pub use openai_compat::OpenAiCompatibleGenerator;

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `LlmError::RateLimited` (respects `retry_after_secs`),
/// `LlmError::Connection`, and `LlmError::Timeout`. Permanent errors (auth,
/// parse, HTTP status) return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut last_err = None;
    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !is_retryable(&e) || attempt == config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| LlmError::Connection {
        message: "All retry attempts exhausted".to_string(),
    }))
}

fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. } | LlmError::Connection { .. } | LlmError::Timeout { .. }
    )
}

/// Backoff for `attempt`, never shorter than a rate limiter's retry-after
/// unless that exceeds `max_backoff_ms`.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &LlmError) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    if let LlmError::RateLimited { retry_after_secs } = err {
        let requested = retry_after_secs
            .saturating_mul(1000)
            .min(config.max_backoff_ms);
        return requested.max(computed);
    }
    computed
}

fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // up to 25%
        let jitter = (capped as f64 * 0.25 * jitter_fraction()) as u64;
        capped + jitter
    } else {
        capped
    }
}

fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Build the generator named by `config.provider`.
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>, LlmError> {
    match config.provider.to_lowercase().as_str() {
        "openai" | "openai_compatible" | "openai-compatible" | "azure" | "vllm" | "lmstudio" => {
            Ok(Arc::new(OpenAiCompatibleGenerator::new(config)?))
        }
        "ollama" => {
            let local = LlmConfig {
                base_url: Some(
                    config
                        .base_url
                        .clone()
                        .unwrap_or_else(|| "http://localhost:11434/v1".to_string()),
                ),
                ..config.clone()
            };
            Ok(Arc::new(OpenAiCompatibleGenerator::new(&local)?))
        }
        other => Err(LlmError::ApiRequest {
            message: format!("Unsupported provider '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 10,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let config = RetryConfig {
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
            backoff_multiplier: 2.0,
            jitter: false,
            ..Default::default()
        };
        assert_eq!(compute_exponential_backoff(&config, 0), 1000);
        assert_eq!(compute_exponential_backoff(&config, 1), 2000);
        assert_eq!(compute_exponential_backoff(&config, 5), 5000);
    }

    #[test]
    fn test_rate_limit_respects_retry_after() {
        let config = RetryConfig {
            max_backoff_ms: 30_000,
            ..fast_retry(3)
        };
        let err = LlmError::RateLimited {
            retry_after_secs: 2,
        };
        assert_eq!(compute_backoff(&config, 0, &err), 2000);
    }

    #[test]
    fn test_rate_limit_retry_after_capped() {
        let config = RetryConfig {
            max_backoff_ms: 30_000,
            ..fast_retry(3)
        };
        let huge = LlmError::RateLimited {
            retry_after_secs: u64::MAX,
        };
        assert_eq!(compute_backoff(&config, 0, &huge), 30_000);
        let long = LlmError::RateLimited {
            retry_after_secs: 120,
        };
        assert_eq!(compute_backoff(&config, 0, &long), 30_000);
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_first_try() {
        let result = with_retry(&fast_retry(2), || async { Ok::<_, LlmError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_max() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_retry(&fast_retry(2), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(LlmError::Timeout { timeout_secs: 1 })
            }
        })
        .await;
        assert!(matches!(result, Err(LlmError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_permanent_error_no_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_retry(&fast_retry(3), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(LlmError::AuthFailed {
                    provider: "test".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_create_generator_unknown_provider() {
        let config = LlmConfig {
            provider: "carrier-pigeon".into(),
            ..Default::default()
        };
        assert!(matches!(
            create_generator(&config),
            Err(LlmError::ApiRequest { .. })
        ));
    }

    #[test]
    fn test_create_generator_ollama_needs_no_key() {
        let config = LlmConfig {
            provider: "ollama".into(),
            model: "qwen2.5:14b".into(),
            api_key_env: "TABULA_TEST_UNSET_KEY_VAR".into(),
            ..Default::default()
        };
        let generator = create_generator(&config).unwrap();
        assert_eq!(generator.model_name(), "qwen2.5:14b");
    }
}
