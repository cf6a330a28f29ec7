//! Brain module — text-generation abstraction and prompt invocation.
//!
//! Defines the `TextGenerator` trait the pipeline depends on, a scriptable
//! `MockTextGenerator` for tests and offline runs, and the `PromptAdapter`
//! that fills templates, bounds every call with a timeout and retries
//! transient failures.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::RetryConfig;
use crate::error::LlmError;
use crate::extract::extract_json;
use crate::providers::with_retry;

/// A backend that turns a system/user prompt pair into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// Replace each placeholder with its value.
///
/// Plain substring replacement: placeholders absent from `vars` stay verbatim,
/// and values are inserted as-is.
pub fn fill_template(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter()
        .fold(template.to_string(), |acc, (placeholder, value)| {
            acc.replace(placeholder, value)
        })
}

/// Fills prompt templates and calls the generator with timeout and retry.
#[derive(Clone)]
pub struct PromptAdapter {
    generator: Arc<dyn TextGenerator>,
    retry: RetryConfig,
    call_timeout: Duration,
}

impl PromptAdapter {
    pub fn new(generator: Arc<dyn TextGenerator>, retry: RetryConfig, call_timeout: Duration) -> Self {
        Self {
            generator,
            retry,
            call_timeout,
        }
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    /// Fill `template` and make one bounded, retried backend call.
    pub async fn invoke(
        &self,
        system: &str,
        template: &str,
        vars: &[(&str, &str)],
    ) -> Result<String, LlmError> {
        let filled = fill_template(template, vars);
        let user = filled.as_str();
        let generator = &self.generator;
        let call_timeout = self.call_timeout;
        let timeout_secs = call_timeout.as_secs();
        debug!(prompt_len = user.len(), model = self.model_name(), "Invoking text generator");

        with_retry(&self.retry, || async move {
            match tokio::time::timeout(call_timeout, generator.complete(system, user)).await {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout { timeout_secs }),
            }
        })
        .await
    }

    /// `invoke` followed by `extract_json`. Malformed text yields the sentinel.
    pub async fn invoke_json(
        &self,
        system: &str,
        template: &str,
        vars: &[(&str, &str)],
    ) -> Result<Value, LlmError> {
        let text = self.invoke(system, template, vars).await?;
        Ok(extract_json(&text))
    }
}

/// A scripted reply used by `MockTextGenerator` rules.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    ConnectionFailure(String),
    /// Sleep this long before answering, then reply with the text.
    Delayed(Duration, String),
}

struct MockRule {
    needle: String,
    reply: MockReply,
}

#[derive(Default)]
struct MockState {
    rules: Vec<MockRule>,
    queue: VecDeque<Result<String, LlmError>>,
    calls: Vec<(String, String)>,
}

/// A mock generator for testing.
///
/// Replies are chosen in this order: the first rule whose needle occurs in the
/// user prompt, then the next queued response, then the default reply.
pub struct MockTextGenerator {
    model: String,
    default_reply: MockReply,
    state: Mutex<MockState>,
}

impl MockTextGenerator {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            default_reply: MockReply::Text("I'm a mock generator. No scripted reply available.".to_string()),
            state: Mutex::new(MockState::default()),
        }
    }

    /// A generator that answers every call with `text`.
    pub fn with_response(text: &str) -> Self {
        Self {
            default_reply: MockReply::Text(text.to_string()),
            ..Self::new()
        }
    }

    /// A generator whose every call fails to connect.
    pub fn unreachable() -> Self {
        Self {
            default_reply: MockReply::ConnectionFailure("connection refused".to_string()),
            ..Self::new()
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a response to be returned by the next unmatched call.
    pub fn queue_response(&self, text: &str) {
        self.state().queue.push_back(Ok(text.to_string()));
    }

    /// Queue an error to be returned by the next unmatched call.
    pub fn queue_error(&self, error: LlmError) {
        self.state().queue.push_back(Err(error));
    }

    /// Answer every call whose user prompt contains `needle`.
    pub fn respond_when(&self, needle: &str, reply: MockReply) -> &Self {
        self.state().rules.push(MockRule {
            needle: needle.to_string(),
            reply,
        });
        self
    }

    /// Every (system, user) pair received so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    fn choose(&self, system: &str, user: &str) -> Result<MockReply, LlmError> {
        let mut state = self.state();
        state.calls.push((system.to_string(), user.to_string()));
        if let Some(rule) = state.rules.iter().find(|r| user.contains(&r.needle)) {
            return Ok(rule.reply.clone());
        }
        match state.queue.pop_front() {
            Some(Ok(text)) => Ok(MockReply::Text(text)),
            Some(Err(e)) => Err(e),
            None => Ok(self.default_reply.clone()),
        }
    }
}

impl Default for MockTextGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for MockTextGenerator {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        match self.choose(system, user)? {
            MockReply::Text(text) => Ok(text),
            MockReply::ConnectionFailure(message) => Err(LlmError::Connection { message }),
            MockReply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_fill_template_leaves_unknown_placeholders() {
        let out = fill_template(
            "Q: {question} / cols: {columns} / {missing}",
            &[("{question}", "Why?"), ("{columns}", "a, b")],
        );
        assert_eq!(out, "Q: Why? / cols: a, b / {missing}");
    }

    #[tokio::test]
    async fn test_invoke_fills_and_calls() {
        let mock = Arc::new(MockTextGenerator::with_response("ok"));
        let adapter = PromptAdapter::new(mock.clone(), no_retry(), Duration::from_secs(5));
        let text = adapter
            .invoke("sys", "Hello {name}", &[("{name}", "world")])
            .await
            .unwrap();
        assert_eq!(text, "ok");
        assert_eq!(mock.calls(), vec![("sys".to_string(), "Hello world".to_string())]);
    }

    #[tokio::test]
    async fn test_invoke_timeout_becomes_error() {
        let mock = MockTextGenerator::new();
        mock.respond_when("slow", MockReply::Delayed(Duration::from_secs(5), "late".into()));
        let adapter = PromptAdapter::new(Arc::new(mock), no_retry(), Duration::from_millis(20));
        let err = adapter.invoke("sys", "slow call", &[]).await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_invoke_retries_transient_errors() {
        let mock = Arc::new(MockTextGenerator::new());
        mock.queue_error(LlmError::Connection {
            message: "reset".into(),
        });
        mock.queue_response("second try");
        let retry = RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            jitter: false,
            ..Default::default()
        };
        let adapter = PromptAdapter::new(mock.clone(), retry, Duration::from_secs(5));
        assert_eq!(adapter.invoke("s", "u", &[]).await.unwrap(), "second try");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_invoke_json_sentinel_on_prose() {
        let mock = Arc::new(MockTextGenerator::with_response("I cannot help with that."));
        let adapter = PromptAdapter::new(mock, no_retry(), Duration::from_secs(5));
        let value = adapter.invoke_json("s", "u", &[]).await.unwrap();
        assert!(crate::extract::is_error_sentinel(&value));
    }

    #[tokio::test]
    async fn test_mock_rules_take_precedence() {
        let mock = MockTextGenerator::new();
        mock.respond_when("breadth", MockReply::Text("[1]".into()));
        mock.queue_response("queued");
        assert_eq!(mock.complete("", "breadth please").await.unwrap(), "[1]");
        assert_eq!(mock.complete("", "other").await.unwrap(), "queued");
        assert_eq!(extract_json(&mock.complete("", "breadth").await.unwrap()), json!([1]));
    }

    #[tokio::test]
    async fn test_unreachable_mock_fails() {
        let mock = MockTextGenerator::unreachable();
        assert!(matches!(
            mock.complete("s", "u").await,
            Err(LlmError::Connection { .. })
        ));
    }
}
