//! Progress hooks for the research fan-out.

use crate::types::ResearchResult;

use super::executor::SkipReason;

/// Callback trait for per-question progress updates.
///
/// Called from worker tasks, possibly concurrently.
pub trait ResearchCallback: Send + Sync {
    /// Called before the first backend call for `question`.
    fn on_question_started(&self, question: &str);
    /// Called once `question` is either researched or dropped.
    fn on_question_finished(&self, question: &str, outcome: Result<&ResearchResult, &SkipReason>);
}

/// No-op callback.
pub struct NoOpResearchCallback;

impl ResearchCallback for NoOpResearchCallback {
    fn on_question_started(&self, _question: &str) {}
    fn on_question_finished(&self, _question: &str, _outcome: Result<&ResearchResult, &SkipReason>) {}
}
