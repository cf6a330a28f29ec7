//! Per-question research and the bounded fan-out over the whole tree.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::brain::PromptAdapter;
use crate::compute::TabularEngine;
use crate::config::ResearchConfig;
use crate::dataset::Table;
use crate::error::LlmError;
use crate::extract::{clean_text_response, expect_array, expect_object, extract_json};
use crate::prompts;
use crate::types::{Record, ResearchQuestion, ResearchResult, Visualization};

use super::callback::{NoOpResearchCallback, ResearchCallback};

const TITLE_PREVIEW_RECORDS: usize = 10;
const CHART_PREVIEW_RECORDS: usize = 50;
const NARRATIVE_PREVIEW_RECORDS: usize = 30;

/// Upper bound on analysis plan length.
pub const MAX_PLAN_STEPS: usize = 10;

/// Plan used when the backend's plan is unusable.
pub const FALLBACK_PLAN: [&str; 6] = [
    "Load and examine the dataset",
    "Identify relevant columns for analysis",
    "Clean and prepare the data",
    "Perform statistical analysis",
    "Generate visualizations",
    "Interpret results",
];

/// Why a question produced no result.
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("unanswerable: {0}")]
    Unanswerable(String),

    #[error("backend failure: {0}")]
    Backend(#[from] LlmError),
}

/// Researches questions against a shared table.
#[derive(Clone)]
pub struct ResearchExecutor {
    adapter: PromptAdapter,
    engine: Arc<dyn TabularEngine>,
    table: Arc<Table>,
    callback: Arc<dyn ResearchCallback>,
    max_workers: usize,
    max_records: usize,
    sample_values: usize,
}

impl ResearchExecutor {
    pub fn new(
        adapter: PromptAdapter,
        engine: Arc<dyn TabularEngine>,
        table: Arc<Table>,
        config: &ResearchConfig,
    ) -> Self {
        Self {
            adapter,
            engine,
            table,
            callback: Arc::new(NoOpResearchCallback),
            max_workers: config.max_workers.max(1),
            max_records: config.max_records,
            sample_values: config.sample_values,
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn ResearchCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Research every question with at most `max_workers` in flight.
    ///
    /// Returns the results that succeeded, in input order. Failed or
    /// panicking questions are logged and left out.
    pub async fn research_all(&self, questions: &[ResearchQuestion]) -> Vec<ResearchResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut handles = Vec::with_capacity(questions.len());

        for question in questions {
            let this = self.clone();
            let question = question.clone();
            let sem = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                this.callback.on_question_started(&question.question);
                let outcome = this.research_one(&question).await;
                this.callback
                    .on_question_finished(&question.question, outcome.as_ref());
                match outcome {
                    Ok(result) => Some(result),
                    Err(reason) => {
                        warn!(question = %question.question, reason = %reason, "Question skipped");
                        None
                    }
                }
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Research task aborted"),
            }
        }
        info!(
            questions = questions.len(),
            results = results.len(),
            "Research fan-out complete"
        );
        results
    }

    /// Research one question: plan, compute, then chart and title, then
    /// narrative.
    pub async fn research_one(&self, question: &ResearchQuestion) -> Result<ResearchResult, SkipReason> {
        let steps = self.plan_steps(question).await?;
        let request = self.generate_request(question, &steps).await?;

        let engine = self.engine.clone();
        let table = self.table.clone();
        let outcome = tokio::task::spawn_blocking(move || engine.compute(&request, &table))
            .await
            .map_err(|e| SkipReason::Unanswerable(format!("computation aborted: {e}")))?;
        if let Some(reason) = outcome.unanswerable_reason(self.max_records) {
            return Err(SkipReason::Unanswerable(reason));
        }
        let data = outcome.into_records().unwrap_or_default();
        debug!(question = %question.question, records = data.len(), "Computed data");

        let (chart, title) = tokio::join!(
            self.generate_chart(question, &data),
            self.generate_title(question, &data)
        );
        let visualization = chart?;
        let title = title?;
        let narrative = self.generate_narrative(question, &data, &visualization).await?;

        Ok(ResearchResult {
            question: question.question.clone(),
            title,
            narrative,
            visualization,
            computed_data: data,
            steps,
            category: question.category.clone(),
            source_columns: question.source_columns.clone(),
        })
    }

    /// Ask for an analysis plan. An unusable reply yields `FALLBACK_PLAN`;
    /// a transport failure is returned.
    async fn plan_steps(&self, question: &ResearchQuestion) -> Result<Vec<String>, LlmError> {
        let rows = self.table.row_count.to_string();
        let columns = self.table.headers.join(", ");
        let samples = self.sample_block(&question.source_columns);
        let parent = question.parent_question.as_deref().unwrap_or("None");

        let reply = self
            .adapter
            .invoke_json(
                prompts::PLAN_SYSTEM,
                prompts::PLAN_TEMPLATE,
                &[
                    ("{rows}", &rows),
                    ("{columns}", &columns),
                    ("{samples}", &samples),
                    ("{question}", &question.question),
                    ("{parent}", parent),
                ],
            )
            .await?;

        let steps = parse_plan(reply);
        debug!(question = %question.question, steps = steps.len(), "Analysis planned");
        Ok(steps)
    }

    async fn generate_request(
        &self,
        question: &ResearchQuestion,
        steps: &[String],
    ) -> Result<String, LlmError> {
        let source_columns = if question.source_columns.is_empty() {
            "(none given)".to_string()
        } else {
            question.source_columns.join(", ")
        };
        let rows = self.table.row_count.to_string();
        let columns = self.table.headers.join(", ");
        let samples = self.sample_block(&question.source_columns);
        let plan = steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {step}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");

        self.adapter
            .invoke(
                prompts::TRANSFORM_SYSTEM,
                prompts::TRANSFORM_TEMPLATE,
                &[
                    ("{question}", &question.question),
                    ("{category}", &question.category),
                    ("{visualization}", &question.visualization_hint),
                    ("{source_columns}", &source_columns),
                    ("{rows}", &rows),
                    ("{columns}", &columns),
                    ("{samples}", &samples),
                    ("{steps}", &plan),
                ],
            )
            .await
    }

    /// One line per known source column with its first distinct values.
    fn sample_block(&self, columns: &[String]) -> String {
        let lines: Vec<String> = columns
            .iter()
            .filter(|c| self.table.has_column(c))
            .map(|c| {
                let values = Value::Array(self.table.sample_values(c, self.sample_values));
                format!("- {c}: {values}")
            })
            .collect();
        if lines.is_empty() {
            "(no sample values)".to_string()
        } else {
            lines.join("\n")
        }
    }

    async fn generate_chart(
        &self,
        question: &ResearchQuestion,
        data: &[Record],
    ) -> Result<Visualization, LlmError> {
        let record_count = data.len().to_string();
        let preview = preview_json(data, CHART_PREVIEW_RECORDS);
        let reply = self
            .adapter
            .invoke(
                prompts::CHART_SYSTEM,
                prompts::CHART_TEMPLATE,
                &[
                    ("{question}", &question.question),
                    ("{visualization}", &question.visualization_hint),
                    ("{record_count}", &record_count),
                    ("{data}", &preview),
                ],
            )
            .await?;

        match expect_object(extract_json(&reply)) {
            Some(spec) => Ok(Visualization::with_inline_data(spec, data)),
            None => {
                warn!(question = %question.question, "Chart reply was not a JSON object");
                Ok(Visualization::unparsed(reply))
            }
        }
    }

    async fn generate_title(&self, question: &ResearchQuestion, data: &[Record]) -> Result<String, LlmError> {
        let preview = preview_json(data, TITLE_PREVIEW_RECORDS);
        let reply = self
            .adapter
            .invoke(
                prompts::TITLE_SYSTEM,
                prompts::TITLE_TEMPLATE,
                &[("{question}", &question.question), ("{data}", &preview)],
            )
            .await?;
        let title = clean_text_response(&reply);
        Ok(if title.is_empty() {
            question.question.clone()
        } else {
            title
        })
    }

    async fn generate_narrative(
        &self,
        question: &ResearchQuestion,
        data: &[Record],
        visualization: &Visualization,
    ) -> Result<String, LlmError> {
        let preview = preview_json(data, NARRATIVE_PREVIEW_RECORDS);
        let chart = match (&visualization.spec, &visualization.raw) {
            (Some(spec), _) => chart_outline(spec),
            (None, Some(raw)) => raw.clone(),
            (None, None) => "(no chart)".to_string(),
        };
        let reply = self
            .adapter
            .invoke(
                prompts::NARRATIVE_SYSTEM,
                prompts::NARRATIVE_TEMPLATE,
                &[
                    ("{question}", &question.question),
                    ("{category}", &question.category),
                    ("{data}", &preview),
                    ("{chart}", &chart),
                ],
            )
            .await?;
        Ok(reply.trim().to_string())
    }
}

/// Non-empty string steps from a plan reply, at most `MAX_PLAN_STEPS`.
fn parse_plan(value: Value) -> Vec<String> {
    let steps: Vec<String> = expect_array(value)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        })
        .take(MAX_PLAN_STEPS)
        .collect();
    if steps.is_empty() {
        warn!("Analysis plan unusable, using the default plan");
        return FALLBACK_PLAN.iter().map(|s| s.to_string()).collect();
    }
    steps
}

/// Pretty JSON of the first `limit` records, noting how many were cut.
fn preview_json(data: &[Record], limit: usize) -> String {
    let shown: Vec<Value> = data.iter().take(limit).cloned().map(Value::Object).collect();
    let body = serde_json::to_string_pretty(&shown).unwrap_or_else(|_| "[]".to_string());
    if data.len() > limit {
        format!("{body}\n... ({} more records)", data.len() - limit)
    } else {
        body
    }
}

/// The chart spec without its inline data.
fn chart_outline(spec: &Value) -> String {
    let mut outline = spec.clone();
    if let Some(obj) = outline.as_object_mut() {
        obj.remove("data");
    }
    serde_json::to_string_pretty(&outline).unwrap_or_default()
}
