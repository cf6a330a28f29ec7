//! Question tree generation.
//!
//! Phase A asks for `breadth` top-level questions in one call. Phase B asks,
//! for every top-level question concurrently, for `depth` follow-ups. Short
//! or malformed answers are padded with deterministic fallback questions so
//! the tree always has exactly `breadth + breadth * depth` nodes.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::brain::PromptAdapter;
use crate::config::ResearchConfig;
use crate::error::{LlmError, PipelineError};
use crate::extract::expect_array;
use crate::profile::DatasetProfile;
use crate::prompts;
use crate::types::ResearchQuestion;

/// A question as described by the backend, before it is placed in the tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuestionDescriptor {
    pub question: String,
    pub category: Option<String>,
    pub visualization: Option<String>,
    pub source_columns: Vec<String>,
}

impl QuestionDescriptor {
    /// Read a descriptor leniently. Accepts a bare string or an object using
    /// any of the common field spellings.
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(text) = value.as_str() {
            let text = text.trim();
            return (!text.is_empty()).then(|| Self {
                question: text.to_string(),
                ..Default::default()
            });
        }
        let obj = value.as_object()?;
        let text_field = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| obj.get(*k).and_then(Value::as_str))
                .map(str::trim)
                .find(|s| !s.is_empty())
                .map(str::to_string)
        };

        let question = text_field(&["question", "query"])?;
        let source_columns = ["source_columns", "key_columns", "columns"]
            .iter()
            .find_map(|k| obj.get(*k))
            .map(|v| match v {
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                Value::String(s) => s
                    .split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect(),
                _ => Vec::new(),
            })
            .unwrap_or_default();

        Some(Self {
            question,
            category: text_field(&["category", "analysis_type"]),
            visualization: text_field(&[
                "visualization",
                "visualization_hint",
                "expected_chart_type",
                "chart_type",
            ]),
            source_columns,
        })
    }
}

/// Fallback for the `index`-th (0-based) top-level question.
pub fn breadth_fallback(index: usize) -> ResearchQuestion {
    ResearchQuestion::breadth(
        format!("What are the key patterns in the data for analysis {index}?"),
        format!("fallback_{index}"),
        "bar",
        Vec::new(),
    )
}

/// Fallback for the follow-up at `level` under `parent`.
pub fn depth_fallback(parent: &ResearchQuestion, level: u32) -> ResearchQuestion {
    ResearchQuestion::follow_up(
        parent,
        level,
        format!(
            "What specific patterns emerge when analyzing {} in detail for \"{}\" (level {level})?",
            parent.category, parent.question
        ),
        parent.category.clone(),
        parent.visualization_hint.clone(),
        parent.source_columns.clone(),
    )
}

/// Texts already placed in the tree. Owned by the generator and only touched
/// at merge points, never by concurrent workers.
#[derive(Debug, Default)]
struct AskedQuestions {
    seen: HashSet<String>,
}

impl AskedQuestions {
    fn normalize(text: &str) -> String {
        text.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Accept `candidate`, or `fallback` when the text was already asked.
    fn accept(&mut self, candidate: ResearchQuestion, fallback: ResearchQuestion) -> ResearchQuestion {
        if self.seen.insert(Self::normalize(&candidate.question)) {
            return candidate;
        }
        debug!(question = %candidate.question, "Duplicate question replaced by fallback");
        let mut chosen = fallback;
        let base = chosen.question.clone();
        let mut n = 2;
        while !self.seen.insert(Self::normalize(&chosen.question)) {
            chosen.question = format!("{base} (variant {n})");
            n += 1;
        }
        chosen
    }
}

/// Builds the breadth/depth question tree.
pub struct QuestionTreeGenerator {
    adapter: PromptAdapter,
    breadth: usize,
    depth: usize,
    max_workers: usize,
}

impl QuestionTreeGenerator {
    pub fn new(adapter: PromptAdapter, config: &ResearchConfig) -> Self {
        Self {
            adapter,
            breadth: config.breadth,
            depth: config.depth,
            max_workers: config.max_workers.max(1),
        }
    }

    /// Generate the full tree: breadth questions first, then follow-ups.
    ///
    /// Fails only when the breadth call cannot reach the backend.
    pub async fn generate(
        &self,
        profile: &DatasetProfile,
        row_count: usize,
    ) -> Result<Vec<ResearchQuestion>, PipelineError> {
        let overview = profile.overview();
        let mut asked = AskedQuestions::default();

        let proposed = self
            .propose_breadth(&overview, row_count)
            .await
            .map_err(PipelineError::BackendUnreachable)?;
        let breadth: Vec<ResearchQuestion> = (0..self.breadth)
            .map(|i| {
                let candidate = proposed.get(i).cloned().unwrap_or_else(|| breadth_fallback(i));
                asked.accept(candidate, breadth_fallback(i))
            })
            .collect();
        info!(count = breadth.len(), "Breadth questions ready");

        let follow_ups = self.propose_follow_ups(&overview, &breadth).await;

        let mut tree = breadth.clone();
        for (parent, proposed) in breadth.iter().zip(follow_ups) {
            for (i, candidate) in proposed.into_iter().enumerate() {
                let level = i as u32 + 1;
                tree.push(asked.accept(candidate, depth_fallback(parent, level)));
            }
        }
        info!(
            breadth = self.breadth,
            depth = self.depth,
            total = tree.len(),
            "Question tree generated"
        );
        Ok(tree)
    }

    /// Phase A. Returns at most `breadth` parsed questions; a malformed reply
    /// yields an empty list, a transport failure an error.
    async fn propose_breadth(
        &self,
        overview: &str,
        row_count: usize,
    ) -> Result<Vec<ResearchQuestion>, LlmError> {
        let breadth = self.breadth.to_string();
        let rows = row_count.to_string();
        let reply = self
            .adapter
            .invoke_json(
                prompts::BREADTH_SYSTEM,
                prompts::BREADTH_TEMPLATE,
                &[("{profile}", overview), ("{breadth}", &breadth), ("{rows}", &rows)],
            )
            .await?;

        let Some(items) = expect_array(reply) else {
            warn!("Breadth reply was not a question list, using fallback questions");
            return Ok(Vec::new());
        };
        let questions: Vec<ResearchQuestion> = items
            .iter()
            .filter_map(QuestionDescriptor::from_value)
            .take(self.breadth)
            .enumerate()
            .map(|(i, d)| {
                ResearchQuestion::breadth(
                    d.question,
                    d.category.unwrap_or_else(|| format!("category_{i}")),
                    d.visualization.unwrap_or_else(|| "bar".to_string()),
                    d.source_columns,
                )
            })
            .collect();
        if questions.len() < self.breadth {
            warn!(
                got = questions.len(),
                wanted = self.breadth,
                "Breadth reply was short, padding with fallback questions"
            );
        }
        Ok(questions)
    }

    /// Phase B. One list of exactly `depth` follow-ups per parent, in parent
    /// order. Parents are processed concurrently, bounded by `max_workers`.
    async fn propose_follow_ups(
        &self,
        overview: &str,
        parents: &[ResearchQuestion],
    ) -> Vec<Vec<ResearchQuestion>> {
        if self.depth == 0 {
            return vec![Vec::new(); parents.len()];
        }
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let asked_list = parents
            .iter()
            .map(|p| format!("- {}", p.question))
            .collect::<Vec<_>>()
            .join("\n");

        let futures = parents.iter().map(|parent| {
            let semaphore = semaphore.clone();
            let asked_list = asked_list.as_str();
            async move {
                let _permit = semaphore.acquire().await.ok();
                self.follow_ups_for(overview, parent, asked_list).await
            }
        });
        join_all(futures).await
    }

    async fn follow_ups_for(
        &self,
        overview: &str,
        parent: &ResearchQuestion,
        asked_list: &str,
    ) -> Vec<ResearchQuestion> {
        let depth = self.depth.to_string();
        let reply = self
            .adapter
            .invoke_json(
                prompts::DEPTH_SYSTEM,
                prompts::DEPTH_TEMPLATE,
                &[
                    ("{profile}", overview),
                    ("{parent}", &parent.question),
                    ("{category}", &parent.category),
                    ("{depth}", &depth),
                    ("{asked}", asked_list),
                ],
            )
            .await;

        let descriptors: Vec<QuestionDescriptor> = match reply {
            Ok(value) => match expect_array(value) {
                Some(items) => items.iter().filter_map(QuestionDescriptor::from_value).collect(),
                None => {
                    warn!(parent = %parent.question, "Follow-up reply was not a list, using fallbacks");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(parent = %parent.question, error = %e, "Follow-up generation failed, using fallbacks");
                Vec::new()
            }
        };

        (1..=self.depth as u32)
            .map(|level| match descriptors.get(level as usize - 1) {
                Some(d) => ResearchQuestion::follow_up(
                    parent,
                    level,
                    d.question.clone(),
                    d.category.clone().unwrap_or_else(|| parent.category.clone()),
                    d.visualization
                        .clone()
                        .unwrap_or_else(|| parent.visualization_hint.clone()),
                    if d.source_columns.is_empty() {
                        parent.source_columns.clone()
                    } else {
                        d.source_columns.clone()
                    },
                ),
                None => depth_fallback(parent, level),
            })
            .collect()
    }
}
