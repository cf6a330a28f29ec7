//! Result curation — filter, synthesize and arrange research results into
//! the final report.

use std::collections::HashSet;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::brain::PromptAdapter;
use crate::config::ArrangementStrategy;
use crate::error::LlmError;
use crate::extract::{clean_text_response, expect_array};
use crate::prompts;
use crate::types::{ArrangedReport, ReportMetadata, ResearchResult};

pub const DEFAULT_REPORT_TITLE: &str = "Comprehensive Data Analysis Report";

const NARRATIVE_SUMMARY_CHARS: usize = 240;

/// Dataset facts needed for the report metadata and synthesis prompts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatasetShape {
    pub rows: usize,
    pub columns: usize,
}

/// Valid indices from an index-list reply: integers in `0..len`, first
/// occurrence only, in reply order.
pub fn parse_index_list(value: Value, len: usize) -> Option<Vec<usize>> {
    let items = expect_array(value)?;
    let mut seen = HashSet::new();
    Some(
        items
            .iter()
            .filter_map(|v| match v {
                Value::Number(n) => n.as_u64().map(|i| i as usize),
                Value::String(s) => s.trim().parse::<usize>().ok(),
                _ => None,
            })
            .filter(|&i| i < len && seen.insert(i))
            .collect(),
    )
}

/// Group by category (categories ascending), longer titles first within a
/// category. Stable for equal keys.
pub fn arrange_by_category(mut results: Vec<ResearchResult>) -> Vec<ResearchResult> {
    results.sort_by(|a, b| {
        a.category
            .cmp(&b.category)
            .then_with(|| b.title.chars().count().cmp(&a.title.chars().count()))
    });
    results
}

/// Compact per-result summaries for the filter and arrangement prompts.
fn compact_summaries(results: &[ResearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(index, r)| {
            json!({
                "index": index,
                "question": r.question,
                "title": r.title,
                "has_data": r.has_data(),
                "has_chart": r.has_chart(),
                "data_size": r.computed_data.len(),
                "category": r.category,
            })
            .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Question, title and a narrative excerpt per result, for synthesis.
fn narrative_summaries(results: &[ResearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let excerpt: String = r.narrative.chars().take(NARRATIVE_SUMMARY_CHARS).collect();
            format!("{}. {} ({})\n   {}", i + 1, r.title, r.question, excerpt.replace('\n', " "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn fallback_introduction(count: usize, shape: DatasetShape) -> String {
    format!(
        "This report presents {count} analyses of a dataset with {} rows and {} columns.",
        shape.rows, shape.columns
    )
}

fn fallback_conclusion(count: usize) -> String {
    format!("Taken together, these {count} analyses summarize the main patterns found in the data.")
}

/// Turns the research results into an `ArrangedReport`.
pub struct ResultCurator {
    adapter: PromptAdapter,
    strategy: ArrangementStrategy,
}

impl ResultCurator {
    pub fn new(adapter: PromptAdapter, strategy: ArrangementStrategy) -> Self {
        Self { adapter, strategy }
    }

    /// Filter, synthesize, arrange and attach metadata. Never fails.
    pub async fn curate(
        &self,
        results: Vec<ResearchResult>,
        question_count: usize,
        shape: DatasetShape,
    ) -> ArrangedReport {
        let result_count = results.len();
        let kept = self.filter(results).await;
        let (title, introduction, conclusion) = self.synthesize(&kept, shape).await;
        let sections = self.arrange(kept).await;
        info!(
            results = result_count,
            sections = sections.len(),
            strategy = ?self.strategy,
            "Report curated"
        );

        ArrangedReport {
            title,
            introduction,
            conclusion,
            sections,
            metadata: ReportMetadata {
                question_count,
                result_count,
                dataset_column_count: shape.columns,
                dataset_row_count: shape.rows,
            },
        }
    }

    /// Keep the results the backend selects, in their original order.
    ///
    /// A failed call, an unparseable reply and a well-formed reply that
    /// selects nothing (`[]`, or only out-of-range indices) all keep every
    /// result. An empty report is never produced by filtering; each of these
    /// cases is logged at warn level.
    pub async fn filter(&self, results: Vec<ResearchResult>) -> Vec<ResearchResult> {
        if results.is_empty() {
            return results;
        }
        let summaries = compact_summaries(&results);
        let reply = self
            .adapter
            .invoke_json(
                prompts::FILTER_SYSTEM,
                prompts::FILTER_TEMPLATE,
                &[("{summaries}", &summaries)],
            )
            .await;

        let selected = match reply {
            Ok(value) => parse_index_list(value, results.len()),
            Err(e) => {
                warn!(error = %e, "Filter call failed, keeping all results");
                return results;
            }
        };
        let selected = match selected {
            Some(selected) if !selected.is_empty() => selected,
            Some(_) => {
                warn!(
                    results = results.len(),
                    "Filter reply selected no valid index, keeping all results"
                );
                return results;
            }
            None => {
                warn!("Filter reply was not an index list, keeping all results");
                return results;
            }
        };

        let keep: HashSet<usize> = selected.into_iter().collect();
        let before = results.len();
        let kept: Vec<ResearchResult> = results
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep.contains(i))
            .map(|(_, r)| r)
            .collect();
        debug!(before, after = kept.len(), "Results filtered");
        kept
    }

    /// Report title, introduction and conclusion, each with a fallback.
    pub async fn synthesize(&self, kept: &[ResearchResult], shape: DatasetShape) -> (String, String, String) {
        if kept.is_empty() {
            return (
                DEFAULT_REPORT_TITLE.to_string(),
                fallback_introduction(0, shape),
                fallback_conclusion(0),
            );
        }
        let summaries = narrative_summaries(kept);

        let title = match self
            .adapter
            .invoke(
                prompts::REPORT_TITLE_SYSTEM,
                prompts::REPORT_TITLE_TEMPLATE,
                &[("{summaries}", &summaries)],
            )
            .await
        {
            Ok(text) => Some(clean_text_response(&text)).filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "Report title generation failed");
                None
            }
        }
        .unwrap_or_else(|| DEFAULT_REPORT_TITLE.to_string());

        let rows = shape.rows.to_string();
        let columns = shape.columns.to_string();
        let introduction_vars = [
            ("{title}", title.as_str()),
            ("{rows}", rows.as_str()),
            ("{columns}", columns.as_str()),
            ("{summaries}", summaries.as_str()),
        ];
        let conclusion_vars = [("{title}", title.as_str()), ("{summaries}", summaries.as_str())];
        let (introduction, conclusion) = tokio::join!(
            self.adapter.invoke(
                prompts::INTRODUCTION_SYSTEM,
                prompts::INTRODUCTION_TEMPLATE,
                &introduction_vars,
            ),
            self.adapter.invoke(
                prompts::CONCLUSION_SYSTEM,
                prompts::CONCLUSION_TEMPLATE,
                &conclusion_vars,
            )
        );

        let introduction = non_empty(introduction, "introduction")
            .unwrap_or_else(|| fallback_introduction(kept.len(), shape));
        let conclusion = non_empty(conclusion, "conclusion")
            .unwrap_or_else(|| fallback_conclusion(kept.len()));
        (title, introduction, conclusion)
    }

    /// Order sections with the configured strategy.
    pub async fn arrange(&self, kept: Vec<ResearchResult>) -> Vec<ResearchResult> {
        match self.strategy {
            ArrangementStrategy::CategoryTitleLength => arrange_by_category(kept),
            ArrangementStrategy::Delegated => self.arrange_delegated(kept).await,
        }
    }

    async fn arrange_delegated(&self, kept: Vec<ResearchResult>) -> Vec<ResearchResult> {
        if kept.len() < 2 {
            return kept;
        }
        let summaries = compact_summaries(&kept);
        let order = match self
            .adapter
            .invoke_json(
                prompts::ARRANGE_SYSTEM,
                prompts::ARRANGE_TEMPLATE,
                &[("{summaries}", &summaries)],
            )
            .await
        {
            Ok(value) => parse_index_list(value, kept.len()),
            Err(e) => {
                warn!(error = %e, "Arrangement call failed, keeping filtered order");
                None
            }
        };
        let Some(mut order) = order else {
            warn!("Arrangement reply was not an index list, keeping filtered order");
            return kept;
        };

        let placed: HashSet<usize> = order.iter().copied().collect();
        order.extend((0..kept.len()).filter(|i| !placed.contains(i)));

        let mut slots: Vec<Option<ResearchResult>> = kept.into_iter().map(Some).collect();
        order.into_iter().filter_map(|i| slots[i].take()).collect()
    }
}

fn non_empty(reply: Result<String, LlmError>, what: &str) -> Option<String> {
    match reply {
        Ok(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
        Err(e) => {
            warn!(error = %e, part = what, "Report synthesis call failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::{MockReply, MockTextGenerator};
    use crate::config::RetryConfig;
    use crate::types::Visualization;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    const FILTER: &str = "Select the indices worth keeping";
    const ARRANGE: &str = "Return the logical reading order";

    fn result(title: &str, category: &str) -> ResearchResult {
        ResearchResult {
            question: format!("{title}?"),
            title: title.to_string(),
            narrative: format!("About {title}."),
            visualization: Visualization::with_inline_data(serde_json::Map::new(), &[]),
            computed_data: vec![json!({"v": 1}).as_object().unwrap().clone()],
            steps: vec![],
            category: category.to_string(),
            source_columns: vec![],
        }
    }

    fn five() -> Vec<ResearchResult> {
        ["r0", "r1", "r2", "r3", "r4"]
            .iter()
            .map(|t| result(t, "c"))
            .collect()
    }

    fn curator(mock: Arc<MockTextGenerator>, strategy: ArrangementStrategy) -> ResultCurator {
        let adapter = PromptAdapter::new(
            mock,
            RetryConfig {
                max_retries: 0,
                ..Default::default()
            },
            Duration::from_secs(5),
        );
        ResultCurator::new(adapter, strategy)
    }

    fn titles(results: &[ResearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.title.as_str()).collect()
    }

    #[test]
    fn test_parse_index_list() {
        assert_eq!(parse_index_list(json!([4, 0, "2", 9, -1, 0, 1.5, "x"]), 5), Some(vec![4, 0, 2]));
        assert_eq!(parse_index_list(json!({"indices": [1]}), 5), Some(vec![1]));
        assert_eq!(parse_index_list(json!({"error": "e", "raw_response": "r"}), 5), None);
    }

    #[test]
    fn test_arrange_by_category() {
        let arranged = arrange_by_category(vec![
            result("Short", "zeta"),
            result("A much longer title", "alpha"),
            result("Mid title", "zeta"),
            result("Tiny", "alpha"),
        ]);
        assert_eq!(titles(&arranged), vec!["A much longer title", "Tiny", "Mid title", "Short"]);
    }

    #[tokio::test]
    async fn test_filter_keeps_selected_in_original_order() {
        let mock = Arc::new(MockTextGenerator::new());
        mock.respond_when(FILTER, MockReply::Text("Keep these: [4, 0, 2]".into()));
        let kept = curator(mock, ArrangementStrategy::default()).filter(five()).await;
        assert_eq!(titles(&kept), vec!["r0", "r2", "r4"]);
    }

    #[tokio::test]
    async fn test_filter_fallback_keeps_everything() {
        for reply in [
            MockReply::Text("no idea".into()),
            MockReply::Text("[]".into()),
            MockReply::Text("[7, 8]".into()),
            MockReply::ConnectionFailure("down".into()),
        ] {
            let mock = Arc::new(MockTextGenerator::new());
            mock.respond_when(FILTER, reply);
            let kept = curator(mock, ArrangementStrategy::default()).filter(five()).await;
            assert_eq!(kept.len(), 5);
        }
    }

    #[tokio::test]
    async fn test_filter_empty_selection_keeps_everything() {
        for reply in ["[]", r#"{"indices": []}"#, "[5, -1, 99]"] {
            let mock = Arc::new(MockTextGenerator::new());
            mock.respond_when(FILTER, MockReply::Text(reply.into()));
            let kept = curator(mock.clone(), ArrangementStrategy::default())
                .filter(five())
                .await;
            assert_eq!(titles(&kept), vec!["r0", "r1", "r2", "r3", "r4"]);
            assert_eq!(mock.call_count(), 1);
        }
    }

    #[tokio::test]
    async fn test_filter_skips_call_on_empty_input() {
        let mock = Arc::new(MockTextGenerator::new());
        let kept = curator(mock.clone(), ArrangementStrategy::default())
            .filter(vec![])
            .await;
        assert!(kept.is_empty());
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_delegated_arrangement_appends_missing() {
        let mock = Arc::new(MockTextGenerator::new());
        mock.respond_when(ARRANGE, MockReply::Text("[3, 1, 3, 42]".into()));
        let arranged = curator(mock, ArrangementStrategy::Delegated).arrange(five()).await;
        assert_eq!(titles(&arranged), vec!["r3", "r1", "r0", "r2", "r4"]);
    }

    #[tokio::test]
    async fn test_delegated_failure_keeps_filtered_order() {
        let mock = Arc::new(MockTextGenerator::new());
        mock.respond_when(ARRANGE, MockReply::Text("cannot decide".into()));
        let mut input = five();
        input[0].category = "zzz".into();
        let arranged = curator(mock, ArrangementStrategy::Delegated).arrange(input).await;
        assert_eq!(titles(&arranged), vec!["r0", "r1", "r2", "r3", "r4"]);
    }

    #[tokio::test]
    async fn test_synthesis_fallbacks() {
        let mock = Arc::new(MockTextGenerator::unreachable());
        let (title, intro, conclusion) = curator(mock, ArrangementStrategy::default())
            .synthesize(&five(), DatasetShape { rows: 10, columns: 3 })
            .await;
        assert_eq!(title, DEFAULT_REPORT_TITLE);
        assert!(intro.contains("5 analyses"));
        assert!(intro.contains("10 rows"));
        assert!(!conclusion.is_empty());
    }

    #[tokio::test]
    async fn test_curate_end_to_end() {
        let mock = Arc::new(MockTextGenerator::new());
        mock.respond_when(FILTER, MockReply::Text("[0, 2, 4]".into()));
        mock.respond_when("Write a compelling report title", MockReply::Text("# \"Downloads Unpacked\"".into()));
        mock.respond_when("Markdown introduction", MockReply::Text("Intro text".into()));
        mock.respond_when("Markdown conclusion", MockReply::Text("Closing text".into()));

        let mut input = five();
        input[4].category = "a".into();
        let report = curator(mock, ArrangementStrategy::CategoryTitleLength)
            .curate(input, 12, DatasetShape { rows: 100, columns: 4 })
            .await;

        assert_eq!(report.title, "Downloads Unpacked");
        assert_eq!(report.introduction, "Intro text");
        assert_eq!(report.conclusion, "Closing text");
        assert_eq!(titles(&report.sections), vec!["r4", "r0", "r2"]);
        assert_eq!(
            report.metadata,
            ReportMetadata {
                question_count: 12,
                result_count: 5,
                dataset_column_count: 4,
                dataset_row_count: 100,
            }
        );
    }
}
