//! Core data types shared across the pipeline stages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single row: field name to scalar value.
pub type Record = serde_json::Map<String, Value>;

/// One node of the question tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchQuestion {
    pub question: String,
    /// 0 for breadth questions, 1.. for follow-ups.
    pub level: u32,
    /// Text of the level-0 question this follow-up deepens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_question: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub visualization_hint: String,
    #[serde(default)]
    pub source_columns: Vec<String>,
}

impl ResearchQuestion {
    /// Create a top-level question.
    pub fn breadth(
        question: impl Into<String>,
        category: impl Into<String>,
        visualization_hint: impl Into<String>,
        source_columns: Vec<String>,
    ) -> Self {
        Self {
            question: question.into(),
            level: 0,
            parent_question: None,
            category: category.into(),
            visualization_hint: visualization_hint.into(),
            source_columns,
        }
    }

    /// Create a follow-up question under `parent`.
    pub fn follow_up(
        parent: &ResearchQuestion,
        level: u32,
        question: impl Into<String>,
        category: impl Into<String>,
        visualization_hint: impl Into<String>,
        source_columns: Vec<String>,
    ) -> Self {
        Self {
            question: question.into(),
            level,
            parent_question: Some(parent.question.clone()),
            category: category.into(),
            visualization_hint: visualization_hint.into(),
            source_columns,
        }
    }

    pub fn is_breadth(&self) -> bool {
        self.level == 0
    }
}

/// Declarative chart grammar used for visualizations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartFormat {
    #[default]
    VegaLite,
}

/// A chart attached to a research result.
///
/// `spec` holds the parsed chart specification with its data inlined; `raw`
/// keeps the backend text when no specification could be parsed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Visualization {
    #[serde(default)]
    pub format: ChartFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl Visualization {
    /// Build a renderable chart from a parsed spec object, replacing whatever
    /// data the chart carried with the computed records.
    pub fn with_inline_data(mut spec: serde_json::Map<String, Value>, data: &[Record]) -> Self {
        let values: Vec<Value> = data.iter().cloned().map(Value::Object).collect();
        spec.insert(
            "data".to_string(),
            serde_json::json!({ "values": values }),
        );
        Self {
            format: ChartFormat::VegaLite,
            spec: Some(Value::Object(spec)),
            raw: None,
        }
    }

    /// A chart whose specification could not be parsed.
    pub fn unparsed(raw: impl Into<String>) -> Self {
        Self {
            format: ChartFormat::VegaLite,
            spec: None,
            raw: Some(raw.into()),
        }
    }

    pub fn is_renderable(&self) -> bool {
        matches!(self.spec, Some(Value::Object(_)))
    }
}

/// The outcome of researching one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub question: String,
    pub title: String,
    pub narrative: String,
    pub visualization: Visualization,
    pub computed_data: Vec<Record>,
    /// The analysis plan the computation followed.
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub source_columns: Vec<String>,
}

impl ResearchResult {
    pub fn has_data(&self) -> bool {
        !self.computed_data.is_empty()
    }

    pub fn has_chart(&self) -> bool {
        self.visualization.is_renderable()
    }
}

/// Counts reported in the document footer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub question_count: usize,
    pub result_count: usize,
    pub dataset_column_count: usize,
    pub dataset_row_count: usize,
}

/// The curated, ordered report ready for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrangedReport {
    pub title: String,
    pub introduction: String,
    pub conclusion: String,
    pub sections: Vec<ResearchResult>,
    pub metadata: ReportMetadata,
}
