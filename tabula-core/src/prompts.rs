//! Prompt templates for every backend call.
//!
//! Placeholders are `{name}` tokens substituted by `brain::fill_template`.
//! Literal braces in JSON examples are left alone because substitution only
//! touches the listed placeholders.

pub const BREADTH_SYSTEM: &str = "You are an expert data analyst and researcher. You generate insightful, \
visualizable research questions that explore different aspects of a dataset. Questions must cover \
wide-ranging aspects (temporal, categorical, numerical, relational), be answerable from the available \
columns, and interest both technical and non-technical readers.";

pub const BREADTH_TEMPLATE: &str = r#"Dataset profile ({rows} rows):
{profile}

Generate exactly {breadth} diverse research questions that cover different aspects of the data.
Each question should be specific, visualizable and reveal a meaningful pattern or trend.

Return a JSON array of objects with:
- "question": the research question
- "category": the aspect it explores (e.g. "temporal", "categorical", "correlation", "distribution")
- "visualization": the chart type that would answer it (e.g. "bar", "line", "scatter", "histogram")
- "source_columns": the dataset columns needed to answer it

Example:
[
  {"question": "How has the number of publications changed over time?", "category": "temporal", "visualization": "line", "source_columns": ["Year"]}
]"#;

pub const DEPTH_SYSTEM: &str = "You are an expert data analyst. Given a parent research question about a \
dataset, you generate follow-up questions that dive deeper into what the parent reveals. Follow-ups are \
more specific, highly visualizable, explore sub-patterns or correlations, and are answerable from the data.";

pub const DEPTH_TEMPLATE: &str = r#"Dataset profile:
{profile}

Parent question: "{parent}"
Category: {category}

Generate exactly {depth} follow-up questions that dive deeper into this parent question.
Do not repeat the parent question or any of these already asked questions:
{asked}

Return a JSON array:
[
  {"question": "specific follow-up question", "category": "refined_category", "visualization": "bar", "source_columns": ["column"]}
]"#;

pub const PLAN_SYSTEM: &str = "You are a methodical data analyst. Given a research question and the columns \
of a dataset, you write a short step-by-step analysis plan (at most 10 steps). Steps may derive new columns \
from existing ones and focus on the computations needed.";

pub const PLAN_TEMPLATE: &str = r#"Dataset: {rows} rows. Columns: {columns}

Sample values:
{samples}

Question to plan for: "{question}"
Parent context: {parent}

Lay out a specific, actionable analysis plan for this question. Consider deriving new metrics from
existing columns where that helps.

Return a JSON array of strings, at most 10 entries:
["Step 1 description", "Step 2 description"]"#;

pub const TRANSFORM_SYSTEM: &str = "You are a data analysis expert. You answer research questions by writing \
declarative transform requests in JSON. You only use the whitelisted step types and only reference \
columns that exist.";

pub const TRANSFORM_TEMPLATE: &str = r#"Research question: {question}
Analysis type: {category}
Expected chart: {visualization}
Key columns: {source_columns}

Dataset: {rows} rows. Columns: {columns}

Sample values for key columns:
{samples}

Analysis plan:
{steps}

Write a transform request that follows the plan and computes the data answering the question over ALL rows.
The dataset is bound to "df". Each binding applies steps to a table ("from", default "df") and binds the
output to "name". The final answer MUST be bound to "result". Keep the result small enough to chart.

Step types:
- {"type": "filter", "column": c, "op": "eq|ne|gt|ge|lt|le|in|not_in|contains|is_null|not_null", "value": v}
- {"type": "select", "columns": [c, ...]}
- {"type": "rename", "mapping": {"old": "new"}}
- {"type": "derive", "column": new, "left": {"column": c} or number, "op": "add|sub|mul|div", "right": {"column": c} or number}
- {"type": "drop_nulls", "columns": [c, ...]}
- {"type": "group_by", "keys": [c, ...], "aggregations": [{"column": c, "func": "count|sum|mean|median|min|max|nunique", "as": name}]}
- {"type": "value_counts", "column": c}
- {"type": "bin", "column": c, "bins": n, "as": name}
- {"type": "sort", "column": c, "descending": true}
- {"type": "limit", "n": n}
- {"type": "distinct", "columns": [c, ...]}
- {"type": "reduce", "column": c, "func": "mean"}

Example:
{"bindings": [
  {"name": "result", "from": "df", "steps": [
    {"type": "group_by", "keys": ["Year"], "aggregations": [{"func": "count", "as": "count"}]},
    {"type": "sort", "column": "Year"}
  ]}
]}

Return ONLY the JSON transform request."#;

pub const CHART_SYSTEM: &str = "You are a Vega-Lite expert creating clear, effective charts for research \
questions. Charts always use inline data in the form \"data\": {\"values\": [...]}, never external files.";

pub const CHART_TEMPLATE: &str = r#"Research question: {question}
Chart type: {visualization}

Data to visualize ({record_count} records):
{data}

Create a Vega-Lite v5 specification that answers the question with appropriate encodings for the field
types, informative titles and axis labels, and tooltips.

Format:
{
  "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
  "data": {"values": [...]},
  "mark": "...",
  "encoding": {"x": ..., "y": ...},
  "title": "..."
}

Return only the Vega-Lite JSON specification."#;

pub const TITLE_SYSTEM: &str = "You write concise, informative section titles for data analysis reports.";

pub const TITLE_TEMPLATE: &str = r#"Research question: {question}

Computed data (first records):
{data}

Write a short title (at most 10 words) for a report section answering this question.
Return only the title text."#;

pub const NARRATIVE_SYSTEM: &str = "You are a data storytelling expert. You turn computed findings into an \
accessible narrative that explains what the data and its chart show.";

pub const NARRATIVE_TEMPLATE: &str = r#"Research question: {question}
Analysis type: {category}

Computed data:
{data}

Chart specification:
{chart}

Write a narrative of 2-3 short paragraphs in Markdown that explains what the analysis reveals, describes
what the chart shows, highlights specific numbers, and discusses why the findings matter."#;

pub const FILTER_SYSTEM: &str = "You are an editor curating a data analysis report. You keep sections that \
are informative and renderable and drop redundant or empty ones.";

pub const FILTER_TEMPLATE: &str = r#"Candidate report sections:
{summaries}

Select the indices worth keeping. Drop sections that have no data, have no renderable chart, or repeat
another section's finding. Return ONLY a JSON array of integer indices, e.g. [0, 2, 3]."#;

pub const REPORT_TITLE_SYSTEM: &str = "You write titles for analytical reports.";

pub const REPORT_TITLE_TEMPLATE: &str = r#"The report contains these findings:
{summaries}

Write a compelling report title (at most 12 words). Return only the title text."#;

pub const INTRODUCTION_SYSTEM: &str = "You write introductions for analytical reports.";

pub const INTRODUCTION_TEMPLATE: &str = r#"Report title: {title}
Dataset: {rows} rows, {columns} columns.

The report contains these findings:
{summaries}

Write a 1-2 paragraph Markdown introduction that explains what the report explores and what the reader
will learn."#;

pub const CONCLUSION_SYSTEM: &str = "You write conclusions for analytical reports.";

pub const CONCLUSION_TEMPLATE: &str = r#"Report title: {title}

The report contains these findings:
{summaries}

Write a 1-2 paragraph Markdown conclusion that synthesises the key findings and their implications."#;

pub const ARRANGE_SYSTEM: &str = "You are an editor ordering the sections of an analytical report so it reads \
as a logical story, from overview to detail.";

pub const ARRANGE_TEMPLATE: &str = r#"Report sections:
{summaries}

Return the logical reading order as a JSON array containing every index exactly once, e.g. [2, 0, 1]."#;
