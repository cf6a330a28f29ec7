//! Report rendering — `ArrangedReport` to a standalone HTML document.

pub mod chart;
pub mod markdown;

use std::path::Path;

use handlebars::Handlebars;
use serde_json::json;
use tracing::{info, warn};

use crate::error::RenderError;
use crate::persistence::atomic_write;
use crate::types::ArrangedReport;

pub use chart::{ChartRenderer, VegaEmbedRenderer, error_placeholder};

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>{{title}}</title>
{{#each scripts}}
  <script src="{{this}}"></script>
{{/each}}
  <style>
    body { font-family: Georgia, serif; margin: 2em auto; max-width: 1200px; line-height: 1.6; background-color: #fafafa; }
    .container { background: white; padding: 2em; border-radius: 8px; box-shadow: 0 2px 10px rgba(0,0,0,0.1); }
    h1 { color: #2c3e50; border-bottom: 3px solid #3498db; padding-bottom: 15px; margin-bottom: 2em; }
    h2 { color: #34495e; margin-top: 2.5em; margin-bottom: 1em; border-left: 4px solid #3498db; padding-left: 1em; }
    h3 { color: #7f8c8d; margin-top: 2em; margin-bottom: 1em; }
    .section { margin: 3em 0; padding: 2em; border: 1px solid #ecf0f1; border-radius: 8px; background-color: #f8f9fa; }
    .result-item { margin: 2em 0; padding: 2em; border: 1px solid #dee2e6; border-radius: 8px; background: white; }
    .chart-container { text-align: center; margin: 2em 0; padding: 1em; background: white; border-radius: 8px; }
    .explanation { margin: 1.5em 0; padding: 1em; background-color: #f1f3f4; border-radius: 6px; }
    .category-badge { display: inline-block; background: #3498db; color: white; padding: 0.3em 0.8em; border-radius: 15px; font-size: 0.8em; margin-bottom: 1em; }
    .question { color: #7f8c8d; font-style: italic; }
    code { background-color: #f1f3f4; padding: 2px 6px; border-radius: 3px; font-family: 'Courier New', monospace; }
    .error-chart { padding: 2em; background: #f8d7da; border: 1px solid #f5c6cb; border-radius: 4px; color: #721c24; text-align: center; }
    footer { margin-top: 3em; color: #95a5a6; font-size: 0.85em; text-align: center; }
  </style>
</head>
<body>
  <div class="container">
    <h1>{{title}}</h1>
{{#if introduction}}
    <div class="section">
      <h2>Introduction</h2>
      {{{introduction}}}
    </div>
{{/if}}
{{#if sections}}
    <div class="section">
      <h2>Research Findings</h2>
{{#each sections}}
      <div class="result-item">
        <div class="category-badge">{{category}}</div>
        <h3>{{title}}</h3>
        <p class="question">{{question}}</p>
        <div class="chart-container">
          {{{chart}}}
        </div>
{{#if narrative}}
        <div class="explanation">
          {{{narrative}}}
        </div>
{{/if}}
      </div>
{{/each}}
    </div>
{{/if}}
{{#if conclusion}}
    <div class="section">
      <h2>Conclusion</h2>
      {{{conclusion}}}
    </div>
{{/if}}
    <footer>
      {{metadata.result_count}} findings from {{metadata.question_count}} research questions over a dataset of
      {{metadata.dataset_row_count}} rows and {{metadata.dataset_column_count}} columns. Generated {{generated_at}}.
    </footer>
  </div>
</body>
</html>
"#;

/// Render the report to HTML. Chart failures become placeholders; only a
/// template failure is an error.
pub fn render_report(report: &ArrangedReport, renderer: &dyn ChartRenderer) -> Result<String, RenderError> {
    let sections: Vec<serde_json::Value> = report
        .sections
        .iter()
        .enumerate()
        .map(|(i, section)| {
            let chart_id = format!("vis_{i}");
            let chart = if section.visualization.is_renderable() {
                renderer
                    .materialize(&section.visualization, &chart_id)
                    .unwrap_or_else(|e| {
                        warn!(chart_id = %chart_id, error = %e, "Chart could not be rendered");
                        error_placeholder(&format!("Error generating visualization: {e}"))
                    })
            } else {
                error_placeholder("No visualization available")
            };
            let category = if section.category.trim().is_empty() {
                "Analysis"
            } else {
                section.category.as_str()
            };
            json!({
                "title": section.title,
                "question": section.question,
                "category": category,
                "chart": chart,
                "narrative": markdown::to_html(&section.narrative),
            })
        })
        .collect();

    let data = json!({
        "title": report.title,
        "introduction": markdown::to_html(&report.introduction),
        "conclusion": markdown::to_html(&report.conclusion),
        "sections": sections,
        "metadata": report.metadata,
        "scripts": renderer.scripts(),
        "generated_at": chrono::Utc::now().format("%Y-%m-%d %H:%M UTC").to_string(),
    });

    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(false);
    handlebars
        .render_template(PAGE_TEMPLATE, &data)
        .map_err(|e| RenderError::Template {
            message: e.to_string(),
        })
}

/// Write the document atomically.
pub fn write_report(path: &Path, html: &str) -> Result<(), RenderError> {
    atomic_write(path, html.as_bytes()).map_err(|e| RenderError::Write {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    info!(path = %path.display(), bytes = html.len(), "Report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ReportMetadata, ResearchResult, Visualization};
    use serde_json::json;

    struct FailingRenderer;

    impl ChartRenderer for FailingRenderer {
        fn materialize(&self, _v: &Visualization, chart_id: &str) -> Result<String, RenderError> {
            Err(RenderError::Chart {
                chart_id: chart_id.to_string(),
                message: "engine offline".to_string(),
            })
        }
    }

    fn section(title: &str, visualization: Visualization) -> ResearchResult {
        ResearchResult {
            question: format!("What about {title}?"),
            title: title.to_string(),
            narrative: "Downloads **doubled** in 2021.".to_string(),
            visualization,
            computed_data: vec![json!({"Year": 2021, "count": 2}).as_object().unwrap().clone()],
            steps: vec!["Count papers per year".to_string()],
            category: "temporal".to_string(),
            source_columns: vec!["Year".to_string()],
        }
    }

    fn report() -> ArrangedReport {
        let spec = json!({"mark": "line"}).as_object().unwrap().clone();
        ArrangedReport {
            title: "Papers & <Downloads>".to_string(),
            introduction: "## Overview\nWe look at papers.".to_string(),
            conclusion: "- first\n- second".to_string(),
            sections: vec![
                section("Trend", Visualization::with_inline_data(spec, &[])),
                section("Broken", Visualization::unparsed("not json")),
            ],
            metadata: ReportMetadata {
                question_count: 6,
                result_count: 4,
                dataset_column_count: 3,
                dataset_row_count: 120,
            },
        }
    }

    #[test]
    fn test_render_full_document() {
        let html = render_report(&report(), &VegaEmbedRenderer::default()).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<h1>Papers &amp; &lt;Downloads&gt;</h1>"));
        assert!(html.contains("<h2>Overview</h2>"));
        assert!(html.contains("<ul><li>first</li><li>second</li></ul>"));
        assert_eq!(html.matches("class=\"result-item\"").count(), 2);
        assert!(html.contains("<div class=\"category-badge\">temporal</div>"));
        assert!(html.contains("vegaEmbed(\"#vis_0\""));
        assert!(html.contains("<strong>doubled</strong>"));
        assert!(html.contains("https://cdn.jsdelivr.net/npm/vega-embed@6"));
        assert!(html.contains("120"));
    }

    #[test]
    fn test_unrenderable_chart_gets_placeholder() {
        let html = render_report(&report(), &VegaEmbedRenderer::default()).unwrap();
        assert_eq!(html.matches("<div class=\"error-chart\">").count(), 1);
        assert!(html.contains("No visualization available"));
    }

    #[test]
    fn test_renderer_failure_still_produces_document() {
        let html = render_report(&report(), &FailingRenderer).unwrap();
        assert_eq!(html.matches("<div class=\"error-chart\">").count(), 2);
        assert!(html.contains("engine offline"));
        assert!(html.contains("</html>"));
    }

    #[test]
    fn test_empty_report_renders() {
        let empty = ArrangedReport {
            title: "Empty".to_string(),
            introduction: String::new(),
            conclusion: String::new(),
            sections: vec![],
            metadata: ReportMetadata::default(),
        };
        let html = render_report(&empty, &VegaEmbedRenderer::default()).unwrap();
        assert!(html.contains("<h1>Empty</h1>"));
        assert!(!html.contains("Research Findings"));
        assert!(!html.contains("Introduction"));
    }

    #[test]
    fn test_write_report_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.html");
        write_report(&path, "<html></html>").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<html></html>");
    }
}
