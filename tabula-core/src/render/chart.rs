//! Chart materialization.

use crate::error::RenderError;
use crate::types::{ChartFormat, Visualization};

use super::markdown::escape_html;

/// Turns a visualization into an HTML fragment.
pub trait ChartRenderer: Send + Sync {
    /// HTML for one chart. `chart_id` is unique within the page.
    fn materialize(&self, visualization: &Visualization, chart_id: &str) -> Result<String, RenderError>;

    /// Script URLs the page must load for the fragments to work.
    fn scripts(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Client-side Vega-Lite rendering through `vegaEmbed`.
#[derive(Debug, Clone)]
pub struct VegaEmbedRenderer {
    scripts: Vec<String>,
}

impl VegaEmbedRenderer {
    pub fn new(scripts: Vec<String>) -> Self {
        Self { scripts }
    }
}

impl Default for VegaEmbedRenderer {
    fn default() -> Self {
        Self::new(crate::config::OutputConfig::default().chart_scripts)
    }
}

impl ChartRenderer for VegaEmbedRenderer {
    fn materialize(&self, visualization: &Visualization, chart_id: &str) -> Result<String, RenderError> {
        let spec = match (&visualization.format, &visualization.spec) {
            (ChartFormat::VegaLite, Some(spec)) if spec.is_object() => spec,
            _ => {
                return Err(RenderError::Chart {
                    chart_id: chart_id.to_string(),
                    message: "no renderable chart specification".to_string(),
                });
            }
        };
        let json = serde_json::to_string(spec).map_err(|e| RenderError::Chart {
            chart_id: chart_id.to_string(),
            message: e.to_string(),
        })?;
        // keep "</script>" inside string values from closing the tag
        let json = json.replace("</", "<\\/");

        Ok(format!(
            "<div id=\"{chart_id}\"></div>\n<script>vegaEmbed(\"#{chart_id}\", {json}, {{\"actions\": false}}).catch(console.error);</script>"
        ))
    }

    fn scripts(&self) -> Vec<String> {
        self.scripts.clone()
    }
}

/// Placeholder shown where a chart could not be produced.
pub fn error_placeholder(message: &str) -> String {
    format!("<div class=\"error-chart\">{}</div>", escape_html(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vega_embed_fragment() {
        let data = vec![json!({"label": "</script><b>x</b>"}).as_object().unwrap().clone()];
        let viz = Visualization::with_inline_data(json!({"mark": "bar"}).as_object().unwrap().clone(), &data);
        let html = VegaEmbedRenderer::default().materialize(&viz, "vis_0").unwrap();
        assert!(html.starts_with("<div id=\"vis_0\"></div>"));
        assert!(html.contains("vegaEmbed(\"#vis_0\""));
        assert!(html.contains("\"mark\":\"bar\""));
        assert!(!html.contains("</script><b>"));
        assert_eq!(html.matches("</script>").count(), 1);
    }

    #[test]
    fn test_unrenderable_is_error() {
        let err = VegaEmbedRenderer::default()
            .materialize(&Visualization::unparsed("nope"), "vis_1")
            .unwrap_err();
        assert!(matches!(err, RenderError::Chart { ref chart_id, .. } if chart_id == "vis_1"));
    }

    #[test]
    fn test_error_placeholder_escapes() {
        assert_eq!(
            error_placeholder("bad <spec>"),
            "<div class=\"error-chart\">bad &lt;spec&gt;</div>"
        );
    }

    #[test]
    fn test_default_scripts() {
        assert_eq!(VegaEmbedRenderer::default().scripts().len(), 3);
    }
}
