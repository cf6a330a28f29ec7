//! Pipeline orchestration.
//!
//! Stages run strictly in sequence: profile, question tree, research,
//! curation, render. Each stage output goes through the stage cache, so a
//! rerun resumes from the first missing stage.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::brain::{PromptAdapter, TextGenerator};
use crate::cache::{StageCache, keys};
use crate::compute::{DeclarativeEngine, TabularEngine};
use crate::config::TabulaConfig;
use crate::curator::{DatasetShape, ResultCurator};
use crate::dataset::load_csv;
use crate::error::{PipelineError, TabulaError};
use crate::profile::{DatasetProfile, profile_table};
use crate::providers::create_generator;
use crate::questions::QuestionTreeGenerator;
use crate::render::{ChartRenderer, VegaEmbedRenderer, render_report, write_report};
use crate::research::{NoOpResearchCallback, ResearchCallback, ResearchExecutor};
use crate::types::{ArrangedReport, ResearchQuestion, ResearchResult};

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub output: PathBuf,
    pub question_count: usize,
    pub result_count: usize,
    pub section_count: usize,
}

/// The end-to-end report pipeline.
pub struct Pipeline {
    config: TabulaConfig,
    adapter: PromptAdapter,
    engine: Arc<dyn TabularEngine>,
    renderer: Arc<dyn ChartRenderer>,
    callback: Arc<dyn ResearchCallback>,
    cache: StageCache,
}

impl Pipeline {
    pub fn new(config: TabulaConfig, generator: Arc<dyn TextGenerator>) -> Self {
        let adapter = PromptAdapter::new(
            generator,
            config.retry.clone(),
            Duration::from_secs(config.research.call_timeout_secs),
        );
        let cache = StageCache::new(&config.cache.dir, config.cache.enabled);
        let renderer = Arc::new(VegaEmbedRenderer::new(config.output.chart_scripts.clone()));
        Self {
            config,
            adapter,
            engine: Arc::new(DeclarativeEngine::new()),
            renderer,
            callback: Arc::new(NoOpResearchCallback),
            cache,
        }
    }

    /// Build a pipeline whose generator comes from the `llm` config section.
    pub fn from_config(config: TabulaConfig) -> Result<Self, TabulaError> {
        let generator = create_generator(&config.llm)?;
        Ok(Self::new(config, generator))
    }

    pub fn with_engine(mut self, engine: Arc<dyn TabularEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ChartRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn ResearchCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn config(&self) -> &TabulaConfig {
        &self.config
    }

    pub fn cache(&self) -> &StageCache {
        &self.cache
    }

    /// Run every stage for `dataset` and write the report.
    ///
    /// Fails only when the dataset cannot be loaded, the breadth questions
    /// cannot be generated, or the document cannot be written.
    pub async fn run(&self, dataset: &Path) -> Result<RunSummary, TabulaError> {
        let table = load_csv(dataset)
            .await
            .map_err(PipelineError::DatasetUnavailable)?;
        let table = Arc::new(table);
        let research = &self.config.research;

        let profile: DatasetProfile = self
            .cache
            .cache_or_compute::<_, TabulaError, _, _>(keys::DATASET_PROFILE, || async {
                Ok(profile_table(&table, research.profile_top_k))
            })
            .await?;
        info!(columns = profile.column_count(), "Dataset profiled");

        let questions: Vec<ResearchQuestion> = self
            .cache
            .cache_or_compute::<_, TabulaError, _, _>(keys::RESEARCH_QUESTIONS, || async {
                let generator = QuestionTreeGenerator::new(self.adapter.clone(), research);
                Ok(generator.generate(&profile, table.row_count).await?)
            })
            .await?;

        let results: Vec<ResearchResult> = self
            .cache
            .cache_or_compute::<_, TabulaError, _, _>(keys::RESEARCH_RESULTS, || async {
                let executor = ResearchExecutor::new(
                    self.adapter.clone(),
                    self.engine.clone(),
                    table.clone(),
                    research,
                )
                .with_callback(self.callback.clone());
                Ok(executor.research_all(&questions).await)
            })
            .await?;

        let shape = DatasetShape {
            rows: table.row_count,
            columns: table.column_count(),
        };
        let report: ArrangedReport = self
            .cache
            .cache_or_compute::<_, TabulaError, _, _>(keys::FINAL_ARRANGEMENT, || async {
                let curator = ResultCurator::new(self.adapter.clone(), self.config.curation.arrangement);
                Ok(curator.curate(results.clone(), questions.len(), shape).await)
            })
            .await?;

        let output = self.write(&report)?;
        Ok(RunSummary {
            output,
            question_count: questions.len(),
            result_count: results.len(),
            section_count: report.sections.len(),
        })
    }

    /// Re-render the report from the cached `final_arrangement` stage,
    /// without any backend calls.
    pub fn render_from_cache(&self) -> Result<PathBuf, TabulaError> {
        render_cached(self.cache.root(), &self.config.output.path, self.renderer.as_ref())
    }

    fn write(&self, report: &ArrangedReport) -> Result<PathBuf, TabulaError> {
        write_document(report, self.renderer.as_ref(), &self.config.output.path)
    }
}

/// Render the cached `final_arrangement` under `cache_root` to `output`.
///
/// Reads the stage even when caching is disabled for runs.
pub fn render_cached(
    cache_root: &Path,
    output: &Path,
    renderer: &dyn ChartRenderer,
) -> Result<PathBuf, TabulaError> {
    let reader = StageCache::new(cache_root, true);
    let value = reader
        .get(keys::FINAL_ARRANGEMENT)?
        .ok_or_else(|| PipelineError::MissingStage {
            stage: keys::FINAL_ARRANGEMENT.to_string(),
        })?;
    let report: ArrangedReport = serde_json::from_value(value)?;
    write_document(&report, renderer, output)
}

fn write_document(
    report: &ArrangedReport,
    renderer: &dyn ChartRenderer,
    output: &Path,
) -> Result<PathBuf, TabulaError> {
    let html = render_report(report, renderer)?;
    write_report(output, &html)?;
    info!(
        path = %output.display(),
        sections = report.sections.len(),
        "Report rendered"
    );
    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockTextGenerator;

    fn config_in(dir: &Path) -> TabulaConfig {
        let mut config = TabulaConfig::default();
        config.cache.dir = dir.join("cache");
        config.output.path = dir.join("report.html");
        config.retry.max_retries = 0;
        config
    }

    #[tokio::test]
    async fn test_missing_dataset_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config_in(dir.path()), Arc::new(MockTextGenerator::new()));
        let err = pipeline.run(&dir.path().join("absent.csv")).await.unwrap_err();
        assert!(matches!(
            err,
            TabulaError::Pipeline(PipelineError::DatasetUnavailable(_))
        ));
        assert!(!dir.path().join("report.html").exists());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("d.csv");
        std::fs::write(&csv, "a,b\n1,x\n2,y\n").unwrap();
        let pipeline = Pipeline::new(config_in(dir.path()), Arc::new(MockTextGenerator::unreachable()));
        let err = pipeline.run(&csv).await.unwrap_err();
        assert!(matches!(
            err,
            TabulaError::Pipeline(PipelineError::BackendUnreachable(_))
        ));
        // the profile stage completed before the failure
        assert!(dir.path().join("cache").join("dataset_profile.json").exists());
    }

    #[test]
    fn test_render_from_cache_requires_stage() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config_in(dir.path()), Arc::new(MockTextGenerator::new()));
        let err = pipeline.render_from_cache().unwrap_err();
        assert!(matches!(err, TabulaError::Pipeline(PipelineError::MissingStage { .. })));
    }
}
