//! # Tabula Core
//!
//! Core library for Tabula, an LLM-driven data report generator.
//! Takes a CSV dataset through profiling, research-question generation,
//! per-question computation and charting, curation, and HTML rendering.

pub mod brain;
pub mod cache;
pub mod compute;
pub mod config;
pub mod curator;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod persistence;
pub mod pipeline;
pub mod profile;
pub mod prompts;
pub mod providers;
pub mod questions;
pub mod render;
pub mod research;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{MockReply, MockTextGenerator, PromptAdapter, TextGenerator};
pub use cache::StageCache;
pub use compute::{ComputeOutcome, DeclarativeEngine, TabularEngine};
pub use config::{ArrangementStrategy, ConfigOverrides, TabulaConfig, load_config};
pub use curator::{DatasetShape, ResultCurator};
pub use dataset::{Table, load_csv};
pub use error::{Result, TabulaError};
pub use pipeline::{Pipeline, RunSummary, render_cached};
pub use profile::{DatasetProfile, profile_table};
pub use questions::QuestionTreeGenerator;
pub use render::{ChartRenderer, VegaEmbedRenderer, render_report, write_report};
pub use research::{NoOpResearchCallback, ResearchCallback, ResearchExecutor};
pub use types::{
    ArrangedReport, ChartFormat, Record, ReportMetadata, ResearchQuestion, ResearchResult,
    Visualization,
};
