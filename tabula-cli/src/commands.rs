//! Subcommand handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tabula_core::cache::keys;
use tabula_core::config::{
    CacheOverrides, ConfigOverrides, CurationOverrides, LlmOverrides, OutputOverrides,
    ResearchOverrides,
};
use tabula_core::research::SkipReason;
use tabula_core::{
    Pipeline, ResearchCallback, ResearchResult, StageCache, TabulaConfig, VegaEmbedRenderer,
    load_csv, profile_table, render_cached,
};

use crate::{CacheAction, Commands};

/// Map command-line flags onto the highest-priority config layer.
pub fn overrides_for(command: &Commands) -> ConfigOverrides {
    match command {
        Commands::Run {
            cache_dir,
            output,
            breadth,
            depth,
            workers,
            arrangement,
            model,
            no_cache,
            ..
        } => ConfigOverrides {
            research: ResearchOverrides {
                breadth: *breadth,
                depth: *depth,
                max_workers: *workers,
            },
            cache: CacheOverrides {
                enabled: no_cache.then_some(false),
                dir: cache_dir.clone(),
            },
            output: OutputOverrides {
                path: output.clone(),
            },
            curation: CurationOverrides {
                arrangement: *arrangement,
            },
            llm: LlmOverrides {
                model: model.clone(),
                base_url: None,
            },
        },
        Commands::Render { cache_dir, output } => ConfigOverrides {
            cache: CacheOverrides {
                enabled: None,
                dir: cache_dir.clone(),
            },
            output: OutputOverrides {
                path: output.clone(),
            },
            ..Default::default()
        },
        Commands::Profile { .. } | Commands::Cache { .. } => ConfigOverrides::default(),
    }
}

pub async fn handle_command(command: Commands, config: TabulaConfig, quiet: bool) -> anyhow::Result<()> {
    match command {
        Commands::Run { dataset, .. } => {
            let pipeline = Pipeline::from_config(config)?
                .with_callback(Arc::new(ProgressCallback::new(quiet)));
            let summary = pipeline.run(&dataset).await?;
            println!(
                "Report written to {} ({} sections from {} results, {} questions)",
                summary.output.display(),
                summary.section_count,
                summary.result_count,
                summary.question_count
            );
            Ok(())
        }
        Commands::Profile { dataset } => {
            let table = load_csv(&dataset).await?;
            let profile = profile_table(&table, config.research.profile_top_k);
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(())
        }
        Commands::Render { .. } => {
            let renderer = VegaEmbedRenderer::new(config.output.chart_scripts.clone());
            let path = render_cached(&config.cache.dir, &config.output.path, &renderer)?;
            println!("Report written to {}", path.display());
            Ok(())
        }
        Commands::Cache { action } => handle_cache(action, &config),
    }
}

fn handle_cache(action: CacheAction, config: &TabulaConfig) -> anyhow::Result<()> {
    let cache = StageCache::new(&config.cache.dir, true);
    match action {
        CacheAction::Clear { stage: Some(stage) } => {
            if !keys::ALL.contains(&stage.as_str()) {
                anyhow::bail!(
                    "Unknown stage '{}'. Known stages: {}",
                    stage,
                    keys::ALL.join(", ")
                );
            }
            if cache.invalidate(&stage)? {
                println!("Cleared cached stage '{stage}'.");
            } else {
                println!("Stage '{stage}' was not cached.");
            }
            Ok(())
        }
        CacheAction::Clear { stage: None } => {
            let removed = cache.clear()?;
            println!("Cleared {removed} cached stage(s) from {}.", cache.root().display());
            Ok(())
        }
        CacheAction::Status => {
            println!("Cache directory: {}", cache.root().display());
            for key in keys::ALL {
                let state = match cache.get(key) {
                    Ok(Some(_)) => "cached",
                    Ok(None) => "missing",
                    Err(_) => "unreadable",
                };
                println!("  {key:<20} {state}");
            }
            Ok(())
        }
    }
}

/// Prints one line per finished question.
struct ProgressCallback {
    quiet: bool,
    finished: AtomicUsize,
}

impl ProgressCallback {
    fn new(quiet: bool) -> Self {
        Self {
            quiet,
            finished: AtomicUsize::new(0),
        }
    }
}

impl ResearchCallback for ProgressCallback {
    fn on_question_started(&self, _question: &str) {}

    fn on_question_finished(&self, question: &str, outcome: Result<&ResearchResult, &SkipReason>) {
        let n = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
        if self.quiet {
            return;
        }
        match outcome {
            Ok(result) => eprintln!("  [{n}] \u{2713} {}", result.title),
            Err(reason) => eprintln!("  [{n}] \u{2717} {question} ({reason})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tabula_core::ArrangementStrategy;

    #[test]
    fn test_run_overrides() {
        let command = Commands::Run {
            dataset: PathBuf::from("d.csv"),
            cache_dir: Some(PathBuf::from("/tmp/c")),
            output: None,
            breadth: Some(2),
            depth: None,
            workers: Some(3),
            arrangement: Some(ArrangementStrategy::Delegated),
            model: None,
            no_cache: true,
        };
        let overrides = overrides_for(&command);
        assert_eq!(overrides.research.breadth, Some(2));
        assert_eq!(overrides.research.depth, None);
        assert_eq!(overrides.research.max_workers, Some(3));
        assert_eq!(overrides.cache.enabled, Some(false));
        assert_eq!(overrides.cache.dir, Some(PathBuf::from("/tmp/c")));
        assert_eq!(overrides.curation.arrangement, Some(ArrangementStrategy::Delegated));
    }

    #[test]
    fn test_cache_enabled_untouched_without_flag() {
        let command = Commands::Run {
            dataset: PathBuf::from("d.csv"),
            cache_dir: None,
            output: None,
            breadth: None,
            depth: None,
            workers: None,
            arrangement: None,
            model: None,
            no_cache: false,
        };
        assert_eq!(overrides_for(&command).cache.enabled, None);
    }

    #[test]
    fn test_clear_rejects_unknown_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TabulaConfig::default();
        config.cache.dir = dir.path().to_path_buf();
        let err = handle_cache(
            CacheAction::Clear {
                stage: Some("everything".into()),
            },
            &config,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown stage"));
    }

    #[test]
    fn test_clear_single_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TabulaConfig::default();
        config.cache.dir = dir.path().to_path_buf();
        let cache = StageCache::new(dir.path(), true);
        cache.put(keys::RESEARCH_RESULTS, &serde_json::json!([])).unwrap();
        cache.put(keys::DATASET_PROFILE, &serde_json::json!({})).unwrap();

        handle_cache(
            CacheAction::Clear {
                stage: Some(keys::RESEARCH_RESULTS.into()),
            },
            &config,
        )
        .unwrap();
        assert!(cache.get(keys::RESEARCH_RESULTS).unwrap().is_none());
        assert!(cache.get(keys::DATASET_PROFILE).unwrap().is_some());
    }
}
