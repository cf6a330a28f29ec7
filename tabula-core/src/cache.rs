//! Disk-backed stage cache.
//!
//! Each pipeline stage stores its output as one pretty-printed JSON file,
//! `<root>/<key>.json`. File presence is a hit. `cache_or_compute` is the only
//! place that decides whether a stage runs, so skip semantics live here and
//! nowhere else.

use std::future::Future;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::persistence::atomic_write_json;

/// Well-known stage keys.
pub mod keys {
    pub const DATASET_PROFILE: &str = "dataset_profile";
    pub const RESEARCH_QUESTIONS: &str = "research_questions";
    pub const RESEARCH_RESULTS: &str = "research_results";
    pub const FINAL_ARRANGEMENT: &str = "final_arrangement";

    pub const ALL: [&str; 4] = [
        DATASET_PROFILE,
        RESEARCH_QUESTIONS,
        RESEARCH_RESULTS,
        FINAL_ARRANGEMENT,
    ];
}

/// A directory of JSON stage outputs.
#[derive(Debug, Clone)]
pub struct StageCache {
    root: PathBuf,
    enabled: bool,
}

impl StageCache {
    pub fn new(root: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            root: root.into(),
            enabled,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CacheError> {
        validate_key(key)?;
        Ok(self.root.join(format!("{key}.json")))
    }

    /// Read a stage value. `Ok(None)` is a miss; a stored `null` comes back as
    /// `Some(Value::Null)`.
    pub fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let path = self.path_for(key)?;
        if !self.enabled || !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|source| CacheError::Io {
            key: key.to_string(),
            source,
        })?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| CacheError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    /// Store a stage value. A disabled cache accepts and discards it.
    pub fn put(&self, key: &str, value: &Value) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        if !self.enabled {
            return Ok(());
        }
        atomic_write_json(&path, value).map_err(|source| CacheError::Io {
            key: key.to_string(),
            source,
        })?;
        debug!(key, path = %path.display(), "Stage cached");
        Ok(())
    }

    /// Return the cached value for `key`, or run `compute` and cache its output.
    ///
    /// A hit never invokes `compute`. An entry that cannot be read or decoded
    /// as `T` is logged and recomputed. A failed write is logged and the fresh
    /// value is still returned. Non-finite floats are stored as `null`.
    pub async fn cache_or_compute<T, E, F, Fut>(&self, key: &str, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        validate_key(key)?;

        match self.get(key) {
            Ok(Some(value)) => match serde_json::from_value::<T>(value) {
                Ok(hit) => {
                    info!(stage = key, "Loaded stage from cache");
                    return Ok(hit);
                }
                Err(e) => warn!(stage = key, error = %e, "Cached stage has wrong shape, recomputing"),
            },
            Ok(None) => {}
            Err(e) => warn!(stage = key, error = %e, "Cached stage unreadable, recomputing"),
        }

        let fresh = compute().await?;

        if self.enabled {
            match serde_json::to_value(&fresh) {
                Ok(value) => {
                    if let Err(e) = self.put(key, &value) {
                        warn!(stage = key, error = %e, "Failed to cache stage output");
                    }
                }
                Err(e) => warn!(stage = key, error = %e, "Stage output is not serializable"),
            }
        }
        Ok(fresh)
    }

    /// Remove one stage entry. Returns whether a file was deleted.
    pub fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path).map_err(|source| CacheError::Io {
            key: key.to_string(),
            source,
        })?;
        Ok(true)
    }

    /// Remove every known stage entry. Returns the number of files deleted.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for key in keys::ALL {
            if self.invalidate(key)? {
                removed += 1;
            }
        }
        info!(root = %self.root.display(), removed, "Stage cache cleared");
        Ok(removed)
    }
}

fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey {
            key: key.to_string(),
            reason: "empty".to_string(),
        });
    }
    if key.starts_with('.') {
        return Err(CacheError::InvalidKey {
            key: key.to_string(),
            reason: "leading '.'".to_string(),
        });
    }
    if let Some(c) = key
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(CacheError::InvalidKey {
            key: key.to_string(),
            reason: format!("illegal character '{c}'"),
        });
    }
    Ok(())
}
