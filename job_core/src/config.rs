use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_JOB_ENGINE_CONFIG: &str = include_str!("data/job_engine_config.json");
pub const JOB_ENGINE_CONFIG_ENV: &str = "JOB_ENGINE_CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    cache: CacheConfig,
    search: SearchConfig,
    pipeline: PipelineConfig,
}

impl EngineConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            Self::from_json_str(BUILTIN_JOB_ENGINE_CONFIG)
                .expect("builtin job engine config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let thresholds = &self.search.distance_thresholds;
        if thresholds.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::InvalidThresholds(thresholds.clone()));
        }
        if thresholds.first().is_some_and(|first| *first <= 0) {
            return Err(ConfigError::InvalidThresholds(thresholds.clone()));
        }
        Ok(())
    }

    pub fn cache(&self) -> &CacheConfig {
        &self.cache
    }

    pub fn search(&self) -> &SearchConfig {
        &self.search
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    pub fn cache_mut(&mut self) -> &mut CacheConfig {
        &mut self.cache
    }

    pub fn pipeline_mut(&mut self) -> &mut PipelineConfig {
        &mut self.pipeline
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse job engine config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read job engine config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("distance thresholds must be positive and strictly ascending, got {0:?}")]
    InvalidThresholds(Vec<i64>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_refresh_interval_ticks: u64,
    pub default_max_size: usize,
    pub memo_max_entries_per_map: usize,
    pub min_partitions_per_tick: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_refresh_interval_ticks: 300,
            default_max_size: 512,
            memo_max_entries_per_map: 4096,
            min_partitions_per_tick: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Ascending squared-distance cutoffs; one overflow bucket is added.
    distance_thresholds: Vec<i64>,
}

impl SearchConfig {
    pub fn distance_thresholds(&self) -> &[i64] {
        &self.distance_thresholds
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            distance_thresholds: vec![100, 400, 1600, 6400],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub eligibility_cache_ticks: u64,
    pub slow_execution_warn_ms: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            eligibility_cache_ticks: 60,
            slow_execution_warn_ms: 5.0,
        }
    }
}

#[derive(Resource, Debug, Clone)]
pub struct EngineConfigHandle(pub Arc<EngineConfig>);

impl EngineConfigHandle {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self(config)
    }

    pub fn get(&self) -> Arc<EngineConfig> {
        Arc::clone(&self.0)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.0
    }
}

/// Loads the override named by `JOB_ENGINE_CONFIG_PATH`, falling back to the
/// builtin document when the variable is unset or the file is unusable.
pub fn load_engine_config_from_env() -> (Arc<EngineConfig>, Option<PathBuf>) {
    if let Some(path) = env::var(JOB_ENGINE_CONFIG_ENV).ok().map(PathBuf::from) {
        match EngineConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "job_core::config",
                    path = %path.display(),
                    "engine_config.loaded=file"
                );
                return (Arc::new(config), Some(path));
            }
            Err(err) => {
                tracing::warn!(
                    target: "job_core::config",
                    path = %path.display(),
                    error = %err,
                    "engine_config.load_failed"
                );
            }
        }
    }

    tracing::info!(target: "job_core::config", "engine_config.loaded=builtin");
    (EngineConfig::builtin(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_matches_defaults() {
        let config = EngineConfig::builtin();
        assert_eq!(config.cache().default_refresh_interval_ticks, 300);
        assert_eq!(config.cache().default_max_size, 512);
        assert_eq!(config.search().distance_thresholds(), &[100, 400, 1600, 6400]);
        assert_eq!(config.pipeline().eligibility_cache_ticks, 60);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "cache": { "default_max_size": 8 } }"#)
            .expect("partial config parses");
        assert_eq!(config.cache().default_max_size, 8);
        assert_eq!(config.cache().default_refresh_interval_ticks, 300);
        assert_eq!(config.search().distance_thresholds().len(), 4);
    }

    #[test]
    fn rejects_unsorted_thresholds() {
        let err = EngineConfig::from_json_str(r#"{ "search": { "distance_thresholds": [400, 100] } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThresholds(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = EngineConfig::from_file(Path::new("/nonexistent/job_engine.json")).unwrap_err();
        assert!(err.to_string().contains("job_engine.json"));
    }
}
