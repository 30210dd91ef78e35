use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Decides whether a record mutation warrants rewriting the file's embedded
/// metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataWritePolicy {
    /// File metadata writing is switched off; orientation writes still go out.
    Never,
    /// Rewrite only when a file-relevant field actually changed.
    #[default]
    IfChanged,
    /// Rewrite every mutated record.
    Always,
}

/// Knobs that tune pipeline behaviour.
///
/// All fields carry defaults so a partial file only needs to name what it
/// overrides.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Explicit file worker count. When unset the count is derived from the
    /// hardware concurrency, capped at `max_file_workers`.
    pub file_workers: Option<usize>,
    pub max_file_workers: usize,
    /// Longest a grouped record-store transaction stays open before it is
    /// committed and reopened.
    pub transaction_lift_interval_ms: u64,
    /// How long the pipeline stays warm after draining before it reports idle.
    pub idle_grace_ms: u64,
    /// Database-stage progress is only recomputed every this many records.
    pub db_progress_stride: usize,
    /// Per-worker inbox depth of the file stage.
    pub worker_queue_capacity: usize,
    pub event_channel_capacity: usize,
    pub shutdown_join_timeout_ms: u64,
    pub metadata_write_policy: MetadataWritePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            file_workers: None,
            max_file_workers: 8,
            transaction_lift_interval_ms: 200,
            idle_grace_ms: 1_000,
            db_progress_stride: 10,
            worker_queue_capacity: 64,
            event_channel_capacity: 256,
            shutdown_join_timeout_ms: 30_000,
            metadata_write_policy: MetadataWritePolicy::IfChanged,
        }
    }
}

impl PipelineConfig {
    pub const PATH_ENV: &'static str = "SHOEBOX_PIPELINE_CONFIG_PATH";
    pub const JSON_ENV: &'static str = "SHOEBOX_PIPELINE_CONFIG_JSON";

    /// Degree of parallelism for the file stage.
    pub fn optimal_file_workers(&self) -> usize {
        match self.file_workers {
            Some(explicit) => explicit.max(1),
            None => num_cpus::get().clamp(1, self.max_file_workers.max(1)),
        }
    }

    pub fn transaction_lift_interval(&self) -> Duration {
        Duration::from_millis(self.transaction_lift_interval_ms)
    }

    pub fn idle_grace(&self) -> Duration {
        Duration::from_millis(self.idle_grace_ms)
    }

    pub fn shutdown_join_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_join_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.file_workers == Some(0) {
            return Err(PipelineError::Config("file_workers must be at least 1".into()));
        }
        if self.max_file_workers == 0 {
            return Err(PipelineError::Config(
                "max_file_workers must be at least 1".into(),
            ));
        }
        if self.db_progress_stride == 0 {
            return Err(PipelineError::Config(
                "db_progress_stride must be at least 1".into(),
            ));
        }
        if self.worker_queue_capacity == 0 || self.event_channel_capacity == 0 {
            return Err(PipelineError::Config(
                "channel capacities must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Load configuration overrides. Evaluation order:
    /// 1) `$SHOEBOX_PIPELINE_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$SHOEBOX_PIPELINE_CONFIG_JSON` (inline JSON),
    /// 3) a well-known file in the working directory,
    /// 4) defaults.
    pub fn load_from_env() -> Result<Self> {
        let config = if let Ok(path) = env::var(Self::PATH_ENV) {
            Self::load_from_file(Path::new(&path))?
        } else if let Ok(raw) = env::var(Self::JSON_ENV) {
            Self::parse_json(&raw)?
        } else if let Some(path) = Self::find_default_file() {
            Self::load_from_file(&path)?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents),
            Some("toml") | Some("tml") => toml::from_str(&contents).map_err(|err| {
                PipelineError::Config(format!(
                    "invalid pipeline config {}: {}",
                    path.display(),
                    err
                ))
            }),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    fn parse_from_str(contents: &str, origin: &str) -> Result<Self> {
        // TOML first, then JSON.
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                PipelineError::Config(format!(
                    "failed to parse pipeline config {}: toml error: {}; json error: {}",
                    origin, toml_err, json_err
                ))
            })
        })
    }

    fn parse_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|err| PipelineError::Config(format!("invalid pipeline config json: {err}")))
    }

    fn find_default_file() -> Option<PathBuf> {
        const CANDIDATES: &[&str] = &[
            "pipeline.toml",
            "pipeline.json",
            "config/pipeline.toml",
            "config/pipeline.json",
        ];

        CANDIDATES
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(|path| path.to_path_buf())
    }
}
