use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Pipeline configuration, read from flat environment variables
/// (`DATABASE_URL`, `REDIS_URL`, `JUDGE_TIME_LIMIT_SECONDS`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Relational store connection string. Required.
    pub database_url: String,
    /// Queue broker URL (`redis://` or `rediss://`). Required.
    pub redis_url: String,

    /// Directory for materialized submission source files. An empty value
    /// disables materialization.
    #[serde(default = "default_submission_storage_path")]
    pub submission_storage_path: PathBuf,

    /// Per-case CPU limit in seconds.
    #[serde(default = "default_judge_time_limit_seconds")]
    pub judge_time_limit_seconds: u64,
    /// Per-case address-space limit in MiB.
    #[serde(default = "default_judge_memory_limit_mb")]
    pub judge_memory_limit_mb: u64,
    /// User the sandbox drops to before exec.
    #[serde(default = "default_judge_user")]
    pub judge_user: String,
    /// Size of the judge worker pool.
    #[serde(default = "default_judge_workers")]
    pub judge_workers: usize,

    /// τ: blended similarity at or above which a report is written.
    #[serde(default = "default_plagiarism_threshold")]
    pub plagiarism_threshold: f64,

    #[serde(default = "default_fp_cache_max_entries")]
    pub fp_cache_max_entries: usize,
    /// Fingerprint cache TTL in seconds.
    #[serde(default = "default_fp_cache_ttl")]
    pub fp_cache_ttl: u64,

    #[serde(default = "default_lsh_tables")]
    pub lsh_tables: usize,
    #[serde(default = "default_lsh_band_size_hint")]
    pub lsh_band_size_hint: usize,
}

fn default_submission_storage_path() -> PathBuf {
    PathBuf::from("/app/submissions")
}
fn default_judge_time_limit_seconds() -> u64 {
    2
}
fn default_judge_memory_limit_mb() -> u64 {
    256
}
fn default_judge_user() -> String {
    "nobody".into()
}
fn default_judge_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
fn default_plagiarism_threshold() -> f64 {
    0.75
}
fn default_fp_cache_max_entries() -> usize {
    similarity::cache::DEFAULT_MAX_ENTRIES
}
fn default_fp_cache_ttl() -> u64 {
    similarity::cache::DEFAULT_TTL.as_secs()
}
fn default_lsh_tables() -> usize {
    similarity::DEFAULT_TABLES
}
fn default_lsh_band_size_hint() -> usize {
    similarity::DEFAULT_BAND_SIZE_HINT
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// The storage directory, or `None` when materialization is disabled.
    pub fn storage_path(&self) -> Option<&Path> {
        if self.submission_storage_path.as_os_str().is_empty() {
            None
        } else {
            Some(&self.submission_storage_path)
        }
    }

    /// Path of the materialized source file for a submission.
    pub fn source_file_path(&self, submission_id: i32) -> Option<PathBuf> {
        self.storage_path()
            .map(|dir| dir.join(format!("{submission_id}.cpp")))
    }

    pub fn fp_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.fp_cache_ttl)
    }
}
