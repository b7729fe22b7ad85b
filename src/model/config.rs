use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::source::SourceRepo;

pub const DEFAULT_SUPPORTED_ABIS: [&str; 3] = ["arm64-v8a", "armeabi-v7a", "armeabi"];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Upstream repositories, highest priority first. Each entry is a repo
    /// URL, optionally carrying a `fingerprint` query parameter.
    pub sources: Vec<String>,

    /// Maximum number of compatible versions mirrored per app.
    #[serde(default = "default_archive_older")]
    pub archive_older: usize,

    #[serde(default = "default_supported_abis")]
    pub supported_abis: Vec<String>,

    /// Size of the per-app worker pool.
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Strip base64 padding from already-published icon file names.
    #[serde(default)]
    pub sanitize_icon_names: bool,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Attempts per request, including the first one.
    #[serde(default = "default_retries")]
    pub retries: usize,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// Directory overrides, relative to the repository root unless absolute.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default)]
    pub repo: Option<PathBuf>,
    #[serde(default)]
    pub metadata: Option<PathBuf>,
    #[serde(default)]
    pub tmp: Option<PathBuf>,
    #[serde(default)]
    pub name_map: Option<PathBuf>,
}

impl MirrorConfig {
    pub fn from_yaml(bytes: &[u8]) -> Result<Self> {
        let cfg: MirrorConfig = serde_yaml::from_slice(bytes).context("parse mirror config")?;
        if cfg.sources.is_empty() {
            anyhow::bail!("mirror config lists no sources");
        }
        if cfg.jobs == 0 {
            anyhow::bail!("mirror config: jobs must be at least 1");
        }
        Ok(cfg)
    }

    pub fn source_repos(&self) -> Result<Vec<SourceRepo>> {
        self.sources
            .iter()
            .enumerate()
            .map(|(priority, url)| SourceRepo::parse(url, priority))
            .collect()
    }
}

fn default_archive_older() -> usize {
    3
}

fn default_supported_abis() -> Vec<String> {
    DEFAULT_SUPPORTED_ABIS.iter().map(|s| s.to_string()).collect()
}

fn default_jobs() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_retries() -> usize {
    3
}

fn default_backoff_ms() -> u64 {
    200
}

#[cfg(test)]
#[path = "../tests/model/config_tests.rs"]
mod tests;
