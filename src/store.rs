use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::model::{MirrorConfig, NameMap};

const REPO_DIR: &str = "repo";
const METADATA_DIR: &str = "metadata";
const TMP_DIR: &str = "tmp";
const NAME_MAP_FILE: &str = "appid-name-map.json";
const CACHE_FILE: &str = "ersatz-cache.json";
const MERGED_FILE: &str = "merged-apps.json";

/// On-disk layout of the local repository being built.
#[derive(Clone, Debug)]
pub struct RepoLayout {
    root: PathBuf,
    repo: PathBuf,
    metadata: PathBuf,
    tmp: PathBuf,
    name_map: PathBuf,
}

impl RepoLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            repo: root.join(REPO_DIR),
            metadata: root.join(METADATA_DIR),
            tmp: root.join(TMP_DIR),
            name_map: root.join(NAME_MAP_FILE),
        }
    }

    pub fn from_config(root: &Path, cfg: &MirrorConfig) -> Self {
        let mut layout = Self::new(root);
        let resolve = |p: &PathBuf| root.join(p);
        if let Some(p) = cfg.paths.repo.as_ref() {
            layout.repo = resolve(p);
        }
        if let Some(p) = cfg.paths.metadata.as_ref() {
            layout.metadata = resolve(p);
        }
        if let Some(p) = cfg.paths.tmp.as_ref() {
            layout.tmp = resolve(p);
        }
        if let Some(p) = cfg.paths.name_map.as_ref() {
            layout.name_map = resolve(p);
        }
        layout
    }

    /// Create the working directories if they do not exist yet.
    pub fn ensure_dirs(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(anyhow!(
                "repository root {} is not a directory",
                self.root.display()
            ));
        }
        fs::create_dir_all(&self.repo).context("create repo dir")?;
        fs::create_dir_all(&self.metadata).context("create metadata dir")?;
        fs::create_dir_all(self.staging_dir()).context("create staging dir")?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo
    }

    pub fn metadata_dir(&self) -> &Path {
        &self.metadata
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.tmp.join("staging")
    }

    pub fn cache_file(&self) -> PathBuf {
        self.tmp.join(CACHE_FILE)
    }

    /// Index id to artifact id records for APKs whose manifest names a
    /// different package than the index entry.
    pub fn artifact_ids_file(&self, app_id: &str) -> PathBuf {
        self.tmp.join("artifact-ids").join(format!("{}.json", app_id))
    }

    pub fn merged_apps_file(&self) -> PathBuf {
        self.tmp.join(MERGED_FILE)
    }

    pub fn read_name_map(&self) -> Result<NameMap> {
        if !self.name_map.exists() {
            return Ok(NameMap::default());
        }
        let bytes = fs::read(&self.name_map)
            .with_context(|| format!("read {}", self.name_map.display()))?;
        NameMap::from_json(&bytes)
    }
}

/// Write `bytes` unless the file already holds exactly that content.
///
/// Returns whether the file was written.
pub fn write_if_changed(path: &Path, bytes: &[u8]) -> Result<bool> {
    if let Ok(existing) = fs::read(path)
        && existing == bytes
    {
        return Ok(false);
    }
    write_atomic(path, bytes)?;
    Ok(true)
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("create parent directories")?;
    }
    let tmp = temp_sibling(path);
    fs::write(&tmp, bytes).with_context(|| format!("write temp file {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

/// A temporary path next to `path`, so the final rename stays on one filesystem.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()))
}
