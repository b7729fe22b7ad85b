//! Idempotent mirroring of an app's APKs, graphics and localized text.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::apk::{ApkId, ApkIdReader};
use crate::error::MirrorError;
use crate::model::{NameMap, SourceRepo, UpstreamAppRecord, sanitize_file_name};
use crate::select::SelectedPackage;
use crate::store::{RepoLayout, write_atomic, write_if_changed};

pub trait AssetFetcher: Send + Sync {
    /// Download `url` into `dest` (via a temporary sibling and a rename) and
    /// return the SHA-256 hex digest of the body.
    fn fetch_to(&self, url: &Url, dest: &Path) -> Result<String>;
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SyncReport {
    pub downloaded: Vec<PathBuf>,
    pub skipped: usize,
    pub texts_written: usize,
}

enum LocalizedKind {
    Graphic,
    Screenshots,
    Text,
    Changelog,
    Other,
}

impl LocalizedKind {
    fn of(key: &str) -> Self {
        match key {
            "icon" | "featureGraphic" => Self::Graphic,
            "summary" | "description" => Self::Text,
            "whatsNew" => Self::Changelog,
            k if k.ends_with("Screenshots") => Self::Screenshots,
            _ => Self::Other,
        }
    }
}

pub struct AssetSynchronizer<'a> {
    layout: &'a RepoLayout,
    fetcher: &'a dyn AssetFetcher,
    apk_ids: &'a dyn ApkIdReader,
    names: &'a NameMap,
}

impl<'a> AssetSynchronizer<'a> {
    pub fn new(
        layout: &'a RepoLayout,
        fetcher: &'a dyn AssetFetcher,
        apk_ids: &'a dyn ApkIdReader,
        names: &'a NameMap,
    ) -> Self {
        Self {
            layout,
            fetcher,
            apk_ids,
            names,
        }
    }

    /// Mirror `selected` (newest first) and the app's localized assets.
    pub fn sync(
        &self,
        source: &SourceRepo,
        app: &UpstreamAppRecord,
        selected: &[SelectedPackage<'_>],
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for (i, sel) in selected.iter().enumerate() {
            self.sync_package(&app.package_name, sel, i == 0, &mut report)
                .with_context(|| format!("mirror {}", sel.package.apk_name))?;
        }
        self.sync_localized(source, app, selected, &mut report)?;
        Ok(report)
    }

    fn sync_package(
        &self,
        app_id: &str,
        sel: &SelectedPackage<'_>,
        newest: bool,
        report: &mut SyncReport,
    ) -> Result<()> {
        let pkg = sel.package;
        let dest = self
            .layout
            .repo_dir()
            .join(self.names.apk_file_name(app_id, pkg.version_code, newest));
        if self.holds_version(&dest, pkg.version_code, newest)
            || self.holds_under_artifact_id(app_id, pkg.version_code, newest)
        {
            debug!(apk = %dest.display(), "already mirrored");
            report.skipped += 1;
            return Ok(());
        }
        if !pkg.hash_type.eq_ignore_ascii_case("sha256") {
            bail!("unsupported hash type {}", pkg.hash_type);
        }

        let staging = self.layout.staging_dir().join(sanitize_file_name(&format!(
            "{}_{}.apk",
            safe_component(app_id)?,
            pkg.version_code
        )));
        info!(url = %sel.url, "downloading apk");
        let digest = self.fetcher.fetch_to(&sel.url, &staging)?;
        if !digest.eq_ignore_ascii_case(&pkg.hash) {
            let _ = fs::remove_file(&staging);
            return Err(MirrorError::ChecksumMismatch {
                package: format!("{} {}", app_id, pkg.version_code),
                file: pkg.apk_name.clone(),
                expected: pkg.hash.to_ascii_lowercase(),
                actual: digest,
            }
            .into());
        }

        let id = match self.apk_ids.read_apk_id(&staging) {
            Ok(id) => id,
            Err(err) => {
                let _ = fs::remove_file(&staging);
                return Err(err);
            }
        };
        if id.app_id != app_id || id.version_code != pkg.version_code {
            warn!(
                apk = %pkg.apk_name,
                index_id = %app_id,
                index_version = pkg.version_code,
                apk_id = %id.app_id,
                apk_version = id.version_code,
                "apk identity differs from index entry"
            );
        }

        let final_path = self
            .layout
            .repo_dir()
            .join(self.names.apk_file_name(&id.app_id, id.version_code, newest));
        if newest {
            self.rotate_newest(&final_path, &id)?;
        }
        fs::rename(&staging, &final_path)
            .with_context(|| format!("rename {} -> {}", staging.display(), final_path.display()))?;
        if id.app_id != app_id {
            self.record_artifact_id(app_id, pkg.version_code, &id.app_id)?;
        }
        info!(apk = %final_path.display(), version = id.version_code, "mirrored apk");
        report.downloaded.push(final_path);
        Ok(())
    }

    /// Versioned names identify their version; the unversioned newest name
    /// has to be checked against the artifact itself.
    fn holds_version(&self, dest: &Path, version_code: u64, newest: bool) -> bool {
        if !dest.exists() {
            return false;
        }
        if !newest {
            return true;
        }
        match self.apk_ids.read_apk_id(dest) {
            Ok(id) => id.version_code == version_code,
            Err(err) => {
                warn!(apk = %dest.display(), error = %format!("{:#}", err), "unreadable apk will be replaced");
                false
            }
        }
    }

    /// Whether a build promoted under its artifact's own id, differing from
    /// the index id, still holds this version.
    fn holds_under_artifact_id(&self, app_id: &str, version_code: u64, newest: bool) -> bool {
        let Ok(ids) = self.artifact_ids(app_id) else {
            return false;
        };
        ids.get(&version_code).is_some_and(|artifact_id| {
            let path = self
                .layout
                .repo_dir()
                .join(self.names.apk_file_name(artifact_id, version_code, newest));
            self.holds_version(&path, version_code, newest)
        })
    }

    fn artifact_ids(&self, app_id: &str) -> Result<BTreeMap<u64, String>> {
        let path = self.layout.artifact_ids_file(safe_component(app_id)?);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
    }

    fn record_artifact_id(&self, app_id: &str, version_code: u64, artifact_id: &str) -> Result<()> {
        let mut ids = self.artifact_ids(app_id).unwrap_or_default();
        if ids.get(&version_code).map(String::as_str) == Some(artifact_id) {
            return Ok(());
        }
        ids.insert(version_code, artifact_id.to_string());
        let bytes = serde_json::to_vec_pretty(&ids).context("serialize artifact ids")?;
        write_atomic(&self.layout.artifact_ids_file(safe_component(app_id)?), &bytes)
    }

    /// Move an older build out of the unversioned slot before a newer one lands.
    fn rotate_newest(&self, newest_path: &Path, incoming: &ApkId) -> Result<()> {
        if !newest_path.exists() {
            return Ok(());
        }
        let Ok(old) = self.apk_ids.read_apk_id(newest_path) else {
            return Ok(());
        };
        if old.version_code == incoming.version_code {
            return Ok(());
        }
        let versioned = self
            .layout
            .repo_dir()
            .join(self.names.apk_file_name(&old.app_id, old.version_code, false));
        if versioned.exists() {
            fs::remove_file(newest_path)
                .with_context(|| format!("remove {}", newest_path.display()))?;
        } else {
            fs::rename(newest_path, &versioned).with_context(|| {
                format!("rename {} -> {}", newest_path.display(), versioned.display())
            })?;
        }
        Ok(())
    }

    fn sync_localized(
        &self,
        source: &SourceRepo,
        app: &UpstreamAppRecord,
        selected: &[SelectedPackage<'_>],
        report: &mut SyncReport,
    ) -> Result<()> {
        let pkg = safe_component(&app.package_name)?;
        for (locale, entries) in &app.localized {
            let Ok(locale) = safe_component(locale) else {
                warn!(app = %pkg, locale = %locale, "skipping unsafe locale name");
                continue;
            };
            for (key, value) in entries {
                let result = match LocalizedKind::of(key) {
                    LocalizedKind::Graphic => self.sync_graphic(source, pkg, locale, key, value, report),
                    LocalizedKind::Screenshots => {
                        self.sync_screenshots(source, pkg, locale, key, value, report)
                    }
                    LocalizedKind::Text => {
                        let path = self
                            .layout
                            .metadata_dir()
                            .join(pkg)
                            .join(locale)
                            .join(format!("{}.txt", key));
                        self.write_text(&path, value, report)
                    }
                    LocalizedKind::Changelog => {
                        let version = app
                            .suggested_version_code
                            .clone()
                            .or_else(|| selected.first().map(|s| s.package.version_code.to_string()));
                        match version {
                            Some(version) => {
                                let path = self
                                    .layout
                                    .metadata_dir()
                                    .join(pkg)
                                    .join(locale)
                                    .join("changelogs")
                                    .join(format!("{}.txt", safe_component(&version)?));
                                self.write_text(&path, value, report)
                            }
                            None => {
                                warn!(app = %pkg, locale = %locale, "no version to attach changelog to");
                                Ok(())
                            }
                        }
                    }
                    LocalizedKind::Other => Ok(()),
                };
                result.with_context(|| format!("sync {}/{}/{}", pkg, locale, key))?;
            }
        }
        Ok(())
    }

    fn sync_graphic(
        &self,
        source: &SourceRepo,
        pkg: &str,
        locale: &str,
        key: &str,
        value: &Value,
        report: &mut SyncReport,
    ) -> Result<()> {
        let Some(published) = value.as_str() else {
            return Ok(());
        };
        let Some(dot) = published.rfind('.') else {
            warn!(app = %pkg, locale = %locale, file = %published, "graphic without extension");
            return Ok(());
        };
        let published = safe_component(published)?;
        let dest = self
            .layout
            .metadata_dir()
            .join(pkg)
            .join(locale)
            .join(sanitize_file_name(&format!("{}{}", key, &published[dot..])));
        let url = source.asset_url(&format!("{}/{}/{}", pkg, locale, published))?;
        self.fetch_if_absent(&url, &dest, report)
    }

    fn sync_screenshots(
        &self,
        source: &SourceRepo,
        pkg: &str,
        locale: &str,
        key: &str,
        value: &Value,
        report: &mut SyncReport,
    ) -> Result<()> {
        let Some(files) = value.as_array() else {
            return Ok(());
        };
        for file in files.iter().filter_map(Value::as_str) {
            let file = safe_component(file)?;
            let dest = self
                .layout
                .repo_dir()
                .join(pkg)
                .join(locale)
                .join(key)
                .join(sanitize_file_name(file));
            let url = source.asset_url(&format!("{}/{}/{}/{}", pkg, locale, key, file))?;
            self.fetch_if_absent(&url, &dest, report)?;
        }
        Ok(())
    }

    fn fetch_if_absent(&self, url: &Url, dest: &Path, report: &mut SyncReport) -> Result<()> {
        if dest.exists() {
            report.skipped += 1;
            return Ok(());
        }
        info!(url = %url, "downloading");
        self.fetcher.fetch_to(url, dest)?;
        report.downloaded.push(dest.to_path_buf());
        Ok(())
    }

    fn write_text(&self, path: &Path, value: &Value, report: &mut SyncReport) -> Result<()> {
        let Some(text) = value.as_str() else {
            return Ok(());
        };
        if write_if_changed(path, text.as_bytes())? {
            report.texts_written += 1;
        }
        Ok(())
    }
}

/// Reject names that could escape the directory they are joined onto.
fn safe_component(name: &str) -> Result<&str> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        bail!("unsafe path component {:?}", name);
    }
    Ok(name)
}

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod tests;
