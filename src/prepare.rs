//! Post-merge preparation of apps before they are handed to the index generator.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::checksum::ChecksumComputer;
use crate::model::{LOCALIZED, MergedApp, RESERVED_FILE_NAME_CHARS, sanitize_file_name};
use crate::store::{RepoLayout, temp_sibling};

pub trait AppsPreparer: Send + Sync {
    fn prepare(&self, apps: &mut BTreeMap<String, MergedApp>) -> Result<()>;
}

const GRAPHICS: [&str; 2] = ["icon", "featureGraphic"];
const PUBLISHED_ICON_PATTERN: &str = "*/*/icon_*.png";

/// Publishes mirrored graphics under content-addressed names in the repo
/// (`repo/<pkg>/<locale>/icon_<sha256>.png`) and points the merged records
/// at them.
pub struct GraphicsPublisher<'a> {
    layout: &'a RepoLayout,
    checksums: &'a dyn ChecksumComputer,
    sanitize_existing: bool,
}

impl<'a> GraphicsPublisher<'a> {
    pub fn new(
        layout: &'a RepoLayout,
        checksums: &'a dyn ChecksumComputer,
        sanitize_existing: bool,
    ) -> Self {
        Self {
            layout,
            checksums,
            sanitize_existing,
        }
    }

    fn publish_graphics(&self, app: &mut MergedApp) -> Result<()> {
        let app_dir = self.layout.metadata_dir().join(&app.package_name);
        if !app_dir.is_dir() {
            return Ok(());
        }

        for locale_dir in subdirs(&app_dir)? {
            let Some(locale) = locale_dir.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            for entry in fs::read_dir(&locale_dir)
                .with_context(|| format!("read {}", locale_dir.display()))?
            {
                let path = entry.context("read locale dir entry")?.path();
                let (Some(stem), Some(ext)) = (
                    path.file_stem().and_then(|s| s.to_str()),
                    path.extension().and_then(|s| s.to_str()),
                ) else {
                    continue;
                };
                if !path.is_file() || !GRAPHICS.contains(&stem) {
                    continue;
                }

                let token = self.checksums.sha256_base64(&path)?;
                let published = sanitize_file_name(&format!("{}_{}.{}", stem, token, ext));
                let dest = self
                    .layout
                    .repo_dir()
                    .join(&app.package_name)
                    .join(locale)
                    .join(&published);
                if !dest.exists() {
                    copy_atomic(&path, &dest)?;
                    debug!(file = %dest.display(), "published graphic");
                }
                set_localized(app, locale, stem, Value::String(published));
            }
        }
        Ok(())
    }

    /// Rename `repo/*/*/icon_*.png` files whose names carry base64 padding.
    fn sanitize_published_icons(&self) -> Result<()> {
        let matcher = icon_matcher()?;
        let repo = self.layout.repo_dir();
        if !repo.is_dir() {
            return Ok(());
        }
        for pkg_dir in subdirs(repo)? {
            for locale_dir in subdirs(&pkg_dir)? {
                for entry in fs::read_dir(&locale_dir)
                    .with_context(|| format!("read {}", locale_dir.display()))?
                {
                    let path = entry.context("read locale dir entry")?.path();
                    let Ok(rel) = path.strip_prefix(repo) else {
                        continue;
                    };
                    if !matcher.is_match(rel) {
                        continue;
                    }
                    let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    let clean = sanitize_file_name(name);
                    if clean == name {
                        continue;
                    }
                    let new = path.with_file_name(&clean);
                    if new.exists() {
                        fs::remove_file(&new).with_context(|| format!("remove {}", new.display()))?;
                    }
                    fs::rename(&path, &new)
                        .with_context(|| format!("rename {} -> {}", path.display(), new.display()))?;
                    info!(from = %path.display(), to = %new.display(), "sanitized icon name");
                }
            }
        }
        Ok(())
    }
}

impl AppsPreparer for GraphicsPublisher<'_> {
    fn prepare(&self, apps: &mut BTreeMap<String, MergedApp>) -> Result<()> {
        if self.sanitize_existing {
            self.sanitize_published_icons()?;
        }
        for app in apps.values_mut() {
            self.publish_graphics(app)
                .with_context(|| format!("publish graphics for {}", app.package_name))?;
            if self.sanitize_existing {
                strip_reserved_icon_refs(app);
            }
        }
        Ok(())
    }
}

fn icon_matcher() -> Result<GlobMatcher> {
    Ok(GlobBuilder::new(PUBLISHED_ICON_PATTERN)
        .literal_separator(true)
        .build()
        .context("compile icon pattern")?
        .compile_matcher())
}

fn strip_reserved_icon_refs(app: &mut MergedApp) {
    let clean = |v: &mut Value| {
        if let Value::String(s) = v
            && s.starts_with("icon_")
            && s.contains(RESERVED_FILE_NAME_CHARS)
        {
            *s = sanitize_file_name(s);
        }
    };
    if let Some(icon) = app.fields.get_mut("Icon") {
        clean(icon);
    }
    if let Some(Value::Object(locales)) = app.fields.get_mut(LOCALIZED) {
        for entries in locales.values_mut() {
            if let Some(icon) = entries.get_mut("icon") {
                clean(icon);
            }
        }
    }
}

fn set_localized(app: &mut MergedApp, locale: &str, key: &str, value: Value) {
    let localized = app
        .fields
        .entry(LOCALIZED.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !localized.is_object() {
        *localized = Value::Object(Map::new());
    }
    if let Value::Object(locales) = localized {
        let entries = locales
            .entry(locale.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(entries) = entries {
            entries.insert(key.to_string(), value);
        }
    }
}

fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry.context("read dir entry")?.path();
        if path.is_dir() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn copy_atomic(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).context("create parent directories")?;
    }
    let tmp = temp_sibling(to);
    fs::copy(from, &tmp).with_context(|| format!("copy {} -> {}", from.display(), tmp.display()))?;
    fs::rename(&tmp, to).with_context(|| format!("rename {} -> {}", tmp.display(), to.display()))?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/prepare_tests.rs"]
mod tests;
