//! Local override files and validation of merged records.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

use crate::error::MirrorError;
use crate::model::{
    ALLOWED_SIGNING_KEYS, ANTI_FEATURES, CATEGORIES, LOCALIZED, LocalAppOverride, MergedApp,
};

pub trait MetadataReader: Send + Sync {
    /// Every locally declared app, keyed by application id.
    fn read_overrides(&self) -> Result<BTreeMap<String, LocalAppOverride>>;

    /// Check a merged record against the local metadata schema.
    fn validate(&self, app: &MergedApp) -> Result<(), MirrorError>;
}

const STRING_FIELDS: [&str; 14] = [
    "AuthorEmail",
    "AuthorName",
    "AuthorWebSite",
    "Bitcoin",
    "Changelog",
    "Description",
    "Donate",
    "IssueTracker",
    "License",
    "Name",
    "SourceCode",
    "Summary",
    "Translation",
    "WebSite",
];

const STRING_LIST_FIELDS: [&str; 2] = [CATEGORIES, ALLOWED_SIGNING_KEYS];

/// `metadata/<appid>.yml` files, one per locally declared app.
pub struct YamlMetadataDir {
    dir: PathBuf,
}

impl YamlMetadataDir {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }
}

impl MetadataReader for YamlMetadataDir {
    fn read_overrides(&self) -> Result<BTreeMap<String, LocalAppOverride>> {
        let mut out = BTreeMap::new();
        if !self.dir.is_dir() {
            return Ok(out);
        }

        for entry in fs::read_dir(&self.dir).context("read metadata dir")? {
            let entry = entry.context("read metadata dir entry")?;
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("yml") {
                continue;
            }
            let Some(app_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
            // An empty file declares the app with no local fields.
            let fields: Option<BTreeMap<String, Value>> =
                if bytes.iter().all(u8::is_ascii_whitespace) {
                    None
                } else {
                    serde_yaml::from_slice(&bytes)
                        .with_context(|| format!("parse {}", path.display()))?
                };
            debug!(app = %app_id, "read local metadata");
            out.insert(
                app_id.to_string(),
                LocalAppOverride::new(app_id, fields.unwrap_or_default()),
            );
        }
        Ok(out)
    }

    fn validate(&self, app: &MergedApp) -> Result<(), MirrorError> {
        validate_merged(app)
    }
}

/// Structural checks shared by every reader.
pub fn validate_merged(app: &MergedApp) -> Result<(), MirrorError> {
    let violation = |reason: String| MirrorError::SchemaViolation {
        app_id: app.package_name.clone(),
        reason,
    };

    if !is_valid_app_id(&app.package_name) {
        return Err(violation(format!(
            "{:?} is not a valid application id",
            app.package_name
        )));
    }
    if let Some(name) = app.get("PackageName").and_then(Value::as_str)
        && name != app.package_name
    {
        return Err(violation(format!(
            "upstream package name {} does not match",
            name
        )));
    }

    for key in STRING_FIELDS {
        match app.get(key) {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(other) => {
                return Err(violation(format!("{} must be text, found {}", key, kind(other))));
            }
        }
    }

    for key in STRING_LIST_FIELDS {
        match app.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) if items.iter().all(Value::is_string) => {}
            Some(other) => {
                return Err(violation(format!(
                    "{} must be a list of text, found {}",
                    key,
                    kind(other)
                )));
            }
        }
    }

    match app.get(ANTI_FEATURES) {
        None | Some(Value::Null) | Some(Value::Object(_)) => {}
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => {}
        Some(other) => {
            return Err(violation(format!(
                "{} must be a list or map, found {}",
                ANTI_FEATURES,
                kind(other)
            )));
        }
    }

    match app.get(LOCALIZED) {
        None | Some(Value::Null) => {}
        Some(Value::Object(locales)) if locales.values().all(Value::is_object) => {}
        Some(other) => {
            return Err(violation(format!(
                "{} must map locales to entries, found {}",
                LOCALIZED,
                kind(other)
            )));
        }
    }

    Ok(())
}

/// Java-style package name with at least two segments.
pub fn is_valid_app_id(id: &str) -> bool {
    let segments: Vec<&str> = id.split('.').collect();
    segments.len() >= 2
        && segments.iter().all(|seg| {
            let mut chars = seg.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "text",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}

#[cfg(test)]
#[path = "tests/metadata_tests.rs"]
mod tests;
