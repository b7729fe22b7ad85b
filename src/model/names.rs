use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Static application id -> display name mapping (`appid-name-map.json`).
///
/// Only used to derive canonical output file names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameMap(BTreeMap<String, String>);

impl NameMap {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("parse app id name map")
    }

    pub fn insert(&mut self, app_id: impl Into<String>, name: impl Into<String>) {
        self.0.insert(app_id.into(), name.into());
    }

    /// Display name for `app_id`, or the id itself when unmapped.
    pub fn display_name<'a>(&'a self, app_id: &'a str) -> &'a str {
        self.0.get(app_id).map(String::as_str).unwrap_or(app_id)
    }

    /// `<name>.apk` for the newest mirrored version, `<name>_<code>.apk` otherwise.
    pub fn apk_file_name(&self, app_id: &str, version_code: u64, newest: bool) -> String {
        let name = self.display_name(app_id);
        let file = if newest {
            format!("{}.apk", name)
        } else {
            format!("{}_{}.apk", name, version_code)
        };
        sanitize_file_name(&file)
    }
}

/// Characters that must not appear in published file names.
pub const RESERVED_FILE_NAME_CHARS: [char; 1] = ['='];

pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| !RESERVED_FILE_NAME_CHARS.contains(c))
        .collect()
}

#[cfg(test)]
#[path = "../tests/model/names_tests.rs"]
mod tests;
