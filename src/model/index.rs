use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// The `index-v1.json` document published by a source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamIndex {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<Value>,
    #[serde(default)]
    pub apps: Vec<UpstreamAppRecord>,
    #[serde(default)]
    pub packages: BTreeMap<String, Vec<UpstreamPackage>>,
}

impl UpstreamIndex {
    pub fn app(&self, app_id: &str) -> Option<&UpstreamAppRecord> {
        self.apps.iter().find(|a| a.package_name == app_id)
    }

    pub fn packages_for(&self, app_id: &str) -> &[UpstreamPackage] {
        self.packages
            .get(app_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

pub type LocalizedEntries = BTreeMap<String, Value>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamAppRecord {
    pub package_name: String,

    /// Epoch milliseconds, kept raw so one odd record cannot fail the
    /// whole index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<Value>,

    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub suggested_version_code: Option<String>,

    /// Locale -> field -> value (`icon`, `summary`, `phoneScreenshots`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub localized: BTreeMap<String, LocalizedEntries>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamPackage {
    pub version_code: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,

    pub apk_name: String,

    /// Absent or empty means the package carries no native code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nativecode: Option<Vec<String>>,

    pub hash: String,

    #[serde(default = "default_hash_type")]
    pub hash_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

fn default_hash_type() -> String {
    "sha256".to_string()
}

fn string_or_number<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
