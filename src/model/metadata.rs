use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CATEGORIES: &str = "Categories";
pub const ANTI_FEATURES: &str = "AntiFeatures";
pub const ALLOWED_SIGNING_KEYS: &str = "AllowedAPKSigningKeys";
pub const LOCALIZED: &str = "Localized";

/// Locally authored fields for one app. Absent fields inherit from upstream.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalAppOverride {
    pub package_name: String,
    pub fields: BTreeMap<String, Value>,
}

impl LocalAppOverride {
    pub fn new(package_name: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        Self {
            package_name: package_name.into(),
            fields,
        }
    }

    /// Lowercased signer fingerprints this app's packages must match, if pinned.
    pub fn allowed_signing_keys(&self) -> Option<Vec<String>> {
        let keys: Vec<String> = match self.fields.get(ALLOWED_SIGNING_KEYS)? {
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => return None,
        };
        let keys: Vec<String> = keys
            .iter()
            .map(|k| super::source::normalize_fingerprint(k))
            .filter(|k| !k.is_empty())
            .collect();
        if keys.is_empty() { None } else { Some(keys) }
    }
}

/// One app's upstream record merged with its local override.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergedApp {
    pub package_name: String,
    pub source_url: String,
    pub fields: BTreeMap<String, Value>,
}

impl MergedApp {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn string_list(&self, key: &str) -> Vec<String> {
        match self.fields.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn categories(&self) -> Vec<String> {
        self.string_list(CATEGORIES)
    }

    pub fn anti_features(&self) -> Vec<String> {
        self.string_list(ANTI_FEATURES)
    }
}

/// Python-style truthiness: null, false, zero and empty containers are falsy.
pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
