//! Combine an upstream app record with its local override.
//!
//! Upstream keys are renamed to the local metadata schema (first letter
//! uppercased), then every truthy local field replaces its upstream
//! counterpart. Categories and AntiFeatures are the exception: both sides
//! are unioned and sorted.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::model::{
    ANTI_FEATURES, CATEGORIES, LocalAppOverride, MergedApp, UpstreamAppRecord, is_truthy,
};

pub const UNION_FIELDS: [&str; 2] = [CATEGORIES, ANTI_FEATURES];

const ADDED: &str = "added";

pub fn merge(
    local: &LocalAppOverride,
    upstream: &UpstreamAppRecord,
    source_url: &str,
) -> Result<MergedApp> {
    let raw = match serde_json::to_value(upstream).context("serialize upstream record")? {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    let mut fields: BTreeMap<String, Value> = BTreeMap::new();
    for (key, value) in raw {
        if key == ADDED {
            fields.insert(key, added_timestamp(&value)?);
        } else {
            fields.insert(schema_key(&key), value);
        }
    }

    for (key, value) in &local.fields {
        if UNION_FIELDS.contains(&key.as_str()) || !is_truthy(value) {
            continue;
        }
        fields.insert(key.clone(), value.clone());
    }

    for key in UNION_FIELDS {
        let merged = union_values(fields.get(key), local.fields.get(key));
        match merged {
            Some(v) => fields.insert(key.to_string(), v),
            None => fields.remove(key),
        };
    }

    Ok(MergedApp {
        package_name: local.package_name.clone(),
        source_url: source_url.to_string(),
        fields,
    })
}

/// `packageName` -> `PackageName`.
pub fn schema_key(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Epoch milliseconds become RFC 3339 UTC; anything else is kept as is.
fn added_timestamp(value: &Value) -> Result<Value> {
    let Some(millis) = value.as_i64() else {
        return Ok(value.clone());
    };
    let ts = OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .with_context(|| format!("`added` timestamp {} out of range", millis))?;
    let formatted = ts.format(&Rfc3339).context("format `added` timestamp")?;
    Ok(Value::String(formatted))
}

/// Sorted union of two multi-value fields. List entries are unioned as
/// strings; when either side is a map (AntiFeatures with reasons), keys are
/// unioned and the local entry wins for a shared key.
fn union_values(upstream: Option<&Value>, local: Option<&Value>) -> Option<Value> {
    let is_map = |v: Option<&Value>| matches!(v, Some(Value::Object(_)));
    if upstream.is_none() && local.is_none() {
        return None;
    }

    if is_map(upstream) || is_map(local) {
        let mut out = Map::new();
        for side in [upstream, local].into_iter().flatten() {
            match side {
                Value::Object(map) => {
                    for (k, v) in map {
                        out.insert(k.clone(), v.clone());
                    }
                }
                other => {
                    for name in string_items(other) {
                        out.entry(name).or_insert_with(|| Value::Object(Map::new()));
                    }
                }
            }
        }
        // serde_json::Map keeps keys sorted unless `preserve_order` is enabled.
        return Some(Value::Object(out));
    }

    let names: BTreeSet<String> = [upstream, local]
        .into_iter()
        .flatten()
        .flat_map(string_items)
        .collect();
    Some(Value::Array(names.into_iter().map(Value::String).collect()))
}

fn string_items(v: &Value) -> Vec<String> {
    match v {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
#[path = "tests/merge_tests.rs"]
mod tests;
