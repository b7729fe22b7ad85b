use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use url::Url;

/// An upstream repository, as configured.
///
/// `url` is the configured string verbatim and is the key the index cache
/// uses. `base` is the same URL stripped of query and fragment; index and
/// asset paths are resolved against it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SourceRepo {
    pub url: String,
    #[serde(serialize_with = "serialize_url")]
    pub base: Url,
    pub fingerprint: Option<String>,
    pub priority: usize,
}

impl SourceRepo {
    pub fn parse(raw: &str, priority: usize) -> Result<Self> {
        let parsed = Url::parse(raw).with_context(|| format!("parse source url {}", raw))?;
        if parsed.cannot_be_a_base() {
            return Err(anyhow!("source url {} cannot be used as a base", raw));
        }

        let fingerprint = parsed
            .query_pairs()
            .find(|(k, _)| k == "fingerprint")
            .map(|(_, v)| normalize_fingerprint(&v))
            .filter(|f| !f.is_empty());

        let mut base = parsed.clone();
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self {
            url: raw.to_string(),
            base,
            fingerprint,
            priority,
        })
    }

    /// Absolute URL of a repo-relative path such as `foo.apk` or
    /// `org.example/en-US/icon.png`.
    pub fn asset_url(&self, rel: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("source url {} cannot be used as a base", self.url))?
            .pop_if_empty()
            .extend(rel.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    pub fn index_url(&self) -> Result<Url> {
        self.asset_url("index-v1.jar")
    }
}

/// Lowercase hex with separators removed, so `AB:CD` and `abcd` compare equal.
pub fn normalize_fingerprint(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn serialize_url<S: serde::Serializer>(url: &Url, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(url.as_str())
}

#[cfg(test)]
#[path = "../tests/model/source_tests.rs"]
mod tests;
