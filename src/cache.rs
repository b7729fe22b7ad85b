//! Disk-backed cache of upstream indexes, refreshed with conditional requests.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MirrorError, fatal_cause};
use crate::model::{SourceRepo, UpstreamIndex};
use crate::store::write_atomic;

const CACHE_VERSION: u32 = 1;

/// Result of one conditional index request.
pub enum IndexFetch {
    /// The upstream answered "not modified" for the stored entity tag.
    Unchanged,
    Fresh {
        etag: Option<String>,
        index: UpstreamIndex,
    },
}

pub trait IndexFetcher: Send + Sync {
    fn fetch_index(&self, source: &SourceRepo, etag: Option<&str>) -> Result<IndexFetch>;
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub index: Option<UpstreamIndex>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct CacheDocument {
    version: u32,
    entries: BTreeMap<String, CacheEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    /// New payload downloaded and parsed.
    Fresh,
    /// Upstream confirmed the cached payload is current.
    Unchanged,
    /// Fetch failed; the last known good payload is used.
    Stale,
    /// Fetch failed and nothing is cached; the source contributes no apps.
    Missing,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct FetchReport {
    pub outcomes: Vec<(String, FetchOutcome)>,
    /// Whether the cache document was rewritten during the refresh.
    pub persisted: bool,
}

impl FetchReport {
    pub fn outcome(&self, url: &str) -> Option<FetchOutcome> {
        self.outcomes
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, o)| *o)
    }

    pub fn parsed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == FetchOutcome::Fresh)
            .count()
    }
}

/// Index cache for one run, keyed by the configured source URLs.
pub struct IndexCache {
    path: PathBuf,
    doc: CacheDocument,
}

impl IndexCache {
    /// Load the persisted cache, discarding it entirely if it was built for
    /// a different set of sources.
    pub fn load(path: &Path, sources: &[SourceRepo]) -> Result<Self> {
        let mut cache = Self {
            path: path.to_path_buf(),
            doc: empty_document(),
        };

        if path.exists() {
            let parsed = fs::read(path)
                .with_context(|| format!("read {}", path.display()))
                .and_then(|bytes| {
                    serde_json::from_slice::<CacheDocument>(&bytes).context("parse index cache")
                });
            match parsed {
                Ok(doc) if doc.version == CACHE_VERSION => cache.doc = doc,
                Ok(doc) => warn!(version = doc.version, "ignoring index cache with unknown version"),
                Err(err) => warn!(error = %format!("{:#}", err), "ignoring unreadable index cache"),
            }
        }

        let configured: BTreeSet<&str> = sources.iter().map(|s| s.url.as_str()).collect();
        let cached: BTreeSet<&str> = cache.doc.entries.keys().map(String::as_str).collect();
        if cached.is_empty() {
            debug!("index cache is empty");
        } else if configured == cached {
            info!(path = %path.display(), "loading indexes from cache");
        } else {
            info!("configured sources changed; resetting index cache");
            cache.invalidate();
        }

        for s in sources {
            cache.doc.entries.entry(s.url.clone()).or_default();
        }
        Ok(cache)
    }

    /// Drop every cached entry.
    pub fn invalidate(&mut self) {
        self.doc = empty_document();
    }

    pub fn entry(&self, url: &str) -> Option<&CacheEntry> {
        self.doc.entries.get(url)
    }

    pub fn index(&self, url: &str) -> Option<&UpstreamIndex> {
        self.entry(url).and_then(|e| e.index.as_ref())
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.doc.entries.keys().map(String::as_str)
    }

    /// Refresh every source in priority order.
    ///
    /// Transient failures fall back to the cached payload. A signing policy
    /// violation aborts the refresh.
    pub fn refresh(
        &mut self,
        sources: &[SourceRepo],
        fetcher: &dyn IndexFetcher,
    ) -> Result<FetchReport> {
        let mut report = FetchReport::default();

        for source in sources {
            let entry = self.doc.entries.entry(source.url.clone()).or_default();
            let outcome = match fetcher.fetch_index(source, entry.etag.as_deref()) {
                Ok(IndexFetch::Unchanged) if entry.index.is_some() => {
                    debug!(source = %source.url, "index not modified");
                    FetchOutcome::Unchanged
                }
                Ok(IndexFetch::Unchanged) => {
                    warn!(source = %source.url, "upstream reported not modified but nothing is cached");
                    entry.etag = None;
                    FetchOutcome::Missing
                }
                Ok(IndexFetch::Fresh { etag, index })
                    if entry.etag == etag && entry.index.as_ref() == Some(&index) =>
                {
                    debug!(source = %source.url, "index body matches the cached payload");
                    FetchOutcome::Unchanged
                }
                Ok(IndexFetch::Fresh { etag, index }) => {
                    info!(
                        source = %source.url,
                        apps = index.apps.len(),
                        "downloaded new index"
                    );
                    entry.etag = etag;
                    entry.index = Some(index);
                    FetchOutcome::Fresh
                }
                Err(err) => {
                    if fatal_cause(&err).is_some() {
                        return Err(err.context(format!("refresh index for {}", source.url)));
                    }
                    let failure = MirrorError::TransientFetch {
                        url: source.url.clone(),
                        reason: format!("{:#}", err),
                    };
                    if entry.index.is_some() {
                        warn!(error = %failure, "using cached index");
                        FetchOutcome::Stale
                    } else {
                        warn!(error = %failure, "no cached index; source contributes no apps");
                        FetchOutcome::Missing
                    }
                }
            };

            if outcome == FetchOutcome::Fresh {
                self.save()?;
                report.persisted = true;
            }
            report.outcomes.push((source.url.clone(), outcome));
        }

        Ok(report)
    }

    pub fn save(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.doc).context("serialize index cache")?;
        write_atomic(&self.path, &bytes).context("write index cache")
    }
}

fn empty_document() -> CacheDocument {
    CacheDocument {
        version: CACHE_VERSION,
        entries: BTreeMap::new(),
    }
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
