//! One mirror run: refresh indexes, then resolve, merge, select and sync
//! every locally declared app.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::apk::ApkIdReader;
use crate::cache::{FetchReport, IndexCache, IndexFetcher};
use crate::error::{MirrorError, fatal_cause};
use crate::merge::merge;
use crate::metadata::MetadataReader;
use crate::model::{LocalAppOverride, MergedApp, MirrorConfig, NameMap, SourceRepo};
use crate::prepare::AppsPreparer;
use crate::resolve::resolve;
use crate::select::{SelectedPackage, select};
use crate::store::RepoLayout;
use crate::sync::{AssetFetcher, AssetSynchronizer};

/// Shared flag checked between apps; set on Ctrl-C or on a fatal error.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The pipeline's injected dependencies.
pub struct Collaborators<'a> {
    pub metadata: &'a dyn MetadataReader,
    pub preparer: &'a dyn AppsPreparer,
    pub index_fetcher: &'a dyn IndexFetcher,
    pub asset_fetcher: &'a dyn AssetFetcher,
    pub apk_ids: &'a dyn ApkIdReader,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RunReport {
    pub fetch: FetchReport,
    pub merged: BTreeMap<String, MergedApp>,
    pub not_found: Vec<String>,
    /// Apps skipped for failing validation, with the reason.
    pub rejected: Vec<(String, String)>,
    /// Apps whose assets could not be mirrored this run.
    pub failed: Vec<(String, String)>,
    pub downloaded: usize,
    pub skipped: usize,
}

enum AppOutcome {
    Merged { app: Box<MergedApp>, downloaded: usize, skipped: usize },
    NotFound,
    Rejected(String),
    Failed(String),
}

pub struct Mirror<'a> {
    pub config: &'a MirrorConfig,
    pub layout: &'a RepoLayout,
    pub sources: &'a [SourceRepo],
    pub names: &'a NameMap,
    pub collab: Collaborators<'a>,
    pub cancel: CancelFlag,
}

impl Mirror<'_> {
    pub fn load_cache(&self) -> Result<IndexCache> {
        IndexCache::load(&self.layout.cache_file(), self.sources)
    }

    /// Refresh the index cache only.
    pub fn fetch(&self) -> Result<(IndexCache, FetchReport)> {
        let mut cache = self.load_cache()?;
        let report = cache.refresh(self.sources, self.collab.index_fetcher)?;
        Ok((cache, report))
    }

    /// Resolve and merge one app without touching the filesystem.
    pub fn merge_one(&self, cache: &IndexCache, local: &LocalAppOverride) -> Result<MergedApp> {
        let resolved = resolve(&local.package_name, self.sources, cache)?;
        let merged = merge(local, resolved.app, &resolved.source.url)?;
        self.collab.metadata.validate(&merged)?;
        Ok(merged)
    }

    pub fn run(&self) -> Result<RunReport> {
        self.layout.ensure_dirs()?;
        let overrides = self.collab.metadata.read_overrides()?;
        info!(apps = overrides.len(), "read local metadata");

        let (cache, fetch) = self.fetch()?;
        let mut report = RunReport {
            fetch,
            ..RunReport::default()
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.jobs)
            .build()
            .context("build worker pool")?;
        let fatal: Mutex<Option<anyhow::Error>> = Mutex::new(None);

        let outcomes: Vec<(String, AppOutcome)> = pool.install(|| {
            overrides
                .par_iter()
                .filter_map(|(app_id, local)| {
                    if self.cancel.is_cancelled() {
                        return None;
                    }
                    match self.mirror_app(&cache, local) {
                        Ok(outcome) => Some((app_id.clone(), outcome)),
                        Err(err) => {
                            error!(app = %app_id, error = %format!("{:#}", err), "aborting run");
                            self.cancel.cancel();
                            if let Ok(mut slot) = fatal.lock()
                                && slot.is_none()
                            {
                                *slot = Some(err);
                            }
                            None
                        }
                    }
                })
                .collect()
        });

        if let Some(err) = fatal.into_inner().ok().flatten() {
            return Err(err);
        }
        if self.cancel.is_cancelled() {
            return Err(anyhow!("run cancelled before all apps were mirrored"));
        }

        for (app_id, outcome) in outcomes {
            match outcome {
                AppOutcome::Merged {
                    app,
                    downloaded,
                    skipped,
                } => {
                    report.downloaded += downloaded;
                    report.skipped += skipped;
                    report.merged.insert(app_id, *app);
                }
                AppOutcome::NotFound => report.not_found.push(app_id),
                AppOutcome::Rejected(reason) => report.rejected.push((app_id, reason)),
                AppOutcome::Failed(reason) => report.failed.push((app_id, reason)),
            }
        }

        self.collab.preparer.prepare(&mut report.merged)?;
        info!(
            merged = report.merged.len(),
            not_found = report.not_found.len(),
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            downloaded = report.downloaded,
            "mirror run complete"
        );
        Ok(report)
    }

    /// Per-app errors become outcomes; only fatal errors are returned.
    fn mirror_app(&self, cache: &IndexCache, local: &LocalAppOverride) -> Result<AppOutcome> {
        let app_id = &local.package_name;
        let resolved = match resolve(app_id, self.sources, cache) {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "skipping app");
                return Ok(AppOutcome::NotFound);
            }
        };

        let merged = match merge(local, resolved.app, &resolved.source.url)
            .map_err(|e| format!("{:#}", e))
            .and_then(|m| self.collab.metadata.validate(&m).map(|_| m).map_err(|e| e.to_string()))
        {
            Ok(m) => m,
            Err(reason) => {
                warn!(app = %app_id, reason = %reason, "rejecting app");
                return Ok(AppOutcome::Rejected(reason));
            }
        };

        let selected = match select(
            resolved.source,
            resolved.packages,
            self.config.archive_older,
            &self.config.supported_abis,
        ) {
            Ok(s) => s,
            Err(err) => {
                let reason = format!("{:#}", err);
                warn!(app = %app_id, reason = %reason, "package selection failed");
                return Ok(AppOutcome::Failed(reason));
            }
        };
        if selected.is_empty() {
            warn!(app = %app_id, "no compatible packages selected");
        }
        enforce_signer_policy(local, &selected)?;

        let sync = AssetSynchronizer::new(
            self.layout,
            self.collab.asset_fetcher,
            self.collab.apk_ids,
            self.names,
        );
        match sync.sync(resolved.source, resolved.app, &selected) {
            Ok(r) => Ok(AppOutcome::Merged {
                app: Box::new(merged),
                downloaded: r.downloaded.len(),
                skipped: r.skipped,
            }),
            Err(err) if fatal_cause(&err).is_some() => Err(err),
            Err(err) => {
                let reason = format!("{:#}", err);
                warn!(app = %app_id, reason = %reason, "mirroring failed");
                Ok(AppOutcome::Failed(reason))
            }
        }
    }
}

/// Every selected package must be signed by one of the app's pinned keys.
pub fn enforce_signer_policy(
    local: &LocalAppOverride,
    selected: &[SelectedPackage<'_>],
) -> Result<(), MirrorError> {
    let Some(allowed) = local.allowed_signing_keys() else {
        return Ok(());
    };
    for sel in selected {
        let signer = sel
            .package
            .signer
            .as_deref()
            .map(crate::model::normalize_fingerprint);
        if !signer.as_ref().is_some_and(|s| allowed.contains(s)) {
            return Err(MirrorError::PolicyViolation {
                subject: format!(
                    "{} {} ({})",
                    local.package_name, sel.package.version_code, sel.package.apk_name
                ),
                expected: allowed.join(","),
                found: signer.unwrap_or_else(|| "no signer".to_string()),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/pipeline_tests.rs"]
mod tests;
