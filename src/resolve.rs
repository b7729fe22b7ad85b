use crate::cache::IndexCache;
use crate::error::MirrorError;
use crate::model::{SourceRepo, UpstreamAppRecord, UpstreamPackage};

/// The single upstream that supplies an app's record and packages.
#[derive(Clone, Copy, Debug)]
pub struct Resolved<'a> {
    pub source: &'a SourceRepo,
    pub app: &'a UpstreamAppRecord,
    pub packages: &'a [UpstreamPackage],
}

/// Find the highest-priority source whose cached index lists `app_id`.
///
/// Lower-priority sources are never consulted once a match is found, so an
/// app's fields and packages always come from exactly one upstream.
pub fn resolve<'a>(
    app_id: &str,
    sources: &'a [SourceRepo],
    cache: &'a IndexCache,
) -> Result<Resolved<'a>, MirrorError> {
    for source in sources {
        let Some(index) = cache.index(&source.url) else {
            continue;
        };
        if let Some(app) = index.app(app_id) {
            return Ok(Resolved {
                source,
                app,
                packages: index.packages_for(app_id),
            });
        }
    }
    Err(MirrorError::NotFound {
        app_id: app_id.to_string(),
    })
}

#[cfg(test)]
#[path = "tests/resolve_tests.rs"]
mod tests;
