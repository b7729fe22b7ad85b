//! Application id and version of an APK, read from its binary manifest.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

mod axml;

const MANIFEST_ENTRY: &str = "AndroidManifest.xml";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApkId {
    pub app_id: String,
    pub version_code: u64,
    pub version_name: Option<String>,
}

pub trait ApkIdReader: Send + Sync {
    fn read_apk_id(&self, path: &Path) -> Result<ApkId>;
}

/// Reads `AndroidManifest.xml` out of the APK's zip container.
#[derive(Clone, Copy, Debug, Default)]
pub struct ManifestApkIdReader;

impl ApkIdReader for ManifestApkIdReader {
    fn read_apk_id(&self, path: &Path) -> Result<ApkId> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let mut archive = zip::ZipArchive::new(BufReader::new(file))
            .with_context(|| format!("open {} as zip", path.display()))?;
        let mut manifest = Vec::new();
        archive
            .by_name(MANIFEST_ENTRY)
            .with_context(|| format!("{} has no {}", path.display(), MANIFEST_ENTRY))?
            .read_to_end(&mut manifest)
            .with_context(|| format!("read {} from {}", MANIFEST_ENTRY, path.display()))?;
        axml::manifest_id(&manifest).with_context(|| format!("parse manifest of {}", path.display()))
    }
}
