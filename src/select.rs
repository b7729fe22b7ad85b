use anyhow::Result;
use tracing::info;
use url::Url;

use crate::model::{SourceRepo, UpstreamPackage};

/// A package chosen for mirroring, with its absolute download URL.
#[derive(Clone, Debug)]
pub struct SelectedPackage<'a> {
    pub package: &'a UpstreamPackage,
    pub url: Url,
}

/// A package is compatible when it declares no native code (absent or empty
/// `nativecode`) or when at least one of its ABIs is supported.
pub fn is_abi_compatible(package: &UpstreamPackage, supported_abis: &[String]) -> bool {
    match package.nativecode.as_deref() {
        None | Some([]) => true,
        Some(abis) => abis.iter().any(|abi| supported_abis.contains(abi)),
    }
}

/// Keep at most `max_versions` compatible packages, in index order.
///
/// The ABI filter runs before the bound, so incompatible packages never use
/// up a slot.
pub fn select<'a>(
    source: &SourceRepo,
    packages: &'a [UpstreamPackage],
    max_versions: usize,
    supported_abis: &[String],
) -> Result<Vec<SelectedPackage<'a>>> {
    let mut out = Vec::new();
    for package in packages {
        if out.len() >= max_versions {
            break;
        }
        if !is_abi_compatible(package, supported_abis) {
            info!(
                apk = %package.apk_name,
                nativecode = ?package.nativecode,
                "no compatible ABI"
            );
            continue;
        }
        out.push(SelectedPackage {
            package,
            url: source.asset_url(&package.apk_name)?,
        });
    }
    Ok(out)
}

#[cfg(test)]
#[path = "tests/select_tests.rs"]
mod tests;
