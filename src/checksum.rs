use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::model::sanitize_file_name;

pub trait ChecksumComputer: Send + Sync {
    fn sha256_hex(&self, path: &Path) -> Result<String>;

    /// Base64 SHA-256, in a form safe to embed in published file names.
    fn sha256_base64(&self, path: &Path) -> Result<String>;
}

/// SHA-256 with base64 padding removed, so digests can be used verbatim in
/// file names.
#[derive(Clone, Copy, Debug, Default)]
pub struct PaddingFreeSha256;

impl PaddingFreeSha256 {
    fn digest(path: &Path) -> Result<Vec<u8>> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let mut hasher = Sha256::new();
        io::copy(&mut reader, &mut hasher).with_context(|| format!("hash {}", path.display()))?;
        Ok(hasher.finalize().to_vec())
    }
}

impl ChecksumComputer for PaddingFreeSha256 {
    fn sha256_hex(&self, path: &Path) -> Result<String> {
        Ok(hex::encode(Self::digest(path)?))
    }

    fn sha256_base64(&self, path: &Path) -> Result<String> {
        let encoded = base64::encode_config(Self::digest(path)?, base64::URL_SAFE);
        Ok(sanitize_file_name(&encoded))
    }
}

#[cfg(test)]
#[path = "tests/checksum_tests.rs"]
mod tests;
