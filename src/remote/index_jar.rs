//! Reading `index-v1.jar`: the index document, checked against the signer
//! certificate pin.
//!
//! A pinned source only accepts an index that the JAR signature vouches for:
//! the PKCS#7 block must carry a valid signature over the `.SF` file, the
//! `.SF` file must cover the manifest entry, and the manifest entry must
//! match the index bytes.

use std::io::{Cursor, Read, Seek};

use anyhow::{Context, Result, anyhow};
use cryptographic_message_syntax::SignedData;
use sha2::{Digest, Sha256};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::MirrorError;
use crate::model::{SourceRepo, UpstreamIndex};

const INDEX_ENTRY: &str = "index-v1.json";
const MANIFEST_ENTRY: &str = "META-INF/MANIFEST.MF";
const SIGNATURE_EXTENSIONS: [&str; 3] = [".RSA", ".DSA", ".EC"];
const DIGEST_ATTR: &str = "SHA-256-Digest";
const MANIFEST_DIGEST_ATTR: &str = "SHA-256-Digest-Manifest";

/// What the JAR signature says about the index entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JarSignature {
    Unsigned,
    /// A signature is present but does not vouch for the index.
    Invalid(String),
    /// SHA-256 (lowercase hex) of the certificate whose signature verified.
    Verified(String),
}

/// Parse an index JAR, enforcing the source's certificate pin if it has one.
pub fn read_signed_index(jar: &[u8], source: &SourceRepo) -> Result<UpstreamIndex> {
    let mut archive = ZipArchive::new(Cursor::new(jar)).context("open index jar")?;
    let bytes = read_entry(&mut archive, INDEX_ENTRY)?
        .with_context(|| format!("{} missing from index jar", INDEX_ENTRY))?;

    if let Some(expected) = source.fingerprint.as_deref() {
        let found = match verify_jar_signature(&mut archive, &bytes)? {
            JarSignature::Verified(found) if found == expected => None,
            JarSignature::Verified(found) => Some(found),
            JarSignature::Invalid(reason) => Some(reason),
            JarSignature::Unsigned => Some("unsigned index".to_string()),
        };
        if let Some(found) = found {
            return Err(MirrorError::PolicyViolation {
                subject: format!("source {}", source.url),
                expected: expected.to_string(),
                found,
            }
            .into());
        }
    }

    serde_json::from_slice(&bytes).with_context(|| format!("parse {}", INDEX_ENTRY))
}

/// Check the JAR signature over `index`, the bytes of the index entry.
pub fn verify_jar_signature<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    index: &[u8],
) -> Result<JarSignature> {
    let block_name = archive
        .file_names()
        .find(|name| {
            let upper = name.to_ascii_uppercase();
            upper.starts_with("META-INF/")
                && SIGNATURE_EXTENSIONS.iter().any(|ext| upper.ends_with(ext))
        })
        .map(str::to_string);
    let Some(block_name) = block_name else {
        return Ok(JarSignature::Unsigned);
    };

    let block = read_entry(archive, &block_name)?
        .with_context(|| format!("{} missing from index jar", block_name))?;
    let stem = block_name
        .rsplit_once('.')
        .map_or(block_name.as_str(), |(stem, _)| stem);
    let Some(sf) = read_entry(archive, &format!("{}.SF", stem))? else {
        return Ok(JarSignature::Invalid(format!("{} has no signature file", block_name)));
    };
    let Some(manifest) = read_entry(archive, MANIFEST_ENTRY)? else {
        return Ok(JarSignature::Invalid("index jar has no manifest".to_string()));
    };

    let signed = SignedData::parse_ber(&block).map_err(|err| anyhow!("parse {}: {}", block_name, err))?;
    let Some(cert) = verified_signer(&signed, &sf) else {
        return Ok(JarSignature::Invalid(format!("{} does not verify", block_name)));
    };
    if let Err(reason) = check_coverage(&sf, &manifest, index) {
        return Ok(JarSignature::Invalid(reason));
    }
    Ok(JarSignature::Verified(hex::encode(Sha256::digest(cert))))
}

/// Certificate of the first signer whose signature over `sf` verifies.
fn verified_signer<'a>(signed: &'a SignedData, sf: &[u8]) -> Option<&'a [u8]> {
    signed.signers().find_map(|signer| {
        if signer.signed_attributes().is_some()
            && signer.verify_message_digest_with_content(sf).is_err()
        {
            return None;
        }
        let content = signer.signed_content(Some(sf));
        signed.certificates().find_map(|cert| {
            let verifier = signer.signature_verifier(std::iter::once(cert)).ok()?;
            verifier.verify(&content, signer.signature()).ok()?;
            Some(cert.constructed_data())
        })
    })
}

fn check_coverage(sf: &[u8], manifest: &[u8], index: &[u8]) -> Result<(), String> {
    let manifest_sections = sections(manifest);
    let entry = manifest_sections
        .iter()
        .find(|s| s.get("Name") == Some(INDEX_ENTRY))
        .ok_or_else(|| format!("manifest has no entry for {}", INDEX_ENTRY))?;
    if entry.get(DIGEST_ATTR) != Some(base64_sha256(index).as_str()) {
        return Err(format!("{} does not match its manifest digest", INDEX_ENTRY));
    }

    let sf_sections = sections(sf);
    let whole = sf_sections.first().and_then(|s| s.get(MANIFEST_DIGEST_ATTR));
    if whole == Some(base64_sha256(manifest).as_str()) {
        return Ok(());
    }
    let covered = sf_sections
        .iter()
        .find(|s| s.get("Name") == Some(INDEX_ENTRY))
        .and_then(|s| s.get(DIGEST_ATTR));
    if covered == Some(base64_sha256(entry.raw).as_str()) {
        Ok(())
    } else {
        Err(format!("signature file does not cover {}", INDEX_ENTRY))
    }
}

fn base64_sha256(bytes: &[u8]) -> String {
    base64::encode(Sha256::digest(bytes))
}

/// One blank-line separated block of a manifest or signature file.
struct Section<'a> {
    /// Raw bytes including the terminating blank line; what `.SF` entries digest.
    raw: &'a [u8],
    attrs: Vec<(String, String)>,
}

impl Section<'_> {
    fn get(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn sections(bytes: &[u8]) -> Vec<Section<'_>> {
    let mut out = Vec::new();
    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut start = 0;
    let mut pos = 0;
    while pos < bytes.len() {
        let end = bytes[pos..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(bytes.len(), |i| pos + i + 1);
        let line = String::from_utf8_lossy(&bytes[pos..end]);
        let line = line.trim_end_matches(['\r', '\n']);
        pos = end;

        if line.is_empty() {
            if !attrs.is_empty() {
                out.push(Section {
                    raw: &bytes[start..pos],
                    attrs: std::mem::take(&mut attrs),
                });
            }
            start = pos;
        } else if let Some(continued) = line.strip_prefix(' ') {
            // 72-byte line wrapping
            if let Some((_, value)) = attrs.last_mut() {
                value.push_str(continued);
            }
        } else if let Some((key, value)) = line.split_once(':') {
            attrs.push((key.to_string(), value.trim_start().to_string()));
        }
    }
    if !attrs.is_empty() {
        out.push(Section {
            raw: &bytes[start..],
            attrs,
        });
    }
    out
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<Vec<u8>>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("open {}", name)),
    };
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut bytes)
        .with_context(|| format!("read {}", name))?;
    Ok(Some(bytes))
}

#[cfg(test)]
#[path = "../tests/remote/index_jar_tests.rs"]
mod tests;
