//! Conditional index fetches and streaming asset downloads.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use sha2::{Digest, Sha256};
use url::Url;

use super::*;
use crate::cache::{IndexFetch, IndexFetcher};
use crate::model::SourceRepo;
use crate::store::temp_sibling;
use crate::sync::AssetFetcher;

enum IndexResponse {
    NotModified,
    Body { etag: Option<String>, bytes: Vec<u8> },
}

impl IndexFetcher for RemoteClient {
    fn fetch_index(&self, source: &SourceRepo, etag: Option<&str>) -> Result<IndexFetch> {
        let url = source.index_url()?;
        let label = format!("fetch index {}", url);

        let resp = with_retries(&label, self.attempts, self.backoff, || {
            let mut req = self.client.get(url.clone());
            if let Some(etag) = etag {
                req = req.header(IF_NONE_MATCH, etag);
            }
            let resp = req.send().context("send")?;
            if resp.status() == StatusCode::NOT_MODIFIED {
                return Ok(IndexResponse::NotModified);
            }
            let resp = http_client::ensure_ok(resp, "fetch index")?;
            let etag = resp
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = resp.bytes().context("read index body")?.to_vec();
            Ok(IndexResponse::Body { etag, bytes })
        })?;

        match resp {
            IndexResponse::NotModified => Ok(IndexFetch::Unchanged),
            IndexResponse::Body { etag, bytes } => {
                let index = read_signed_index(&bytes, source)?;
                Ok(IndexFetch::Fresh { etag, index })
            }
        }
    }
}

impl AssetFetcher for RemoteClient {
    fn fetch_to(&self, url: &Url, dest: &Path) -> Result<String> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let tmp = temp_sibling(dest);
        let label = format!("download {}", url);

        let digest = with_retries(&label, self.attempts, self.backoff, || {
            let result = self.stream_to_file(url, &tmp);
            if result.is_err() {
                let _ = fs::remove_file(&tmp);
            }
            result
        })?;

        fs::rename(&tmp, dest)
            .with_context(|| format!("rename {} -> {}", tmp.display(), dest.display()))?;
        Ok(digest)
    }
}

impl RemoteClient {
    fn stream_to_file(&self, url: &Url, path: &Path) -> Result<String> {
        let resp = self.client.get(url.clone()).send().context("send")?;
        let mut resp = http_client::ensure_ok(resp, "download")?;

        let file =
            fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut writer = HashingWriter {
            inner: BufWriter::new(file),
            hasher: Sha256::new(),
        };
        io::copy(&mut resp, &mut writer).context("stream body")?;
        writer.flush().context("flush download")?;
        Ok(hex::encode(writer.hasher.finalize()))
    }
}

/// Computes the SHA-256 of everything written through it.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
