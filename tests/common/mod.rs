#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::net::TcpListener;
use std::path::Path;
use std::process::{Command, Output};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use ring::signature::{Ed25519KeyPair, KeyPair};
use sha2::{Digest, Sha256};
use zip::write::FileOptions;

#[derive(Default)]
struct RepoState {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_index: AtomicBool,
    index_bodies: AtomicUsize,
    not_modified: AtomicUsize,
    downloads: Mutex<Vec<String>>,
}

/// An in-process HTTP server playing an upstream F-Droid repository.
///
/// Files are served from memory under `/repo/`, with a strong entity tag
/// derived from their content.
pub struct FakeRepo {
    pub base_url: String,
    state: Arc<RepoState>,
}

impl FakeRepo {
    pub fn spawn() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").context("bind fake repo")?;
        listener
            .set_nonblocking(true)
            .context("set listener nonblocking")?;
        let addr = listener.local_addr().context("fake repo addr")?;

        let state = Arc::new(RepoState::default());
        let app = Router::new()
            .fallback(serve_file)
            .with_state(state.clone());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build fake repo runtime")?;
        thread::spawn(move || {
            runtime.block_on(async move {
                let listener =
                    tokio::net::TcpListener::from_std(listener).expect("adopt listener");
                axum::serve(listener, app).await.expect("serve fake repo");
            });
        });

        Ok(Self {
            base_url: format!("http://{}/repo", addr),
            state,
        })
    }

    pub fn put(&self, rel: &str, bytes: Vec<u8>) {
        self.state
            .files
            .lock()
            .unwrap()
            .insert(format!("repo/{}", rel), bytes);
    }

    pub fn publish_index(&self, jar: Vec<u8>) {
        self.put("index-v1.jar", jar);
    }

    pub fn set_index_failing(&self, failing: bool) {
        self.state.fail_index.store(failing, Ordering::SeqCst);
    }

    /// Full index bodies served (conditional hits excluded).
    pub fn index_bodies(&self) -> usize {
        self.state.index_bodies.load(Ordering::SeqCst)
    }

    pub fn not_modified(&self) -> usize {
        self.state.not_modified.load(Ordering::SeqCst)
    }

    /// Paths of every non-index file served, in request order.
    pub fn downloads(&self) -> Vec<String> {
        self.state.downloads.lock().unwrap().clone()
    }
}

async fn serve_file(
    State(state): State<Arc<RepoState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = uri.path().trim_start_matches('/').to_string();
    let is_index = path.ends_with("index-v1.jar");
    if is_index && state.fail_index.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let Some(body) = state.files.lock().unwrap().get(&path).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let etag = format!("\"{}\"", sha256_hex(&body));
    let conditional = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    if conditional == Some(etag.as_str()) {
        state.not_modified.fetch_add(1, Ordering::SeqCst);
        return StatusCode::NOT_MODIFIED.into_response();
    }

    if is_index {
        state.index_bodies.fetch_add(1, Ordering::SeqCst);
    } else {
        state.downloads.lock().unwrap().push(path);
    }
    ([(header::ETAG, etag)], body).into_response()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn zip_entries(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        zip.start_file(*name, FileOptions::default())
            .expect("start zip entry");
        zip.write_all(bytes).expect("write zip entry");
    }
    zip.finish().expect("finish zip").into_inner()
}

fn der(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    match content.len() {
        n if n < 0x80 => out.push(n as u8),
        n if n <= 0xff => out.extend([0x81, n as u8]),
        n => out.extend([0x82, (n >> 8) as u8, n as u8]),
    }
    out.extend_from_slice(content);
    out
}

fn seq(parts: &[&[u8]]) -> Vec<u8> {
    der(0x30, &parts.concat())
}

const OID_ED25519: &[u8] = &[0x2b, 0x65, 0x70];
const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];

fn algorithm(oid: &[u8]) -> Vec<u8> {
    seq(&[&der(0x06, oid)])
}

fn name(common_name: &str) -> Vec<u8> {
    let rdn = seq(&[&der(0x06, &[0x55, 0x04, 0x03]), &der(0x0c, common_name.as_bytes())]);
    seq(&[&der(0x31, &rdn)])
}

/// A repository signing identity: a self-signed Ed25519 certificate whose key
/// is derived from the subject, so the same name always yields the same pin.
pub struct RepoSigner {
    subject: String,
    key: Ed25519KeyPair,
    pub cert: Vec<u8>,
}

impl RepoSigner {
    pub fn new(subject: &str) -> Self {
        let seed = Sha256::digest(subject.as_bytes());
        let key = Ed25519KeyPair::from_seed_unchecked(&seed).expect("ed25519 seed");
        let mut public_key = vec![0];
        public_key.extend_from_slice(key.public_key().as_ref());
        let validity = seq(&[&der(0x17, b"250101000000Z"), &der(0x17, b"350101000000Z")]);
        let tbs = seq(&[
            &der(0xa0, &der(0x02, &[0x02])),
            &der(0x02, &[0x01]),
            &algorithm(OID_ED25519),
            &name(subject),
            &validity,
            &name(subject),
            &seq(&[&algorithm(OID_ED25519), &der(0x03, &public_key)]),
        ]);
        let mut signature = vec![0];
        signature.extend_from_slice(key.sign(&tbs).as_ref());
        let cert = seq(&[&tbs, &algorithm(OID_ED25519), &der(0x03, &signature)]);
        Self {
            subject: subject.to_string(),
            key,
            cert,
        }
    }

    /// The pin a source URL carries for this signer.
    pub fn fingerprint(&self) -> String {
        sha256_hex(&self.cert)
    }

    /// PKCS#7 SignedData over `sf`, as found in `META-INF/*.RSA`.
    fn signature_block(&self, sf: &[u8]) -> Vec<u8> {
        let signer_info = seq(&[
            &der(0x02, &[0x01]),
            &seq(&[&name(&self.subject), &der(0x02, &[0x01])]),
            &algorithm(OID_SHA256),
            &algorithm(OID_ED25519),
            &der(0x04, self.key.sign(sf).as_ref()),
        ]);
        let signed_data = seq(&[
            &der(0x02, &[0x01]),
            &der(0x31, &algorithm(OID_SHA256)),
            &seq(&[&der(
                0x06,
                &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01],
            )]),
            &der(0xa0, &self.cert),
            &der(0x31, &signer_info),
        ]);
        seq(&[
            &der(0x06, &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02]),
            &der(0xa0, &signed_data),
        ])
    }
}

fn base64_sha256(bytes: &[u8]) -> String {
    base64::encode(Sha256::digest(bytes))
}

/// `index-v1.jar` for `index`, signed the way jarsigner does when `signer`
/// is given.
pub fn index_jar(index: &serde_json::Value, signer: Option<&RepoSigner>) -> Vec<u8> {
    let json = serde_json::to_vec(index).expect("encode index");
    let Some(signer) = signer else {
        return zip_entries(&[("index-v1.json", &json[..])]);
    };

    let section = format!(
        "Name: index-v1.json\r\nSHA-256-Digest: {}\r\n\r\n",
        base64_sha256(&json)
    );
    let manifest = format!("Manifest-Version: 1.0\r\n\r\n{}", section);
    let sf = format!(
        "Signature-Version: 1.0\r\nSHA-256-Digest-Manifest: {}\r\n\r\nName: index-v1.json\r\nSHA-256-Digest: {}\r\n\r\n",
        base64_sha256(manifest.as_bytes()),
        base64_sha256(section.as_bytes())
    );
    let block = signer.signature_block(sf.as_bytes());
    zip_entries(&[
        ("index-v1.json", &json[..]),
        ("META-INF/MANIFEST.MF", manifest.as_bytes()),
        ("META-INF/INDEX.SF", sf.as_bytes()),
        ("META-INF/INDEX.RSA", &block[..]),
    ])
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend(v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend(v.to_le_bytes());
}

/// Binary XML for `<manifest package=.. versionCode=.. versionName=..>`,
/// with a UTF-16 string pool as produced by aapt.
pub fn binary_manifest(app_id: &str, version_code: u32, version_name: &str) -> Vec<u8> {
    const NONE: u32 = 0xffff_ffff;
    let strings = [
        "versionCode",
        "versionName",
        "package",
        "manifest",
        app_id,
        version_name,
    ];

    let mut data = Vec::new();
    let mut offsets = Vec::new();
    for s in strings {
        offsets.push(data.len() as u32);
        let units: Vec<u16> = s.encode_utf16().collect();
        put_u16(&mut data, units.len() as u16);
        for unit in units {
            put_u16(&mut data, unit);
        }
        put_u16(&mut data, 0);
    }
    while data.len() % 4 != 0 {
        data.push(0);
    }
    let strings_start = 28 + 4 * strings.len();
    let mut pool = Vec::new();
    put_u16(&mut pool, 0x0001);
    put_u16(&mut pool, 28);
    put_u32(&mut pool, (strings_start + data.len()) as u32);
    put_u32(&mut pool, strings.len() as u32);
    put_u32(&mut pool, 0);
    put_u32(&mut pool, 0);
    put_u32(&mut pool, strings_start as u32);
    put_u32(&mut pool, 0);
    for offset in offsets {
        put_u32(&mut pool, offset);
    }
    pool.extend(data);

    let mut resource_map = Vec::new();
    put_u16(&mut resource_map, 0x0180);
    put_u16(&mut resource_map, 8);
    put_u32(&mut resource_map, 16);
    put_u32(&mut resource_map, 0x0101_021b);
    put_u32(&mut resource_map, 0x0101_021c);

    // (name, raw value, type, data)
    let attrs: [(u32, u32, u8, u32); 3] = [
        (2, 4, 0x03, 4),
        (0, NONE, 0x10, version_code),
        (1, 5, 0x03, 5),
    ];
    let mut element = Vec::new();
    put_u16(&mut element, 0x0102);
    put_u16(&mut element, 16);
    put_u32(&mut element, (16 + 20 + 20 * attrs.len()) as u32);
    put_u32(&mut element, 1);
    put_u32(&mut element, NONE);
    put_u32(&mut element, NONE);
    put_u32(&mut element, 3);
    put_u16(&mut element, 20);
    put_u16(&mut element, 20);
    put_u16(&mut element, attrs.len() as u16);
    put_u16(&mut element, 0);
    put_u16(&mut element, 0);
    put_u16(&mut element, 0);
    for (name, raw, data_type, value) in attrs {
        put_u32(&mut element, NONE);
        put_u32(&mut element, name);
        put_u32(&mut element, raw);
        put_u16(&mut element, 8);
        element.push(0);
        element.push(data_type);
        put_u32(&mut element, value);
    }

    let body_len = pool.len() + resource_map.len() + element.len();
    let mut doc = Vec::new();
    put_u16(&mut doc, 0x0003);
    put_u16(&mut doc, 8);
    put_u32(&mut doc, (8 + body_len) as u32);
    doc.extend(pool);
    doc.extend(resource_map);
    doc.extend(element);
    doc
}

/// A minimal APK: a zip holding a binary manifest and a dex stub.
pub fn build_apk(app_id: &str, version_code: u32) -> Vec<u8> {
    let manifest = binary_manifest(app_id, version_code, &format!("1.{}", version_code));
    zip_entries(&[
        ("AndroidManifest.xml", &manifest[..]),
        ("classes.dex", &b"dex\n035\0"[..]),
    ])
}

/// Index package entry for an APK published as `apk_name`.
pub fn package_entry(
    version_code: u32,
    apk_name: &str,
    apk: &[u8],
    nativecode: Option<&[&str]>,
) -> serde_json::Value {
    let mut entry = serde_json::json!({
        "versionCode": version_code,
        "versionName": format!("1.{}", version_code),
        "apkName": apk_name,
        "hash": sha256_hex(apk),
        "hashType": "sha256",
        "size": apk.len(),
    });
    if let Some(abis) = nativecode {
        entry["nativecode"] = serde_json::json!(abis);
    }
    entry
}

/// Write `ersatz.yml` listing `sources` plus any extra YAML lines.
pub fn write_config(root: &Path, sources: &[&str], extra: &str) -> Result<()> {
    let mut yaml = String::from("sources:\n");
    for s in sources {
        yaml.push_str(&format!("  - \"{}\"\n", s));
    }
    yaml.push_str("http:\n  retries: 1\n  backoff_ms: 10\n");
    yaml.push_str(extra);
    std::fs::write(root.join("ersatz.yml"), yaml).context("write ersatz.yml")
}

pub fn write_override(root: &Path, app_id: &str, yaml: &str) -> Result<()> {
    let dir = root.join("metadata");
    std::fs::create_dir_all(&dir).context("create metadata dir")?;
    std::fs::write(dir.join(format!("{}.yml", app_id)), yaml).context("write override")
}

pub fn run_ersatz(root: &Path, args: &[&str]) -> Result<Output> {
    Command::new(env!("CARGO_BIN_EXE_ersatz"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env("RUST_LOG", "info")
        .output()
        .with_context(|| format!("run ersatz {:?}", args))
}

/// Run ersatz and fail with its output unless it exits successfully.
pub fn run_ok(root: &Path, args: &[&str]) -> Result<String> {
    let out = run_ersatz(root, args)?;
    if !out.status.success() {
        anyhow::bail!(
            "ersatz {:?} failed (status {:?})\nstdout:\n{}\nstderr:\n{}",
            args,
            out.status,
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}
