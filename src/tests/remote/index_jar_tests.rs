    use std::io::Write;

    use super::*;
    use crate::error::fatal_cause;
    use ring::signature::{Ed25519KeyPair, KeyPair};
    use zip::write::FileOptions;

    const OID_SIGNED_DATA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02];
    const OID_DATA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01];
    const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
    const OID_ED25519: &[u8] = &[0x2b, 0x65, 0x70];
    const OID_COMMON_NAME: &[u8] = &[0x55, 0x04, 0x03];

    const INDEX: &[u8] =
        br#"{"repo":{"name":"Test"},"apps":[{"packageName":"org.example.app"}],"packages":{}}"#;
    const TAMPERED: &[u8] =
        br#"{"repo":{"name":"Test"},"apps":[{"packageName":"org.evil.app"}],"packages":{}}"#;

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

    fn algorithm(oid: &[u8]) -> Vec<u8> {
        seq(&[&der(0x06, oid)])
    }

    fn name(common_name: &str) -> Vec<u8> {
        let rdn = seq(&[&der(0x06, OID_COMMON_NAME), &der(0x0c, common_name.as_bytes())]);
        seq(&[&der(0x31, &rdn)])
    }

    /// A self-signed Ed25519 certificate and its key, derived from `subject`.
    struct Signer {
        subject: String,
        key: Ed25519KeyPair,
        cert: Vec<u8>,
    }

    impl Signer {
        fn new(subject: &str) -> Self {
            let seed = Sha256::digest(subject.as_bytes());
            let key = Ed25519KeyPair::from_seed_unchecked(&seed).expect("seed");
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

        fn fingerprint(&self) -> String {
            hex::encode(Sha256::digest(&self.cert))
        }

        /// PKCS#7 block over `sf`, signed by this key, presenting `cert` as
        /// the signing certificate.
        fn block_with_cert(&self, sf: &[u8], cert: &Signer) -> Vec<u8> {
            let signer_info = seq(&[
                &der(0x02, &[0x01]),
                &seq(&[&name(&cert.subject), &der(0x02, &[0x01])]),
                &algorithm(OID_SHA256),
                &algorithm(OID_ED25519),
                &der(0x04, self.key.sign(sf).as_ref()),
            ]);
            signature_block(&cert.cert, &der(0x31, &signer_info))
        }

        fn block(&self, sf: &[u8]) -> Vec<u8> {
            self.block_with_cert(sf, self)
        }
    }

    fn signature_block(cert: &[u8], signer_infos: &[u8]) -> Vec<u8> {
        let signed_data = seq(&[
            &der(0x02, &[0x01]),
            &der(0x31, &algorithm(OID_SHA256)),
            &seq(&[&der(0x06, OID_DATA)]),
            &der(0xa0, cert),
            signer_infos,
        ]);
        seq(&[&der(0x06, OID_SIGNED_DATA), &der(0xa0, &signed_data)])
    }

    fn b64(bytes: &[u8]) -> String {
        base64::encode(Sha256::digest(bytes))
    }

    /// MANIFEST.MF and a `.SF` file vouching for `index`; `whole` selects the
    /// whole-manifest digest instead of the per-entry one.
    fn manifest_and_sf(index: &[u8], whole: bool) -> (Vec<u8>, Vec<u8>) {
        let section = format!("Name: index-v1.json\r\nSHA-256-Digest: {}\r\n\r\n", b64(index));
        let manifest = format!("Manifest-Version: 1.0\r\nCreated-By: test\r\n\r\n{}", section);
        let sf = if whole {
            format!(
                "Signature-Version: 1.0\r\nSHA-256-Digest-Manifest: {}\r\n\r\n",
                b64(manifest.as_bytes())
            )
        } else {
            format!(
                "Signature-Version: 1.0\r\n\r\nName: index-v1.json\r\nSHA-256-Digest: {}\r\n\r\n",
                b64(section.as_bytes())
            )
        };
        (manifest.into_bytes(), sf.into_bytes())
    }

    fn jar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            zip.start_file(*name, FileOptions::default()).expect("start entry");
            zip.write_all(bytes).expect("write entry");
        }
        zip.finish().expect("finish jar").into_inner()
    }

    fn signed_jar(index: &[u8], manifest: &[u8], sf: &[u8], block: &[u8]) -> Vec<u8> {
        jar(&[
            ("index-v1.json", index),
            ("META-INF/MANIFEST.MF", manifest),
            ("META-INF/INDEX.SF", sf),
            ("META-INF/INDEX.RSA", block),
        ])
    }

    fn source(fingerprint: Option<&str>) -> SourceRepo {
        let url = match fingerprint {
            Some(fp) => format!("https://repo.example.org/fdroid/repo?fingerprint={}", fp),
            None => "https://repo.example.org/fdroid/repo".to_string(),
        };
        SourceRepo::parse(&url, 0).expect("source")
    }

    fn violation(err: &anyhow::Error) -> String {
        match fatal_cause(err) {
            Some(MirrorError::PolicyViolation { found, .. }) => found.clone(),
            other => panic!("expected PolicyViolation, got {:?}", other),
        }
    }

    #[test]
    fn unpinned_source_accepts_an_unsigned_jar() {
        let bytes = jar(&[("index-v1.json", INDEX)]);
        let index = read_signed_index(&bytes, &source(None)).expect("read");
        assert!(index.app("org.example.app").is_some());
    }

    #[test]
    fn pinned_source_accepts_its_own_signer() {
        let signer = Signer::new("Test Repo");
        for whole in [true, false] {
            let (manifest, sf) = manifest_and_sf(INDEX, whole);
            let bytes = signed_jar(INDEX, &manifest, &sf, &signer.block(&sf));
            let pin = signer.fingerprint().to_uppercase();
            let index = read_signed_index(&bytes, &source(Some(&pin))).expect("read");
            assert_eq!(index.apps.len(), 1);
        }
    }

    #[test]
    fn verified_signature_reports_the_signer_certificate() {
        let signer = Signer::new(&"long subject ".repeat(30));
        assert!(signer.cert.len() > 0xff);
        let (manifest, sf) = manifest_and_sf(INDEX, true);
        let bytes = signed_jar(INDEX, &manifest, &sf, &signer.block(&sf));
        let mut archive = ZipArchive::new(Cursor::new(bytes)).expect("zip");
        assert_eq!(
            verify_jar_signature(&mut archive, INDEX).expect("verify"),
            JarSignature::Verified(signer.fingerprint())
        );
    }

    #[test]
    fn foreign_signer_is_a_policy_violation() {
        let pinned = Signer::new("Test Repo");
        let other = Signer::new("Someone Else");
        let (manifest, sf) = manifest_and_sf(INDEX, true);
        let bytes = signed_jar(INDEX, &manifest, &sf, &other.block(&sf));

        let err = read_signed_index(&bytes, &source(Some(&pinned.fingerprint())))
            .expect_err("pin mismatch");
        assert_eq!(violation(&err), other.fingerprint());
    }

    #[test]
    fn copied_certificate_without_its_key_is_rejected() {
        let pinned = Signer::new("Test Repo");
        let forger = Signer::new("Someone Else");
        let (manifest, sf) = manifest_and_sf(TAMPERED, true);
        let pin = pinned.fingerprint();

        let forged = forger.block_with_cert(&sf, &pinned);
        let bytes = signed_jar(TAMPERED, &manifest, &sf, &forged);
        let err = read_signed_index(&bytes, &source(Some(&pin))).expect_err("forged signature");
        assert!(violation(&err).contains("does not verify"));

        let no_signers = signature_block(&pinned.cert, &der(0x31, &[]));
        let bytes = signed_jar(TAMPERED, &manifest, &sf, &no_signers);
        let err = read_signed_index(&bytes, &source(Some(&pin))).expect_err("no signer");
        assert!(violation(&err).contains("does not verify"));
    }

    #[test]
    fn index_swapped_after_signing_is_rejected() {
        let signer = Signer::new("Test Repo");
        let (manifest, sf) = manifest_and_sf(INDEX, false);
        let bytes = signed_jar(TAMPERED, &manifest, &sf, &signer.block(&sf));

        let err = read_signed_index(&bytes, &source(Some(&signer.fingerprint())))
            .expect_err("tampered index");
        assert!(violation(&err).contains("manifest digest"));
    }

    #[test]
    fn manifest_not_covered_by_the_signature_is_rejected() {
        let signer = Signer::new("Test Repo");
        let (_, sf) = manifest_and_sf(INDEX, true);
        let (manifest, _) = manifest_and_sf(TAMPERED, true);
        let bytes = signed_jar(TAMPERED, &manifest, &sf, &signer.block(&sf));

        let err = read_signed_index(&bytes, &source(Some(&signer.fingerprint())))
            .expect_err("uncovered manifest");
        assert!(violation(&err).contains("does not cover"));
    }

    #[test]
    fn unsigned_jar_fails_a_pinned_source() {
        let bytes = jar(&[("index-v1.json", INDEX)]);
        let err = read_signed_index(&bytes, &source(Some("ab:cd"))).expect_err("unsigned");
        assert_eq!(violation(&err), "unsigned index");
    }

    #[test]
    fn missing_index_entry_is_not_fatal() {
        let bytes = jar(&[("index.xml", &b"<fdroid/>"[..])]);
        let err = read_signed_index(&bytes, &source(None)).expect_err("no index");
        assert!(fatal_cause(&err).is_none());
    }

    #[test]
    fn malformed_signature_block_is_an_error() {
        let (manifest, sf) = manifest_and_sf(INDEX, true);
        let bytes = signed_jar(INDEX, &manifest, &sf, &b"\x30\x05\x01"[..]);
        assert!(read_signed_index(&bytes, &source(Some("abcd"))).is_err());
    }

    #[test]
    fn manifest_sections_unfold_continuation_lines() {
        let raw = b"Manifest-Version: 1.0\r\n\r\nName: index-v1\r\n .json\r\nSHA-256-Digest: abc\r\n\r\n";
        let parsed = sections(raw);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].get("name"), Some("index-v1.json"));
        assert_eq!(parsed[1].raw, &raw[25..]);
    }
