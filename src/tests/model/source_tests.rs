    use super::*;

    #[test]
    fn fingerprint_is_read_from_the_query_and_normalized() {
        let repo = SourceRepo::parse("https://f-droid.org/repo?fingerprint=43:23:8D:51", 0)
            .expect("parse");
        assert_eq!(repo.fingerprint.as_deref(), Some("43238d51"));
        assert_eq!(repo.base.as_str(), "https://f-droid.org/repo");
        assert_eq!(repo.url, "https://f-droid.org/repo?fingerprint=43:23:8D:51");
    }

    #[test]
    fn unpinned_source_has_no_fingerprint() {
        let repo = SourceRepo::parse("https://f-droid.org/repo", 0).expect("parse");
        assert!(repo.fingerprint.is_none());
    }

    #[test]
    fn index_and_asset_urls_extend_the_repo_path() {
        for raw in ["https://f-droid.org/repo", "https://f-droid.org/repo/"] {
            let repo = SourceRepo::parse(raw, 0).expect("parse");
            assert_eq!(
                repo.index_url().expect("index url").as_str(),
                "https://f-droid.org/repo/index-v1.jar"
            );
            assert_eq!(
                repo.asset_url("org.example/en-US/icon.png").expect("asset url").as_str(),
                "https://f-droid.org/repo/org.example/en-US/icon.png"
            );
        }
    }

    #[test]
    fn opaque_urls_are_rejected() {
        assert!(SourceRepo::parse("mailto:repo@example.org", 0).is_err());
        assert!(SourceRepo::parse("relative/path", 0).is_err());
    }

    #[test]
    fn normalize_fingerprint_drops_separators() {
        assert_eq!(normalize_fingerprint("AB:cd 01"), "abcd01");
        assert_eq!(normalize_fingerprint(""), "");
    }
