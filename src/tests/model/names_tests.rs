    use super::*;

    #[test]
    fn unmapped_apps_use_their_id() {
        let names = NameMap::default();
        assert_eq!(names.apk_file_name("org.example.app", 3, true), "org.example.app.apk");
        assert_eq!(names.apk_file_name("org.example.app", 3, false), "org.example.app_3.apk");
    }

    #[test]
    fn mapped_names_come_from_the_json_map() {
        let names = NameMap::from_json(br#"{"org.example.app": "Example"}"#).expect("parse");
        assert_eq!(names.display_name("org.example.app"), "Example");
        assert_eq!(names.apk_file_name("org.example.app", 12, false), "Example_12.apk");
        assert_eq!(names.display_name("org.other"), "org.other");
    }

    #[test]
    fn reserved_characters_are_removed() {
        assert_eq!(sanitize_file_name("icon_ab==.png"), "icon_ab.png");
        let mut names = NameMap::default();
        names.insert("org.example.app", "a=b");
        assert_eq!(names.apk_file_name("org.example.app", 1, true), "ab.apk");
    }
