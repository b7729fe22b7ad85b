mod config;
mod index;
mod metadata;
mod names;
mod source;

pub use self::config::{DEFAULT_SUPPORTED_ABIS, HttpConfig, MirrorConfig, PathsConfig};
pub use self::index::{LocalizedEntries, UpstreamAppRecord, UpstreamIndex, UpstreamPackage};
pub use self::metadata::{
    ALLOWED_SIGNING_KEYS, ANTI_FEATURES, CATEGORIES, LOCALIZED, LocalAppOverride, MergedApp,
    is_truthy,
};
pub use self::names::{NameMap, RESERVED_FILE_NAME_CHARS, sanitize_file_name};
pub use self::source::{SourceRepo, normalize_fingerprint};
