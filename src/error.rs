use thiserror::Error;

/// Failures the mirror run distinguishes by severity.
///
/// These travel inside `anyhow::Error` like any other error; use
/// [`fatal_cause`] to find out whether a failure must abort the run.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("signing policy violation for {subject}: expected {expected}, found {found}")]
    PolicyViolation {
        subject: String,
        expected: String,
        found: String,
    },

    #[error("checksum mismatch for {package} ({file}): index declares {expected}, downloaded {actual}")]
    ChecksumMismatch {
        package: String,
        file: String,
        expected: String,
        actual: String,
    },

    #[error("fetch from {url} failed: {reason}")]
    TransientFetch { url: String, reason: String },

    #[error("{app_id} is not listed by any configured source")]
    NotFound { app_id: String },

    #[error("{app_id} failed metadata validation: {reason}")]
    SchemaViolation { app_id: String, reason: String },
}

impl MirrorError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MirrorError::PolicyViolation { .. } | MirrorError::ChecksumMismatch { .. }
        )
    }
}

/// The first fatal [`MirrorError`] anywhere in `err`'s chain.
pub fn fatal_cause(err: &anyhow::Error) -> Option<&MirrorError> {
    err.chain()
        .filter_map(|e| e.downcast_ref::<MirrorError>())
        .find(|e| e.is_fatal())
}
