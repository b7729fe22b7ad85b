use std::time::Duration;

use anyhow::{Context, Result};

pub(super) fn with_retries<T>(
    label: &str,
    attempts: usize,
    backoff: Duration,
    mut f: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut last: Option<anyhow::Error> = None;
    for i in 0..attempts {
        match f() {
            Ok(v) => return Ok(v),
            Err(err) => {
                tracing::debug!(attempt = i + 1, error = %err, "{} failed", label);
                last = Some(err);
                if i + 1 < attempts {
                    std::thread::sleep(backoff * (1u32 << i));
                }
            }
        }
    }
    Err(last
        .unwrap_or_else(|| anyhow::anyhow!("unknown error"))
        .context(label.to_string()))
}

pub(super) fn ensure_ok(
    resp: reqwest::blocking::Response,
    label: &str,
) -> Result<reqwest::blocking::Response> {
    resp.error_for_status()
        .with_context(|| format!("{} status", label))
}
