use std::time::Duration;

use anyhow::{Context, Result};

use crate::model::HttpConfig;

mod http_client;
use self::http_client::with_retries;

mod fetch;
mod index_jar;
pub use self::index_jar::{JarSignature, read_signed_index, verify_jar_signature};

/// Blocking HTTP client for upstream repositories.
pub struct RemoteClient {
    client: reqwest::blocking::Client,
    attempts: usize,
    backoff: Duration,
}

impl RemoteClient {
    pub fn new(http: &HttpConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("ersatz/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(http.timeout_secs))
            .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
            .build()
            .context("build reqwest client")?;
        Ok(Self {
            client,
            attempts: http.retries.max(1),
            backoff: Duration::from_millis(http.backoff_ms),
        })
    }
}
