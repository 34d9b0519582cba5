//! Asset fetcher: plain "remote file to local path" transfers.
//!
//! Used for posters and subtitle tracks. Not specific to video and carries no
//! retry policy of its own; retrying is the caller's decision.

use futures::StreamExt;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::StashConfig;
use crate::utils::fs;
use crate::{Error, Result};

/// Per-request options for one fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Extra request headers; these override the fetcher defaults.
    pub headers: Vec<(String, String)>,
    /// Per-request timeout override.
    pub timeout: Option<Duration>,
}

/// Outcome of a successful fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched {
    /// The file was transferred; carries the byte size written.
    Downloaded(u64),
    /// A non-empty file already existed at the destination; no network
    /// activity happened.
    AlreadyPresent,
}

/// HTTP fetcher for poster/subtitle collateral.
pub struct AssetFetcher {
    client: reqwest::Client,
    user_agent: String,
    default_timeout: Duration,
}

impl AssetFetcher {
    pub fn new(config: &StashConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            default_timeout: config.fetch_timeout,
        })
    }

    /// Ensure a non-empty file exists at `dest`.
    ///
    /// Idempotent: an existing non-empty destination short-circuits without
    /// network activity. Any failure removes the partial file before the
    /// error is surfaced, so callers never observe a zero-byte artifact.
    pub async fn fetch(&self, url: &str, dest: &Path, options: &FetchOptions) -> Result<Fetched> {
        if let Some(size) = fs::file_size(dest).await
            && size > 0
        {
            debug!(path = %dest.display(), size, "Asset already present, skipping fetch");
            return Ok(Fetched::AlreadyPresent);
        }

        let target = url::Url::parse(url).map_err(|source| Error::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        fs::ensure_parent_dir(dest).await?;

        let mut request = self
            .client
            .get(target)
            .timeout(options.timeout.unwrap_or(self.default_timeout))
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "*/*")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9");
        for (key, value) in &options.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = match request.send().await.and_then(|r| r.error_for_status()) {
            Ok(response) => response,
            Err(e) => {
                fs::remove_file_if_exists(dest).await.ok();
                return Err(Error::Network(e));
            }
        };

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| Error::io_path("creating asset file", dest, e))?;

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    fs::remove_file_if_exists(dest).await.ok();
                    return Err(Error::Network(e));
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                fs::remove_file_if_exists(dest).await.ok();
                return Err(Error::io_path("writing asset file", dest, e));
            }
            written += chunk.len() as u64;
        }

        if let Err(e) = file.flush().await {
            drop(file);
            fs::remove_file_if_exists(dest).await.ok();
            return Err(Error::io_path("flushing asset file", dest, e));
        }
        drop(file);

        if written == 0 {
            warn!(url, path = %dest.display(), "Fetched asset is empty, removing");
            fs::remove_file_if_exists(dest).await?;
            return Err(Error::EmptyDownload(dest.to_path_buf()));
        }

        info!(url, path = %dest.display(), size = written, "Asset fetched");
        Ok(Fetched::Downloaded(written))
    }
}
