//! Streaming tile downloads with bounded memory.
//!
//! One [`DownloadTask`] per tile, executed sequentially in catalog order.
//! Bodies are streamed chunk-by-chunk to disk; the whole body is never held
//! in memory, which is a hard invariant for multi-GB archives. Completion is
//! recorded by the final file size only; integrity is enforced by the next
//! run's size-tolerance reconciliation, not by checksums.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::CONTENT_LENGTH;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};

use crate::cleanup::CleanupRegistry;

/// Timeout for connection and response-header acquisition, in seconds.
///
/// Deliberately applies to transfer start, not total duration: a
/// multi-hundred-MB archive must only begin within this window.
pub const REQUEST_TIMEOUT_SECS: u64 = 12;

/// Per-read stall timeout for the body stream, in seconds.
pub const READ_TIMEOUT_SECS: u64 = 300;

/// One in-flight fetch: source URL, destination path, declared size.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub url: String,
    pub dest: PathBuf,
    /// Catalog-declared byte count, used for progress when the response
    /// carries no Content-Length.
    pub expected_bytes: u64,
}

/// Successful fetch: the destination file exists and is fully written.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub path: PathBuf,
    pub bytes_written: u64,
}

/// Receives incremental transfer progress. Implementations must not block;
/// `on_progress` is called between chunk writes.
pub trait ProgressObserver: Send + Sync {
    /// A new file transfer is about to begin.
    fn on_file_start(&self, _name: &str, _expected_total: Option<u64>) {}

    fn on_progress(&self, bytes_downloaded: u64, expected_total: Option<u64>);

    /// The current file transfer finished successfully.
    fn on_file_complete(&self, _name: &str) {}
}

/// Observer that discards progress, for library use and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {
    fn on_progress(&self, _bytes_downloaded: u64, _expected_total: Option<u64>) {}
}

/// Errors from one tile download. All abort the run; re-running the
/// pipeline is the retry mechanism.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection or response headers did not arrive in time.
    #[error("timeout downloading {url}")]
    Timeout { url: String },

    /// Network-level failure (DNS, connection reset, TLS, mid-body error).
    #[error("network error downloading {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus { url: String, status: u16 },

    /// Filesystem error while writing the destination file.
    #[error("IO error writing to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The download URL from the catalog is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },
}

impl FetchError {
    fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Streaming HTTP downloader, created once per run and reused across tiles
/// for connection pooling.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    /// Bounds connect plus response-header acquisition for each request.
    header_timeout: Duration,
}

impl Fetcher {
    /// Fetcher with the default header and read timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static
    /// configuration. This does not happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_timeouts(REQUEST_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Fetcher with explicit timeouts, for tests.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the supplied timeouts.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_timeouts(header_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let header_timeout = Duration::from_secs(header_timeout_secs);
        let client = Client::builder()
            .connect_timeout(header_timeout)
            .read_timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .build()
            .expect("failed to build fetch HTTP client with static configuration");
        Self {
            client,
            header_timeout,
        }
    }

    /// Streams one tile to its destination path.
    ///
    /// On any failure the destination (partial or absent) is registered with
    /// the cleanup registry, so a later run either finds nothing or discards
    /// the partial via the stale-size check.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on timeout, network, HTTP status, or IO
    /// failure.
    #[instrument(skip(self, cleanup, progress), fields(url = %task.url))]
    pub async fn fetch(
        &self,
        task: &DownloadTask,
        cleanup: &CleanupRegistry,
        progress: &dyn ProgressObserver,
    ) -> Result<FetchResult, FetchError> {
        debug!(dest = %task.dest.display(), "starting download");

        let result = self.fetch_inner(task, progress).await;
        if result.is_err() {
            cleanup.register(&task.dest);
        }
        result
    }

    async fn fetch_inner(
        &self,
        task: &DownloadTask,
        progress: &dyn ProgressObserver,
    ) -> Result<FetchResult, FetchError> {
        if reqwest::Url::parse(&task.url).is_err() {
            return Err(FetchError::InvalidUrl {
                url: task.url.clone(),
            });
        }

        // connect_timeout alone stops at the TCP/TLS handshake; a server
        // that accepts and then stalls before sending headers must hit the
        // same window.
        let response = tokio::time::timeout(self.header_timeout, self.client.get(&task.url).send())
            .await
            .map_err(|_| FetchError::timeout(&task.url))?
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::timeout(&task.url)
                } else {
                    FetchError::network(&task.url, e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: task.url.clone(),
                status: status.as_u16(),
            });
        }

        let expected_total = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .or_else(|| (task.expected_bytes > 0).then_some(task.expected_bytes));

        let file = File::create(&task.dest)
            .await
            .map_err(|e| FetchError::io(&task.dest, e))?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| {
                if e.is_timeout() {
                    FetchError::timeout(&task.url)
                } else {
                    FetchError::network(&task.url, e)
                }
            })?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| FetchError::io(&task.dest, e))?;
            bytes_written += chunk.len() as u64;
            progress.on_progress(bytes_written, expected_total);
        }

        writer
            .flush()
            .await
            .map_err(|e| FetchError::io(&task.dest, e))?;

        info!(
            path = %task.dest.display(),
            bytes = bytes_written,
            "download complete"
        );

        Ok(FetchResult {
            path: task.dest.clone(),
            bytes_written,
        })
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the download task for a tile that must be fetched.
#[must_use]
pub fn task_for(url: &str, dest: &Path, expected_bytes: u64) -> DownloadTask {
    DownloadTask {
        url: url.to_string(),
        dest: dest.to_path_buf(),
        expected_bytes,
    }
}
