//! Seen-set persistence + HTTP page fetching for jobwatch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use jobwatch_core::SeenSet;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobwatch-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed seen-set in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serializing seen-set: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Durable home of the seen-set across runs.
#[async_trait]
pub trait SeenStore: Send + Sync {
    /// Never fails: missing or unreadable state loads as an empty set.
    async fn load(&self) -> SeenSet;

    /// Replaces the persisted set. Readers see either the old or the new content.
    async fn save(&self, seen: &SeenSet) -> Result<(), StoreError>;
}

/// Seen-set stored as a pretty-printed JSON array of ids.
#[derive(Debug, Clone)]
pub struct JsonSeenStore {
    path: PathBuf,
}

impl JsonSeenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the state file, distinguishing "absent" (`Ok(None)`) from read or parse failures.
    pub async fn try_load(&self) -> Result<Option<SeenSet>, StoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    async fn write_temp(temp_path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: temp_path.to_path_buf(),
            source,
        };
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(temp_path)
            .await
            .map_err(io_err)?;
        file.write_all(bytes).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl SeenStore for JsonSeenStore {
    async fn load(&self) -> SeenSet {
        match self.try_load().await {
            Ok(Some(seen)) => {
                debug!(path = %self.path.display(), count = seen.len(), "loaded seen-set");
                seen
            }
            Ok(None) => {
                info!(path = %self.path.display(), "no seen-set on disk; starting empty");
                SeenSet::new()
            }
            Err(err) => {
                warn!(error = %err, "seen-set unreadable; starting empty");
                SeenSet::new()
            }
        }
    }

    /// Atomic temp-file write followed by a rename over the target.
    async fn save(&self, seen: &SeenSet) -> Result<(), StoreError> {
        let mut bytes = serde_json::to_vec_pretty(seen).map_err(StoreError::Serialize)?;
        bytes.push(b'\n');

        let parent = self.parent_dir();
        fs::create_dir_all(&parent)
            .await
            .map_err(|source| StoreError::Io {
                path: parent.clone(),
                source,
            })?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "seen".to_string());
        let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        if let Err(err) = Self::write_temp(&temp_path, &bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err);
        }

        if let Err(source) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::Io {
                path: self.path.clone(),
                source,
            });
        }

        info!(path = %self.path.display(), count = seen.len(), "persisted seen-set");
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("dns lookup failed for {url}: {source}")]
    Dns {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("connection to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Maps a reqwest failure onto the fetch error taxonomy.
pub fn classify_reqwest_error(url: &str, err: reqwest::Error) -> FetchError {
    let url = url.to_string();
    if err.is_timeout() {
        FetchError::Timeout { url }
    } else if is_dns_failure(&err) {
        FetchError::Dns { url, source: err }
    } else if err.is_connect() {
        FetchError::Connect { url, source: err }
    } else {
        FetchError::Request { url, source: err }
    }
}

// reqwest has no DNS predicate; the resolver error only shows up in the source chain.
fn is_dns_failure(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        let text = inner.to_string().to_ascii_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return true;
        }
        source = inner.source();
    }
    false
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub final_url: String,
    pub body: Vec<u8>,
}

/// Retrieves the raw listing page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Single-attempt fetcher. Retries are left to whatever schedules the next run.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_page(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        async {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|err| classify_reqwest_error(url, err))?;

            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp
                .bytes()
                .await
                .map_err(|err| classify_reqwest_error(url, err))?
                .to_vec();
            debug!(status = status.as_u16(), bytes = body.len(), "fetched page");
            Ok(FetchedResponse {
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.fetch_page(url).await.map(|resp| resp.body)
    }
}
