//! Fetching timetable files by name.
//!
//! Darwin announces new timetable and reference files on the feed; the files
//! themselves live elsewhere. A [`FileStore`] fetches one by path, either
//! over HTTP or from a local directory. Paths ending in `.gz` are
//! decompressed before they are returned.

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use tracing::debug;

/// Errors fetching a file.
#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error status
    #[error("fetching {path} returned status {status}")]
    Status { path: String, status: u16 },

    /// Local read failed
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The path tries to leave the store's root
    #[error("invalid file path {0:?}")]
    InvalidPath(String),

    /// No file store has been configured
    #[error("no file store configured")]
    NotConfigured,

    /// Gzip data could not be decompressed
    #[error("decompressing {path}: {source}")]
    Gzip {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A source of files addressed by relative path.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Fetch the file at `path`, decompressed if it is gzipped.
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FileStoreError>;
}

/// Files served over HTTP below a base URL.
#[derive(Debug, Clone)]
pub struct HttpFileStore {
    http: reqwest::Client,
    base_url: String,
}

impl HttpFileStore {
    /// Create a store rooted at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FileStoreError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl FileStore for HttpFileStore {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FileStoreError> {
        check_path(path)?;
        let url = self.url(path);
        debug!(%url, "fetching file");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FileStoreError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        maybe_gunzip(path, body.to_vec())
    }
}

/// Files in a local directory.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FileStoreError> {
        check_path(path)?;
        let full = self.root.join(path.trim_start_matches('/'));
        debug!(path = %full.display(), "reading file");

        let bytes = tokio::fs::read(&full)
            .await
            .map_err(|source| FileStoreError::Io {
                path: path.to_string(),
                source,
            })?;
        maybe_gunzip(path, bytes)
    }
}

/// Reject empty paths and any `..` component.
fn check_path(path: &str) -> Result<(), FileStoreError> {
    if path.trim().is_empty() || path.split(['/', '\\']).any(|part| part == "..") {
        return Err(FileStoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

fn maybe_gunzip(path: &str, bytes: Vec<u8>) -> Result<Vec<u8>, FileStoreError> {
    if !path.ends_with(".gz") {
        return Ok(bytes);
    }
    let mut out = Vec::new();
    GzDecoder::new(bytes.as_slice())
        .read_to_end(&mut out)
        .map_err(|source| FileStoreError::Gzip {
            path: path.to_string(),
            source,
        })?;
    Ok(out)
}
