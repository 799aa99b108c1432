//! Remote downloads: the coverage tool archive and the uploader script.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Source of remote files.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download `url` into memory.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;

    /// Download `url` to `dest`, returning the number of bytes written.
    async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// HTTP(S) fetcher backed by reqwest.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("covpipe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::Fetch {
                url: String::new(),
                reason: format!("unable to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(PipelineError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let body = self
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|e| PipelineError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(body.to_vec())
    }

    async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self.get(url).await?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(PipelineError::io(format!("creating {}", dest.display())))?;

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| PipelineError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })? {
            file.write_all(&chunk)
                .await
                .map_err(PipelineError::io(format!("writing {}", dest.display())))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(PipelineError::io(format!("writing {}", dest.display())))?;

        Ok(written)
    }
}

/// Download the archive to `dest` and return its SHA-256 (hex).
///
/// When `expected_sha256` is given, a mismatching download is removed and
/// reported as an error.
pub async fn fetch_archive(
    fetcher: &dyn Fetcher,
    url: &str,
    dest: &Path,
    expected_sha256: Option<&str>,
) -> Result<String> {
    info!(url = %url, dest = %dest.display(), "Downloading archive");

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(PipelineError::io(format!("creating {}", parent.display())))?;
    }

    let bytes = fetcher.fetch_to_file(url, dest).await?;
    let hashed = dest.to_path_buf();
    let digest = tokio::task::spawn_blocking(move || sha256_file(&hashed))
        .await
        .map_err(|e| PipelineError::Fetch {
            url: url.to_string(),
            reason: format!("hashing task failed: {}", e),
        })??;
    debug!(bytes, sha256 = %digest, "Archive downloaded");

    if let Some(expected) = expected_sha256 {
        if !expected.eq_ignore_ascii_case(&digest) {
            if let Err(e) = tokio::fs::remove_file(dest).await {
                warn!(path = %dest.display(), error = %e, "Could not remove rejected archive");
            }
            return Err(PipelineError::ChecksumMismatch {
                expected: expected.to_ascii_lowercase(),
                actual: digest,
            });
        }
    }

    Ok(digest)
}

/// SHA-256 of a file's contents (hex).
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .map_err(PipelineError::io(format!("opening {}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(PipelineError::io(format!("reading {}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
