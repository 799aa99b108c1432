//! In-memory fakes for the fetcher trait (testing only)

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{PipelineError, Result};
use crate::fetch::Fetcher;

/// Serves fixed bodies by URL; unknown URLs answer 404.
///
/// Every requested URL is recorded, hits and misses alike.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    bodies: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, body: &[u8]) -> Self {
        self.bodies.insert(url.to_string(), body.to_vec());
        self
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn lookup(&self, url: &str) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(url.to_string());
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| PipelineError::HttpStatus {
                url: url.to_string(),
                status: 404,
            })
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.lookup(url)
    }

    async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64> {
        let body = self.lookup(url)?;
        std::fs::write(dest, &body)
            .map_err(PipelineError::io(format!("writing {}", dest.display())))?;
        Ok(body.len() as u64)
    }
}
