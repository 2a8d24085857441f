//! Reads definitions from the local filesystem.

use super::Transport;
use crate::error::{BrowscapError, Result};
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn name(&self) -> &'static str {
        "local"
    }

    fn fetch(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        std::fs::read(path).map_err(|e| BrowscapError::transport(self.name(), url, e))
    }
}
