//! Last-resort transport: async HTTP client driven on a private runtime.
//!
//! Ignores proxy settings. The timeout bounds both the connect phase and the
//! whole request.

use super::Transport;
use crate::error::{BrowscapError, Result};
use std::time::Duration;

pub struct ClientTransport {
    user_agent: String,
}

impl ClientTransport {
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
        }
    }

    async fn get(&self, url: &str, timeout: Duration) -> std::result::Result<Vec<u8>, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(self.user_agent.as_str())
            .no_proxy()
            .build()?;

        let response = client.get(url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        Ok(body.to_vec())
    }
}

impl Transport for ClientTransport {
    fn name(&self) -> &'static str {
        "client"
    }

    fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BrowscapError::transport(self.name(), url, e))?;

        runtime
            .block_on(self.get(url, timeout))
            .map_err(|e| BrowscapError::transport(self.name(), url, e))
    }
}
