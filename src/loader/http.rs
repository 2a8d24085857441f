//! Primary transport: blocking HTTP client with per-scheme proxies.

use super::proxy::{ProxyConfig, ProxyScheme};
use super::Transport;
use crate::error::{BrowscapError, Result};
use reqwest::blocking::Client;
use reqwest::Proxy;
use std::time::Duration;

pub struct UrlWrapperTransport {
    user_agent: String,
    proxy: ProxyConfig,
}

impl UrlWrapperTransport {
    pub fn new(user_agent: &str, proxy: ProxyConfig) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            proxy,
        }
    }

    fn client(&self, url: &str, timeout: Duration) -> Result<Client> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(self.user_agent.as_str());

        if self.proxy.is_empty() {
            // Only explicitly configured proxies apply
            builder = builder.no_proxy();
        }

        for (scheme, settings) in self.proxy.iter() {
            let proxy = match scheme {
                ProxyScheme::Http => Proxy::http(settings.url()),
                ProxyScheme::Https => Proxy::https(settings.url()),
            }
            .map_err(|e| BrowscapError::transport(self.name(), url, e))?;

            let proxy = match &settings.credentials {
                Some((user, password)) => proxy.basic_auth(user, password),
                None => proxy,
            };
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| BrowscapError::transport(self.name(), url, e))
    }
}

impl Transport for UrlWrapperTransport {
    fn name(&self) -> &'static str {
        "url-wrapper"
    }

    fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        let client = self.client(url, timeout)?;

        let response = client
            .get(url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|e| BrowscapError::transport(self.name(), url, e))?;

        let body = response
            .bytes()
            .map_err(|e| BrowscapError::transport(self.name(), url, e))?;

        Ok(body.to_vec())
    }
}
