//! Definitions loader with ordered transport fallback.
//!
//! A [`Loader`] owns a chain of [`Transport`]s and tries them in order until
//! one returns a body. The chain is chosen by [`UpdateMethod`]:
//!
//! | method        | chain                              |
//! |---------------|------------------------------------|
//! | `url-wrapper` | url-wrapper, socket, client        |
//! | `socket`      | socket, client                     |
//! | `client`      | client                             |
//! | `local`       | local                              |
//! | `auto`        | `local` when a local file is set, else `url-wrapper` |

pub mod client;
pub mod http;
pub mod local;
pub mod proxy;
pub mod socket;

pub use client::ClientTransport;
pub use http::UrlWrapperTransport;
pub use local::LocalTransport;
pub use proxy::{ProxyConfig, ProxyScheme, ProxySettings, DEFAULT_PROXY_PORT};
pub use socket::SocketTransport;

use crate::config::BrowscapConfig;
use crate::error::{BrowscapError, Result};
use chrono::{DateTime, NaiveDateTime};
use log::{debug, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, UNIX_EPOCH};

/// One way of retrieving a resource by URL.
pub trait Transport: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Retrieves `url`, giving up after `timeout`.
    fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>>;
}

// ================================================================================================
// UPDATE METHOD
// ================================================================================================

/// How definitions are retrieved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpdateMethod {
    #[default]
    Auto,
    UrlWrapper,
    Socket,
    Client,
    Local,
}

impl UpdateMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateMethod::Auto => "auto",
            UpdateMethod::UrlWrapper => "url-wrapper",
            UpdateMethod::Socket => "socket",
            UpdateMethod::Client => "client",
            UpdateMethod::Local => "local",
        }
    }

    /// Replaces `Auto` with a concrete method.
    ///
    /// # Errors
    /// `InvalidConfiguration` when `Local` is requested without a local file.
    pub fn resolve(self, local_file: Option<&Path>) -> Result<UpdateMethod> {
        match (self, local_file) {
            (UpdateMethod::Auto, Some(_)) => Ok(UpdateMethod::Local),
            (UpdateMethod::Auto, None) => Ok(UpdateMethod::UrlWrapper),
            (UpdateMethod::Local, None) => Err(BrowscapError::InvalidConfiguration(
                "update method 'local' requires a local definitions file".to_string(),
            )),
            (method, _) => Ok(method),
        }
    }
}

impl FromStr for UpdateMethod {
    type Err = BrowscapError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(UpdateMethod::Auto),
            "url-wrapper" | "fopen" => Ok(UpdateMethod::UrlWrapper),
            "socket" | "fsockopen" => Ok(UpdateMethod::Socket),
            "client" | "curl" => Ok(UpdateMethod::Client),
            "local" => Ok(UpdateMethod::Local),
            other => Err(BrowscapError::InvalidConfiguration(format!(
                "unknown update method '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for UpdateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ================================================================================================
// LOADER
// ================================================================================================

/// Ordered transport chain with a per-attempt timeout.
pub struct Loader {
    transports: Vec<Box<dyn Transport>>,
    timeout: Duration,
}

impl Loader {
    pub fn new(transports: Vec<Box<dyn Transport>>, timeout: Duration) -> Self {
        Self {
            transports,
            timeout,
        }
    }

    /// Builds the chain selected by the configured update method.
    pub fn from_config(config: &BrowscapConfig) -> Result<Self> {
        let method = config
            .update_method
            .resolve(config.local_file.as_deref())?;

        let url_wrapper = || -> Box<dyn Transport> {
            Box::new(UrlWrapperTransport::new(&config.user_agent, config.proxy.clone()))
        };
        let socket = || -> Box<dyn Transport> {
            Box::new(SocketTransport::new(
                &config.user_agent,
                config.proxy.get(ProxyScheme::Http).cloned(),
            ))
        };
        let client = || -> Box<dyn Transport> { Box::new(ClientTransport::new(&config.user_agent)) };

        let transports = match method {
            UpdateMethod::UrlWrapper | UpdateMethod::Auto => vec![url_wrapper(), socket(), client()],
            UpdateMethod::Socket => vec![socket(), client()],
            UpdateMethod::Client => vec![client()],
            UpdateMethod::Local => vec![Box::new(LocalTransport) as Box<dyn Transport>],
        };

        Ok(Self::new(transports, config.timeout))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn transport_names(&self) -> Vec<&'static str> {
        self.transports.iter().map(|t| t.name()).collect()
    }

    /// Fetches `url` with the first transport that succeeds.
    ///
    /// # Errors
    /// `SourceUnavailable` listing every failed attempt when all transports fail.
    pub fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if self.transports.is_empty() {
            return Err(BrowscapError::SourceUnavailable(format!(
                "no transport configured for {}",
                url
            )));
        }

        let mut failures = Vec::with_capacity(self.transports.len());
        for transport in &self.transports {
            match transport.fetch(url, self.timeout) {
                Ok(body) => {
                    debug!(
                        "Fetched {} bytes from {} via {}",
                        body.len(),
                        url,
                        transport.name()
                    );
                    return Ok(body);
                }
                Err(e) => {
                    warn!("Transport {} failed for {}: {}", transport.name(), url, e);
                    failures.push(format!("{}: {}", transport.name(), e));
                }
            }
        }

        Err(BrowscapError::SourceUnavailable(format!(
            "could not fetch {} ({})",
            url,
            failures.join("; ")
        )))
    }

    /// Like [`Loader::fetch`], decoding the body as (lossy) UTF-8.
    pub fn fetch_text(&self, url: &str) -> Result<String> {
        let body = self.fetch(url)?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

// ================================================================================================
// DEFINITIONS SOURCE
// ================================================================================================

/// Where definitions come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DefinitionsSource {
    Remote { ini_url: String, version_url: String },
    Local(PathBuf),
}

impl DefinitionsSource {
    pub fn from_config(config: &BrowscapConfig) -> Result<Self> {
        let method = config
            .update_method
            .resolve(config.local_file.as_deref())?;

        match (method, &config.local_file) {
            (UpdateMethod::Local, Some(path)) => Ok(DefinitionsSource::Local(path.clone())),
            _ => Ok(DefinitionsSource::Remote {
                ini_url: config.remote_ini_url.clone(),
                version_url: config.remote_version_url.clone(),
            }),
        }
    }

    /// Human-readable location, for logs.
    pub fn location(&self) -> String {
        match self {
            DefinitionsSource::Remote { ini_url, .. } => ini_url.clone(),
            DefinitionsSource::Local(path) => path.display().to_string(),
        }
    }

    /// Whether this source reads `path` directly.
    pub fn is_file(&self, path: &Path) -> bool {
        match self {
            DefinitionsSource::Local(local) => {
                local == path
                    || matches!(
                        (local.canonicalize(), path.canonicalize()),
                        (Ok(a), Ok(b)) if a == b
                    )
            }
            DefinitionsSource::Remote { .. } => false,
        }
    }

    /// Publication time of the current definitions (Unix seconds).
    ///
    /// # Errors
    /// - `BadTimestamp` when the version endpoint returns an unparseable date
    /// - `SourceUnavailable` when the source cannot be reached
    pub fn timestamp(&self, loader: &Loader) -> Result<i64> {
        match self {
            DefinitionsSource::Remote { version_url, .. } => {
                let body = loader.fetch_text(version_url)?;
                parse_timestamp(&body).ok_or_else(|| BrowscapError::BadTimestamp {
                    url: version_url.clone(),
                    value: body.trim().to_string(),
                })
            }
            DefinitionsSource::Local(path) => {
                let modified = std::fs::metadata(path)
                    .and_then(|meta| meta.modified())
                    .map_err(|e| {
                        BrowscapError::SourceUnavailable(format!(
                            "local file {} is not readable: {}",
                            path.display(),
                            e
                        ))
                    })?;
                Ok(modified
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0))
            }
        }
    }

    /// Retrieves the full definitions text.
    pub fn fetch(&self, loader: &Loader) -> Result<String> {
        match self {
            DefinitionsSource::Remote { ini_url, .. } => loader.fetch_text(ini_url),
            DefinitionsSource::Local(path) => loader.fetch_text(&path.to_string_lossy()),
        }
    }
}

/// Parses a version-endpoint date into Unix seconds.
///
/// Accepts RFC 2822, RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or bare seconds.
pub fn parse_timestamp(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.timestamp())
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.and_utc().timestamp())
        })
        .or_else(|| value.parse::<i64>().ok())
}
