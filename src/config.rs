//! Engine configuration.
//!
//! Every field has a default; [`BrowscapConfig::from_env`] overlays
//! `BROWSCAP_*` environment variables on top of them.

use crate::compiler::CompilerOptions;
use crate::error::{BrowscapError, Result};
use crate::loader::{ProxyConfig, UpdateMethod};
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REMOTE_INI_URL: &str = "http://tempdownloads.browserscap.com/stream.asp?BrowsCapINI";
pub const DEFAULT_REMOTE_VERSION_URL: &str =
    "http://tempdownloads.browserscap.com/versions/version-date.php";
pub const DEFAULT_USER_AGENT: &str = "browscap-engine/0.1";

/// Configuration for the definitions cache and its refresh cycle.
#[derive(Debug, Clone)]
pub struct BrowscapConfig {
    /// Directory holding the artifact, definitions copy and lock file
    pub cache_dir: PathBuf,
    pub cache_filename: String,
    pub definitions_filename: String,
    pub remote_ini_url: String,
    pub remote_version_url: String,
    /// Bound on every network attempt
    pub timeout: Duration,
    /// Age after which the cache is checked against the source
    pub update_interval: Duration,
    /// Delay before retrying after a failed refresh
    pub error_interval: Duration,
    /// When false the cache is never refreshed once loaded
    pub auto_update: bool,
    pub update_method: UpdateMethod,
    /// Definitions file used by the `local` update method
    pub local_file: Option<PathBuf>,
    /// `User-Agent` sent with every fetch
    pub user_agent: String,
    /// Lowercase property names at compile time
    pub lowercase: bool,
    /// Serve an empty result instead of failing when nothing can be loaded
    pub silent: bool,
    pub proxy: ProxyConfig,
}

impl Default for BrowscapConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./var/data/browscap"),
            cache_filename: "browscap.cache".to_string(),
            definitions_filename: "browscap.ini".to_string(),
            remote_ini_url: DEFAULT_REMOTE_INI_URL.to_string(),
            remote_version_url: DEFAULT_REMOTE_VERSION_URL.to_string(),
            timeout: Duration::from_secs(5),
            // 5 days
            update_interval: Duration::from_secs(432_000),
            // 2 hours
            error_interval: Duration::from_secs(7_200),
            auto_update: true,
            update_method: UpdateMethod::Auto,
            local_file: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            lowercase: false,
            silent: false,
            proxy: ProxyConfig::default(),
        }
    }
}

impl BrowscapConfig {
    /// Defaults rooted at `dir`.
    pub fn with_cache_dir<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            cache_dir: dir.into(),
            ..Self::default()
        }
    }

    /// Defaults overlaid with `BROWSCAP_*` variables and proxy variables.
    ///
    /// # Errors
    /// `InvalidConfiguration` when a variable cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::from_vars(|key| std::env::var(key).ok())?;
        config.proxy.autodetect_from_env();
        Ok(config)
    }

    pub(crate) fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("BROWSCAP_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(name) = lookup("BROWSCAP_CACHE_FILENAME") {
            config.cache_filename = name;
        }
        if let Some(name) = lookup("BROWSCAP_DEFINITIONS_FILENAME") {
            config.definitions_filename = name;
        }
        if let Some(url) = lookup("BROWSCAP_REMOTE_INI_URL") {
            config.remote_ini_url = url;
        }
        if let Some(url) = lookup("BROWSCAP_REMOTE_VERSION_URL") {
            config.remote_version_url = url;
        }
        if let Some(secs) = lookup("BROWSCAP_TIMEOUT_SECS") {
            config.timeout = parse_secs("BROWSCAP_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("BROWSCAP_UPDATE_INTERVAL_SECS") {
            config.update_interval = parse_secs("BROWSCAP_UPDATE_INTERVAL_SECS", &secs)?;
        }
        if let Some(secs) = lookup("BROWSCAP_ERROR_INTERVAL_SECS") {
            config.error_interval = parse_secs("BROWSCAP_ERROR_INTERVAL_SECS", &secs)?;
        }
        if let Some(flag) = lookup("BROWSCAP_AUTO_UPDATE") {
            config.auto_update = parse_flag("BROWSCAP_AUTO_UPDATE", &flag)?;
        }
        if let Some(method) = lookup("BROWSCAP_UPDATE_METHOD") {
            config.update_method = method.parse()?;
        }
        if let Some(file) = lookup("BROWSCAP_LOCAL_FILE") {
            config.local_file = Some(PathBuf::from(file));
        }
        if let Some(agent) = lookup("BROWSCAP_USER_AGENT") {
            config.user_agent = agent;
        }
        if let Some(flag) = lookup("BROWSCAP_LOWERCASE") {
            config.lowercase = parse_flag("BROWSCAP_LOWERCASE", &flag)?;
        }
        if let Some(flag) = lookup("BROWSCAP_SILENT") {
            config.silent = parse_flag("BROWSCAP_SILENT", &flag)?;
        }

        Ok(config)
    }

    /// Checks the configuration is usable.
    ///
    /// # Errors
    /// `InvalidConfiguration` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(BrowscapError::InvalidConfiguration(message));

        if self.cache_filename.trim().is_empty() {
            return invalid("cache filename is empty".to_string());
        }
        if self.definitions_filename.trim().is_empty() {
            return invalid("definitions filename is empty".to_string());
        }
        if self.cache_filename == self.definitions_filename {
            return invalid(format!(
                "cache and definitions share the filename '{}'",
                self.cache_filename
            ));
        }
        if self.timeout.is_zero() {
            return invalid("timeout must be greater than zero".to_string());
        }
        if self.error_interval > self.update_interval {
            return invalid(format!(
                "error interval ({}s) exceeds update interval ({}s)",
                self.error_interval.as_secs(),
                self.update_interval.as_secs()
            ));
        }

        match self.update_method.resolve(self.local_file.as_deref())? {
            UpdateMethod::Local => Ok(()),
            _ => {
                for url in [&self.remote_ini_url, &self.remote_version_url] {
                    if let Err(e) = Url::parse(url) {
                        return invalid(format!("invalid remote url '{}': {}", url, e));
                    }
                }
                Ok(())
            }
        }
    }

    pub fn compiler_options(&self) -> CompilerOptions {
        CompilerOptions {
            lowercase: self.lowercase,
        }
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| {
            BrowscapError::InvalidConfiguration(format!("{} must be whole seconds, got '{}'", key, value))
        })
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(BrowscapError::InvalidConfiguration(format!(
            "{} must be a boolean, got '{}'",
            key, value
        ))),
    }
}
