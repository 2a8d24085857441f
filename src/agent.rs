//! Request-level facade over the engine.
//!
//! [`Agent`] binds an engine to the headers of the current request and
//! exposes typed accessors over the merged property set.

use crate::browscap::Browscap;
use crate::config::BrowscapConfig;
use crate::error::{BrowscapError, Result};
use crate::types::PropertyValue;
use regex::Regex;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

/// Properties every [`AgentInfo`] carries, with their values when nothing matched.
const DEFAULT_PROPERTIES: &[(&str, Option<&str>)] = &[
    ("browser_name", Some("unknown")),
    ("browser_name_regex", Some("")),
    ("browser_name_pattern", Some("")),
    ("Parent", Some("")),
    ("Platform", Some("")),
    ("Comment", None),
    ("Browser", None),
    ("Version", None),
    ("MajorVer", None),
    ("MinorVer", None),
    ("Frames", None),
    ("IFrames", None),
    ("Tables", None),
    ("Cookies", None),
    ("JavaScript", None),
    ("JavaApplets", None),
    ("CssVersion", None),
    ("Platform_Version", None),
    ("Alpha", None),
    ("Beta", None),
    ("Win16", None),
    ("Win32", None),
    ("Win64", None),
    ("BackgroundSounds", None),
    ("VBScript", None),
    ("ActiveXControls", None),
    ("isMobileDevice", None),
    ("isSyndicationReader", None),
    ("Crawler", None),
    ("AolVersion", None),
];

/// Backend used to resolve user agents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LookupMethod {
    #[default]
    Browscap,
}

impl FromStr for LookupMethod {
    type Err = BrowscapError;

    fn from_str(value: &str) -> Result<Self> {
        if value.trim().eq_ignore_ascii_case("browscap") {
            Ok(LookupMethod::Browscap)
        } else {
            Err(BrowscapError::InvalidConfiguration(format!(
                "unsupported lookup method '{}'",
                value
            )))
        }
    }
}

/// Request context and engine settings for an [`Agent`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Lookup method name, checked when the agent is created
    pub method: String,
    /// `User-Agent` header of the current request
    pub http_user_agent: String,
    /// `Accept-Language` header of the current request
    pub http_accept_language: String,
    /// `Accept-Charset` header of the current request
    pub http_accept_charset: String,
    /// Lowercase property names
    pub lowercase: bool,
    pub browscap: BrowscapConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            method: "browscap".to_string(),
            http_user_agent: String::new(),
            http_accept_language: String::new(),
            http_accept_charset: String::new(),
            lowercase: false,
            browscap: BrowscapConfig::default(),
        }
    }
}

/// User-agent detection for one request.
pub struct Agent {
    engine: Arc<Browscap>,
    config: AgentConfig,
}

impl Agent {
    /// Creates an agent with its own engine.
    ///
    /// # Errors
    /// `InvalidConfiguration` for an unsupported lookup method, before any
    /// engine is built.
    pub fn new(config: AgentConfig) -> Result<Self> {
        config.method.parse::<LookupMethod>()?;

        let mut engine_config = config.browscap.clone();
        engine_config.lowercase = config.lowercase;
        let engine = Arc::new(Browscap::new(engine_config)?);

        Ok(Self { engine, config })
    }

    /// Creates an agent sharing an existing engine.
    pub fn with_engine(config: AgentConfig, engine: Arc<Browscap>) -> Result<Self> {
        config.method.parse::<LookupMethod>()?;
        Ok(Self { engine, config })
    }

    pub fn engine(&self) -> &Arc<Browscap> {
        &self.engine
    }

    /// Detects `user_agent`, or the request's `User-Agent` when empty.
    ///
    /// # Returns
    /// The default property set overlaid with whatever the engine matched.
    pub fn check(&self, user_agent: &str) -> Result<AgentInfo> {
        let user_agent = if user_agent.is_empty() {
            self.config.http_user_agent.as_str()
        } else {
            user_agent
        };

        let lowercase = self.config.lowercase;
        let mut properties: Vec<(String, PropertyValue)> = DEFAULT_PROPERTIES
            .iter()
            .map(|(name, value)| {
                let name = if lowercase {
                    name.to_lowercase()
                } else {
                    name.to_string()
                };
                let value = value
                    .map(|v| PropertyValue::Text(v.to_string()))
                    .unwrap_or(PropertyValue::Null);
                (name, value)
            })
            .collect();

        for (name, value) in self.engine.get_browser(user_agent)?.iter() {
            match properties
                .iter_mut()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            {
                Some(slot) => slot.1 = value.clone(),
                None => properties.push((name.to_string(), value.clone())),
            }
        }

        Ok(AgentInfo {
            user_agent: user_agent.to_string(),
            properties,
        })
    }

    /// Languages from `Accept-Language`, lowercased and without weights.
    pub fn accept_languages(&self) -> Vec<String> {
        parse_accept(&self.config.http_accept_language)
    }

    pub fn does_accept_language(&self, language: &str) -> bool {
        let language = language.to_lowercase();
        self.accept_languages().iter().any(|l| *l == language)
    }

    /// Charsets from `Accept-Charset`, lowercased and without weights.
    pub fn accept_charsets(&self) -> Vec<String> {
        parse_accept(&self.config.http_accept_charset)
    }

    pub fn does_accept_charset(&self, charset: &str) -> bool {
        let charset = charset.to_lowercase();
        self.accept_charsets().iter().any(|c| *c == charset)
    }
}

/// Detected properties for one user agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    user_agent: String,
    properties: Vec<(String, PropertyValue)>,
}

impl AgentInfo {
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn properties(&self) -> &[(String, PropertyValue)] {
        &self.properties
    }

    /// Case-insensitive property lookup.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn browser(&self) -> Option<&str> {
        self.property("Browser").and_then(PropertyValue::as_str)
    }

    pub fn platform(&self) -> Option<&str> {
        self.property("Platform").and_then(PropertyValue::as_str)
    }

    pub fn version(&self) -> Option<&str> {
        self.property("Version").and_then(PropertyValue::as_str)
    }

    pub fn is_robot(&self) -> bool {
        self.flag("Crawler")
    }

    pub fn is_mobile_device(&self) -> bool {
        self.flag("isMobileDevice")
    }

    pub fn is_mobile(&self) -> bool {
        self.is_mobile_device()
    }

    fn flag(&self, name: &str) -> bool {
        self.property(name)
            .and_then(PropertyValue::as_bool)
            .unwrap_or(false)
    }
}

fn weight_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r";\s*q=[0-9.]+").expect("static weight pattern is valid"))
}

/// Splits an `Accept-*` header into lowercased items without `;q=` weights.
fn parse_accept(header: &str) -> Vec<String> {
    let header = header.to_lowercase();
    weight_pattern()
        .replace_all(&header, "")
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
