//! # Browscap Engine
//!
//! Resolves browser, platform and capability properties for a user-agent
//! string against a Browscap-style pattern database.
//!
//! ## Architecture
//!
//! ```text
//! Loader (transports) -> normalize -> Compiler -> CacheStore (artifact)
//!                                                      |
//!                          Browscap (state machine) <--'
//!                                |
//!                             Matcher -> MatchResult -> Agent
//! ```
//!
//! - [`loader`]: fetches definitions and their publication date through an
//!   ordered chain of transports
//! - [`compiler`]: turns definitions text into a [`CompiledDatabase`]
//! - [`storage`]: persists compiled artifacts atomically and loads them
//!   through a memory map
//! - [`matcher`]: first-match lookup with parent inheritance
//! - [`browscap`]: the engine, deciding when to load, refresh or degrade
//! - [`refresh`]: one refresh cycle and the optional background scheduler
//! - [`agent`]: request-level facade with typed accessors
//!
//! ## Example
//!
//! ```rust,no_run
//! use browscap::{Browscap, BrowscapConfig};
//!
//! let engine = Browscap::new(BrowscapConfig::with_cache_dir("/var/cache/browscap"))?;
//! let result = engine.get_browser("Mozilla/5.0 (X11; Linux x86_64) Chrome/37.0.2062.120")?;
//! println!("{:?}", result.get_str("Browser"));
//! # Ok::<(), browscap::BrowscapError>(())
//! ```

pub mod agent;
pub mod browscap;
pub mod compiler;
pub mod config;
pub mod database;
pub mod error;
pub mod loader;
pub mod matcher;
pub mod refresh;
pub mod storage;
pub mod types;

pub use agent::{Agent, AgentConfig, AgentInfo, LookupMethod};
pub use browscap::{Browscap, CacheState, RefreshReport};
pub use compiler::{normalize, wildcard_to_regex, Compilation, CompileStats, Compiler, CompilerOptions};
pub use config::BrowscapConfig;
pub use database::{CompiledDatabase, PatternEntry, PropertySchema};
pub use error::{BrowscapError, Result};
pub use loader::{
    DefinitionsSource, Loader, ProxyConfig, ProxyScheme, ProxySettings, Transport, UpdateMethod,
};
pub use matcher::{MatchResult, Matcher};
pub use refresh::{RefreshOutcome, RefreshScheduler, RefreshService, RefreshStats, SchedulerConfig};
pub use storage::{ArtifactMetadata, CacheArtifact, CacheStore, RetryStamp};
pub use types::{Clock, ManualClock, PropertyValue, SystemClock};
