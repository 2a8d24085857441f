//! Storage data structures.
//!
//! Defines the artifact header and the loaded artifact.

use crate::database::CompiledDatabase;
use serde::{Deserialize, Serialize};

/// Magic value identifying a compiled artifact.
pub const MAGIC: &str = "BCAP";

/// Current artifact format version.
pub const FORMAT_VERSION: u32 = 1;

/// Provenance header stored as JSON on the first line of the artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub magic: String,
    pub format_version: u32,
    /// Number of compiled entries in the body
    pub entry_count: usize,
    /// When the body was compiled (Unix timestamp ms)
    pub compiled_at: u64,
    /// When the definitions text was fetched (Unix timestamp s)
    pub source_timestamp: i64,
    /// Definitions version from the header section
    pub version: Option<String>,
    /// Definitions release date from the header section
    pub released: Option<String>,
    /// Whether schema names were lowercased
    pub lowercase: bool,
}

impl ArtifactMetadata {
    pub fn new(entry_count: usize, compiled_at: u64, source_timestamp: i64, lowercase: bool) -> Self {
        Self {
            magic: MAGIC.to_string(),
            format_version: FORMAT_VERSION,
            entry_count,
            compiled_at,
            source_timestamp,
            version: None,
            released: None,
            lowercase,
        }
    }

    /// Age of the artifact at `now_ms`, saturating at zero.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.compiled_at)
    }
}

/// Record of a failed refresh, kept next to the artifact.
///
/// Every engine sharing the cache directory holds off new attempts until
/// `retry_at`, including ones started after the failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStamp {
    /// When the refresh failed (Unix timestamp ms)
    pub failed_at: u64,
    /// Earliest next attempt (Unix timestamp ms)
    pub retry_at: u64,
}

impl RetryStamp {
    pub fn is_pending(&self, now_ms: u64) -> bool {
        now_ms < self.retry_at
    }
}

/// A loaded artifact: header plus compiled body.
#[derive(Clone, Debug)]
pub struct CacheArtifact {
    pub metadata: ArtifactMetadata,
    pub database: CompiledDatabase,
}
