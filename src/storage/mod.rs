//! Persistent storage for compiled artifacts.
//!
//! - **Artifact**: JSON metadata line + bincode body, memory-mapped on load
//! - **Definitions**: the normalized source text, kept as a fallback source
//! - **Retry stamp**: when the last failed refresh may be retried
//! - **Lock**: advisory file lock serializing refreshes across processes

pub mod cache_store;
pub mod types;

pub use cache_store::CacheStore;
pub use types::{ArtifactMetadata, CacheArtifact, RetryStamp, FORMAT_VERSION, MAGIC};
