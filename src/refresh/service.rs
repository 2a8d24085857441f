//! One refresh cycle: freshness check, fetch, normalize, compile.
//!
//! The service never touches the installed matcher or the artifact file; it
//! hands a compiled artifact back to the engine, which decides what to keep.

use crate::compiler::{normalize, Compilation, Compiler};
use crate::config::BrowscapConfig;
use crate::error::Result;
use crate::loader::{DefinitionsSource, Loader};
use crate::storage::{ArtifactMetadata, CacheArtifact, CacheStore};
use log::{debug, info, warn};
use std::time::{Instant, UNIX_EPOCH};

/// Statistics from a refresh operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshStats {
    /// Number of entries compiled
    pub entries_compiled: usize,
    /// Lines the parser skipped
    pub malformed_lines: usize,
    /// Duration of fetch and compile in milliseconds
    pub duration_ms: u64,
    /// Timestamp of refresh
    pub timestamp: u64,
}

/// Result of [`RefreshService::refresh`].
#[derive(Debug)]
pub enum RefreshOutcome {
    /// The source is not newer than the local artifact
    NotModified { remote_timestamp: i64 },
    /// Fresh definitions were fetched and compiled
    Updated {
        artifact: CacheArtifact,
        stats: RefreshStats,
    },
}

/// Definitions refresh service.
pub struct RefreshService {
    loader: Loader,
    source: DefinitionsSource,
    compiler: Compiler,
    store: CacheStore,
}

impl RefreshService {
    pub fn new(loader: Loader, source: DefinitionsSource, compiler: Compiler, store: CacheStore) -> Self {
        Self {
            loader,
            source,
            compiler,
            store,
        }
    }

    /// Builds the service from configuration with the given loader.
    pub fn from_config(config: &BrowscapConfig, loader: Loader, store: CacheStore) -> Result<Self> {
        Ok(Self::new(
            loader,
            DefinitionsSource::from_config(config)?,
            Compiler::new(config.compiler_options()),
            store,
        ))
    }

    pub fn source(&self) -> &DefinitionsSource {
        &self.source
    }

    /// Runs one refresh cycle.
    ///
    /// **Algorithm**:
    /// - With a local artifact, ask the source for its timestamp and stop
    ///   when it is not newer than the artifact's
    /// - Fetch and normalize the full text, then compile it
    /// - Persist the normalized text as the offline fallback
    ///
    /// # Returns
    /// `NotModified` or the compiled artifact (not yet saved).
    ///
    /// # Errors
    /// Loader, timestamp and compile errors propagate unchanged. Nothing is
    /// written when compiling fails.
    pub fn refresh(&self, local: Option<&ArtifactMetadata>, now_ms: u64) -> Result<RefreshOutcome> {
        let start = Instant::now();

        if let Some(local) = local {
            let remote = self.source.timestamp(&self.loader)?;
            if remote <= local.source_timestamp {
                debug!(
                    "Definitions at {} unchanged (remote {}, local {})",
                    self.source.location(),
                    remote,
                    local.source_timestamp
                );
                return Ok(RefreshOutcome::NotModified {
                    remote_timestamp: remote,
                });
            }
            info!(
                "Definitions at {} are newer than the cache, updating",
                self.source.location()
            );
        }

        let raw = self.source.fetch(&self.loader)?;
        let text = normalize(&raw);
        let compilation = self.compiler.compile(&text)?;

        if !self.source.is_file(self.store.definitions_path()) {
            if let Err(e) = self.store.save_definitions(&text) {
                warn!("Could not keep a copy of the definitions: {}", e);
            }
        }

        let malformed_lines = compilation.stats.malformed_lines;
        let source_timestamp = (now_ms / 1000) as i64;
        let artifact = build_artifact(compilation, now_ms, source_timestamp, self.compiler.options().lowercase);

        let stats = RefreshStats {
            entries_compiled: artifact.metadata.entry_count,
            malformed_lines,
            duration_ms: start.elapsed().as_millis() as u64,
            timestamp: now_ms,
        };

        Ok(RefreshOutcome::Updated { artifact, stats })
    }

    /// Compiles the persisted definitions copy, if there is one.
    ///
    /// The artifact's source timestamp is the copy's modification time, so
    /// the next refresh compares against when it was fetched.
    pub fn compile_cached(&self, now_ms: u64) -> Result<Option<CacheArtifact>> {
        let text = match self.store.load_definitions()? {
            Some(text) => text,
            None => return Ok(None),
        };

        let source_timestamp = std::fs::metadata(self.store.definitions_path())
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let compilation = self.compiler.compile(&normalize(&text))?;
        Ok(Some(build_artifact(
            compilation,
            now_ms,
            source_timestamp,
            self.compiler.options().lowercase,
        )))
    }
}

fn build_artifact(
    compilation: Compilation,
    now_ms: u64,
    source_timestamp: i64,
    lowercase: bool,
) -> CacheArtifact {
    let Compilation { database, stats } = compilation;

    let mut metadata = ArtifactMetadata::new(database.len(), now_ms, source_timestamp, lowercase);
    metadata.version = stats.version;
    metadata.released = stats.released;

    CacheArtifact { metadata, database }
}
