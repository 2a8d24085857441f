//! The lookup engine: owns the installed matcher and its refresh cycle.
//!
//! # State machine
//!
//! ```text
//! Unloaded -> Loading -> Fresh ---(update interval)---> Stale -> Refreshing
//!                 \                                               |   |
//!                  `-------------------> Refreshing <-------------'   |
//!                                            |                        |
//!                      Fresh <--- ok --------+------ error ---> Degraded
//!                                                              (retry_at)
//! ```
//!
//! Lookups never wait on the network while a usable matcher is installed:
//! a caller that finds a refresh already running serves the previous matcher.
//! Refreshes are serialized in-process by a mutex and across processes by the
//! store's advisory file lock. A refresh that finds the source unchanged
//! writes nothing.
//!
//! A failed refresh is recorded in the store's retry stamp, so engines
//! started later on the same cache directory wait out the error interval
//! too instead of hitting the source again.

use crate::config::BrowscapConfig;
use crate::error::{BrowscapError, Result};
use crate::loader::Loader;
use crate::matcher::{MatchResult, Matcher};
use crate::refresh::{RefreshOutcome, RefreshService, RefreshStats};
use crate::storage::{ArtifactMetadata, CacheArtifact, CacheStore, RetryStamp};
use crate::types::{Clock, SystemClock};
use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of the installed definitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing installed
    Unloaded,
    /// Reading the artifact from disk
    Loading,
    /// Installed and checked against the source at `checked_at`
    Fresh { checked_at: u64 },
    /// Installed but older than the update interval
    Stale,
    /// A refresh cycle is running
    Refreshing,
    /// Last refresh failed; no new attempt before `retry_at`
    Degraded { retry_at: u64 },
}

/// What a completed refresh did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshReport {
    /// The source was unchanged; nothing was written
    NotModified,
    /// New definitions were compiled, saved and installed
    Updated(RefreshStats),
    /// A current artifact written elsewhere was loaded from disk
    Reloaded { compiled_at: u64 },
    /// A recorded failure holds off the next attempt until `retry_at`
    Deferred { retry_at: u64 },
}

struct EngineState {
    phase: CacheState,
    matcher: Option<Arc<Matcher>>,
    /// Header of the artifact the matcher came from
    metadata: Option<ArtifactMetadata>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            phase: CacheState::Unloaded,
            matcher: None,
            metadata: None,
        }
    }
}

/// Browscap lookup engine.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Browscap {
    config: BrowscapConfig,
    clock: Arc<dyn Clock>,
    store: CacheStore,
    refresher: RefreshService,
    state: RwLock<EngineState>,
    refresh_lock: Mutex<()>,
}

impl Browscap {
    /// Creates an engine using the wall clock and the configured transports.
    ///
    /// Nothing is loaded until the first lookup or [`Browscap::refresh`].
    ///
    /// # Errors
    /// `InvalidConfiguration` when the configuration does not validate or the
    /// cache directory cannot be created.
    pub fn new(config: BrowscapConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: BrowscapConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let loader = Loader::from_config(&config)?;
        Self::with_loader(config, loader, clock)
    }

    /// Creates an engine fetching through `loader`.
    pub fn with_loader(config: BrowscapConfig, loader: Loader, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let store = CacheStore::open(
            &config.cache_dir,
            &config.cache_filename,
            &config.definitions_filename,
        )?;
        let refresher = RefreshService::from_config(&config, loader, store.clone())?;

        Ok(Self {
            config,
            clock,
            store,
            refresher,
            state: RwLock::new(EngineState::default()),
            refresh_lock: Mutex::new(()),
        })
    }

    // ============================================================================================
    // LOOKUP
    // ============================================================================================

    /// Looks up `user_agent`, loading or refreshing definitions when due.
    ///
    /// # Returns
    /// The resolved properties, or an empty result when nothing matches.
    ///
    /// # Errors
    /// Only when no definitions can be installed at all and `silent` is off.
    pub fn get_browser(&self, user_agent: &str) -> Result<MatchResult> {
        let matcher = self.matcher()?;
        Ok(matcher.match_agent(user_agent))
    }

    /// The matcher lookups should use right now.
    pub fn matcher(&self) -> Result<Arc<Matcher>> {
        if let Some(matcher) = self.usable_matcher(self.clock.now_ms()) {
            return Ok(matcher);
        }

        let _guard = match self.refresh_lock.try_lock() {
            Some(guard) => guard,
            None => {
                // Someone is already refreshing; serve what is installed
                if let Some(matcher) = self.state.read().matcher.clone() {
                    return Ok(matcher);
                }
                self.refresh_lock.lock()
            }
        };

        // The refresh we waited on may have settled things
        let now = self.clock.now_ms();
        if let Some(matcher) = self.usable_matcher(now) {
            return Ok(matcher);
        }

        if let Err(e) = self.update_exclusive(now, false) {
            if self.state.read().matcher.is_none() {
                return Err(e);
            }
            warn!("Serving previous definitions after failed refresh: {}", e);
        }

        self.state.read().matcher.clone().ok_or_else(|| {
            BrowscapError::SourceUnavailable("no definitions could be loaded".to_string())
        })
    }

    // ============================================================================================
    // REFRESH
    // ============================================================================================

    /// Runs a refresh cycle now, regardless of staleness or retry delay.
    ///
    /// The source is still asked for its timestamp first; an unchanged
    /// source yields [`RefreshReport::NotModified`] and writes nothing.
    ///
    /// # Errors
    /// The refresh error, even when the previous matcher stays installed.
    pub fn refresh(&self) -> Result<RefreshReport> {
        let _guard = self.refresh_lock.lock();
        self.update_exclusive(self.clock.now_ms(), true)
    }

    pub fn state(&self) -> CacheState {
        self.state.read().phase
    }

    /// Header of the installed artifact, if any.
    pub fn metadata(&self) -> Option<ArtifactMetadata> {
        self.state.read().metadata.clone()
    }

    pub fn config(&self) -> &BrowscapConfig {
        &self.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    fn usable_matcher(&self, now: u64) -> Option<Arc<Matcher>> {
        let state = self.state.read();
        let matcher = state.matcher.as_ref()?;

        let usable = match state.phase {
            CacheState::Fresh { checked_at } => {
                !self.config.auto_update
                    || now.saturating_sub(checked_at) <= millis(self.config.update_interval)
            }
            CacheState::Degraded { retry_at } => now < retry_at,
            _ => false,
        };

        usable.then(|| Arc::clone(matcher))
    }

    /// Runs [`Browscap::update_locked`] under the cross-process lock.
    ///
    /// Failing to take the lock counts as a failed refresh.
    fn update_exclusive(&self, now: u64, force: bool) -> Result<RefreshReport> {
        match self.store.with_exclusive_lock(|| self.update_locked(now, force)) {
            Ok(result) => result,
            Err(e) => {
                error!("Could not take the refresh lock: {}", e);
                self.degrade(now, &e);
                Err(e)
            }
        }
    }

    /// One load-or-refresh step. Caller holds both locks.
    fn update_locked(&self, now: u64, force: bool) -> Result<RefreshReport> {
        if let Some(report) = self.adopt_stored(now, force) {
            return Ok(report);
        }

        if !force {
            if let Some(stamp) = self.store.read_retry().filter(|s| s.is_pending(now)) {
                return self.defer(now, stamp);
            }
        }

        let local = {
            let mut state = self.state.write();
            state.phase = CacheState::Refreshing;
            state.metadata.clone()
        };

        match self.refresher.refresh(local.as_ref(), now) {
            Ok(RefreshOutcome::NotModified { remote_timestamp }) => {
                info!(
                    "Definitions unchanged at source (published {}), cache kept",
                    remote_timestamp
                );
                self.clear_failure();
                self.state.write().phase = CacheState::Fresh { checked_at: now };
                Ok(RefreshReport::NotModified)
            }
            Ok(RefreshOutcome::Updated { artifact, stats }) => {
                let CacheArtifact { metadata, database } = artifact;
                let saved = self.store.save(&database, &metadata);
                let matcher = Arc::new(Matcher::new(database));

                match saved {
                    Ok(()) => {
                        info!(
                            "Definitions updated: {} entries compiled in {}ms",
                            stats.entries_compiled, stats.duration_ms
                        );
                        self.clear_failure();
                        self.install(matcher, Some(metadata), CacheState::Fresh { checked_at: now });
                        Ok(RefreshReport::Updated(stats))
                    }
                    Err(e) => {
                        error!("Compiled definitions could not be saved: {}", e);
                        let retry_at = self.record_failure(now);
                        self.install(matcher, Some(metadata), CacheState::Degraded { retry_at });
                        Err(e)
                    }
                }
            }
            Err(e) => {
                self.degrade(now, &e);
                Err(e)
            }
        }
    }

    /// Loads the on-disk artifact when nothing is installed or another
    /// process wrote a newer one.
    ///
    /// # Returns
    /// A report when the loaded artifact is current and no refresh is needed.
    fn adopt_stored(&self, now: u64, force: bool) -> Option<RefreshReport> {
        let installed = {
            let mut state = self.state.write();
            if state.matcher.is_none() {
                state.phase = CacheState::Loading;
            }
            let installed_at = state.metadata.as_ref().map(|m| m.compiled_at);
            state.matcher.is_some().then_some(installed_at)
        };

        if let Some(installed_at) = installed {
            match self.store.read_metadata() {
                Ok(stored) if Some(stored.compiled_at) > installed_at => {}
                _ => return None,
            }
        }

        let artifact = match self.store.load() {
            Ok(artifact) => artifact,
            Err(BrowscapError::CacheNotFound(_)) => return None,
            Err(e) => {
                warn!("Ignoring unusable cache artifact: {}", e);
                return None;
            }
        };

        let CacheArtifact { metadata, database } = artifact;
        let matcher = Arc::new(Matcher::new(database));

        if metadata.lowercase != self.config.lowercase {
            // Usable as a fallback, but force a full rebuild
            warn!(
                "Cache artifact {} was compiled with lowercase={}, rebuilding",
                self.store.path().display(),
                metadata.lowercase
            );
            self.install(matcher, None, CacheState::Stale);
            return None;
        }

        let current = !self.config.auto_update
            || metadata.age_ms(now) <= millis(self.config.update_interval);
        let compiled_at = metadata.compiled_at;

        if current && !force {
            info!(
                "Loaded {} entries from {}",
                metadata.entry_count,
                self.store.path().display()
            );
            self.install(matcher, Some(metadata), CacheState::Fresh { checked_at: compiled_at });
            Some(RefreshReport::Reloaded { compiled_at })
        } else {
            self.install(matcher, Some(metadata), CacheState::Stale);
            None
        }
    }

    /// Honors a failure recorded by this or another engine.
    ///
    /// No fetch is attempted; the engine falls back exactly as if its own
    /// refresh had just failed, keeping the recorded retry time.
    fn defer(&self, now: u64, stamp: RetryStamp) -> Result<RefreshReport> {
        info!(
            "Refresh failed at {}, next attempt not before {}",
            stamp.failed_at, stamp.retry_at
        );
        let cause = BrowscapError::SourceUnavailable(format!(
            "refresh postponed until {} after a failed attempt",
            stamp.retry_at
        ));

        self.fall_back(now, stamp.retry_at, &cause);
        if self.state.read().matcher.is_some() {
            Ok(RefreshReport::Deferred {
                retry_at: stamp.retry_at,
            })
        } else {
            Err(cause)
        }
    }

    /// Settles state after a failed fetch, compile or lock.
    fn degrade(&self, now: u64, cause: &BrowscapError) {
        let retry_at = self.record_failure(now);
        self.fall_back(now, retry_at, cause);
    }

    /// Keeps whatever can still be served until `retry_at`.
    fn fall_back(&self, now: u64, retry_at: u64, cause: &BrowscapError) {
        {
            let mut state = self.state.write();
            if state.matcher.is_some() {
                warn!("Refresh failed, keeping previous definitions until retry: {}", cause);
                state.phase = CacheState::Degraded { retry_at };
                return;
            }
        }

        match self.refresher.compile_cached(now) {
            Ok(Some(artifact)) => {
                warn!(
                    "Refresh failed ({}), compiled the stored definitions copy instead",
                    cause
                );
                if let Err(e) = self.store.save(&artifact.database, &artifact.metadata) {
                    warn!("Could not save the rebuilt artifact: {}", e);
                }
                let CacheArtifact { metadata, database } = artifact;
                self.install(
                    Arc::new(Matcher::new(database)),
                    Some(metadata),
                    CacheState::Degraded { retry_at },
                );
                return;
            }
            Ok(None) => {}
            Err(e) => warn!("Stored definitions copy is unusable: {}", e),
        }

        if self.config.silent {
            warn!("No definitions available, serving empty results: {}", cause);
            self.install(Arc::new(Matcher::empty()), None, CacheState::Degraded { retry_at });
        } else {
            error!("No definitions available: {}", cause);
            self.state.write().phase = CacheState::Unloaded;
        }
    }

    fn install(&self, matcher: Arc<Matcher>, metadata: Option<ArtifactMetadata>, phase: CacheState) {
        let mut state = self.state.write();
        state.matcher = Some(matcher);
        state.metadata = metadata;
        state.phase = phase;
    }

    /// Persists the error window and returns its end.
    fn record_failure(&self, now: u64) -> u64 {
        let stamp = RetryStamp {
            failed_at: now,
            retry_at: now.saturating_add(millis(self.config.error_interval)),
        };
        if let Err(e) = self.store.save_retry(&stamp) {
            warn!("Could not record the failed refresh: {}", e);
        }
        stamp.retry_at
    }

    fn clear_failure(&self) {
        if let Err(e) = self.store.clear_retry() {
            warn!("Could not clear the failed refresh record: {}", e);
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}
