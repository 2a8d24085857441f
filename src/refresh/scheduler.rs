//! Scheduled refresh - background task forcing periodic refresh cycles.
//!
//! Lookups already refresh lazily once the update interval has passed, but
//! only when traffic arrives. The scheduler keeps a long-running process
//! current without making a lookup pay for the fetch.
//!
//! Each tick runs [`Browscap::refresh`] on the blocking thread pool, since
//! the loader performs blocking network and file I/O. An unchanged source
//! costs one timestamp request and no writes.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::browscap::{Browscap, RefreshReport};
use crate::config::BrowscapConfig;
use crate::types::now_ms;
use log::{error, info};

/// Configuration for the scheduled refresh service.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between refresh operations
    pub refresh_interval: Duration,
    /// Whether the scheduler is enabled
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(6 * 60 * 60),
            enabled: true,
        }
    }
}

impl From<&BrowscapConfig> for SchedulerConfig {
    /// Ticks once per update interval; disabled when auto-update is off.
    fn from(config: &BrowscapConfig) -> Self {
        Self {
            refresh_interval: config.update_interval,
            enabled: config.auto_update,
        }
    }
}

/// Scheduler for periodic definitions refresh.
pub struct RefreshScheduler {
    /// Engine whose definitions are refreshed
    engine: Arc<Browscap>,
    /// Scheduler configuration
    config: SchedulerConfig,
    /// Timestamp of the last successful refresh
    last_refresh_at: Arc<RwLock<u64>>,
}

impl RefreshScheduler {
    /// Creates a new refresh scheduler.
    ///
    /// # Example
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use browscap::{Browscap, BrowscapConfig, RefreshScheduler, SchedulerConfig};
    ///
    /// let config = BrowscapConfig::default();
    /// let scheduler_config = SchedulerConfig::from(&config);
    /// let engine = Arc::new(Browscap::new(config)?);
    /// let scheduler = RefreshScheduler::new(engine, scheduler_config);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new(engine: Arc<Browscap>, config: SchedulerConfig) -> Self {
        Self {
            engine,
            config,
            last_refresh_at: Arc::new(RwLock::new(now_ms())),
        }
    }

    /// Returns the timestamp of the last successful refresh.
    ///
    /// # Returns
    /// Milliseconds since UNIX epoch of the last refresh, or initialization time
    /// if no refresh has occurred yet.
    pub fn last_refresh(&self) -> u64 {
        *self.last_refresh_at.read()
    }

    /// Starts the scheduler background task.
    ///
    /// Runs indefinitely and should be spawned as a tokio task. Returns
    /// immediately when the scheduler is disabled. The first tick fires at
    /// once, so the engine is loaded on startup.
    pub async fn start(self: Arc<Self>) {
        if !self.config.enabled {
            info!("Scheduled refresh is disabled, skipping");
            return;
        }

        info!(
            "Starting scheduled refresh with {}-second interval",
            self.config.refresh_interval.as_secs()
        );

        let mut ticker = interval(self.config.refresh_interval);

        loop {
            ticker.tick().await;
            self.do_refresh().await;
        }
    }

    /// Executes one refresh cycle.
    ///
    /// Errors are logged but do not stop the scheduler.
    pub async fn do_refresh(&self) {
        let engine = Arc::clone(&self.engine);

        match tokio::task::spawn_blocking(move || engine.refresh()).await {
            Ok(Ok(report)) => {
                match &report {
                    RefreshReport::Updated(stats) => info!(
                        "Scheduled refresh completed: {} entries compiled in {}ms",
                        stats.entries_compiled, stats.duration_ms
                    ),
                    RefreshReport::NotModified => {
                        info!("Scheduled refresh completed: definitions unchanged")
                    }
                    RefreshReport::Reloaded { compiled_at } => info!(
                        "Scheduled refresh completed: adopted artifact compiled at {}",
                        compiled_at
                    ),
                    RefreshReport::Deferred { retry_at } => {
                        info!("Scheduled refresh deferred until {}", retry_at);
                        return;
                    }
                }
                *self.last_refresh_at.write() = now_ms();
            }
            Ok(Err(e)) => {
                error!("Scheduled refresh failed: {}", e);
            }
            Err(e) => {
                error!("Scheduled refresh task panicked: {}", e);
            }
        }
    }
}
