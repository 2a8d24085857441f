//! Definitions refresh - fetch, compile and replace the installed matcher.
//!
//! Provides two refresh mechanisms:
//! 1. **Refresh cycle** (RefreshService): one freshness check plus fetch and compile,
//!    driven by the engine on lookup or on demand
//! 2. **Scheduled refresh** (RefreshScheduler): Periodic background task
//!    forcing a cycle on a fixed interval

pub mod scheduler;
pub mod service;

pub use scheduler::{RefreshScheduler, SchedulerConfig};
pub use service::{RefreshOutcome, RefreshService, RefreshStats};
