//! End-to-end tests for the engine's load / refresh / degrade cycle.
//!
//! Tests verify:
//! - First lookup fetches, compiles, saves and serves
//! - An unchanged source never rewrites the artifact
//! - Failed refreshes keep serving and back off for the error interval
//! - Concurrent first-run refreshes coalesce into one fetch and one write

mod common;

use browscap::{BrowscapError, CacheState, ManualClock, RefreshReport};
use common::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const UPDATE_INTERVAL: Duration = Duration::from_secs(432_000);
const ERROR_INTERVAL: Duration = Duration::from_secs(7_200);

// ============================================================================
// FIRST RUN
// ============================================================================

#[test]
fn test_first_lookup_fetches_and_persists() {
    let dir = TempDir::new().unwrap();
    let source = MockSource::new();
    let clock = Arc::new(ManualClock::new(START_MS));
    let engine = engine(config(dir.path()), &source, &clock);

    let result = engine.get_browser(CHROME_LINUX).unwrap();

    assert_eq!(result.get_str("Browser"), Some("Chrome"));
    assert_eq!(result.get_str("Platform"), Some("Linux"));
    assert_eq!(result.get_str("Version"), Some("37.0"));
    assert_eq!(result.get_bool("JavaScript"), Some(true));
    assert_eq!(result.get_bool("Crawler"), Some(false));
    assert_eq!(result.get_str("browser_name"), Some(CHROME_LINUX));
    assert_eq!(result.get_str("Parent"), Some("Chrome 37.0"));

    // No local artifact: no freshness check, one full fetch
    assert_eq!(source.version_fetches(), 0);
    assert_eq!(source.ini_fetches(), 1);
    assert_eq!(engine.state(), CacheState::Fresh { checked_at: START_MS });

    assert!(engine.store().exists());
    assert!(engine.store().has_definitions());
    let metadata = engine.metadata().unwrap();
    assert_eq!(metadata.version.as_deref(), Some("5020"));
    assert_eq!(metadata.compiled_at, START_MS);
}

#[test]
fn test_lookups_within_interval_do_not_touch_source() {
    let dir = TempDir::new().unwrap();
    let source = MockSource::new();
    let clock = Arc::new(ManualClock::new(START_MS));
    let engine = engine(config(dir.path()), &source, &clock);

    engine.get_browser(CHROME_LINUX).unwrap();
    clock.advance(Duration::from_secs(3_600));
    engine.get_browser(GOOGLEBOT).unwrap();
    engine.get_browser("curl/7.38.0").unwrap();

    assert_eq!(source.attempts(), 1);
}

#[test]
fn test_new_engine_reuses_current_artifact() {
    let dir = TempDir::new().unwrap();
    let source = MockSource::new();
    let clock = Arc::new(ManualClock::new(START_MS));

    engine(config(dir.path()), &source, &clock)
        .get_browser(CHROME_LINUX)
        .unwrap();

    clock.advance(Duration::from_secs(60));
    let restarted = engine(config(dir.path()), &source, &clock);
    let result = restarted.get_browser(GOOGLEBOT).unwrap();

    assert_eq!(result.get_bool("Crawler"), Some(true));
    assert_eq!(source.attempts(), 1);
    assert_eq!(restarted.state(), CacheState::Fresh { checked_at: START_MS });
}

// ============================================================================
// REFRESH
// ============================================================================

#[test]
fn test_unchanged_source_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let source = MockSource::new();
    let clock = Arc::new(ManualClock::new(START_MS));
    let engine = engine(config(dir.path()), &source, &clock);

    engine.get_browser(CHROME_LINUX).unwrap();
    let artifact_path = engine.store().path().to_path_buf();
    let before = std::fs::read(&artifact_path).unwrap();
    let modified_before = std::fs::metadata(&artifact_path).unwrap().modified().unwrap();

    clock.advance(UPDATE_INTERVAL + Duration::from_secs(1));
    let now = START_MS + UPDATE_INTERVAL.as_millis() as u64 + 1_000;

    let result = engine.get_browser(FIREFOX_ANDROID).unwrap();
    assert_eq!(result.get_bool("isMobileDevice"), Some(true));

    assert_eq!(source.version_fetches(), 1);
    assert_eq!(source.ini_fetches(), 1);
    assert_eq!(engine.state(), CacheState::Fresh { checked_at: now });
    assert_eq!(std::fs::read(&artifact_path).unwrap(), before);
    assert_eq!(
        std::fs::metadata(&artifact_path).unwrap().modified().unwrap(),
        modified_before
    );

    // Forced refresh against the same source is equally a no-op
    assert_eq!(engine.refresh().unwrap(), RefreshReport::NotModified);
    assert_eq!(std::fs::read(&artifact_path).unwrap(), before);
}

#[test]
fn test_newer_source_is_fetched_and_installed() {
    let dir = TempDir::new().unwrap();
    let source = MockSource::new();
    let clock = Arc::new(ManualClock::new(START_MS));
    let engine = engine(config(dir.path()), &source, &clock);

    engine.get_browser(CHROME_LINUX).unwrap();

    *source.body.lock() = DEFINITIONS.replace("Browser=Chrome\n", "Browser=Chromium\n");
    source.set_version((START_MS / 1000) as i64 + 10);
    clock.advance(Duration::from_secs(60));

    match engine.refresh().unwrap() {
        RefreshReport::Updated(stats) => assert!(stats.entries_compiled > 0),
        other => panic!("expected an update, got {:?}", other),
    }
    assert_eq!(source.ini_fetches(), 2);

    let result = engine.get_browser(CHROME_LINUX).unwrap();
    assert_eq!(result.get_str("Browser"), Some("Chromium"));
    assert_eq!(
        engine.metadata().unwrap().compiled_at,
        START_MS + 60_000
    );
}

#[test]
fn test_auto_update_disabled_never_refreshes() {
    let dir = TempDir::new().unwrap();
    let source = MockSource::new();
    let clock = Arc::new(ManualClock::new(START_MS));
    let mut config = config(dir.path());
    config.auto_update = false;
    let engine = engine(config, &source, &clock);

    engine.get_browser(CHROME_LINUX).unwrap();
    clock.advance(UPDATE_INTERVAL * 10);
    engine.get_browser(CHROME_LINUX).unwrap();

    assert_eq!(source.attempts(), 1);
}

// ============================================================================
// FAILURE HANDLING
// ============================================================================

#[test]
fn test_failed_refresh_keeps_previous_definitions() {
    let dir = TempDir::new().unwrap();
    let source = MockSource::new();
    let clock = Arc::new(ManualClock::new(START_MS));
    let engine = engine(config(dir.path()), &source, &clock);

    engine.get_browser(CHROME_LINUX).unwrap();
    source.set_failing(true);

    clock.advance(UPDATE_INTERVAL + Duration::from_secs(1));
    let failed_at = clock_now(&clock);

    let result = engine.get_browser(CHROME_LINUX).unwrap();
    assert_eq!(result.get_str("Browser"), Some("Chrome"));
    assert_eq!(
        engine.state(),
        CacheState::Degraded {
            retry_at: failed_at + ERROR_INTERVAL.as_millis() as u64
        }
    );
    let attempts = source.attempts();

    // Inside the error interval: no new attempt
    clock.advance(ERROR_INTERVAL / 2);
    engine.get_browser(CHROME_LINUX).unwrap();
    assert_eq!(source.attempts(), attempts);

    // After it: retried, and recovered once the source is back
    source.set_failing(false);
    clock.advance(ERROR_INTERVAL);
    engine.get_browser(CHROME_LINUX).unwrap();
    assert!(source.attempts() > attempts);
    assert!(matches!(engine.state(), CacheState::Fresh { .. }));
}

#[test]
fn test_restarted_engine_honors_recorded_error_interval() {
    let dir = TempDir::new().unwrap();
    let source = MockSource::new();
    let clock = Arc::new(ManualClock::new(START_MS));
    let first = engine(config(dir.path()), &source, &clock);

    first.get_browser(CHROME_LINUX).unwrap();
    source.set_failing(true);
    clock.advance(UPDATE_INTERVAL + Duration::from_secs(1));
    let retry_at = clock_now(&clock) + ERROR_INTERVAL.as_millis() as u64;

    first.get_browser(CHROME_LINUX).unwrap();
    assert_eq!(first.state(), CacheState::Degraded { retry_at });
    drop(first);
    let attempts = source.attempts();

    // A new engine on the same directory a minute later
    clock.advance(Duration::from_secs(60));
    let second = engine(config(dir.path()), &source, &clock);
    let result = second.get_browser(CHROME_LINUX).unwrap();

    assert_eq!(result.get_str("Browser"), Some("Chrome"));
    assert_eq!(second.state(), CacheState::Degraded { retry_at });
    assert_eq!(source.attempts(), attempts);

    // Once the window has passed the source is tried again
    source.set_failing(false);
    clock.advance(ERROR_INTERVAL);
    second.get_browser(CHROME_LINUX).unwrap();
    assert!(source.attempts() > attempts);
    assert!(matches!(second.state(), CacheState::Fresh { .. }));
    assert!(second.store().read_retry().is_none());
}

#[test]
fn test_forced_refresh_reports_failure_but_keeps_serving() {
    let dir = TempDir::new().unwrap();
    let source = MockSource::new();
    let clock = Arc::new(ManualClock::new(START_MS));
    let engine = engine(config(dir.path()), &source, &clock);

    engine.get_browser(CHROME_LINUX).unwrap();
    source.set_failing(true);

    assert!(matches!(
        engine.refresh(),
        Err(BrowscapError::SourceUnavailable(_))
    ));
    assert_eq!(
        engine.get_browser(GOOGLEBOT).unwrap().get_str("Browser"),
        Some("Googlebot")
    );
}

#[test]
fn test_unreachable_source_without_cache_fails() {
    let dir = TempDir::new().unwrap();
    let source = MockSource::new();
    source.set_failing(true);
    let clock = Arc::new(ManualClock::new(START_MS));
    let engine = engine(config(dir.path()), &source, &clock);

    assert!(engine.get_browser(CHROME_LINUX).is_err());
    assert_eq!(engine.state(), CacheState::Unloaded);
    assert!(!engine.store().exists());
}

#[test]
fn test_unreachable_source_in_silent_mode_serves_empty() {
    let dir = TempDir::new().unwrap();
    let source = MockSource::new();
    source.set_failing(true);
    let clock = Arc::new(ManualClock::new(START_MS));
    let mut config = config(dir.path());
    config.silent = true;
    let engine = engine(config, &source, &clock);

    assert!(engine.get_browser(CHROME_LINUX).unwrap().is_empty());
    assert!(matches!(engine.state(), CacheState::Degraded { .. }));
}

#[test]
fn test_malformed_download_keeps_previous_definitions() {
    let dir = TempDir::new().unwrap();
    let source = MockSource::new();
    let clock = Arc::new(ManualClock::new(START_MS));
    let engine = engine(config(dir.path()), &source, &clock);

    engine.get_browser(CHROME_LINUX).unwrap();
    let saved = std::fs::read(engine.store().path()).unwrap();

    *source.body.lock() = "<html>503 Service Unavailable</html>".to_string();
    source.set_version((START_MS / 1000) as i64 + 10);

    assert!(matches!(
        engine.refresh(),
        Err(BrowscapError::MalformedDefinitions(_))
    ));
    assert_eq!(std::fs::read(engine.store().path()).unwrap(), saved);
    assert_eq!(
        engine.get_browser(CHROME_LINUX).unwrap().get_str("Browser"),
        Some("Chrome")
    );
}

#[test]
fn test_corrupt_artifact_is_rebuilt() {
    let dir = TempDir::new().unwrap();
    let source = MockSource::new();
    let clock = Arc::new(ManualClock::new(START_MS));
    let config = config(dir.path());
    std::fs::write(dir.path().join(&config.cache_filename), b"garbage").unwrap();

    let engine = engine(config, &source, &clock);
    assert_eq!(
        engine.get_browser(GOOGLEBOT).unwrap().get_str("Browser"),
        Some("Googlebot")
    );
    assert_eq!(source.ini_fetches(), 1);
    assert!(engine.store().load().is_ok());
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_first_lookups_share_one_refresh() {
    let dir = TempDir::new().unwrap();
    let source = MockSource::new();
    source.set_delay(Duration::from_millis(200));
    let clock = Arc::new(ManualClock::new(START_MS));
    let engine = Arc::new(engine(config(dir.path()), &source, &clock));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || engine.get_browser(CHROME_LINUX).unwrap())
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().get_str("Browser"), Some("Chrome"));
    }
    assert_eq!(source.ini_fetches(), 1);
}

#[test]
fn test_engines_sharing_a_cache_dir_fetch_once() {
    let dir = TempDir::new().unwrap();
    let source = MockSource::new();
    source.set_delay(Duration::from_millis(200));
    let clock = Arc::new(ManualClock::new(START_MS));

    // Two engines on one directory stand in for two processes
    let first = Arc::new(engine(config(dir.path()), &source, &clock));
    let second = Arc::new(engine(config(dir.path()), &source, &clock));

    let handles: Vec<_> = [first.clone(), second.clone()]
        .into_iter()
        .map(|engine| thread::spawn(move || engine.get_browser(GOOGLEBOT).unwrap()))
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().get_bool("Crawler"), Some(true));
    }

    assert_eq!(source.ini_fetches(), 1);
    assert_eq!(
        first.metadata().unwrap().compiled_at,
        second.metadata().unwrap().compiled_at
    );
}

fn clock_now(clock: &ManualClock) -> u64 {
    use browscap::Clock;
    clock.now_ms()
}
