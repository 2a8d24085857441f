//! Shared fixtures for integration tests.

#![allow(dead_code)]

use browscap::{Browscap, BrowscapConfig, BrowscapError, Loader, ManualClock, Transport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEFINITIONS: &str = include_str!("../fixtures/browscap_sample.ini");

pub const CHROME_LINUX: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/37.0.2062.120 Safari/537.36";
pub const FIREFOX_ANDROID: &str = "Mozilla/5.0 (Android 4.4; Mobile; rv:31.0) Gecko/31.0 Firefox/31.0";
pub const GOOGLEBOT: &str = "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";

/// 2017-07-14, well after the fixture's publication date.
pub const START_MS: u64 = 1_500_000_000_000;

/// Publication date of the fixture definitions.
pub const PUBLISHED: i64 = 1_409_818_317;

/// Scripted definitions source: answers version requests with `version`,
/// everything else with `body`, counting both.
pub struct MockSource {
    pub version: Mutex<String>,
    pub body: Mutex<String>,
    pub failing: AtomicBool,
    pub delay: Mutex<Duration>,
    pub ini_fetches: AtomicUsize,
    pub version_fetches: AtomicUsize,
    pub attempts: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            version: Mutex::new(PUBLISHED.to_string()),
            body: Mutex::new(DEFINITIONS.to_string()),
            failing: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            ini_fetches: AtomicUsize::new(0),
            version_fetches: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn set_version(&self, timestamp: i64) {
        *self.version.lock() = timestamp.to_string();
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn ini_fetches(&self) -> usize {
        self.ini_fetches.load(Ordering::SeqCst)
    }

    pub fn version_fetches(&self) -> usize {
        self.version_fetches.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn loader(self: &Arc<Self>) -> Loader {
        Loader::new(vec![Box::new(MockTransport(self.clone()))], Duration::from_secs(1))
    }
}

pub struct MockTransport(pub Arc<MockSource>);

impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn fetch(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>, BrowscapError> {
        let source = &self.0;
        source.attempts.fetch_add(1, Ordering::SeqCst);

        if source.failing.load(Ordering::SeqCst) {
            return Err(BrowscapError::SourceUnavailable(format!("{} is down", url)));
        }

        let delay = *source.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if url.contains("version") {
            source.version_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(source.version.lock().clone().into_bytes())
        } else {
            source.ini_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(source.body.lock().clone().into_bytes())
        }
    }
}

pub fn config(dir: &std::path::Path) -> BrowscapConfig {
    BrowscapConfig::with_cache_dir(dir)
}

pub fn engine(
    config: BrowscapConfig,
    source: &Arc<MockSource>,
    clock: &Arc<ManualClock>,
) -> Browscap {
    Browscap::with_loader(config, source.loader(), clock.clone()).unwrap()
}
