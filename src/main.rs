//! # Browscap Lookup
//!
//! Resolves user agents from the command line or stdin (one per line) and
//! prints one JSON object per user agent.
//!
//! ```text
//! browscap-lookup [--update] [USER_AGENT ...]
//! ```
//!
//! Configuration comes from `BROWSCAP_*` environment variables; log output
//! is controlled by `RUST_LOG`.

use browscap::{Browscap, BrowscapConfig, RefreshReport};
use std::io::{self, BufRead};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut update = false;
    let mut user_agents = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--update" => update = true,
            "-h" | "--help" => {
                println!("Usage: browscap-lookup [--update] [USER_AGENT ...]");
                println!("Reads user agents from stdin when none are given.");
                return Ok(());
            }
            _ => user_agents.push(arg),
        }
    }

    let config = BrowscapConfig::from_env()?;
    let engine = match Browscap::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("✗ Failed to initialize engine: {}", e);
            return Err(e.into());
        }
    };

    if update {
        match engine.refresh()? {
            RefreshReport::Updated(stats) => eprintln!(
                "✓ Definitions updated: {} entries in {}ms",
                stats.entries_compiled, stats.duration_ms
            ),
            RefreshReport::NotModified => eprintln!("✓ Definitions already current"),
            RefreshReport::Reloaded { compiled_at } => {
                eprintln!("✓ Loaded artifact compiled at {}", compiled_at)
            }
            RefreshReport::Deferred { retry_at } => {
                eprintln!("✗ Source failed recently, retrying after {}", retry_at)
            }
        }
        if let Some(metadata) = engine.metadata() {
            eprintln!(
                "  - Version: {}",
                metadata.version.as_deref().unwrap_or("unknown")
            );
            eprintln!("  - Entries: {}", metadata.entry_count);
        }
    }

    if user_agents.is_empty() && !update {
        for line in io::stdin().lock().lines() {
            let line = line?;
            if !line.trim().is_empty() {
                print_lookup(&engine, line.trim())?;
            }
        }
        return Ok(());
    }

    for user_agent in &user_agents {
        print_lookup(&engine, user_agent)?;
    }

    Ok(())
}

fn print_lookup(engine: &Browscap, user_agent: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = engine.get_browser(user_agent)?;
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}
