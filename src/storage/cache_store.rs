//! Cache store - persistent compiled artifact and definitions text.
//!
//! Stores the [`CompiledDatabase`] in binary format for fast reload on restart.
//! Uses memmap2 for memory-mapped file access.
//!
//! # File Format
//! ```text
//! Metadata line (JSON, newline terminated):
//!   magic: "BCAP"
//!   format_version: 1
//!   entry_count, compiled_at, source_timestamp, version, released, lowercase
//!
//! Body (bincode):
//!   CompiledDatabase { patterns, user_agents, entries, properties }
//! ```
//!
//! A failed refresh leaves `<cache>.retry`, a one-line JSON [`RetryStamp`].
//!
//! Every write goes to a temp file in the same directory and is renamed over
//! the target, so readers only ever see a complete artifact.

use memmap2::Mmap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{ArtifactMetadata, CacheArtifact, RetryStamp, FORMAT_VERSION, MAGIC};
use crate::database::CompiledDatabase;
use crate::error::{BrowscapError, Result};
use log::warn;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// File-backed store for the compiled artifact and the definitions text.
#[derive(Debug, Clone)]
pub struct CacheStore {
    /// Path to the compiled artifact
    path: PathBuf,
    /// Path to the normalized definitions text
    definitions_path: PathBuf,
    /// Path to the refresh lock file
    lock_path: PathBuf,
    /// Path to the failed-refresh stamp
    retry_path: PathBuf,
}

impl CacheStore {
    /// Open a store in `dir`, creating the directory if needed.
    pub fn open<P: AsRef<Path>>(dir: P, cache_filename: &str, definitions_filename: &str) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| {
            BrowscapError::InvalidConfiguration(format!(
                "Cache directory {} is not usable: {}",
                dir.display(),
                e
            ))
        })?;

        let path = dir.join(cache_filename);
        let sibling = |suffix: &str| {
            let mut name = path.as_os_str().to_os_string();
            name.push(suffix);
            PathBuf::from(name)
        };
        let lock_path = sibling(".lock");
        let retry_path = sibling(".retry");

        Ok(Self {
            path,
            definitions_path: dir.join(definitions_filename),
            lock_path,
            retry_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn definitions_path(&self) -> &Path {
        &self.definitions_path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn has_definitions(&self) -> bool {
        fs::metadata(&self.definitions_path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    // ============================================================================================
    // ARTIFACT
    // ============================================================================================

    /// Write the artifact atomically.
    ///
    /// # Errors
    /// `StaleWriteConflict` on any I/O or encoding failure; the previous
    /// artifact, if any, is left untouched.
    pub fn save(&self, database: &CompiledDatabase, metadata: &ArtifactMetadata) -> Result<()> {
        let header = serde_json::to_string(metadata)
            .map_err(|e| BrowscapError::write_conflict(&self.path, format!("Serialize metadata failed: {}", e)))?;

        write_atomically(&self.path, |writer| {
            writer
                .write_all(header.as_bytes())
                .and_then(|_| writer.write_all(b"\n"))
                .map_err(|e| format!("Write metadata failed: {}", e))?;
            bincode::serialize_into(writer, database)
                .map_err(|e| format!("Serialize database failed: {}", e))
        })
    }

    /// Load the artifact.
    ///
    /// # Errors
    /// - `CacheNotFound` when no artifact exists
    /// - `CacheCorrupt` when the header or body cannot be decoded
    pub fn load(&self) -> Result<CacheArtifact> {
        let mmap = self.map()?;
        let (metadata, body_offset) = self.parse_header(&mmap)?;

        let database: CompiledDatabase = bincode::deserialize(&mmap[body_offset..])
            .map_err(|e| BrowscapError::corrupt(&self.path, format!("Deserialize database failed: {}", e)))?;

        database
            .validate()
            .map_err(|e| BrowscapError::corrupt(&self.path, e))?;

        if database.len() != metadata.entry_count {
            return Err(BrowscapError::corrupt(
                &self.path,
                format!(
                    "header announces {} entries, body holds {}",
                    metadata.entry_count,
                    database.len()
                ),
            ));
        }

        Ok(CacheArtifact { metadata, database })
    }

    /// Read only the metadata header.
    pub fn read_metadata(&self) -> Result<ArtifactMetadata> {
        let mmap = self.map()?;
        self.parse_header(&mmap).map(|(metadata, _)| metadata)
    }

    fn map(&self) -> Result<Mmap> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BrowscapError::CacheNotFound(self.path.clone()))
            }
            Err(e) => return Err(BrowscapError::corrupt(&self.path, format!("Open failed: {}", e))),
        };

        // Artifacts are replaced by rename, never modified in place.
        let mmap = unsafe {
            Mmap::map(&file).map_err(|e| BrowscapError::corrupt(&self.path, format!("Mmap failed: {}", e)))?
        };

        if mmap.is_empty() {
            return Err(BrowscapError::corrupt(&self.path, "File is empty"));
        }

        Ok(mmap)
    }

    fn parse_header(&self, mmap: &Mmap) -> Result<(ArtifactMetadata, usize)> {
        let newline_pos = mmap
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| BrowscapError::corrupt(&self.path, "No metadata line found"))?;

        let metadata: ArtifactMetadata = serde_json::from_slice(&mmap[..newline_pos])
            .map_err(|e| BrowscapError::corrupt(&self.path, format!("Parse metadata failed: {}", e)))?;

        if metadata.magic != MAGIC {
            return Err(BrowscapError::corrupt(&self.path, "Invalid magic number"));
        }

        if metadata.format_version != FORMAT_VERSION {
            return Err(BrowscapError::corrupt(
                &self.path,
                format!("Unsupported version: {}", metadata.format_version),
            ));
        }

        Ok((metadata, newline_pos + 1))
    }

    // ============================================================================================
    // DEFINITIONS TEXT
    // ============================================================================================

    /// Persist normalized definitions text atomically.
    pub fn save_definitions(&self, text: &str) -> Result<()> {
        write_atomically(&self.definitions_path, |writer| {
            writer
                .write_all(text.as_bytes())
                .map_err(|e| format!("Write definitions failed: {}", e))
        })
    }

    /// Previously persisted definitions text, if any.
    pub fn load_definitions(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.definitions_path) {
            Ok(text) if !text.is_empty() => Ok(Some(text)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ============================================================================================
    // RETRY STAMP
    // ============================================================================================

    pub fn retry_path(&self) -> &Path {
        &self.retry_path
    }

    /// Record a failed refresh atomically.
    pub fn save_retry(&self, stamp: &RetryStamp) -> Result<()> {
        let line = serde_json::to_string(stamp)
            .map_err(|e| BrowscapError::write_conflict(&self.retry_path, format!("Serialize stamp failed: {}", e)))?;

        write_atomically(&self.retry_path, |writer| {
            writer
                .write_all(line.as_bytes())
                .map_err(|e| format!("Write stamp failed: {}", e))
        })
    }

    /// The recorded failure, if any. An unreadable stamp counts as none.
    pub fn read_retry(&self) -> Option<RetryStamp> {
        let text = match fs::read_to_string(&self.retry_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Could not read {}: {}", self.retry_path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(text.trim()) {
            Ok(stamp) => Some(stamp),
            Err(e) => {
                warn!("Ignoring malformed {}: {}", self.retry_path.display(), e);
                None
            }
        }
    }

    /// Forget a recorded failure after a successful refresh.
    pub fn clear_retry(&self) -> Result<()> {
        match fs::remove_file(&self.retry_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BrowscapError::write_conflict(
                &self.retry_path,
                format!("Remove stamp failed: {}", e),
            )),
        }
    }

    // ============================================================================================
    // LOCKING
    // ============================================================================================

    /// Run `f` while holding the exclusive refresh lock.
    ///
    /// The lock is an advisory file lock, so refreshes in other processes
    /// sharing this cache directory wait for each other too.
    pub fn with_exclusive_lock<T>(&self, f: impl FnOnce() -> T) -> Result<T> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| BrowscapError::write_conflict(&self.lock_path, format!("Open lock failed: {}", e)))?;

        let mut lock = fd_lock::RwLock::new(file);
        let _guard = lock
            .write()
            .map_err(|e| BrowscapError::write_conflict(&self.lock_path, format!("Lock failed: {}", e)))?;

        Ok(f())
    }
}

/// Write through a temp file in the target's directory, then rename.
fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> std::result::Result<(), String>,
{
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(format!(
        ".{}.{}.tmp",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let tmp_path = PathBuf::from(tmp_name);

    let result = (|| {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| format!("Create temp failed: {}", e))?;

        let mut writer = BufWriter::new(file);
        write(&mut writer)?;

        let file = writer
            .into_inner()
            .map_err(|e| format!("Flush failed: {}", e))?;
        file.sync_all().map_err(|e| format!("Sync failed: {}", e))?;
        drop(file);

        // Atomic rename
        fs::rename(&tmp_path, path).map_err(|e| format!("Rename failed: {}", e))
    })();

    if let Err(message) = result {
        fs::remove_file(&tmp_path).ok();
        return Err(BrowscapError::write_conflict(path, message));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{normalize, Compiler};

    fn sample_database() -> CompiledDatabase {
        Compiler::default()
            .compile(&normalize(
                "[v]\nVersion=2\n[DefaultProperties]\nBrowser=x\n[a*]\nParent=DefaultProperties\nBrowser=A\n",
            ))
            .unwrap()
            .database
    }

    fn open_store(dir: &Path) -> CacheStore {
        CacheStore::open(dir, "browscap.cache", "browscap.ini").unwrap()
    }

    #[test]
    fn test_save_and_load() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let store = open_store(tmp_dir.path());
        let database = sample_database();
        let mut metadata = ArtifactMetadata::new(database.len(), 42, 7, false);
        metadata.version = Some("2".to_string());

        store.save(&database, &metadata).unwrap();
        assert!(store.exists());

        let artifact = store.load().unwrap();
        assert_eq!(artifact.database, database);
        assert_eq!(artifact.metadata, metadata);
        assert_eq!(store.read_metadata().unwrap().compiled_at, 42);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let store = open_store(tmp_dir.path());
        assert!(matches!(store.load(), Err(BrowscapError::CacheNotFound(_))));
    }

    #[test]
    fn test_load_rejects_foreign_file() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let store = open_store(tmp_dir.path());

        fs::write(store.path(), b"<?php\n$properties=array();\n").unwrap();
        assert!(matches!(store.load(), Err(BrowscapError::CacheCorrupt { .. })));

        fs::write(store.path(), b"").unwrap();
        assert!(matches!(store.load(), Err(BrowscapError::CacheCorrupt { .. })));
    }

    #[test]
    fn test_load_rejects_wrong_magic() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let store = open_store(tmp_dir.path());
        let database = sample_database();
        let mut metadata = ArtifactMetadata::new(database.len(), 1, 1, false);
        metadata.magic = "GUAR".to_string();

        store.save(&database, &metadata).unwrap();
        assert!(matches!(store.load(), Err(BrowscapError::CacheCorrupt { .. })));
    }

    #[test]
    fn test_load_rejects_entry_count_mismatch() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let store = open_store(tmp_dir.path());
        let database = sample_database();
        let metadata = ArtifactMetadata::new(database.len() + 1, 1, 1, false);

        store.save(&database, &metadata).unwrap();
        assert!(matches!(store.load(), Err(BrowscapError::CacheCorrupt { .. })));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let store = open_store(tmp_dir.path());
        let database = sample_database();
        store
            .save(&database, &ArtifactMetadata::new(database.len(), 1, 1, false))
            .unwrap();
        store.save_definitions("[v]\n").unwrap();

        let leftovers: Vec<_> = fs::read_dir(tmp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_save_into_missing_directory_is_write_conflict() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let store = open_store(&tmp_dir.path().join("cache"));
        fs::remove_dir_all(tmp_dir.path().join("cache")).unwrap();

        let database = sample_database();
        let result = store.save(&database, &ArtifactMetadata::new(database.len(), 1, 1, false));
        assert!(matches!(result, Err(BrowscapError::StaleWriteConflict { .. })));
    }

    #[test]
    fn test_definitions_round_trip() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let store = open_store(tmp_dir.path());

        assert!(!store.has_definitions());
        assert_eq!(store.load_definitions().unwrap(), None);

        store.save_definitions("[v]\nVersion=1\n").unwrap();
        assert!(store.has_definitions());
        assert_eq!(
            store.load_definitions().unwrap().as_deref(),
            Some("[v]\nVersion=1\n")
        );
    }

    #[test]
    fn test_retry_stamp_lifecycle() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let store = open_store(tmp_dir.path());
        assert!(store.read_retry().is_none());

        let stamp = RetryStamp {
            failed_at: 1_000,
            retry_at: 8_201_000,
        };
        store.save_retry(&stamp).unwrap();
        assert_eq!(store.read_retry(), Some(stamp));
        assert!(stamp.is_pending(8_200_999));
        assert!(!stamp.is_pending(8_201_000));

        // Visible through a second handle on the same directory
        assert_eq!(open_store(tmp_dir.path()).read_retry(), Some(stamp));

        store.clear_retry().unwrap();
        assert!(store.read_retry().is_none());
        store.clear_retry().unwrap();
    }

    #[test]
    fn test_malformed_retry_stamp_is_ignored() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let store = open_store(tmp_dir.path());
        fs::write(store.retry_path(), b"not json").unwrap();
        assert!(store.read_retry().is_none());
    }

    #[test]
    fn test_exclusive_lock_runs_closure() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let store = open_store(tmp_dir.path());
        let value = store.with_exclusive_lock(|| 7).unwrap();
        assert_eq!(value, 7);
    }
}
