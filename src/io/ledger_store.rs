//! Durable ledger storage
//!
//! Each event namespace owns two self-contained JSON documents in the ledger
//! directory:
//! - `used_<event>.json` - array of consumed codes
//! - `checkins_<event>.json` - array of check-in entries in insertion order
//!
//! Every mutation rewrites the whole document through a temp file and a
//! rename, so readers see either the old or the new document.
//!
//! A writable store holds an exclusive lock on `ledger_<event>.lock` for its
//! whole lifetime, so only one process at a time can mutate an event's
//! ledger. Read-only stores take no lock and refuse every write.

use crate::domain::error::StorageError;
use crate::domain::types::CheckinEntry;
use crate::infra::config::Config;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Backing storage for a usage ledger
pub trait LedgerStore: Send {
    fn load_used(&self) -> Result<Vec<String>, StorageError>;
    fn save_used(&mut self, codes: &[String]) -> Result<(), StorageError>;
    fn load_entries(&self) -> Result<Vec<CheckinEntry>, StorageError>;
    fn save_entries(&mut self, entries: &[CheckinEntry]) -> Result<(), StorageError>;
    /// Remove both records
    fn clear(&mut self) -> Result<(), StorageError>;
    /// Short description for logs
    fn describe(&self) -> String;
}

/// JSON-file ledger storage keyed by event identifier
#[derive(Debug)]
pub struct JsonFileStore {
    used_path: PathBuf,
    entries_path: PathBuf,
    /// Held for the store's lifetime; `None` for read-only stores
    lock: Option<File>,
}

impl JsonFileStore {
    /// Open writable storage for `event_id` under `dir`, creating the
    /// directory if needed.
    ///
    /// Fails with `StorageError::Locked` while another store (in this or any
    /// other process) has the same event open for writing.
    pub fn open<P: AsRef<Path>>(dir: P, event_id: &str) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

        let key = storage_key(event_id);
        let lock = lock_exclusive(&dir.join(format!("ledger_{key}.lock")))?;
        let store = Self::with_paths(dir, &key, Some(lock));
        info!(dir = %dir.display(), event = %event_id, "ledger_store_opened");
        Ok(store)
    }

    /// Open storage for reading only. Takes no lock; writes fail with
    /// `StorageError::ReadOnly`.
    pub fn open_read_only<P: AsRef<Path>>(dir: P, event_id: &str) -> Self {
        let dir = dir.as_ref();
        let store = Self::with_paths(dir, &storage_key(event_id), None);
        debug!(dir = %dir.display(), event = %event_id, "ledger_store_opened_read_only");
        store
    }

    fn with_paths(dir: &Path, key: &str, lock: Option<File>) -> Self {
        Self {
            used_path: dir.join(format!("used_{key}.json")),
            entries_path: dir.join(format!("checkins_{key}.json")),
            lock,
        }
    }

    fn ensure_writable(&self) -> Result<(), StorageError> {
        if self.lock.is_none() {
            return Err(StorageError::ReadOnly);
        }
        Ok(())
    }

    pub fn used_path(&self) -> &Path {
        &self.used_path
    }

    pub fn entries_path(&self) -> &Path {
        &self.entries_path
    }
}

impl LedgerStore for JsonFileStore {
    fn load_used(&self) -> Result<Vec<String>, StorageError> {
        read_document(&self.used_path)
    }

    fn save_used(&mut self, codes: &[String]) -> Result<(), StorageError> {
        self.ensure_writable()?;
        write_document(&self.used_path, codes)
    }

    fn load_entries(&self) -> Result<Vec<CheckinEntry>, StorageError> {
        read_document(&self.entries_path)
    }

    fn save_entries(&mut self, entries: &[CheckinEntry]) -> Result<(), StorageError> {
        self.ensure_writable()?;
        write_document(&self.entries_path, entries)
    }

    /// Empty the log first, then the used set. A failure part way leaves
    /// codes consumed without log rows, never logged codes unconsumed.
    fn clear(&mut self) -> Result<(), StorageError> {
        self.ensure_writable()?;
        write_document::<CheckinEntry>(&self.entries_path, &[])?;
        write_document::<String>(&self.used_path, &[])
    }

    fn describe(&self) -> String {
        self.used_path.parent().map(|p| p.display().to_string()).unwrap_or_default()
    }
}

/// Session-only storage; nothing survives the process
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    used: Vec<String>,
    entries: Vec<CheckinEntry>,
}

impl LedgerStore for MemoryLedgerStore {
    fn load_used(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.used.clone())
    }

    fn save_used(&mut self, codes: &[String]) -> Result<(), StorageError> {
        self.used = codes.to_vec();
        Ok(())
    }

    fn load_entries(&self) -> Result<Vec<CheckinEntry>, StorageError> {
        Ok(self.entries.clone())
    }

    fn save_entries(&mut self, entries: &[CheckinEntry]) -> Result<(), StorageError> {
        self.entries = entries.to_vec();
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.used.clear();
        self.entries.clear();
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Storage for the configured event: JSON files, or memory when
/// persistence is disabled
pub fn open_store(config: &Config) -> Result<Box<dyn LedgerStore>, StorageError> {
    if config.ledger_persist() {
        Ok(Box::new(JsonFileStore::open(config.ledger_dir(), config.event_id())?))
    } else {
        info!(event = %config.event_id(), "ledger_session_only");
        Ok(Box::new(MemoryLedgerStore::default()))
    }
}

/// Map an event identifier to a file-name-safe key
fn storage_key(event_id: &str) -> String {
    let key: String = event_id
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if key.is_empty() {
        "default".to_string()
    } else {
        key
    }
}

/// Read a JSON document; a missing file is an empty document
fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StorageError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(path, e)),
    };

    serde_json::from_slice(&data)
        .map_err(|source| StorageError::Corrupt { path: path.display().to_string(), source })
}

/// Replace a JSON document via temp file and rename
fn write_document<T: Serialize>(path: &Path, items: &[T]) -> Result<(), StorageError> {
    let data = serde_json::to_vec(items)?;
    let tmp_path = path.with_extension("json.tmp");

    fs::write(&tmp_path, &data).map_err(|e| io_error(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| io_error(path, e))?;

    debug!(file = %path.display(), bytes = %data.len(), "ledger_written");
    Ok(())
}

/// Take a non-blocking exclusive lock on `path`, creating it if needed.
/// The lock is released when the returned file is closed.
fn lock_exclusive(path: &Path) -> Result<File, StorageError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| io_error(path, e))?;

    // Fully qualified: newer std has an inherent File::try_lock_exclusive
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            debug!(file = %path.display(), "ledger_lock_acquired");
            Ok(file)
        }
        Err(e) if is_contended(&e) => Err(StorageError::Locked { path: path.display().to_string() }),
        Err(e) => Err(io_error(path, e)),
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn io_error(path: &Path, source: io::Error) -> StorageError {
    StorageError::Io { path: path.display().to_string(), source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(code: &str, at: u64) -> CheckinEntry {
        CheckinEntry {
            code: code.to_string(),
            name: format!("guest {code}"),
            timestamp_ms: at,
            origin_tag: "local".to_string(),
        }
    }

    #[test]
    fn test_missing_files_load_empty() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path(), "gala").unwrap();

        assert!(store.load_used().unwrap().is_empty());
        assert!(store.load_entries().unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_and_file_names() {
        let dir = tempdir().unwrap();
        let mut store = JsonFileStore::open(dir.path(), "gala").unwrap();

        store.save_used(&["A1".to_string(), "B2".to_string()]).unwrap();
        store.save_entries(&[entry("A1", 10), entry("B2", 5)]).unwrap();

        assert!(dir.path().join("used_gala.json").exists());
        assert!(dir.path().join("checkins_gala.json").exists());
        assert!(!dir.path().join("used_gala.json.tmp").exists());
        drop(store);

        let reopened = JsonFileStore::open(dir.path(), "gala").unwrap();
        assert_eq!(reopened.load_used().unwrap(), vec!["A1", "B2"]);
        let entries = reopened.load_entries().unwrap();
        assert_eq!(entries.len(), 2);
        // Insertion order, not timestamp order
        assert_eq!(entries[0].code, "A1");
        assert_eq!(entries[1].code, "B2");
    }

    #[test]
    fn test_events_do_not_collide() {
        let dir = tempdir().unwrap();
        let mut gala = JsonFileStore::open(dir.path(), "gala").unwrap();
        let brunch = JsonFileStore::open(dir.path(), "brunch").unwrap();

        gala.save_used(&["A1".to_string()]).unwrap();

        assert!(brunch.load_used().unwrap().is_empty());
    }

    #[test]
    fn test_event_id_sanitized() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path(), "../etc/pass wd").unwrap();
        assert_eq!(store.used_path(), dir.path().join("used____etc_pass_wd.json"));
        assert_eq!(storage_key("  "), "default");
    }

    #[test]
    fn test_corrupt_record_is_an_error() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path(), "gala").unwrap();
        fs::write(store.used_path(), "{oops").unwrap();

        assert!(matches!(store.load_used(), Err(StorageError::Corrupt { .. })));
    }

    #[test]
    fn test_clear_empties_both_records() {
        let dir = tempdir().unwrap();
        let mut store = JsonFileStore::open(dir.path(), "gala").unwrap();
        store.save_used(&["A1".to_string()]).unwrap();
        store.save_entries(&[entry("A1", 1)]).unwrap();

        store.clear().unwrap();
        // Clearing twice is fine
        store.clear().unwrap();

        assert_eq!(fs::read_to_string(store.used_path()).unwrap(), "[]");
        assert_eq!(fs::read_to_string(store.entries_path()).unwrap(), "[]");
        assert!(store.load_used().unwrap().is_empty());
        assert!(store.load_entries().unwrap().is_empty());
    }

    #[test]
    fn test_failed_clear_never_leaves_logged_codes_unused() {
        let dir = tempdir().unwrap();
        let mut store = JsonFileStore::open(dir.path(), "gala").unwrap();
        store.save_used(&["A1".to_string()]).unwrap();
        store.save_entries(&[entry("A1", 1)]).unwrap();

        // A directory in the way of the used-set temp file makes the second
        // step of the clear fail
        let blocker = dir.path().join("used_gala.json.tmp");
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), "x").unwrap();

        assert!(matches!(store.clear(), Err(StorageError::Io { .. })));

        // The log went first; the code is still consumed
        assert!(store.load_entries().unwrap().is_empty());
        assert_eq!(store.load_used().unwrap(), vec!["A1"]);
    }

    #[test]
    fn test_second_writer_is_locked_out() {
        let dir = tempdir().unwrap();
        let first = JsonFileStore::open(dir.path(), "gala").unwrap();

        assert!(matches!(
            JsonFileStore::open(dir.path(), "gala"),
            Err(StorageError::Locked { .. })
        ));
        // Other events are independent
        assert!(JsonFileStore::open(dir.path(), "brunch").is_ok());

        drop(first);
        assert!(JsonFileStore::open(dir.path(), "gala").is_ok());
    }

    #[test]
    fn test_read_only_store_refuses_writes() {
        let dir = tempdir().unwrap();
        let mut writer = JsonFileStore::open(dir.path(), "gala").unwrap();
        writer.save_used(&["A1".to_string()]).unwrap();

        // Readers do not contend with the writer
        let mut reader = JsonFileStore::open_read_only(dir.path(), "gala");
        assert_eq!(reader.load_used().unwrap(), vec!["A1"]);

        assert!(matches!(reader.save_used(&[]), Err(StorageError::ReadOnly)));
        assert!(matches!(reader.save_entries(&[]), Err(StorageError::ReadOnly)));
        assert!(matches!(reader.clear(), Err(StorageError::ReadOnly)));
        assert_eq!(writer.load_used().unwrap(), vec!["A1"]);
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryLedgerStore::default();
        store.save_used(&["A1".to_string()]).unwrap();
        store.save_entries(&[entry("A1", 1)]).unwrap();
        assert_eq!(store.load_used().unwrap(), vec!["A1"]);

        store.clear().unwrap();
        assert!(store.load_entries().unwrap().is_empty());
        assert_eq!(store.describe(), "memory");
    }
}
