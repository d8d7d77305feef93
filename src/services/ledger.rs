//! Usage ledger - consumed codes and the check-in audit log
//!
//! The in-memory view is only updated after the store accepted the write,
//! so a storage failure never leaves memory ahead of disk.

use crate::domain::error::StorageError;
use crate::domain::types::CheckinEntry;
use crate::io::ledger_store::LedgerStore;
use rustc_hash::FxHashSet;
use tracing::{error, info, warn};

/// Phrase an operator must type to reset a ledger
pub const RESET_PHRASE: &str = "resetar";

/// Proof that the operator confirmed a reset.
///
/// Only obtainable from the confirmation phrase.
#[derive(Debug)]
pub struct ResetConfirmation(());

impl ResetConfirmation {
    /// Accept the phrase case-insensitively, ignoring surrounding whitespace
    pub fn from_phrase(phrase: &str) -> Option<Self> {
        if phrase.trim().eq_ignore_ascii_case(RESET_PHRASE) {
            Some(Self(()))
        } else {
            None
        }
    }
}

/// Consumed codes and the entry log for one event namespace
pub struct UsageLedger {
    store: Box<dyn LedgerStore>,
    used: FxHashSet<String>,
    entries: Vec<CheckinEntry>,
}

impl UsageLedger {
    /// Load both records from `store`. Read failures are returned, never
    /// papered over with an empty ledger.
    pub fn open(store: Box<dyn LedgerStore>) -> Result<Self, StorageError> {
        let used: FxHashSet<String> = store.load_used()?.into_iter().collect();
        let entries = store.load_entries()?;

        info!(
            store = %store.describe(),
            used = %used.len(),
            entries = %entries.len(),
            "ledger_opened"
        );

        Ok(Self { store, used, entries })
    }

    #[inline]
    pub fn is_used(&self, code: &str) -> bool {
        self.used.contains(code)
    }

    /// Mark `code` consumed. Marking an already-used code is a no-op.
    pub fn mark_used(&mut self, code: &str) -> Result<(), StorageError> {
        if self.used.contains(code) {
            return Ok(());
        }

        self.used.insert(code.to_string());
        if let Err(e) = self.persist_used() {
            self.used.remove(code);
            return Err(e);
        }
        Ok(())
    }

    /// Append an entry to the log, preserving insertion order
    pub fn append_entry(&mut self, entry: CheckinEntry) -> Result<(), StorageError> {
        self.entries.push(entry);
        if let Err(e) = self.store.save_entries(&self.entries) {
            self.entries.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Mark the entry's code used and log it, as one unit.
    ///
    /// If the log write fails the mark is rolled back so the code is not left
    /// consumed without a matching admission.
    pub fn commit_admission(&mut self, entry: CheckinEntry) -> Result<(), StorageError> {
        let code = entry.code.clone();
        let newly_marked = !self.used.contains(&code);

        self.mark_used(&code)?;

        if let Err(e) = self.append_entry(entry) {
            if newly_marked {
                self.used.remove(&code);
                if let Err(rollback) = self.persist_used() {
                    log_rollback_failed(&code, &rollback);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Clear the used set and the entry log.
    ///
    /// If the store fails part way, memory is reloaded from it so the
    /// ledger keeps reporting what a restart would see.
    pub fn reset(&mut self, _confirmation: ResetConfirmation) -> Result<(), StorageError> {
        if let Err(e) = self.store.clear() {
            log_reset_failed(&self.store.describe(), &e);
            self.reload();
            return Err(e);
        }

        let cleared_used = self.used.len();
        let cleared_entries = self.entries.len();
        self.used.clear();
        self.entries.clear();

        warn!(
            store = %self.store.describe(),
            cleared_used = %cleared_used,
            cleared_entries = %cleared_entries,
            "ledger_reset"
        );
        Ok(())
    }

    /// Entry log in insertion order
    pub fn entries(&self) -> &[CheckinEntry] {
        &self.entries
    }

    /// Consumed codes, sorted
    pub fn used_codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.used.iter().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }

    pub fn used_count(&self) -> usize {
        self.used.len()
    }

    fn reload(&mut self) {
        match (self.store.load_used(), self.store.load_entries()) {
            (Ok(used), Ok(entries)) => {
                self.used = used.into_iter().collect();
                self.entries = entries;
            }
            (Err(e), _) | (_, Err(e)) => log_reset_failed(&self.store.describe(), &e),
        }
    }

    fn persist_used(&mut self) -> Result<(), StorageError> {
        let mut codes: Vec<String> = self.used.iter().cloned().collect();
        codes.sort_unstable();
        self.store.save_used(&codes)
    }
}

#[cold]
fn log_reset_failed(store: &str, e: &StorageError) {
    error!(store = %store, error = %e, "ledger_reset_failed");
}

#[cold]
fn log_rollback_failed(code: &str, e: &StorageError) {
    error!(code = %code, error = %e, "ledger_rollback_failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ledger_store::{JsonFileStore, MemoryLedgerStore};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn entry(code: &str, at: u64) -> CheckinEntry {
        CheckinEntry {
            code: code.to_string(),
            name: "Ana".to_string(),
            timestamp_ms: at,
            origin_tag: "local".to_string(),
        }
    }

    fn memory_ledger() -> UsageLedger {
        UsageLedger::open(Box::new(MemoryLedgerStore::default())).unwrap()
    }

    /// Store whose entry-log writes can be made to fail
    struct FlakyStore {
        inner: MemoryLedgerStore,
        fail_entries: Arc<AtomicBool>,
        fail_used: Arc<AtomicBool>,
    }

    impl LedgerStore for FlakyStore {
        fn load_used(&self) -> Result<Vec<String>, StorageError> {
            self.inner.load_used()
        }

        fn save_used(&mut self, codes: &[String]) -> Result<(), StorageError> {
            if self.fail_used.load(Ordering::SeqCst) {
                return Err(disk_full());
            }
            self.inner.save_used(codes)
        }

        fn load_entries(&self) -> Result<Vec<CheckinEntry>, StorageError> {
            self.inner.load_entries()
        }

        fn save_entries(&mut self, entries: &[CheckinEntry]) -> Result<(), StorageError> {
            if self.fail_entries.load(Ordering::SeqCst) {
                return Err(disk_full());
            }
            self.inner.save_entries(entries)
        }

        fn clear(&mut self) -> Result<(), StorageError> {
            // Log first, then the used set, like the file store
            self.save_entries(&[])?;
            self.save_used(&[])
        }

        fn describe(&self) -> String {
            "flaky".to_string()
        }
    }

    fn disk_full() -> StorageError {
        StorageError::Io {
            path: "flaky".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        }
    }

    #[test]
    fn test_mark_used_idempotent() {
        let mut ledger = memory_ledger();

        ledger.mark_used("A1").unwrap();
        ledger.mark_used("A1").unwrap();

        assert!(ledger.is_used("A1"));
        assert_eq!(ledger.used_count(), 1);
    }

    #[test]
    fn test_append_keeps_insertion_order() {
        let mut ledger = memory_ledger();

        ledger.append_entry(entry("B2", 200)).unwrap();
        ledger.append_entry(entry("A1", 100)).unwrap();

        let codes: Vec<&str> = ledger.entries().iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, vec!["B2", "A1"]);
    }

    #[test]
    fn test_reset_requires_phrase() {
        assert!(ResetConfirmation::from_phrase("resetar").is_some());
        assert!(ResetConfirmation::from_phrase("  RESETAR ").is_some());
        assert!(ResetConfirmation::from_phrase("reset").is_none());
        assert!(ResetConfirmation::from_phrase("").is_none());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ledger = memory_ledger();
        ledger.commit_admission(entry("A1", 1)).unwrap();
        ledger.commit_admission(entry("B2", 2)).unwrap();

        let confirmation = ResetConfirmation::from_phrase("resetar").unwrap();
        ledger.reset(confirmation).unwrap();

        assert!(!ledger.is_used("A1"));
        assert!(!ledger.is_used("B2"));
        assert!(ledger.entries().is_empty());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = JsonFileStore::open(dir.path(), "gala").unwrap();
            let mut ledger = UsageLedger::open(Box::new(store)).unwrap();
            ledger.commit_admission(entry("A1", 1)).unwrap();
        }

        let store = JsonFileStore::open(dir.path(), "gala").unwrap();
        let ledger = UsageLedger::open(Box::new(store)).unwrap();
        assert!(ledger.is_used("A1"));
        assert_eq!(ledger.entries().len(), 1);
        assert_eq!(ledger.used_codes(), vec!["A1"]);
    }

    #[test]
    fn test_corrupt_store_refuses_to_open() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path(), "gala").unwrap();
        std::fs::write(store.used_path(), "not json").unwrap();

        assert!(UsageLedger::open(Box::new(store)).is_err());
    }

    #[test]
    fn test_failed_mark_leaves_code_unused() {
        let fail_used = Arc::new(AtomicBool::new(true));
        let store = FlakyStore {
            inner: MemoryLedgerStore::default(),
            fail_entries: Arc::new(AtomicBool::new(false)),
            fail_used: fail_used.clone(),
        };
        let mut ledger = UsageLedger::open(Box::new(store)).unwrap();

        assert!(ledger.mark_used("A1").is_err());
        assert!(!ledger.is_used("A1"));

        fail_used.store(false, Ordering::SeqCst);
        ledger.mark_used("A1").unwrap();
        assert!(ledger.is_used("A1"));
    }

    #[test]
    fn test_failed_log_write_rolls_back_mark() {
        let fail_entries = Arc::new(AtomicBool::new(true));
        let store = FlakyStore {
            inner: MemoryLedgerStore::default(),
            fail_entries: fail_entries.clone(),
            fail_used: Arc::new(AtomicBool::new(false)),
        };
        let mut ledger = UsageLedger::open(Box::new(store)).unwrap();

        assert!(ledger.commit_admission(entry("A1", 1)).is_err());
        assert!(!ledger.is_used("A1"));
        assert!(ledger.entries().is_empty());

        fail_entries.store(false, Ordering::SeqCst);
        ledger.commit_admission(entry("A1", 2)).unwrap();
        assert!(ledger.is_used("A1"));
        assert_eq!(ledger.entries().len(), 1);
    }

    #[test]
    fn test_failed_reset_keeps_codes_consumed() {
        let fail_used = Arc::new(AtomicBool::new(false));
        let store = FlakyStore {
            inner: MemoryLedgerStore::default(),
            fail_entries: Arc::new(AtomicBool::new(false)),
            fail_used: fail_used.clone(),
        };
        let mut ledger = UsageLedger::open(Box::new(store)).unwrap();
        ledger.commit_admission(entry("A1", 1)).unwrap();

        // Log clears, used set write fails
        fail_used.store(true, Ordering::SeqCst);
        let confirmation = ResetConfirmation::from_phrase("resetar").unwrap();
        assert!(ledger.reset(confirmation).is_err());

        // Memory follows the store: code still consumed, log gone
        assert!(ledger.is_used("A1"));
        assert!(ledger.entries().is_empty());

        fail_used.store(false, Ordering::SeqCst);
        ledger.reset(ResetConfirmation::from_phrase("resetar").unwrap()).unwrap();
        assert!(!ledger.is_used("A1"));
    }

    #[test]
    fn test_second_ledger_on_same_event_refused() {
        let dir = tempdir().unwrap();
        let station = UsageLedger::open(Box::new(JsonFileStore::open(dir.path(), "gala").unwrap())).unwrap();

        let admin = JsonFileStore::open(dir.path(), "gala");
        assert!(matches!(admin, Err(StorageError::Locked { .. })));

        drop(station);
        assert!(JsonFileStore::open(dir.path(), "gala").is_ok());
    }
}
