//! Check-in decision engine
//!
//! Turns a raw scan payload into a verdict:
//! 1. extract the canonical code (empty code is Invalid, nothing else runs)
//! 2. drop repeats inside the debounce window (no verdict at all)
//! 3. unknown code is Invalid
//! 4. registry attendance marker set to present is AlreadyUsed
//! 5. code already in the local ledger is AlreadyUsed
//! 6. otherwise consume the code, log the entry and admit
//!
//! `decide` takes `&mut self`: the check-then-commit of steps 5-6 can never
//! interleave with another decision on the same engine.

use crate::domain::error::CheckinError;
use crate::domain::types::{AttendanceMarker, CheckinEntry, DenyReason, Verdict};
use crate::infra::metrics::Metrics;
use crate::services::debounce::DebounceFilter;
use crate::services::extractor::extract_code;
use crate::services::ledger::{ResetConfirmation, UsageLedger};
use crate::services::registry::Registry;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Caller-supplied time of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTime {
    /// Monotonic milliseconds, used for debouncing
    pub mono_ms: u64,
    /// Wall-clock epoch milliseconds, recorded in the entry log
    pub wall_ms: u64,
}

impl ScanTime {
    pub fn new(mono_ms: u64, wall_ms: u64) -> Self {
        Self { mono_ms, wall_ms }
    }

    /// Same value on both clocks
    pub fn at(ms: u64) -> Self {
        Self { mono_ms: ms, wall_ms: ms }
    }
}

/// Log storage failure (cold path)
#[cold]
fn log_commit_failed(code: &str, e: &CheckinError) {
    error!(code = %code, error = %e, "checkin_commit_failed");
}

/// Decision engine for one event session
pub struct CheckinEngine {
    registry: Arc<Registry>,
    ledger: UsageLedger,
    debounce: DebounceFilter,
    origin_tag: String,
    session_id: String,
    metrics: Option<Arc<Metrics>>,
}

impl CheckinEngine {
    pub fn new(
        registry: Arc<Registry>,
        ledger: UsageLedger,
        debounce: DebounceFilter,
        origin_tag: impl Into<String>,
    ) -> Self {
        let session_id = Uuid::now_v7().to_string();
        let origin_tag = origin_tag.into();
        info!(
            session_id = %session_id,
            origin = %origin_tag,
            guests = %registry.len(),
            debounce_ms = %debounce.window_ms(),
            "checkin_session_started"
        );
        Self { registry, ledger, debounce, origin_tag, session_id, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Classify one raw payload.
    ///
    /// `Ok(None)` means the scan was dropped by the debounce filter and no
    /// decision was made. Errors are ledger failures, never verdicts.
    pub fn decide(&mut self, raw: &str, now: ScanTime) -> Result<Option<Verdict>, CheckinError> {
        let start = Instant::now();
        let code = extract_code(raw);

        if code.is_empty() {
            return Ok(Some(self.finish(Verdict::Invalid(code), start)));
        }

        if !self.debounce.should_process(&code, now.mono_ms) {
            if let Some(ref metrics) = self.metrics {
                metrics.record_debounced();
            }
            return Ok(None);
        }

        let Some(record) = self.registry.lookup(&code) else {
            return Ok(Some(self.finish(Verdict::Invalid(code), start)));
        };
        let record = record.clone();

        if record.attendance == AttendanceMarker::Present {
            let verdict = Verdict::AlreadyUsed(record, DenyReason::ExternalAttendance);
            return Ok(Some(self.finish(verdict, start)));
        }

        if self.ledger.is_used(&code) {
            let verdict = Verdict::AlreadyUsed(record, DenyReason::LocalLedger);
            return Ok(Some(self.finish(verdict, start)));
        }

        let entry = CheckinEntry {
            code: code.clone(),
            name: record.display_name().to_string(),
            timestamp_ms: now.wall_ms,
            origin_tag: self.origin_tag.clone(),
        };
        if let Err(e) = self.ledger.commit_admission(entry) {
            let e = CheckinError::from(e);
            log_commit_failed(&code, &e);
            if let Some(ref metrics) = self.metrics {
                metrics.record_storage_error();
            }
            return Err(e);
        }

        Ok(Some(self.finish(Verdict::Admitted(record), start)))
    }

    /// Swap in a freshly loaded registry between decisions
    pub fn replace_registry(&mut self, registry: Arc<Registry>) {
        info!(
            session_id = %self.session_id,
            previous = %self.registry.len(),
            guests = %registry.len(),
            "registry_replaced"
        );
        self.registry = registry;
    }

    /// Administrative reset of the local ledger
    pub fn reset_ledger(&mut self, confirmation: ResetConfirmation) -> Result<(), CheckinError> {
        self.ledger.reset(confirmation)?;
        Ok(())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub fn origin_tag(&self) -> &str {
        &self.origin_tag
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn finish(&self, verdict: Verdict, start: Instant) -> Verdict {
        let latency_us = start.elapsed().as_micros() as u64;

        match &verdict {
            Verdict::Admitted(record) => info!(
                code = %record.code,
                name = %record.display_name(),
                origin = %self.origin_tag,
                latency_us = %latency_us,
                "checkin_admitted"
            ),
            Verdict::AlreadyUsed(record, reason) => info!(
                code = %record.code,
                name = %record.display_name(),
                reason = %reason.as_str(),
                "checkin_already_used"
            ),
            Verdict::Invalid(code) => debug!(code = %code, "checkin_invalid"),
        }

        if let Some(ref metrics) = self.metrics {
            metrics.record_verdict(&verdict, latency_us);
        }
        verdict
    }
}

impl Drop for CheckinEngine {
    fn drop(&mut self) {
        info!(
            session_id = %self.session_id,
            used = %self.ledger.used_count(),
            entries = %self.ledger.entries().len(),
            "checkin_session_ended"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::StorageError;
    use crate::domain::types::GuestRecord;
    use crate::io::ledger_store::{LedgerStore, MemoryLedgerStore};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn engine_with(records: Vec<GuestRecord>, debounce_ms: u64) -> CheckinEngine {
        let registry = Arc::new(Registry::from_records(records));
        let ledger = UsageLedger::open(Box::new(MemoryLedgerStore::default())).unwrap();
        CheckinEngine::new(registry, ledger, DebounceFilter::new(debounce_ms), "local")
    }

    fn ana() -> GuestRecord {
        GuestRecord::new("A1", "Ana")
    }

    #[test]
    fn test_admit_then_already_used() {
        // Window below the 100 ms gap between the two scans
        let mut engine = engine_with(vec![ana()], 50);

        let first = engine.decide("A1", ScanTime::at(0)).unwrap();
        assert_eq!(first, Some(Verdict::Admitted(ana())));

        let second = engine.decide("A1", ScanTime::at(100)).unwrap();
        assert_eq!(second, Some(Verdict::AlreadyUsed(ana(), DenyReason::LocalLedger)));
    }

    #[test]
    fn test_unknown_url_code_is_invalid() {
        let mut engine = engine_with(vec![], 1500);

        let verdict = engine.decide("https://x/?codigo=Z9", ScanTime::at(0)).unwrap();

        assert_eq!(verdict, Some(Verdict::Invalid("Z9".to_string())));
        assert!(engine.ledger().entries().is_empty());
        assert_eq!(engine.ledger().used_count(), 0);
    }

    #[test]
    fn test_external_attendance_takes_precedence() {
        let bia = GuestRecord::new("B2", "Bia").with_attendance(AttendanceMarker::Present);
        let mut engine = engine_with(vec![bia.clone()], 1500);

        let verdict = engine.decide("B2", ScanTime::at(0)).unwrap();

        assert_eq!(verdict, Some(Verdict::AlreadyUsed(bia, DenyReason::ExternalAttendance)));
        assert!(!engine.ledger().is_used("B2"));
    }

    #[test]
    fn test_debounce_scenario() {
        let caio = GuestRecord::new("C3", "Caio");
        let mut engine = engine_with(vec![caio.clone()], 1500);

        assert_eq!(engine.decide("C3", ScanTime::at(0)).unwrap(), Some(Verdict::Admitted(caio.clone())));
        assert_eq!(engine.decide("C3", ScanTime::at(1000)).unwrap(), None);
        assert_eq!(engine.ledger().entries().len(), 1);
        assert_eq!(
            engine.decide("C3", ScanTime::at(1600)).unwrap(),
            Some(Verdict::AlreadyUsed(caio, DenyReason::LocalLedger))
        );
    }

    #[test]
    fn test_empty_payload_invalid_without_touching_debounce() {
        let mut engine = engine_with(vec![ana()], 1500);

        assert_eq!(engine.decide("   ", ScanTime::at(0)).unwrap(), Some(Verdict::Invalid(String::new())));
        assert_eq!(engine.decide("", ScanTime::at(1)).unwrap(), Some(Verdict::Invalid(String::new())));
        // The empty scans did not register as the last code
        assert!(engine.decide("A1", ScanTime::at(2)).unwrap().unwrap().is_admitted());
    }

    #[test]
    fn test_entry_recorded_with_wall_clock_and_origin() {
        let registry = Arc::new(Registry::from_records([GuestRecord::new("D4", "")]));
        let ledger = UsageLedger::open(Box::new(MemoryLedgerStore::default())).unwrap();
        let mut engine = CheckinEngine::new(registry, ledger, DebounceFilter::default(), "door-2");

        engine.decide("D4", ScanTime::new(10, 1_700_000_000_000)).unwrap();

        let entry = &engine.ledger().entries()[0];
        assert_eq!(entry.code, "D4");
        assert_eq!(entry.name, "Guest");
        assert_eq!(entry.timestamp_ms, 1_700_000_000_000);
        assert_eq!(entry.origin_tag, "door-2");
    }

    #[test]
    fn test_reset_allows_readmission() {
        let mut engine = engine_with(vec![ana()], 0);
        assert!(engine.decide("A1", ScanTime::at(0)).unwrap().unwrap().is_admitted());

        engine.reset_ledger(ResetConfirmation::from_phrase("resetar").unwrap()).unwrap();

        assert!(engine.decide("A1", ScanTime::at(10)).unwrap().unwrap().is_admitted());
    }

    #[test]
    fn test_replace_registry() {
        let mut engine = engine_with(vec![], 0);
        assert_eq!(engine.decide("A1", ScanTime::at(0)).unwrap(), Some(Verdict::Invalid("A1".to_string())));

        engine.replace_registry(Arc::new(Registry::from_records([ana()])));

        assert_eq!(engine.decide("A1", ScanTime::at(10)).unwrap(), Some(Verdict::Admitted(ana())));
    }

    #[test]
    fn test_metrics_recorded() {
        let metrics = Arc::new(Metrics::new());
        let mut engine = engine_with(vec![ana()], 1500).with_metrics(metrics.clone());

        engine.decide("A1", ScanTime::at(0)).unwrap();
        engine.decide("A1", ScanTime::at(10)).unwrap();

        assert_eq!(metrics.admitted_total(), 1);
        assert_eq!(metrics.debounced_total(), 1);
    }

    /// Store that rejects every write while `failing` is set
    struct FailingStore {
        inner: MemoryLedgerStore,
        failing: Arc<AtomicBool>,
    }

    impl LedgerStore for FailingStore {
        fn load_used(&self) -> Result<Vec<String>, StorageError> {
            self.inner.load_used()
        }

        fn save_used(&mut self, codes: &[String]) -> Result<(), StorageError> {
            self.check()?;
            self.inner.save_used(codes)
        }

        fn load_entries(&self) -> Result<Vec<CheckinEntry>, StorageError> {
            self.inner.load_entries()
        }

        fn save_entries(&mut self, entries: &[CheckinEntry]) -> Result<(), StorageError> {
            self.check()?;
            self.inner.save_entries(entries)
        }

        fn clear(&mut self) -> Result<(), StorageError> {
            self.check()?;
            self.inner.clear()
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    impl FailingStore {
        fn check(&self) -> Result<(), StorageError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Io {
                    path: "failing".to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "read-only filesystem"),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn test_storage_failure_is_an_error_not_a_verdict() {
        let failing = Arc::new(AtomicBool::new(true));
        let store = FailingStore { inner: MemoryLedgerStore::default(), failing: failing.clone() };
        let ledger = UsageLedger::open(Box::new(store)).unwrap();
        let metrics = Arc::new(Metrics::new());
        let registry = Arc::new(Registry::from_records([ana()]));
        let mut engine =
            CheckinEngine::new(registry, ledger, DebounceFilter::new(0), "local").with_metrics(metrics.clone());

        let outcome = engine.decide("A1", ScanTime::at(0));

        assert!(matches!(outcome, Err(CheckinError::Storage(_))));
        assert!(!engine.ledger().is_used("A1"));
        assert!(engine.ledger().entries().is_empty());
        assert_eq!(metrics.snapshot().storage_errors_total, 1);
        assert_eq!(metrics.admitted_total(), 0);

        // Store recovers; the same guest is admitted on retry
        failing.store(false, Ordering::SeqCst);
        assert_eq!(engine.decide("A1", ScanTime::at(10)).unwrap(), Some(Verdict::Admitted(ana())));
        assert!(engine.ledger().is_used("A1"));
    }
}
