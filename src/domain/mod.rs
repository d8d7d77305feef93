//! Domain models - core check-in types and errors
//!
//! This module contains the canonical data types used throughout the system:
//! - `GuestRecord` - a registry entry for one guest
//! - `CheckinEntry` - one admitted check-in in the entry log
//! - `Verdict` - the outcome of a decided scan
//! - `error` - operational errors that are not verdicts

pub mod error;
pub mod types;

pub use error::{CheckinError, RegistryError, ScanError, StorageError};
pub use types::{AttendanceMarker, CheckinEntry, DenyReason, GuestRecord, Verdict};
