//! Shared types for check-in processing

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Name shown when a registry record carries no display name
pub const DEFAULT_GUEST_NAME: &str = "Guest";

/// Attendance recorded by a channel other than this instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttendanceMarker {
    #[default]
    Unset,
    Present,
}

impl AttendanceMarker {
    /// Interpret a raw marker value from the registry document.
    ///
    /// `"sim"`, `"present"`, `"yes"` and `true` mean present, anything else is unset.
    pub fn from_json(value: Option<&serde_json::Value>) -> Self {
        match value {
            Some(serde_json::Value::Bool(true)) => AttendanceMarker::Present,
            Some(serde_json::Value::String(s)) => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "sim" | "present" | "yes" => AttendanceMarker::Present,
                    _ => AttendanceMarker::Unset,
                }
            }
            _ => AttendanceMarker::Unset,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceMarker::Unset => "unset",
            AttendanceMarker::Present => "present",
        }
    }
}

/// A guest as loaded from the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestRecord {
    pub code: String,
    pub name: String,
    pub attendance: AttendanceMarker,
}

impl GuestRecord {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self { code: code.into(), name: name.into(), attendance: AttendanceMarker::Unset }
    }

    pub fn with_attendance(mut self, attendance: AttendanceMarker) -> Self {
        self.attendance = attendance;
        self
    }

    /// Name for display and logging, never empty
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            DEFAULT_GUEST_NAME
        } else {
            &self.name
        }
    }
}

/// One admitted check-in, as stored in the entry log.
///
/// Field names on disk stay `at` / `deviceId` so logs written by earlier
/// check-in stations remain readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinEntry {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    /// Wall-clock epoch milliseconds
    #[serde(rename = "at", default)]
    pub timestamp_ms: u64,
    #[serde(rename = "deviceId", default = "default_origin_tag")]
    pub origin_tag: String,
}

fn default_origin_tag() -> String {
    "local".to_string()
}

/// Why a known guest was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The registry itself marks the guest as already present
    ExternalAttendance,
    /// This instance already admitted the code
    LocalLedger,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::ExternalAttendance => "external_attendance",
            DenyReason::LocalLedger => "local_ledger",
        }
    }
}

/// Outcome of a decided scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Admitted(GuestRecord),
    AlreadyUsed(GuestRecord, DenyReason),
    Invalid(String),
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Admitted(_) => "admitted",
            Verdict::AlreadyUsed(..) => "already_used",
            Verdict::Invalid(_) => "invalid",
        }
    }

    /// Canonical code the verdict refers to
    pub fn code(&self) -> &str {
        match self {
            Verdict::Admitted(record) | Verdict::AlreadyUsed(record, _) => &record.code,
            Verdict::Invalid(code) => code,
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admitted(_))
    }
}
