//! Console renderer for verdicts and check-in history

use crate::domain::types::{CheckinEntry, DenyReason, Verdict};
use crate::services::dashboard::{format_timestamp, DashboardStats};
use std::fmt::Write;

/// One status line for a verdict
pub fn render_verdict(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Admitted(record) => {
            format!("APPROVED  {} - entry granted ({})", record.display_name(), record.code)
        }
        Verdict::AlreadyUsed(record, DenyReason::ExternalAttendance) => {
            format!("USED      {} - already marked present ({})", record.display_name(), record.code)
        }
        Verdict::AlreadyUsed(record, DenyReason::LocalLedger) => format!(
            "USED      {} - already checked in on this device ({})",
            record.display_name(),
            record.code
        ),
        Verdict::Invalid(code) if code.is_empty() => "INVALID   empty code".to_string(),
        Verdict::Invalid(code) => format!("INVALID   code not found: {}", code),
    }
}

/// Counts as a single summary line
pub fn render_stats(stats: &DashboardStats) -> String {
    format!("total={} used={} remaining={}", stats.total, stats.used, stats.remaining)
}

/// Tab-separated history table, one row per entry
pub fn render_history(rows: &[&CheckinEntry]) -> String {
    if rows.is_empty() {
        return "No check-ins on this device.\n".to_string();
    }

    let mut output = String::with_capacity(64 * (rows.len() + 1));
    let _ = writeln!(output, "when\tcode\tname\torigin");
    for entry in rows {
        let when = format_timestamp(entry.timestamp_ms);
        let _ = writeln!(
            output,
            "{}\t{}\t{}\t{}",
            if when.is_empty() { "-" } else { &when },
            entry.code,
            entry.name,
            entry.origin_tag
        );
    }
    output
}
