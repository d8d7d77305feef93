//! Dashboard views over the local ledger
//!
//! Read-only: counts against the registry, a searchable history and the CSV
//! export. Resetting goes through the ledger with a `ResetConfirmation`.

use crate::domain::types::CheckinEntry;
use crate::services::registry::Registry;
use chrono::{DateTime, SecondsFormat, Utc};
use rustc_hash::FxHashSet;

/// Header row of the CSV export
pub const EXPORT_HEADER: [&str; 4] = ["timestamp", "code", "name", "origin"];

/// Registry-wide check-in counts for this instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardStats {
    /// Guests in the registry
    pub total: usize,
    /// Registry guests whose code is in the used set
    pub used: usize,
    /// Guests still to arrive
    pub remaining: usize,
}

impl DashboardStats {
    /// Count against the registry; used codes unknown to it are ignored
    pub fn compute<'a>(registry: &Registry, used_codes: impl IntoIterator<Item = &'a str>) -> Self {
        let used_set: FxHashSet<&str> = used_codes.into_iter().collect();
        let total = registry.len();
        let used = registry.codes().filter(|code| used_set.contains(code)).count();
        Self { total, used, remaining: total.saturating_sub(used) }
    }
}

/// History rows, newest first, optionally filtered by code or name
/// (case-insensitive substring)
pub fn history<'a>(entries: &'a [CheckinEntry], filter: Option<&str>) -> Vec<&'a CheckinEntry> {
    let query = filter.map(|q| q.trim().to_lowercase()).filter(|q| !q.is_empty());

    let mut rows: Vec<&CheckinEntry> = entries
        .iter()
        .filter(|entry| match &query {
            Some(q) => entry.code.to_lowercase().contains(q) || entry.name.to_lowercase().contains(q),
            None => true,
        })
        .collect();
    // Stable sort keeps insertion order for equal timestamps
    rows.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
    rows
}

/// Format an epoch-millisecond timestamp as RFC 3339 UTC; empty for 0
pub fn format_timestamp(timestamp_ms: u64) -> String {
    if timestamp_ms == 0 {
        return String::new();
    }
    i64::try_from(timestamp_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// Write the entry log as CSV, oldest first, every field quoted
pub fn export_csv<W: std::io::Write>(entries: &[CheckinEntry], out: W) -> Result<(), csv::Error> {
    let mut rows: Vec<&CheckinEntry> = entries.iter().collect();
    rows.sort_by_key(|entry| entry.timestamp_ms);

    let mut writer = csv::WriterBuilder::new().quote_style(csv::QuoteStyle::Always).from_writer(out);
    writer.write_record(EXPORT_HEADER)?;
    for entry in rows {
        writer.write_record([
            format_timestamp(entry.timestamp_ms).as_str(),
            entry.code.as_str(),
            entry.name.as_str(),
            entry.origin_tag.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
