//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `registry_source` - One-shot registry fetch (HTTP or file)
//! - `ledger_store` - Durable per-event ledger files
//! - `scan_source` - Scan source capability and the line reader
//! - `console` - Text rendering of verdicts and history
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod console;
pub mod ledger_store;
pub mod prometheus;
pub mod registry_source;
pub mod scan_source;

// Re-export commonly used types
pub use ledger_store::{open_store, JsonFileStore, LedgerStore, MemoryLedgerStore};
pub use registry_source::RegistrySource;
pub use scan_source::{LineScanSource, ScanEvent, ScanSource};
