//! Services - check-in business logic and state management
//!
//! This module contains the core business logic services:
//! - `extractor` - Guest code extraction from decoded payloads
//! - `debounce` - Repeat-scan suppression
//! - `registry` - Guest registry normalization and lookup
//! - `ledger` - Consumed codes and check-in log
//! - `engine` - Check-in decision engine
//! - `station` - Actor serializing decisions for one event
//! - `dashboard` - Stats, history and CSV export

pub mod dashboard;
pub mod debounce;
pub mod engine;
pub mod extractor;
pub mod ledger;
pub mod registry;
pub mod station;

// Re-export commonly used types
pub use debounce::DebounceFilter;
pub use engine::{CheckinEngine, ScanTime};
pub use extractor::extract_code;
pub use ledger::{ResetConfirmation, UsageLedger};
pub use registry::Registry;
pub use station::{create_station, CheckinStation, LedgerSnapshot, StationHandle};
