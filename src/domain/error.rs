//! Operational errors
//!
//! Verdicts cover every outcome of a scan. These types cover the cases where
//! no verdict can be trusted: the registry could not be loaded, the ledger
//! could not be read or written, or the scan source itself failed.

use thiserror::Error;

/// Failure loading the guest registry. Fatal to the session.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("registry source returned HTTP {0}")]
    Status(u16),

    #[error("registry read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry document is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("registry document must be a list or a map, got {0}")]
    Shape(&'static str),

    #[error("registry source URL is invalid: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("registry load timed out after {0} ms")]
    Timeout(u64),

    #[error("registry load cancelled")]
    Cancelled,
}

/// Failure reading or writing the durable ledger
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("ledger storage I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger record {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("ledger serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("ledger {path} is in use by another process")]
    Locked { path: String },

    #[error("ledger was opened read-only")]
    ReadOnly,
}

/// Failure in a scan source collaborator
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("scan source failed to start: {0}")]
    Start(String),

    #[error("scan source already started")]
    AlreadyStarted,

    #[error("image could not be decoded: {0}")]
    Unreadable(String),

    #[error("scan source does not support {0}")]
    Unsupported(&'static str),
}

/// Error surfaced by a check-in decision
#[derive(Error, Debug)]
pub enum CheckinError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("check-in station is not running")]
    StationClosed,
}
