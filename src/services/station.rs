//! Check-in station - serializes decisions for one event
//!
//! Every scan source (live reader, manual entry, image decode) talks to the
//! engine through a `StationHandle`. Requests are queued on a bounded mpsc
//! channel and a single worker owns the engine, so decisions for the event
//! namespace run strictly one after another.

use crate::domain::error::CheckinError;
use crate::domain::types::{epoch_ms, CheckinEntry, Verdict};
use crate::services::engine::{CheckinEngine, ScanTime};
use crate::services::ledger::ResetConfirmation;
use crate::services::registry::Registry;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Outcome of a submitted scan
pub type ScanOutcome = Result<Option<Verdict>, CheckinError>;

/// Point-in-time copy of the ledger and the registry it is judged against
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    pub registry: Arc<Registry>,
    pub used_codes: Vec<String>,
    pub entries: Vec<CheckinEntry>,
}

/// A request to the station worker
#[derive(Debug)]
enum StationRequest {
    Scan { payload: String, at: ScanTime, enqueued_at: Instant, reply: oneshot::Sender<ScanOutcome> },
    ReplaceRegistry(Arc<Registry>),
    Reset { confirmation: ResetConfirmation, reply: oneshot::Sender<Result<(), CheckinError>> },
    Snapshot { reply: oneshot::Sender<LedgerSnapshot> },
}

/// Cloneable handle for submitting work to the station
#[derive(Debug, Clone)]
pub struct StationHandle {
    tx: mpsc::Sender<StationRequest>,
    session_start: Instant,
}

impl StationHandle {
    /// Submit a raw payload stamped with the current time
    pub async fn submit(&self, payload: impl Into<String>) -> ScanOutcome {
        let mono_ms = self.session_start.elapsed().as_millis() as u64;
        self.submit_at(payload, ScanTime::new(mono_ms, epoch_ms())).await
    }

    /// Submit a raw payload with an explicit scan time
    pub async fn submit_at(&self, payload: impl Into<String>, at: ScanTime) -> ScanOutcome {
        let (reply, rx) = oneshot::channel();
        let request =
            StationRequest::Scan { payload: payload.into(), at, enqueued_at: Instant::now(), reply };
        self.tx.send(request).await.map_err(|_| CheckinError::StationClosed)?;
        rx.await.map_err(|_| CheckinError::StationClosed)?
    }

    /// Replace the registry; takes effect before the next queued decision
    pub async fn replace_registry(&self, registry: Arc<Registry>) -> Result<(), CheckinError> {
        self.tx
            .send(StationRequest::ReplaceRegistry(registry))
            .await
            .map_err(|_| CheckinError::StationClosed)
    }

    /// Clear the ledger of this event
    pub async fn reset(&self, confirmation: ResetConfirmation) -> Result<(), CheckinError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StationRequest::Reset { confirmation, reply })
            .await
            .map_err(|_| CheckinError::StationClosed)?;
        rx.await.map_err(|_| CheckinError::StationClosed)?
    }

    /// Copy of the current ledger state
    pub async fn snapshot(&self) -> Result<LedgerSnapshot, CheckinError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StationRequest::Snapshot { reply })
            .await
            .map_err(|_| CheckinError::StationClosed)?;
        rx.await.map_err(|_| CheckinError::StationClosed)
    }
}

/// Worker that owns the engine and processes requests in order
pub struct CheckinStation {
    engine: CheckinEngine,
    rx: mpsc::Receiver<StationRequest>,
}

impl CheckinStation {
    /// Run until every handle has been dropped, then return the engine
    pub async fn run(mut self) -> CheckinEngine {
        info!(origin = %self.engine.origin_tag(), "checkin_station_started");

        while let Some(request) = self.rx.recv().await {
            match request {
                StationRequest::Scan { payload, at, enqueued_at, reply } => {
                    let queue_delay_us = enqueued_at.elapsed().as_micros() as u64;
                    // Warn if queue delay exceeds 100ms - indicates backlog
                    if queue_delay_us > 100_000 {
                        warn!(queue_delay_us = %queue_delay_us, "checkin_queue_delay_high");
                    }

                    let outcome = self.engine.decide(&payload, at);
                    // Receiver may have given up; the decision stands regardless
                    let _ = reply.send(outcome);
                }
                StationRequest::ReplaceRegistry(registry) => {
                    self.engine.replace_registry(registry);
                }
                StationRequest::Reset { confirmation, reply } => {
                    let _ = reply.send(self.engine.reset_ledger(confirmation));
                }
                StationRequest::Snapshot { reply } => {
                    let ledger = self.engine.ledger();
                    let snapshot = LedgerSnapshot {
                        registry: self.engine.registry().clone(),
                        used_codes: ledger.used_codes().into_iter().map(str::to_string).collect(),
                        entries: ledger.entries().to_vec(),
                    };
                    let _ = reply.send(snapshot);
                }
            }
        }

        info!("checkin_station_stopped");
        self.engine
    }
}

/// Create a station for `engine`
///
/// Returns the handle (for scan sources) and the worker (to be spawned)
pub fn create_station(engine: CheckinEngine, buffer_size: usize) -> (StationHandle, CheckinStation) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let handle = StationHandle { tx, session_start: Instant::now() };
    (handle, CheckinStation { engine, rx })
}
