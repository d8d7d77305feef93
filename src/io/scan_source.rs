//! Scan sources - where raw payloads come from
//!
//! A scan source delivers decoded payload strings (or decode failures) on a
//! channel. The check-in loop only depends on the `ScanSource` trait, never
//! on a concrete scanning library.
//!
//! `LineScanSource` reads one payload per line from any blocking reader. It
//! covers manual entry on a terminal and keyboard-wedge barcode scanners,
//! which type the decoded text followed by Enter. Reads run on a dedicated
//! OS thread: a read pending on a terminal cannot be cancelled, and a
//! detached thread does not hold up runtime shutdown.

use crate::domain::error::ScanError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::{BufRead, BufReader, Stdin};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Event emitted by a scan source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// A payload was decoded
    Decoded(String),
    /// A frame or upload could not be decoded; the operator should rescan
    DecodeFailed(String),
}

/// Capability interface for anything that produces scan payloads
#[async_trait]
pub trait ScanSource: Send + Sync {
    /// Begin delivering events. Returns once the source is running.
    async fn start(&mut self, events: mpsc::Sender<ScanEvent>) -> Result<(), ScanError>;

    /// Stop delivering events. Stopping a stopped source is a no-op.
    async fn stop(&mut self);

    /// Decode a single still image into a payload
    async fn decode_from_image(&self, image: &[u8]) -> Result<String, ScanError>;

    fn name(&self) -> &str;
}

/// Line-oriented scan source over a blocking reader
pub struct LineScanSource<R> {
    name: String,
    reader: Mutex<Option<R>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl<R> LineScanSource<R>
where
    R: BufRead + Send + 'static,
{
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader: Mutex::new(Some(reader)),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Whether the reader thread is still delivering lines
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }
}

impl LineScanSource<BufReader<Stdin>> {
    /// Manual entry / keyboard-wedge scanner on standard input
    pub fn stdin() -> Self {
        Self::new("stdin", BufReader::new(std::io::stdin()))
    }
}

fn read_lines<R: BufRead>(name: &str, reader: R, running: &AtomicBool, events: &mpsc::Sender<ScanEvent>) {
    for line in reader.lines() {
        // Stopped while blocked in read; drop whatever arrived
        if !running.load(Ordering::Acquire) {
            return;
        }
        match line {
            Ok(line) => {
                // Blank lines are just the operator pressing Enter
                if line.trim().is_empty() {
                    continue;
                }
                debug!(source = %name, bytes = %line.len(), "scan_line_read");
                if events.blocking_send(ScanEvent::Decoded(line)).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(source = %name, error = %e, "scan_source_read_error");
                let _ = events.blocking_send(ScanEvent::DecodeFailed(e.to_string()));
                return;
            }
        }
    }
    info!(source = %name, "scan_source_eof");
}

#[async_trait]
impl<R> ScanSource for LineScanSource<R>
where
    R: BufRead + Send + 'static,
{
    async fn start(&mut self, events: mpsc::Sender<ScanEvent>) -> Result<(), ScanError> {
        if self.thread.is_some() {
            return Err(ScanError::AlreadyStarted);
        }
        let reader = self
            .reader
            .get_mut()
            .take()
            .ok_or_else(|| ScanError::Start(format!("{}: input already consumed", self.name)))?;

        let name = self.name.clone();
        let running = self.running.clone();
        running.store(true, Ordering::Release);
        let thread = thread::Builder::new()
            .name(format!("scan-{}", self.name))
            .spawn(move || {
                read_lines(&name, reader, &running, &events);
                running.store(false, Ordering::Release);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                ScanError::Start(format!("{}: {}", self.name, e))
            })?;
        self.thread = Some(thread);

        info!(source = %self.name, "scan_source_started");
        Ok(())
    }

    async fn stop(&mut self) {
        // The thread may be blocked in read; it is left detached and exits
        // at its next line or at process exit
        if let Some(_thread) = self.thread.take() {
            self.running.store(false, Ordering::Release);
            info!(source = %self.name, "scan_source_stopped");
        }
    }

    async fn decode_from_image(&self, _image: &[u8]) -> Result<String, ScanError> {
        Err(ScanError::Unsupported("image decoding"))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
