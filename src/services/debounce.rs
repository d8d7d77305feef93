//! Repeat-scan suppression
//!
//! Live decoders re-emit the same code for every video frame while the QR
//! stays in view. The filter lets the first read through and drops repeats of
//! the same code until the window has elapsed since the last accepted read.

use tracing::debug;

/// Default suppression window in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u64 = 1500;

/// Suppresses repeated reads of the same code inside a time window
#[derive(Debug, Clone)]
pub struct DebounceFilter {
    window_ms: u64,
    last_code: String,
    last_timestamp_ms: u64,
}

impl DebounceFilter {
    pub fn new(window_ms: u64) -> Self {
        Self { window_ms, last_code: String::new(), last_timestamp_ms: 0 }
    }

    /// Decide whether `code` seen at `now_ms` should be processed.
    ///
    /// `now_ms` must come from a monotonic clock. A timestamp earlier than the
    /// last accepted one counts as zero elapsed time.
    pub fn should_process(&mut self, code: &str, now_ms: u64) -> bool {
        let elapsed_ms = now_ms.saturating_sub(self.last_timestamp_ms);

        if !code.is_empty() && code == self.last_code && elapsed_ms < self.window_ms {
            debug!(code = %code, elapsed_ms = %elapsed_ms, "scan_debounced");
            return false;
        }

        self.last_code.clear();
        self.last_code.push_str(code);
        self.last_timestamp_ms = now_ms;
        true
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }
}

impl Default for DebounceFilter {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_MS)
    }
}
