//! Deduplicating diagnostics sink.
//!
//! Degenerate physics input (non-positive mass, out-of-range stability, ...)
//! must never abort an evaluation loop that runs 10^5..10^8 times per fit, but
//! it must also not spam one warning per call. Evaluators therefore report
//! through an injectable sink that deduplicates by a stable event key.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Sink state stays coherent across a poisoning panic (every write is a
/// single insert/push), so a sink keeps accepting warnings instead of
/// panicking inside an evaluation path.
fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Sink for degenerate-input warnings raised inside evaluation loops.
///
/// Implementations must be cheap on the repeated-key path: evaluators call
/// `warn` from hot loops whenever an input degenerates, and rely on the sink
/// to suppress duplicates.
pub trait DiagnosticsSink: Send + Sync {
    /// Report a warning. `key` identifies the event class for deduplication;
    /// `message` is the human-readable detail.
    fn warn(&self, key: &'static str, message: &str);
}

/// Default sink: forwards the first occurrence of each key to `tracing::warn!`
/// and drops repeats.
#[derive(Default)]
pub struct TracingSink {
    seen: Mutex<HashSet<&'static str>>,
}

impl TracingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagnosticsSink for TracingSink {
    fn warn(&self, key: &'static str, message: &str) {
        let mut seen = lock_recover(&self.seen);
        if seen.insert(key) {
            tracing::warn!(key, "{message}");
        }
    }
}

/// Test sink: records every event (no deduplication) for assertions.
#[derive(Default)]
pub struct CapturingSink {
    events: Mutex<Vec<(&'static str, String)>>,
}

impl CapturingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events with the given key.
    pub fn count(&self, key: &str) -> usize {
        lock_recover(&self.events).iter().filter(|(k, _)| *k == key).count()
    }

    /// All recorded (key, message) pairs.
    pub fn events(&self) -> Vec<(&'static str, String)> {
        lock_recover(&self.events).clone()
    }
}

impl DiagnosticsSink for CapturingSink {
    fn warn(&self, key: &'static str, message: &str) {
        lock_recover(&self.events).push((key, message.to_string()));
    }
}

/// The default sink shared by evaluators constructed without an explicit one.
pub fn default_sink() -> Arc<dyn DiagnosticsSink> {
    Arc::new(TracingSink::new())
}
