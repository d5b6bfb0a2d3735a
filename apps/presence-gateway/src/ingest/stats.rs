use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct IngestStats {
    pub batches: AtomicU64,
    pub events_received: AtomicU64,
    pub events_skipped: AtomicU64,
    pub events_ignored: AtomicU64,
    pub enrichments: AtomicU64,
    pub lookup_failures: AtomicU64,
    pub persist_failures: AtomicU64,
    pub stream_sessions: AtomicU64,
    pub stream_connected: AtomicBool,
    pub last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestStatus {
    pub batches: u64,
    pub events_received: u64,
    pub events_skipped: u64,
    pub events_ignored: u64,
    pub enrichments: u64,
    pub lookup_failures: u64,
    pub persist_failures: u64,
    pub stream_sessions: u64,
    pub stream_connected: bool,
    pub last_error: Option<String>,
    pub build: String,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_stream_connected(&self, connected: bool) {
        self.stream_connected.store(connected, Ordering::Relaxed);
    }

    pub fn record_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn clear_error(&self) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    pub fn status(&self) -> IngestStatus {
        let last_error = self.last_error.lock().ok().and_then(|guard| guard.clone());
        IngestStatus {
            batches: self.batches.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
            events_ignored: self.events_ignored.load(Ordering::Relaxed),
            enrichments: self.enrichments.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            stream_sessions: self.stream_sessions.load(Ordering::Relaxed),
            stream_connected: self.stream_connected.load(Ordering::Relaxed),
            last_error,
            build: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
