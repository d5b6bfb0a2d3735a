mod enrich;
mod locks;
mod stats;
mod stream;


pub use stats::{IngestStats, IngestStatus};
pub use stream::StreamSummary;

use crate::cache::MetadataCache;
use crate::error::{GatewayError, GatewayResult};
use crate::lookup::EnrichmentLookup;
use crate::presence::PresenceTracker;
use crate::sink::PersistenceSink;
use crate::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use locks::KeyedLocks;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub tags_seen: usize,
    pub enrichments_performed: usize,
}

/// Feeds reader observations into the presence tracker and enriches tags the metadata cache has
/// never resolved.
///
/// Cloning is cheap and every clone shares the same tracker, cache and per-tag locks, so the
/// HTTP batch path and the reader stream consumer can run side by side.
#[derive(Clone)]
pub struct IngestionPipeline {
    tracker: Arc<PresenceTracker>,
    cache: Arc<MetadataCache>,
    lookup: Option<Arc<dyn EnrichmentLookup>>,
    sink: Arc<dyn PersistenceSink>,
    clock: Arc<dyn Clock>,
    locks: Arc<KeyedLocks>,
    stats: Arc<IngestStats>,
}

impl IngestionPipeline {
    pub fn new(
        tracker: Arc<PresenceTracker>,
        cache: Arc<MetadataCache>,
        sink: Arc<dyn PersistenceSink>,
    ) -> Self {
        Self {
            tracker,
            cache,
            lookup: None,
            sink,
            clock: Arc::new(SystemClock),
            locks: Arc::new(KeyedLocks::new()),
            stats: Arc::new(IngestStats::new()),
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn EnrichmentLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn tracker(&self) -> &Arc<PresenceTracker> {
        &self.tracker
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn require_lookup(&self) -> GatewayResult<Arc<dyn EnrichmentLookup>> {
        self.lookup.clone().ok_or_else(|| {
            GatewayError::configuration("enrichment lookup is not configured")
        })
    }
}
