use super::{IngestStats, IngestionPipeline};
use crate::error::GatewayResult;
use crate::reader::EventSource;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub events: u64,
    pub tags_seen: u64,
    pub skipped: u64,
    pub ignored: u64,
    pub enrichments: u64,
}

impl IngestionPipeline {
    /// Runs one reader stream session until the source is exhausted or fails.
    ///
    /// Each tag inventory event is a one-tag batch stamped with the pipeline clock. Inventory
    /// events without an EPC are skipped and other event types are ignored, neither touching
    /// any state. The source is released exactly once on every exit path before the outcome
    /// is returned, and a failure is returned as-is.
    ///
    /// Cancelling the returned future (dropping it mid-session) skips `release`; the source is
    /// only dropped. Sources must therefore close their connection in `Drop` as well.
    pub async fn consume_stream<S>(&self, mut source: S) -> GatewayResult<StreamSummary>
    where
        S: EventSource,
    {
        IngestStats::incr(&self.stats.stream_sessions);
        let result = self.drain(&mut source).await;
        source.release().await;

        match &result {
            Ok(summary) => tracing::info!(
                events = summary.events,
                enrichments = summary.enrichments,
                "reader stream exhausted"
            ),
            Err(err) => tracing::warn!(error = %err, "reader stream session ended with error"),
        }
        result
    }

    async fn drain<S>(&self, source: &mut S) -> GatewayResult<StreamSummary>
    where
        S: EventSource,
    {
        let lookup = self.require_lookup()?;
        let mut summary = StreamSummary::default();

        while let Some(event) = source.next_event().await? {
            summary.events += 1;
            IngestStats::incr(&self.stats.events_received);

            if !event.is_tag_inventory() {
                summary.ignored += 1;
                IngestStats::incr(&self.stats.events_ignored);
                continue;
            }
            let Some(tag_id) = event.tag_id() else {
                summary.skipped += 1;
                IngestStats::incr(&self.stats.events_skipped);
                tracing::trace!("skipping tag inventory event without epcHex");
                continue;
            };

            let now = self
                .tracker
                .observe([tag_id], Some(self.clock.now()))
                .applied_now;
            summary.tags_seen += 1;

            if self.enrich_if_missing(&*lookup, tag_id, now).await? {
                summary.enrichments += 1;
            }
        }

        Ok(summary)
    }
}
