use super::{BatchOutcome, IngestStats, IngestionPipeline};
use crate::error::{GatewayError, GatewayResult};
use crate::lookup::EnrichmentLookup;
use crate::sink::TagRecord;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

impl IngestionPipeline {
    /// One batch of reader ids, e.g. from `POST /reader/events`.
    ///
    /// Every distinct id without a cache entry is enriched in input order, whether or not the
    /// tracker considered it new. Fails before touching any state when no lookup is wired.
    /// Collaborator failures return immediately; presence and cache updates made before the
    /// failure stay in place.
    pub async fn process_batch<S>(
        &self,
        ids: &[S],
        now: Option<DateTime<Utc>>,
    ) -> GatewayResult<BatchOutcome>
    where
        S: AsRef<str>,
    {
        let lookup = self.require_lookup()?;
        let now = now.unwrap_or_else(|| self.clock.now());
        IngestStats::incr(&self.stats.batches);

        let observation = self
            .tracker
            .observe(ids.iter().map(|id| AsRef::<str>::as_ref(id)), Some(now));
        let now = observation.applied_now;
        tracing::debug!(
            tags = ids.len(),
            new = observation.newly_seen.len(),
            "processing reader batch"
        );

        let mut visited: HashSet<&str> = HashSet::with_capacity(ids.len());
        let mut enrichments_performed = 0usize;
        for id in ids {
            let id: &str = id.as_ref();
            if !visited.insert(id) {
                continue;
            }
            if self.enrich_if_missing(&*lookup, id, now).await? {
                enrichments_performed += 1;
            }
        }

        Ok(BatchOutcome {
            tags_seen: ids.len(),
            enrichments_performed,
        })
    }

    /// Cache-aside enrichment of a single tag: lookup, then cache, then persist.
    ///
    /// Returns `true` when this call performed the enrichment. The miss check is repeated under
    /// the tag's lock so two ingress paths racing on the same new tag look it up once.
    pub(in crate::ingest) async fn enrich_if_missing(
        &self,
        lookup: &dyn EnrichmentLookup,
        tag_id: &str,
        now: DateTime<Utc>,
    ) -> GatewayResult<bool> {
        if self.cache.contains(tag_id) {
            return Ok(false);
        }

        let _guard = self.locks.lock(tag_id).await;
        if self.cache.contains(tag_id) {
            return Ok(false);
        }

        let enrichment = match lookup.lookup(tag_id).await {
            Ok(enrichment) => enrichment,
            Err(source) => {
                IngestStats::incr(&self.stats.lookup_failures);
                self.stats
                    .record_error(format!("lookup failed for {tag_id}: {source}"));
                tracing::warn!(tag_id, error = %source, "enrichment lookup failed");
                return Err(GatewayError::Lookup {
                    tag_id: tag_id.to_string(),
                    source,
                });
            }
        };

        self.cache.set(
            tag_id,
            enrichment.authorized,
            enrichment.description.clone(),
        );
        IngestStats::incr(&self.stats.enrichments);

        let record = TagRecord {
            id: tag_id.to_string(),
            date: now,
            auth: enrichment.authorized,
            info: enrichment.description,
        };
        if let Err(source) = self.sink.upsert(&record).await {
            IngestStats::incr(&self.stats.persist_failures);
            self.stats
                .record_error(format!("persist failed for {tag_id}: {source}"));
            tracing::warn!(tag_id, error = %source, "failed to persist tag record");
            return Err(GatewayError::Persistence {
                tag_id: tag_id.to_string(),
                source,
            });
        }

        tracing::info!(
            tag_id,
            auth = record.auth,
            info = record.info.as_deref().unwrap_or(""),
            "enriched new tag"
        );
        Ok(true)
    }
}
