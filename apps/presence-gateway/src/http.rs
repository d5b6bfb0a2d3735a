use crate::cache::CacheSnapshot;
use crate::error::GatewayResult;
use crate::events::parse_tag_batch;
use crate::ingest::{IngestStatus, IngestionPipeline};
use crate::presence::PresenceSnapshot;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct HttpState {
    pub pipeline: IngestionPipeline,
}

#[derive(Debug, Serialize)]
struct ReaderEventsResponse {
    ok: bool,
    tags_seen: usize,
    product_info_fetched: usize,
}

/// Dashboard row: an active tag joined with its resolved metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub id: String,
    pub date: DateTime<Utc>,
    pub auth: bool,
    pub info: Option<String>,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn post_reader_events(
    State(state): State<HttpState>,
    Json(payload): Json<JsonValue>,
) -> GatewayResult<Json<ReaderEventsResponse>> {
    let tag_ids = parse_tag_batch(&payload)?;
    let outcome = state.pipeline.process_batch(&tag_ids, None).await?;
    Ok(Json(ReaderEventsResponse {
        ok: true,
        tags_seen: outcome.tags_seen,
        product_info_fetched: outcome.enrichments_performed,
    }))
}

/// Active tags that have been enriched, newest arrival first. Tags still waiting on their
/// lookup are left out.
pub fn dashboard_rows(pipeline: &IngestionPipeline) -> Vec<ScanResult> {
    let cache = pipeline.cache();
    pipeline
        .tracker()
        .list_active()
        .into_iter()
        .filter_map(|entity| {
            let entry = cache.get(&entity.id)?;
            Some(ScanResult {
                id: entity.id,
                date: entity.last_seen,
                auth: entry.authorized,
                info: entry.description,
            })
        })
        .collect()
}

async fn get_active_tags(State(state): State<HttpState>) -> Json<Vec<ScanResult>> {
    Json(dashboard_rows(&state.pipeline))
}

async fn get_debug_active_tags(State(state): State<HttpState>) -> Json<PresenceSnapshot> {
    Json(state.pipeline.tracker().snapshot())
}

async fn get_debug_post_ias(State(state): State<HttpState>) -> Json<CacheSnapshot> {
    Json(state.pipeline.cache().snapshot())
}

async fn get_status(State(state): State<HttpState>) -> Json<IngestStatus> {
    Json(state.pipeline.stats().status())
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/status", get(get_status))
        .route("/reader/events", post(post_reader_events))
        .route("/active-tags", get(get_active_tags))
        .route("/debug/active-tags", get(get_debug_active_tags))
        .route("/debug/post-ias", get(get_debug_post_ias))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MetadataCache;
    use crate::lookup::CatalogLookup;
    use crate::presence::PresenceTracker;
    use crate::sink::{PersistenceSink, TagRecord};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tower::ServiceExt;

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<TagRecord>>,
    }

    #[async_trait]
    impl PersistenceSink for MemorySink {
        async fn upsert(&self, record: &TagRecord) -> anyhow::Result<()> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn pipeline(with_lookup: bool) -> (IngestionPipeline, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let pipeline = IngestionPipeline::new(
            Arc::new(PresenceTracker::new(Duration::from_secs(30))),
            Arc::new(MetadataCache::new()),
            sink.clone(),
        );
        let pipeline = if with_lookup {
            pipeline.with_lookup(Arc::new(CatalogLookup::sample()))
        } else {
            pipeline
        };
        (pipeline, sink)
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, JsonValue) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn reader_events_enriches_and_reports_counts() {
        let (pipeline, sink) = pipeline(true);
        let app = router(HttpState {
            pipeline: pipeline.clone(),
        });

        let (status, body) = call(
            app.clone(),
            post_json("/reader/events", r#"{"tagIds": ["90127838712", "unknown", "90127838712"]}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], JsonValue::Bool(true));
        assert_eq!(body["tags_seen"], 3);
        assert_eq!(body["product_info_fetched"], 2);
        assert_eq!(sink.records.lock().unwrap().len(), 2);

        let (_, body) = call(app, post_json("/reader/events", r#"{"tagIds": ["unknown"]}"#)).await;
        assert_eq!(body["product_info_fetched"], 0);
    }

    #[tokio::test]
    async fn malformed_batch_is_rejected_without_state_change() {
        let (pipeline, sink) = pipeline(true);
        let app = router(HttpState {
            pipeline: pipeline.clone(),
        });

        let (status, _) = call(app, post_json("/reader/events", r#"{"ids": ["A"]}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(pipeline.tracker().snapshot().count, 0);
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_lookup_is_a_server_error() {
        let (pipeline, _) = pipeline(false);
        let app = router(HttpState {
            pipeline: pipeline.clone(),
        });

        let (status, body) = call(app, post_json("/reader/events", r#"{"tagIds": ["A"]}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.as_str().unwrap_or_default().contains("lookup"));
        assert_eq!(pipeline.tracker().snapshot().count, 0);
    }

    #[tokio::test]
    async fn dashboard_and_debug_views_reflect_state() {
        let (pipeline, _) = pipeline(true);
        pipeline
            .process_batch(&["90127838712", "55201983746"], None)
            .await
            .unwrap();
        pipeline.tracker().mark_seen(["not-enriched"], None);

        let app = router(HttpState {
            pipeline: pipeline.clone(),
        });

        let (status, rows) = call(app.clone(), get_req("/active-tags")).await;
        assert_eq!(status, StatusCode::OK);
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row["auth"] == JsonValue::Bool(true)));

        let (_, presence) = call(app.clone(), get_req("/debug/active-tags")).await;
        assert_eq!(presence["count"], 3);

        let (_, cache) = call(app.clone(), get_req("/debug/post-ias")).await;
        assert_eq!(cache["count"], 2);
        assert_eq!(cache["items"][1]["info"], "Nike Air Max 90");

        let (_, status_body) = call(app, get_req("/v1/status")).await;
        assert_eq!(status_body["enrichments"], 2);
        assert_eq!(status_body["batches"], 1);
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let (pipeline, _) = pipeline(true);
        let app = router(HttpState { pipeline });
        let (status, body) = call(app, get_req("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, JsonValue::String("ok".to_string()));
    }
}
