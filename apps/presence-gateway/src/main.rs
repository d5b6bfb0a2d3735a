use anyhow::{Context, Result};
use futures::future;
use presence_gateway::cache::MetadataCache;
use presence_gateway::config::Config;
use presence_gateway::http::{self, HttpState};
use presence_gateway::ingest::IngestionPipeline;
use presence_gateway::lookup::{CatalogLookup, EnrichmentLookup};
use presence_gateway::presence::PresenceTracker;
use presence_gateway::reader;
use presence_gateway::sink::{self, PostgresSink};
use std::sync::Arc;

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,presence_gateway=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    if let Some(endpoint) = &config.otlp_endpoint {
        let endpoint = normalize_otlp_http_endpoint(endpoint);
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(endpoint);
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "presence-gateway"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

fn build_lookup(config: &Config) -> Result<Arc<dyn EnrichmentLookup>> {
    let lookup = match &config.catalog_path {
        Some(path) => CatalogLookup::from_path(path)?,
        None => {
            tracing::info!("IAS_CATALOG_PATH not set; using the sample tag catalog");
            CatalogLookup::sample()
        }
    };
    Ok(Arc::new(lookup))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;

    let pool = sink::connect_lazy(&config.database_url, config.db_pool_size)?;
    let sink = PostgresSink::new(pool);
    if let Err(err) = sink.ensure_table().await {
        tracing::warn!(error = ?err, "could not verify the data table; upserts may fail");
    }

    let pipeline = IngestionPipeline::new(
        Arc::new(PresenceTracker::new(config.remove_grace())),
        Arc::new(MetadataCache::new()),
        Arc::new(sink),
    )
    .with_lookup(build_lookup(&config)?);

    let reader_handle = if config.reader_enabled() {
        let reader_config = config.clone();
        let reader_pipeline = pipeline.clone();
        Some(tokio::spawn(async move {
            if let Err(err) = reader::run_reader_stream(reader_config, reader_pipeline).await {
                tracing::error!(error = %err, "reader stream task exited");
            }
        }))
    } else {
        tracing::info!("reader event stream not configured; only HTTP ingest is active");
        None
    };

    let app = http::router(HttpState {
        pipeline: pipeline.clone(),
    });
    let listener = tokio::net::TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("failed to bind presence-gateway listener on {}", config.http_bind))?;
    tracing::info!(bind = %config.http_bind, "presence-gateway HTTP listening");
    let http_handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(error = %err, "HTTP server exited");
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        _ = http_handle => {}
        _ = async {
            if let Some(handle) = reader_handle {
                if let Err(err) = handle.await { tracing::warn!(error = %err, "reader task failed"); }
            } else {
                future::pending::<()>().await;
            }
        } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::normalize_otlp_http_endpoint;

    #[test]
    fn otlp_endpoint_gets_traces_path() {
        assert_eq!(
            normalize_otlp_http_endpoint("http://collector:4318/"),
            "http://collector:4318/v1/traces"
        );
        assert_eq!(
            normalize_otlp_http_endpoint("http://collector:4318/v1/traces"),
            "http://collector:4318/v1/traces"
        );
        assert_eq!(normalize_otlp_http_endpoint("  "), "");
    }
}
