use crate::config::{Config, ReaderSourceKind};
use crate::error::{GatewayError, GatewayResult};
use crate::events::{parse_event_payload, ReaderEvent};
use crate::ingest::IngestionPipeline;
use crate::mqtt::MqttSource;
use anyhow::Result;
use async_trait::async_trait;
use tracing::Instrument;
use uuid::Uuid;

/// A connected reader event feed.
///
/// `next_event` yields `Ok(None)` once the feed is exhausted. `release` gives the underlying
/// connection back and must be safe to call more than once. A consumer that is cancelled never
/// gets to call `release`, so dropping a source without releasing it must also close the
/// connection.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> GatewayResult<Option<ReaderEvent>>;

    async fn release(&mut self);
}

#[async_trait]
impl<S> EventSource for Box<S>
where
    S: EventSource + ?Sized,
{
    async fn next_event(&mut self) -> GatewayResult<Option<ReaderEvent>> {
        (**self).next_event().await
    }

    async fn release(&mut self) {
        (**self).release().await
    }
}

/// Splits a byte stream into newline-terminated lines.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Next complete non-blank line, without its terminator.
    pub(crate) fn next_line(&mut self) -> Option<Vec<u8>> {
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if !is_blank(&line) {
                return Some(line);
            }
        }
        None
    }

    /// Whatever is left once the stream has ended, if it is not blank.
    pub(crate) fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.pending);
        if is_blank(&rest) {
            None
        } else {
            Some(rest)
        }
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

/// The reader's HTTP event stream: `GET {base}/data/stream`, one JSON event per line.
pub struct HttpStreamSource {
    url: String,
    response: Option<reqwest::Response>,
    lines: LineBuffer,
}

impl HttpStreamSource {
    pub async fn connect(
        client: &reqwest::Client,
        base_url: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> GatewayResult<Self> {
        let url = format!("{}/data/stream", base_url.trim().trim_end_matches('/'));
        let mut request = client.get(&url);
        if let Some(user) = user {
            request = request.basic_auth(user, password);
        }
        let response = request
            .send()
            .await
            .map_err(GatewayError::stream)?
            .error_for_status()
            .map_err(GatewayError::stream)?;

        tracing::info!(url = %url, "connected to reader event stream");
        Ok(Self {
            url,
            response: Some(response),
            lines: LineBuffer::default(),
        })
    }
}

#[async_trait]
impl EventSource for HttpStreamSource {
    async fn next_event(&mut self) -> GatewayResult<Option<ReaderEvent>> {
        loop {
            if let Some(mut line) = self.lines.next_line() {
                return parse_event_payload(&mut line).map(Some);
            }
            let Some(response) = self.response.as_mut() else {
                return match self.lines.finish() {
                    Some(mut rest) => parse_event_payload(&mut rest).map(Some),
                    None => Ok(None),
                };
            };
            match response.chunk().await.map_err(GatewayError::stream)? {
                Some(chunk) => self.lines.push(&chunk),
                None => {
                    tracing::debug!(url = %self.url, "reader event stream closed by peer");
                    self.response = None;
                }
            }
        }
    }

    async fn release(&mut self) {
        if self.response.take().is_some() {
            tracing::debug!(url = %self.url, "released reader event stream");
        }
        self.lines.clear();
    }
}

pub async fn open_source(
    config: &Config,
    client: &reqwest::Client,
) -> GatewayResult<Box<dyn EventSource>> {
    match config.reader_source {
        ReaderSourceKind::Http => {
            let base_url = config
                .reader_base_url
                .as_deref()
                .ok_or_else(|| GatewayError::configuration("READER_BASE_URL is not set"))?;
            let source = HttpStreamSource::connect(
                client,
                base_url,
                config.reader_user.as_deref(),
                config.reader_password.as_deref(),
            )
            .await?;
            Ok(Box::new(source))
        }
        ReaderSourceKind::Mqtt => Ok(Box::new(MqttSource::connect(config).await?)),
        ReaderSourceKind::Disabled => Err(GatewayError::configuration(
            "reader event source is disabled",
        )),
    }
}

/// Keeps one reader stream session running at a time, reopening the source after it ends.
/// Only a configuration error stops the loop.
pub async fn run_reader_stream(config: Config, pipeline: IngestionPipeline) -> Result<()> {
    let client = reqwest::Client::builder().build()?;
    let stats = pipeline.stats();

    loop {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!("reader_session", session_id = %session_id);

        let outcome = async {
            let source = open_source(&config, &client).await?;
            stats.set_stream_connected(true);
            let result = pipeline.consume_stream(source).await;
            stats.set_stream_connected(false);
            result
        }
        .instrument(span)
        .await;

        match outcome {
            Ok(summary) => {
                stats.clear_error();
                tracing::info!(%session_id, events = summary.events, "reader stream ended; reconnecting");
            }
            Err(err @ GatewayError::Configuration(_)) => {
                tracing::error!(%session_id, error = %err, "reader stream cannot run");
                return Err(err.into());
            }
            Err(err) => {
                stats.record_error(err.to_string());
                tracing::warn!(%session_id, error = ?err, "reader stream failed; retrying");
            }
        }

        tokio::time::sleep(config.reconnect_delay()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::Router;

    #[test]
    fn line_buffer_reassembles_split_lines() {
        let mut lines = LineBuffer::default();
        lines.push(b"{\"a\":");
        assert!(lines.next_line().is_none());
        lines.push(b"1}\n\n  \r\n{\"b\":2}\r\n{\"c\"");
        assert_eq!(lines.next_line().as_deref(), Some(&b"{\"a\":1}"[..]));
        assert_eq!(lines.next_line().as_deref(), Some(&b"{\"b\":2}\r"[..]));
        assert!(lines.next_line().is_none());
        lines.push(b":3}");
        assert_eq!(lines.finish().as_deref(), Some(&b"{\"c\":3}"[..]));
        assert!(lines.finish().is_none());
    }

    async fn serve(router: Router) -> Option<String> {
        let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener,
            // Sandbox environments can block binding attempts.
            Err(_) => return None,
        };
        let addr = listener.local_addr().ok()?;
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        Some(format!("http://{addr}"))
    }

    async fn stream_body(headers: HeaderMap) -> (StatusCode, String) {
        if !headers.contains_key(axum::http::header::AUTHORIZATION) {
            return (StatusCode::UNAUTHORIZED, String::new());
        }
        let body = [
            "",
            r#"{"eventType":"other"}"#,
            r#"{"eventType":"tagInventory","tagInventoryEvent":{"epcHex":"ABC"}}"#,
        ]
        .join("\n");
        (StatusCode::OK, body)
    }

    #[tokio::test]
    async fn http_source_yields_events_then_exhausts() {
        let Some(base) = serve(Router::new().route("/data/stream", get(stream_body))).await else {
            return;
        };
        let client = reqwest::Client::new();
        let mut source = HttpStreamSource::connect(&client, &format!("{base}/"), Some("root"), Some("pw"))
            .await
            .unwrap();

        let first = source.next_event().await.unwrap().unwrap();
        assert_eq!(first.event_type.as_deref(), Some("other"));
        let second = source.next_event().await.unwrap().unwrap();
        assert_eq!(second.tag_id(), Some("ABC"));
        assert!(source.next_event().await.unwrap().is_none());

        source.release().await;
        source.release().await;
        assert!(source.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn http_source_fails_on_bad_status() {
        let Some(base) = serve(Router::new().route("/data/stream", get(stream_body))).await else {
            return;
        };
        let client = reqwest::Client::new();
        let result = HttpStreamSource::connect(&client, &base, None, None).await;
        assert!(matches!(result, Err(GatewayError::Stream(_))));
    }
}
