use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid payload: {0}")]
    Validation(String),

    #[error("enrichment lookup failed for tag {tag_id}")]
    Lookup {
        tag_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("persisting tag {tag_id} failed")]
    Persistence {
        tag_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("reader stream failed: {0}")]
    Stream(#[source] anyhow::Error),
}

impl GatewayError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn stream(err: impl Into<anyhow::Error>) -> Self {
        Self::Stream(err.into())
    }

    /// Lookup, persistence and stream failures. Never retried inside the pipeline.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Lookup { .. } | Self::Persistence { .. } | Self::Stream(_)
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Lookup { .. } | Self::Persistence { .. } | Self::Stream(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, status = %status, "request failed");
        } else {
            tracing::warn!(error = %self, status = %status, "rejected request");
        }
        (status, self.to_string()).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
