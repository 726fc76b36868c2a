//! Error taxonomy for the course-architect core.
//!
//! Mirrors the kind-not-type policy of the design: each variant carries enough
//! information for the layer that raised it, and `status_code`/`client_message`
//! translate it into the HTTP vocabulary at the boundary. Inner layers never
//! leak sensitive fields (`api_key`, `key_hash`, `password`, `secret`, `token`,
//! `authorization`) into a client-facing message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug, Clone)]
pub enum CoreError {
    // --- Invalid input (never retried) ---
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    // --- Auth failures ---
    #[error("missing API key")]
    MissingApiKey,

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("API key expired")]
    ApiKeyExpired,

    #[error("tenant inactive")]
    TenantInactive,

    // --- Scope / authorization ---
    #[error("scope not permitted for this key")]
    ScopeForbidden,

    // --- Rate limiting ---
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    // --- Not found (also used for cross-tenant access, invariant: never 403) ---
    #[error("not found: {0}")]
    NotFound(String),

    // --- Conflicts ---
    #[error("conflict: {0}")]
    Conflict(String),

    // --- Transient LLM failure (retryable inside the router) ---
    #[error("transient LLM failure: {0}")]
    TransientLlm(String),

    #[error("structured output failed validation: {0}")]
    StructuredOutputInvalid(String),

    // --- Permanent LLM failure: all chains/strategies exhausted ---
    #[error("all models failed for action '{action}' (strategies tried: {strategies_tried:?})")]
    AllModelsFailed {
        action: String,
        strategies_tried: Vec<String>,
        errors: Vec<(String, String)>,
    },

    // --- Ingestion / processing failures ---
    #[error("processing failed: {0}")]
    ProcessingFailed(String),

    // --- Infrastructure ---
    #[error("database error: {0}")]
    Database(String),

    #[error("object storage error: {0}")]
    ObjectStorage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            Self::MissingApiKey
            | Self::InvalidApiKey
            | Self::ApiKeyExpired
            | Self::TenantInactive => StatusCode::UNAUTHORIZED,
            Self::ScopeForbidden => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TransientLlm(_) | Self::StructuredOutputInvalid(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::AllModelsFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::ProcessingFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Database(_) | Self::ObjectStorage(_) | Self::Config(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Client-safe message; redacts anything that could leak internals.
    pub fn client_message(&self) -> String {
        match self {
            Self::Database(_) | Self::ObjectStorage(_) | Self::Config(_) | Self::Internal(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self {
            Self::InvalidRequest(_)
            | Self::UnsupportedFormat(_)
            | Self::MissingApiKey
            | Self::InvalidApiKey
            | Self::ApiKeyExpired
            | Self::TenantInactive
            | Self::ScopeForbidden
            | Self::RateLimitExceeded { .. }
            | Self::NotFound(_)
            | Self::Conflict(_)
            | Self::ProcessingFailed(_) => Level::WARN,
            _ => Level::ERROR,
        }
    }
}

/// Wire-format error body: `{detail: string}`.
#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        log_error(&self);

        let mut response =
            (status, Json(ErrorBody { detail: self.client_message() })).into_response();

        if let Self::RateLimitExceeded { retry_after } = &self {
            if let Ok(value) = retry_after.as_secs().to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }

        response
    }
}

fn log_error(err: &CoreError) {
    match err.log_level() {
        tracing::Level::ERROR => error!(error = %err, "request failed"),
        tracing::Level::WARN => warn!(error = %err, "request rejected"),
        _ => {}
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Internal(format!("JSON error: {err}"))
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(err: serde_yaml::Error) -> Self {
        CoreError::Config(format!("YAML error: {err}"))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::TransientLlm(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
