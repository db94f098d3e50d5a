use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt::Display;
use thiserror::Error;

/// Failures raised by the upstream sensor API client.
///
/// These never cross into the AQI or position decision logic: callers at
/// that boundary turn them into "data absent".
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("upstream request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upstream returned HTTP {status}")]
    Status { status: u16 },
    #[error("failed to decode upstream payload: {0}")]
    Decode(String),
    #[error("invalid upstream url: {0}")]
    Url(#[from] url::ParseError),
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinateError {
    #[error("coordinate is empty")]
    Empty,
    #[error("expected exactly two comma-separated values, got {0}")]
    FieldCount(usize),
    #[error("coordinate component {0:?} is not a finite number")]
    NotANumber(String),
    #[error("coordinate ({lat}, {lon}) is outside the valid range")]
    OutOfRange { lat: f64, lon: f64 },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("store record {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn upstream(err: impl Display) -> Self {
        tracing::warn!(error = %err, "upstream request failed");
        Self::new(StatusCode::BAD_GATEWAY, "Upstream sensor API unavailable")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
