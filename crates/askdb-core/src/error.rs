//! Error taxonomy for the query pipeline.
//!
//! Capability errors (`CacheError`, `EmbedError`, `SearchError`,
//! `GenerationError`, `TraceError`) describe what went wrong inside one
//! collaborator. The request-level [`Error`] is what the orchestrator fails a
//! request with, and [`PublicError`] is the only shape that reaches callers.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmbedError {
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("embedding provider timed out after {0:?}")]
    ProviderTimeout(Duration),

    #[error("embedding provider returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl EmbedError {
    /// Short label recorded as a span attribute.
    pub fn label(&self) -> &'static str {
        match self {
            EmbedError::ProviderUnavailable(_) => "provider_unavailable",
            EmbedError::ProviderTimeout(_) => "provider_timeout",
            EmbedError::InvalidResponse(_) => "invalid_response",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("search backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("search backend timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("no generation output within {0:?}")]
    Timeout(Duration),

    #[error("generation backend error: {0}")]
    Backend(String),

    #[error("generation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TraceError {
    #[error("trace sink unavailable: {0}")]
    SinkUnavailable(String),
}

/// Request-level failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("lexical search failed: {0}")]
    SearchUnavailable(#[source] SearchError),

    #[error("generation timed out: {0}")]
    GenerationTimeout(#[source] GenerationError),

    #[error("generation failed: {0}")]
    GenerationFailed(#[source] GenerationError),

    #[error("request cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl From<GenerationError> for Error {
    fn from(e: GenerationError) -> Self {
        match e {
            GenerationError::Timeout(_) => Error::GenerationTimeout(e),
            GenerationError::Cancelled => Error::Cancelled,
            GenerationError::Backend(_) => Error::GenerationFailed(e),
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidQuery(_) => ErrorKind::InvalidQuery,
            Error::SearchUnavailable(_) => ErrorKind::SearchUnavailable,
            Error::GenerationTimeout(_) => ErrorKind::GenerationTimeout,
            Error::GenerationFailed(_) => ErrorKind::GenerationFailed,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Config(_) | Error::Io(_) | Error::Serialization(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Caller-facing form. Only `InvalidQuery` keeps its detail, since that
    /// text is produced by validation rather than by a backend.
    pub fn to_public(&self) -> PublicError {
        let kind = self.kind();
        let message = match self {
            Error::InvalidQuery(detail) => format!("{}: {}", kind.public_message(), detail),
            _ => kind.public_message().to_string(),
        };
        PublicError { kind, code: kind.code(), status: kind.status(), retryable: kind.retryable(), message }
    }
}

/// User-visible error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidQuery,
    SearchUnavailable,
    GenerationTimeout,
    GenerationFailed,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidQuery => "invalid_query",
            ErrorKind::SearchUnavailable => "search_unavailable",
            ErrorKind::GenerationTimeout => "generation_timeout",
            ErrorKind::GenerationFailed => "generation_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn status(self) -> u16 {
        match self {
            ErrorKind::InvalidQuery => 400,
            ErrorKind::Cancelled => 499,
            ErrorKind::SearchUnavailable => 503,
            ErrorKind::GenerationTimeout => 504,
            ErrorKind::GenerationFailed => 502,
            ErrorKind::Internal => 500,
        }
    }

    pub fn retryable(self) -> bool {
        matches!(self, ErrorKind::SearchUnavailable | ErrorKind::GenerationTimeout | ErrorKind::GenerationFailed)
    }

    pub fn public_message(self) -> &'static str {
        match self {
            ErrorKind::InvalidQuery => "the query was rejected",
            ErrorKind::SearchUnavailable => "search is temporarily unavailable, please retry",
            ErrorKind::GenerationTimeout => "no answer was generated in time",
            ErrorKind::GenerationFailed => "no answer could be generated",
            ErrorKind::Cancelled => "the request was cancelled",
            ErrorKind::Internal => "internal error",
        }
    }
}

/// The error shape returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{code}: {message}")]
pub struct PublicError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub status: u16,
    pub retryable: bool,
    pub message: String,
}

impl From<Error> for PublicError {
    fn from(e: Error) -> Self { e.to_public() }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_text_never_reaches_public_message() {
        let err = Error::SearchUnavailable(SearchError::BackendUnavailable("connection refused at 10.0.0.3:9200".into()));
        let public = err.to_public();
        assert_eq!(public.kind, ErrorKind::SearchUnavailable);
        assert_eq!(public.code, "search_unavailable");
        assert!(public.retryable);
        assert!(!public.message.contains("10.0.0.3"));
    }

    #[test]
    fn invalid_query_keeps_validation_detail() {
        let public = Error::InvalidQuery("top_k must be between 1 and 10".into()).to_public();
        assert_eq!(public.status, 400);
        assert!(!public.retryable);
        assert!(public.message.contains("top_k"));
    }

    #[test]
    fn generation_errors_map_to_distinct_kinds() {
        let timeout: Error = GenerationError::Timeout(Duration::from_secs(1)).into();
        let backend: Error = GenerationError::Backend("boom".into()).into();
        let cancelled: Error = GenerationError::Cancelled.into();
        assert_eq!(timeout.kind(), ErrorKind::GenerationTimeout);
        assert_eq!(backend.kind(), ErrorKind::GenerationFailed);
        assert_eq!(cancelled.kind(), ErrorKind::Cancelled);
        assert_ne!(timeout.kind().code(), ErrorKind::SearchUnavailable.code());
    }

    #[test]
    fn embed_error_labels() {
        assert_eq!(EmbedError::ProviderTimeout(Duration::from_millis(5)).label(), "provider_timeout");
        assert_eq!(EmbedError::ProviderUnavailable("x".into()).label(), "provider_unavailable");
    }
}
