//! Fetch errors.

use std::time::Duration;

use thiserror::Error;

use crate::decompress::DecompressError;
use crate::parsers::ParseError;

/// Failure retrieving or decoding a repository artifact. Every variant names
/// the repository it happened in.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{repository}: request to {url} failed: {source}")]
    Request {
        repository: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{repository}: {url} returned HTTP {status}")]
    Status {
        repository: String,
        url: String,
        status: u16,
    },

    #[error("{repository}: request to {url} timed out after {}s", .timeout.as_secs())]
    Timeout {
        repository: String,
        url: String,
        timeout: Duration,
    },

    #[error("{repository}: {source}")]
    Decompress {
        repository: String,
        #[source]
        source: DecompressError,
    },

    #[error("{repository}: failed to parse {url}: {source}")]
    Parse {
        repository: String,
        url: String,
        #[source]
        source: ParseError,
    },

    #[error("{repository}: metalink {url}: {reason}")]
    Metalink {
        repository: String,
        url: String,
        reason: String,
    },

    #[error("{repository}: no `{endpoint}` endpoint configured")]
    MissingEndpoint { repository: String, endpoint: String },

    #[error("{repository}: credential variable {variable} is not set")]
    Credentials { repository: String, variable: String },
}

impl FetchError {
    pub fn repository(&self) -> &str {
        match self {
            FetchError::Request { repository, .. }
            | FetchError::Status { repository, .. }
            | FetchError::Timeout { repository, .. }
            | FetchError::Decompress { repository, .. }
            | FetchError::Parse { repository, .. }
            | FetchError::Metalink { repository, .. }
            | FetchError::MissingEndpoint { repository, .. }
            | FetchError::Credentials { repository, .. } => repository,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Transient failures worth another attempt: 408, 429, 5xx, timeouts and
    /// connection-level errors. Other 4xx (401, 403, 404, ...) are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => matches!(status, 408 | 429 | 500..=599),
            FetchError::Timeout { .. } => true,
            FetchError::Request { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request() || source.is_body()
            }
            _ => false,
        }
    }
}
