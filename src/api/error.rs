//! API client errors.

use thiserror::Error;

use crate::fetch::FetchError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("package {package} not found in {repository}")]
    NotFound { repository: String, package: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("{repository} has neither an `info` nor a `search` endpoint")]
    NoQueryEndpoint { repository: String },

    #[error("{repository} is not an API repository")]
    NotApi { repository: String },
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }
}
