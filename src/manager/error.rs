use thiserror::Error;

use crate::api::ApiError;
use crate::fetch::FetchError;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("unknown repository: {0}")]
    UnknownRepository(String),

    #[error("no repository serves provider {0}")]
    NoRepositories(String),

    #[error("package {package} not found in {}", repositories.join(", "))]
    NotFound { package: String, repositories: Vec<String> },

    #[error("package {package} could not be looked up: {}", describe_failures(failures))]
    Unavailable {
        package: String,
        /// `(repository, reason)` for every candidate that failed.
        failures: Vec<(String, String)>,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        match self {
            RepositoryError::NotFound { .. } => true,
            RepositoryError::Api(e) => e.is_not_found(),
            _ => false,
        }
    }
}

fn describe_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(repo, reason)| format!("{repo}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}
