//! Shared HTTP client.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::CONTENT_ENCODING;
use tracing::debug;

use super::{Credentials, FetchError, RetryPolicy};

pub const DEFAULT_USER_AGENT: &str = concat!("pkgmeta/", env!("CARGO_PKG_VERSION"));

/// A successful response. The body is exactly what the server sent; any
/// `Content-Encoding` is left for the caller to undo.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: Vec<u8>,
    pub content_encoding: Option<String>,
}

/// Thin wrapper over [`reqwest::Client`] mapping every failure into a
/// repository-scoped [`FetchError`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }

    /// One GET attempt, bounded by `timeout`.
    pub async fn get(
        &self,
        repository: &str,
        url: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Fetched, FetchError> {
        let request = credentials.apply(self.client.get(url));

        let attempt = async {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Ok(Err(status.as_u16()));
            }
            let content_encoding = response
                .headers()
                .get(CONTENT_ENCODING)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(Ok(Fetched {
                body: body.to_vec(),
                content_encoding,
            }))
        };

        let outcome = tokio::time::timeout(timeout, attempt).await.map_err(|_| FetchError::Timeout {
            repository: repository.to_string(),
            url: url.to_string(),
            timeout,
        })?;

        match outcome {
            Ok(Ok(fetched)) => {
                debug!(
                    repository,
                    url,
                    bytes = fetched.body.len(),
                    encoding = fetched.content_encoding.as_deref(),
                    "fetched"
                );
                Ok(fetched)
            }
            Ok(Err(status)) => Err(FetchError::Status {
                repository: repository.to_string(),
                url: url.to_string(),
                status,
            }),
            Err(source) if source.is_timeout() => Err(FetchError::Timeout {
                repository: repository.to_string(),
                url: url.to_string(),
                timeout,
            }),
            Err(source) => Err(FetchError::Request {
                repository: repository.to_string(),
                url: url.to_string(),
                source,
            }),
        }
    }

    /// GET with the retry policy applied.
    pub async fn get_with_retry(
        &self,
        repository: &str,
        url: &str,
        credentials: &Credentials,
        timeout: Duration,
        policy: &RetryPolicy,
    ) -> Result<Fetched, FetchError> {
        policy
            .run(|_| self.get(repository, url, credentials, timeout))
            .await
    }
}
