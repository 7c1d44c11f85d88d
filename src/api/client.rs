//! API query client.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ApiError, RateLimiter};
use crate::cache::{CacheKey, RepositoryCache};
use crate::decompress::{self, Scheme};
use crate::fetch::{Credentials, FetchError, HttpClient, RetryPolicy};
use crate::parsers::{ParseContext, Parsers};
use crate::types::{ENDPOINT_INFO, ENDPOINT_SEARCH, Package, RepositoryDescriptor};

/// Issues rate-limited, retried and cached requests to API repositories.
pub struct ApiClient {
    http: HttpClient,
    cache: Arc<RepositoryCache>,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl ApiClient {
    pub fn new(http: HttpClient, cache: Arc<RepositoryCache>) -> Self {
        Self {
            http,
            cache,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Look up one package.
    ///
    /// Uses the `info` endpoint when present and picks the record whose name
    /// matches (falling back to the first record). Search-only repositories
    /// require an exact (case-insensitive) name match among the results.
    pub async fn query_package(&self, descriptor: &RepositoryDescriptor, name: &str) -> Result<Package, ApiError> {
        if !descriptor.is_api() {
            return Err(ApiError::NotApi {
                repository: descriptor.name.clone(),
            });
        }
        let not_found = || ApiError::NotFound {
            repository: descriptor.name.clone(),
            package: name.to_string(),
        };

        if let Some(template) = descriptor.endpoint(ENDPOINT_INFO) {
            let encoded = encode(name);
            let url = descriptor.expand(template, &[("package", &encoded), ("name", &encoded)]);

            let records = match self.fetch_records(descriptor, &url).await {
                Ok(records) => records,
                Err(e) if e.status() == Some(404) => return Err(not_found()),
                Err(e) => return Err(e.into()),
            };

            return records
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(name))
                .or_else(|| records.first())
                .cloned()
                .ok_or_else(not_found);
        }

        if descriptor.endpoint(ENDPOINT_SEARCH).is_some() {
            return self
                .search(descriptor, name)
                .await?
                .into_iter()
                .find(|p| p.name.eq_ignore_ascii_case(name))
                .ok_or_else(not_found);
        }

        Err(ApiError::NoQueryEndpoint {
            repository: descriptor.name.clone(),
        })
    }

    /// Look up many packages concurrently (bounded by the repository's
    /// `concurrent_requests`). Failures are per name.
    pub async fn query_packages_batch(
        &self,
        descriptor: &RepositoryDescriptor,
        names: &[String],
    ) -> HashMap<String, Result<Package, ApiError>> {
        let concurrency = descriptor.limits.concurrent_requests.max(1) as usize;

        stream::iter(names)
            .map(|name| async move { (name.clone(), self.query_package(descriptor, name).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await
    }

    /// Query the `search` endpoint. A 404 means no results.
    pub async fn search(&self, descriptor: &RepositoryDescriptor, query: &str) -> Result<Vec<Package>, ApiError> {
        let template = descriptor
            .endpoint(ENDPOINT_SEARCH)
            .ok_or_else(|| ApiError::NoQueryEndpoint {
                repository: descriptor.name.clone(),
            })?;
        let encoded = encode(query);
        let url = descriptor.expand(template, &[("query", &encoded), ("package", &encoded)]);

        match self.fetch_records(descriptor, &url).await {
            Ok(records) => Ok(records),
            Err(e) if e.status() == Some(404) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn limiter(&self, descriptor: &RepositoryDescriptor) -> Arc<RateLimiter> {
        self.limiters
            .lock()
            .await
            .entry(descriptor.name.clone())
            .or_insert_with(|| Arc::new(RateLimiter::new(&descriptor.limits)))
            .clone()
    }

    /// GET + parse one resolved URL, answering from the response cache when
    /// a valid entry exists. Only successful responses are cached.
    async fn fetch_records(&self, descriptor: &RepositoryDescriptor, url: &str) -> Result<Vec<Package>, FetchError> {
        let key = CacheKey::api(&descriptor.name, url);
        if let Some(entry) = self.cache.get(&key).await
            && entry.is_valid()
        {
            debug!(repository = %descriptor.name, url, "api cache hit");
            return Ok(entry.packages.clone());
        }

        let credentials = Credentials::resolve(&descriptor.name, &descriptor.auth)?;
        let limiter = self.limiter(descriptor).await;
        let timeout = descriptor.limits.timeout();

        let fetched = RetryPolicy::from_limits(&descriptor.limits)
            .run(|_| {
                let limiter = limiter.clone();
                let credentials = &credentials;
                async move {
                    let _permit = limiter.acquire().await;
                    self.http.get(&descriptor.name, url, credentials, timeout).await
                }
            })
            .await?;

        let encoding = fetched.content_encoding.as_deref();
        let body = Scheme::resolve(descriptor.parsing.compression, encoding, url, &fetched.body)
            .and_then(|scheme| decompress::decompress(&fetched.body, scheme))
            .map_err(|source| FetchError::Decompress {
                repository: descriptor.name.clone(),
                source,
            })?;

        let outcome = Parsers::for_descriptor(descriptor)
            .parse_bytes(&body, &ParseContext::new(descriptor, url))
            .map_err(|source| FetchError::Parse {
                repository: descriptor.name.clone(),
                url: url.to_string(),
                source,
            })?;

        if let Err(e) = self
            .cache
            .put(key, outcome.packages.clone(), descriptor.cache.ttl())
            .await
        {
            warn!(repository = %descriptor.name, "failed to persist api response: {}", e);
        }
        Ok(outcome.packages)
    }
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
