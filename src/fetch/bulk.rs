//! Whole-index downloads for `bulk_download` repositories.
//!
//! APT and Alpine take one round-trip. RPM takes two (repomd.xml, then
//! primary), or three when the configured URL serves a metalink.

use std::io::{BufReader, Cursor};

use tracing::{debug, info};

use super::{Credentials, FetchError, Fetched, HttpClient, RetryPolicy};
use crate::decompress::{self, Scheme};
use crate::parsers::rpm::{self, RepositoryIndex};
use crate::parsers::{ParseContext, ParseError, ParseOutcome, Parsers};
use crate::types::{ENDPOINT_PACKAGES, ParserFormat, RepositoryDescriptor};

/// Downloads, decompresses and parses repository indexes.
#[derive(Debug, Clone)]
pub struct BulkFetcher {
    http: HttpClient,
}

impl BulkFetcher {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Fetch and parse the full index of a bulk repository.
    pub async fn fetch_index(&self, descriptor: &RepositoryDescriptor) -> Result<ParseOutcome, FetchError> {
        let template = descriptor
            .endpoint(ENDPOINT_PACKAGES)
            .ok_or_else(|| FetchError::MissingEndpoint {
                repository: descriptor.name.clone(),
                endpoint: ENDPOINT_PACKAGES.to_string(),
            })?;
        let url = descriptor.expand(template, &[]);
        let credentials = Credentials::resolve(&descriptor.name, &descriptor.auth)?;

        info!(repository = %descriptor.name, url = %url, "fetching index");

        let outcome = match descriptor.parser_format() {
            ParserFormat::RpmMetadata => self.fetch_rpm(descriptor, &url, &credentials).await?,
            _ => {
                let fetched = self.download(descriptor, &url, &credentials).await?;
                parse_artifact(descriptor, &url, fetched, descriptor.parsing.compression).await?
            }
        };

        info!(
            repository = %descriptor.name,
            packages = outcome.packages.len(),
            skipped = outcome.skipped,
            "index fetched"
        );
        Ok(outcome)
    }

    async fn download(
        &self,
        descriptor: &RepositoryDescriptor,
        url: &str,
        credentials: &Credentials,
    ) -> Result<Fetched, FetchError> {
        self.http
            .get_with_retry(
                &descriptor.name,
                url,
                credentials,
                descriptor.limits.timeout(),
                &RetryPolicy::from_limits(&descriptor.limits),
            )
            .await
    }

    /// repomd.xml (or metalink -> mirror repomd.xml) -> primary.
    async fn fetch_rpm(
        &self,
        descriptor: &RepositoryDescriptor,
        url: &str,
        credentials: &Credentials,
    ) -> Result<ParseOutcome, FetchError> {
        let index = self.fetch_repository_index(descriptor, url, credentials).await?;

        let (repomd_url, primary) = match index {
            RepositoryIndex::Repomd { primary } => (url.to_string(), primary),
            RepositoryIndex::Metalink { mirrors } => {
                let mirror = rpm::select_mirror(&mirrors).ok_or_else(|| FetchError::Metalink {
                    repository: descriptor.name.clone(),
                    url: url.to_string(),
                    reason: "no usable mirror".to_string(),
                })?;
                debug!(repository = %descriptor.name, mirror = %mirror.url, "metalink mirror selected");

                match self.fetch_repository_index(descriptor, &mirror.url, credentials).await? {
                    RepositoryIndex::Repomd { primary } => (mirror.url.clone(), primary),
                    RepositoryIndex::Metalink { .. } => {
                        return Err(FetchError::Metalink {
                            repository: descriptor.name.clone(),
                            url: mirror.url.clone(),
                            reason: "mirror served another metalink".to_string(),
                        });
                    }
                }
            }
        };

        let primary_url = rpm::primary_url(rpm::repository_base(&repomd_url), &primary);
        debug!(repository = %descriptor.name, url = %primary_url, "fetching primary");

        let fetched = self.download(descriptor, &primary_url, credentials).await?;
        parse_artifact(descriptor, &primary_url, fetched, None).await
    }

    async fn fetch_repository_index(
        &self,
        descriptor: &RepositoryDescriptor,
        url: &str,
        credentials: &Credentials,
    ) -> Result<RepositoryIndex, FetchError> {
        let fetched = self.download(descriptor, url, credentials).await?;
        let data = Scheme::resolve(None, fetched.content_encoding.as_deref(), url, &fetched.body)
            .and_then(|scheme| decompress::decompress(&fetched.body, scheme))
            .map_err(|source| FetchError::Decompress {
                repository: descriptor.name.clone(),
                source,
            })?;

        rpm::parse_repository_index(&data).map_err(|source| FetchError::Parse {
            repository: descriptor.name.clone(),
            url: url.to_string(),
            source,
        })
    }
}

/// Decompress `data` while parsing it, on the blocking pool.
async fn parse_artifact(
    descriptor: &RepositoryDescriptor,
    url: &str,
    fetched: Fetched,
    declared: Option<Scheme>,
) -> Result<ParseOutcome, FetchError> {
    let scheme = Scheme::resolve(declared, fetched.content_encoding.as_deref(), url, &fetched.body)
        .map_err(|source| FetchError::Decompress {
            repository: descriptor.name.clone(),
            source,
        })?;
    let data = fetched.body;
    let owned = descriptor.clone();
    let base_url = url.to_string();

    let result = tokio::task::spawn_blocking(move || decode_and_parse(&owned, &base_url, &data, scheme))
        .await
        .map_err(|e| FetchError::Parse {
            repository: descriptor.name.clone(),
            url: url.to_string(),
            source: ParseError::InvalidDocument(format!("parser task failed: {}", e)),
        })?;

    result.map_err(|e| match e {
        ArtifactError::Decompress(source) => FetchError::Decompress {
            repository: descriptor.name.clone(),
            source,
        },
        ArtifactError::Parse(source) => FetchError::Parse {
            repository: descriptor.name.clone(),
            url: url.to_string(),
            source,
        },
    })
}

enum ArtifactError {
    Decompress(decompress::DecompressError),
    Parse(ParseError),
}

fn decode_and_parse(
    descriptor: &RepositoryDescriptor,
    url: &str,
    data: &[u8],
    scheme: Scheme,
) -> Result<ParseOutcome, ArtifactError> {
    let reader = decompress::decoder(Cursor::new(data), scheme).map_err(ArtifactError::Decompress)?;
    let ctx = ParseContext::new(descriptor, url);

    match Parsers::for_descriptor(descriptor).parse(BufReader::new(reader), &ctx) {
        Ok(outcome) => Ok(outcome),
        // Read errors under a decoder come from corrupt compressed data.
        Err(ParseError::Read(source)) if scheme != Scheme::None => {
            Err(ArtifactError::Decompress(decompress::DecompressError::CorruptData { scheme, source }))
        }
        Err(e) => Err(ArtifactError::Parse(e)),
    }
}
