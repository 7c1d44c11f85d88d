//! Repository manager.
//!
//! Owns the validated descriptors, the lookup index and the shared cache,
//! and routes every query to either the bulk fetcher or the API client:
//! - provider / OS / version resolution with priority ordering
//! - cached package lists with stale fallback on refresh failure
//! - one in-flight download per repository
//! - concurrent refresh sweeps, searches and health reports

mod error;
mod lookup;
mod search;

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use error::RepositoryError;
pub use lookup::QueryContext;
pub use search::{MatchRank, SearchHit, SearchResults};

use crate::api::ApiClient;
use crate::cache::{CacheEntry, CacheKey, RepositoryCache};
use crate::config::ManagerConfig;
use crate::descriptor::{self, ConfigError, DescriptorSet};
use crate::fetch::{BulkFetcher, HttpClient};
use crate::types::{
    ENDPOINT_SEARCH, Freshness, HealthStatus, Package, PackageList, QueryType, RepositoryDescriptor, RepositoryHealth,
};
use lookup::LookupIndex;
use search::rank_packages;

/// Options for [`RepositoryManager::update_all`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshOptions {
    /// Refresh end-of-life repositories too.
    pub include_eol: bool,
    /// Download even when the cached index is still valid.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Fetched { packages: usize },
    Cached { packages: usize },
    Stale { packages: usize, reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub repository: String,
    #[serde(flatten)]
    pub outcome: RefreshOutcome,
}

/// Narrows [`RepositoryManager::list_repositories`]. Empty matches all.
#[derive(Debug, Clone, Default)]
pub struct RepositoryFilter {
    pub provider: Option<String>,
    pub os: Option<String>,
    pub query_type: Option<QueryType>,
    pub exclude_eol: bool,
}

impl RepositoryFilter {
    fn matches(&self, d: &RepositoryDescriptor) -> bool {
        self.provider
            .as_deref()
            .is_none_or(|p| d.provider.eq_ignore_ascii_case(p))
            && self.os.as_deref().is_none_or(|os| d.serves_os(os))
            && self.query_type.is_none_or(|q| d.query_type == q)
            && !(self.exclude_eol && d.eol)
    }
}

pub struct RepositoryManager {
    config: ManagerConfig,
    /// Declaration order.
    descriptors: Vec<Arc<RepositoryDescriptor>>,
    index: LookupIndex,
    config_errors: Vec<ConfigError>,
    cache: Arc<RepositoryCache>,
    fetcher: BulkFetcher,
    api: ApiClient,
    fetch_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RepositoryManager {
    /// Load descriptors and the persisted cache, then build the lookup index.
    ///
    /// Invalid descriptors are excluded and reported through
    /// [`config_errors`](Self::config_errors); they never abort startup.
    pub async fn initialize(config: ManagerConfig) -> Result<Self, RepositoryError> {
        let set = descriptor::load(config.include_builtin, &config.descriptor_dirs).await;

        let cache = match config.resolved_cache_dir() {
            Some(dir) if config.persist_cache => RepositoryCache::persistent(dir),
            _ => RepositoryCache::in_memory(),
        };
        match cache.load().await {
            Ok(report) => debug!(loaded = report.loaded, skipped = report.skipped, "cache loaded"),
            Err(e) => warn!("failed to load cache, starting empty: {}", e),
        }

        Self::with_descriptors(config, set, cache)
    }

    /// Build a manager from an already loaded descriptor set.
    pub fn with_descriptors(
        config: ManagerConfig,
        set: DescriptorSet,
        cache: RepositoryCache,
    ) -> Result<Self, RepositoryError> {
        let http = HttpClient::new(&config.user_agent)?;
        let cache = Arc::new(cache);
        let index = LookupIndex::build(&set.descriptors);

        info!(
            repositories = set.descriptors.len(),
            rejected = set.errors.len(),
            "repository manager ready"
        );

        Ok(Self {
            config,
            descriptors: set.descriptors,
            index,
            config_errors: set.errors,
            fetcher: BulkFetcher::new(http.clone()),
            api: ApiClient::new(http, cache.clone()),
            cache,
            fetch_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn config_errors(&self) -> &[ConfigError] {
        &self.config_errors
    }

    pub fn cache(&self) -> &Arc<RepositoryCache> {
        &self.cache
    }

    pub fn get_repository(&self, name: &str) -> Option<Arc<RepositoryDescriptor>> {
        self.index.position(name).map(|pos| self.descriptors[pos].clone())
    }

    pub fn list_repositories(&self, filter: &RepositoryFilter) -> Vec<Arc<RepositoryDescriptor>> {
        self.descriptors
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect()
    }

    /// Repository name for `(provider, os, version)`, conventionally
    /// `{provider}-{os}-{codename}`.
    ///
    /// The codename comes from the best version-specific descriptor. A
    /// descriptor carrying the conventional name wins; otherwise the best
    /// descriptor's own name is used when it mentions the codename, and the
    /// conventional name when it does not. Falls back to the provider when
    /// no descriptor maps `version`.
    pub fn resolve_repository_name(&self, provider: &str, os: &str, version: &str) -> String {
        let Some(best) = self.index.versioned_best(&self.descriptors, provider, os, version) else {
            return provider.to_string();
        };
        let best = &self.descriptors[best];
        let Some(codename) = best.codename_for(version) else {
            return best.name.clone();
        };

        let conventional = format!("{provider}-{os}-{codename}").to_lowercase();
        if self.index.position(&conventional).is_some() {
            conventional
        } else if best.name.to_lowercase().contains(&codename.to_lowercase()) {
            best.name.clone()
        } else {
            conventional
        }
    }

    /// Every repository that may answer for `ctx`, highest priority first.
    pub fn resolve_repositories(&self, ctx: &QueryContext) -> Vec<Arc<RepositoryDescriptor>> {
        self.index
            .candidates(&self.descriptors, ctx)
            .into_iter()
            .map(|pos| self.descriptors[pos].clone())
            .collect()
    }

    /// Full package list of a bulk repository.
    ///
    /// Serves a valid cache entry without network access. Otherwise downloads
    /// the index; on failure the last known index is returned marked stale,
    /// and only when nothing is cached does the error surface. API
    /// repositories return an empty `NotApplicable` list.
    pub async fn get_packages(&self, repository: &str) -> Result<PackageList, RepositoryError> {
        let descriptor = self.descriptor(repository)?;
        if descriptor.is_api() {
            return Ok(PackageList::not_applicable(repository));
        }

        let key = CacheKey::bulk(repository);
        if let Some(list) = self.cached(&key).await {
            return Ok(list);
        }

        let lock = self.fetch_lock(repository).await;
        let _guard = lock.lock().await;

        // filled by another caller while we waited
        if let Some(list) = self.cached(&key).await {
            return Ok(list);
        }
        self.fetch_locked(&descriptor).await
    }

    /// Download a bulk index regardless of cache validity.
    pub async fn refresh_repository(&self, repository: &str) -> Result<PackageList, RepositoryError> {
        let descriptor = self.descriptor(repository)?;
        if descriptor.is_api() {
            return Ok(PackageList::not_applicable(repository));
        }

        let lock = self.fetch_lock(repository).await;
        let _guard = lock.lock().await;
        self.fetch_locked(&descriptor).await
    }

    /// Search by name and description.
    ///
    /// `repositories` limits the search; by default every repository that
    /// is not end-of-life is searched. API repositories take part only when
    /// they have a `search` endpoint. Failing repositories are reported in
    /// [`SearchResults::errors`] and never abort the search.
    pub async fn search_packages(&self, query: &str, repositories: Option<&[String]>) -> SearchResults {
        let mut results = SearchResults::default();
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return results;
        }

        let targets: Vec<Arc<RepositoryDescriptor>> = match repositories {
            Some(names) => names
                .iter()
                .filter_map(|name| {
                    let found = self.get_repository(name);
                    if found.is_none() {
                        let reason = RepositoryError::UnknownRepository(name.clone()).to_string();
                        results.errors.push((name.clone(), reason));
                    }
                    found
                })
                .collect(),
            None => self.descriptors.iter().filter(|d| !d.eol).cloned().collect(),
        };

        let needle = needle.as_str();
        let outcomes: Vec<_> = stream::iter(targets)
            .map(|d| async move {
                let outcome = self.search_one(&d, needle).await;
                (d, outcome)
            })
            .buffer_unordered(self.concurrency())
            .collect()
            .await;

        for (d, outcome) in outcomes {
            match outcome {
                Ok(hits) => results.hits.extend(hits),
                Err(e) => {
                    warn!(repository = %d.name, "search failed: {}", e);
                    results.errors.push((d.name.clone(), e.to_string()));
                }
            }
        }
        results.sort();
        results
    }

    async fn search_one(&self, d: &RepositoryDescriptor, needle: &str) -> Result<Vec<SearchHit>, RepositoryError> {
        if d.is_api() {
            if d.endpoint(ENDPOINT_SEARCH).is_none() {
                return Ok(Vec::new());
            }
            let packages = self.api.search(d, needle).await?;
            return Ok(rank_packages(&packages, needle, d.priority));
        }
        let list = self.get_packages(&d.name).await?;
        Ok(rank_packages(&list.packages, needle, d.priority))
    }

    /// Find one package across the repositories resolved for `ctx`, trying
    /// them in priority order.
    ///
    /// `NotFound` means every candidate answered and none had the package.
    /// `Unavailable` means at least one candidate could not be consulted.
    pub async fn query_package(&self, name: &str, ctx: &QueryContext) -> Result<Package, RepositoryError> {
        let candidates = self.resolve_repositories(ctx);
        if candidates.is_empty() {
            return Err(RepositoryError::NoRepositories(ctx.provider.clone()));
        }

        let mut failures = Vec::new();
        for d in &candidates {
            match self.lookup(d, name).await {
                Ok(Some(package)) => return Ok(package),
                Ok(None) => debug!(repository = %d.name, package = name, "not in repository"),
                Err(e) => {
                    debug!(repository = %d.name, package = name, "lookup failed: {}", e);
                    failures.push((d.name.clone(), e.to_string()));
                }
            }
        }

        if failures.is_empty() {
            Err(RepositoryError::NotFound {
                package: name.to_string(),
                repositories: candidates.iter().map(|d| d.name.clone()).collect(),
            })
        } else {
            Err(RepositoryError::Unavailable {
                package: name.to_string(),
                failures,
            })
        }
    }

    /// [`query_package`](Self::query_package) for many names at once.
    pub async fn query_packages_batch(
        &self,
        names: &[String],
        ctx: &QueryContext,
    ) -> HashMap<String, Result<Package, RepositoryError>> {
        stream::iter(names)
            .map(|name| async move { (name.clone(), self.query_package(name, ctx).await) })
            .buffer_unordered(self.concurrency())
            .collect()
            .await
    }

    async fn lookup(&self, d: &RepositoryDescriptor, name: &str) -> Result<Option<Package>, RepositoryError> {
        if d.is_api() {
            return match self.api.query_package(d, name).await {
                Ok(package) => Ok(Some(package)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e.into()),
            };
        }
        let list = self.get_packages(&d.name).await?;
        Ok(list.find(name).cloned())
    }

    /// Refresh every bulk repository. One failure never stops the sweep.
    ///
    /// Summaries come back in declaration order.
    pub async fn update_all(&self, options: RefreshOptions) -> Vec<RefreshSummary> {
        let targets: Vec<Arc<RepositoryDescriptor>> = self
            .descriptors
            .iter()
            .filter(|d| !d.is_api() && (options.include_eol || !d.eol))
            .cloned()
            .collect();

        info!(repositories = targets.len(), force = options.force, "refreshing repositories");

        let mut summaries: Vec<RefreshSummary> = stream::iter(targets)
            .map(|d| async move {
                let result = if options.force {
                    self.refresh_repository(&d.name).await
                } else {
                    self.get_packages(&d.name).await
                };
                RefreshSummary {
                    repository: d.name.clone(),
                    outcome: refresh_outcome(result),
                }
            })
            .buffer_unordered(self.concurrency())
            .collect()
            .await;

        summaries.sort_by_key(|s| self.index.position(&s.repository));

        let failed = summaries
            .iter()
            .filter(|s| matches!(s.outcome, RefreshOutcome::Failed { .. }))
            .count();
        info!(repositories = summaries.len(), failed, "refresh complete");
        summaries
    }

    /// Health of every repository in declaration order.
    ///
    /// Bulk repositories are loaded (from cache when valid) to test them.
    /// API repositories report `Api` and EOL repositories `Eol` without any
    /// network access.
    pub async fn get_statistics(&self) -> Vec<RepositoryHealth> {
        stream::iter(self.descriptors.iter().cloned())
            .map(|d| async move { self.health(&d).await })
            .buffered(self.concurrency())
            .collect()
            .await
    }

    async fn health(&self, d: &RepositoryDescriptor) -> RepositoryHealth {
        let (status, package_count, last_updated) = if d.is_api() {
            (HealthStatus::Api, None, None)
        } else if d.eol {
            match self.cache.get(&CacheKey::bulk(&d.name)).await {
                Some(entry) => (HealthStatus::Eol, Some(entry.packages.len()), Some(entry.fetched_at)),
                None => (HealthStatus::Eol, None, None),
            }
        } else {
            match self.get_packages(&d.name).await {
                Ok(list) => {
                    let count = list.packages.len();
                    let status = match list.freshness {
                        Freshness::Stale(reason) => HealthStatus::Stale(reason),
                        _ => HealthStatus::Ok,
                    };
                    (status, Some(count), list.fetched_at)
                }
                Err(e) => (HealthStatus::Error(e.to_string()), None, None),
            }
        };

        RepositoryHealth {
            name: d.name.clone(),
            provider: d.provider.clone(),
            status,
            package_count,
            last_updated,
            priority: d.priority,
        }
    }

    fn descriptor(&self, name: &str) -> Result<Arc<RepositoryDescriptor>, RepositoryError> {
        self.get_repository(name)
            .ok_or_else(|| RepositoryError::UnknownRepository(name.to_string()))
    }

    fn concurrency(&self) -> usize {
        self.config.max_concurrent_fetches.max(1)
    }

    async fn cached(&self, key: &CacheKey) -> Option<PackageList> {
        let entry = self.cache.get(key).await?;
        if !entry.is_valid() {
            return None;
        }
        debug!(repository = %key.repository, "serving cached index");
        Some(package_list(&entry, Freshness::Cached))
    }

    async fn fetch_lock(&self, repository: &str) -> Arc<Mutex<()>> {
        self.fetch_locks
            .lock()
            .await
            .entry(repository.to_string())
            .or_default()
            .clone()
    }

    /// Caller holds the repository's fetch lock.
    async fn fetch_locked(&self, descriptor: &RepositoryDescriptor) -> Result<PackageList, RepositoryError> {
        let key = CacheKey::bulk(&descriptor.name);

        match self.fetcher.fetch_index(descriptor).await {
            Ok(outcome) => {
                let entry = Arc::new(CacheEntry::new(key, outcome.packages, descriptor.cache.ttl()));
                if let Err(e) = self.cache.insert(entry.clone()).await {
                    warn!(repository = %descriptor.name, "failed to persist index: {}", e);
                }
                Ok(package_list(&entry, Freshness::Fresh))
            }
            Err(e) => match self.cache.get(&key).await {
                Some(entry) => {
                    warn!(
                        repository = %descriptor.name,
                        fetched_at = %entry.fetched_at,
                        "refresh failed, serving stale index: {}", e
                    );
                    Ok(package_list(&entry, Freshness::Stale(e.to_string())))
                }
                None => Err(e.into()),
            },
        }
    }
}

fn package_list(entry: &CacheEntry, freshness: Freshness) -> PackageList {
    PackageList {
        repository: entry.key.repository.clone(),
        packages: entry.packages.clone(),
        freshness,
        fetched_at: Some(entry.fetched_at),
    }
}

fn refresh_outcome(result: Result<PackageList, RepositoryError>) -> RefreshOutcome {
    match result {
        Ok(list) => {
            let packages = list.packages.len();
            match list.freshness {
                Freshness::Fresh => RefreshOutcome::Fetched { packages },
                Freshness::Stale(reason) => RefreshOutcome::Stale { packages, reason },
                Freshness::Cached | Freshness::NotApplicable => RefreshOutcome::Cached { packages },
            }
        }
        Err(e) => RefreshOutcome::Failed { reason: e.to_string() },
    }
}
