use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Package;

/// Per-repository status as reported by statistics calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum HealthStatus {
    /// Index fetched (or cached) successfully.
    Ok,
    /// Refresh failed, last known index is being served.
    Stale(String),
    /// Refresh failed and nothing is cached.
    Error(String),
    /// Queried per package; no bulk index to test.
    Api,
    /// End-of-life; excluded from refresh sweeps.
    Eol,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Ok => write!(f, "ok"),
            HealthStatus::Stale(reason) => write!(f, "stale ({})", reason),
            HealthStatus::Error(reason) => write!(f, "error ({})", reason),
            HealthStatus::Api => write!(f, "api"),
            HealthStatus::Eol => write!(f, "eol"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryHealth {
    pub name: String,
    pub provider: String,
    pub status: HealthStatus,
    /// Absent for API repositories and repositories never fetched.
    pub package_count: Option<usize>,
    pub last_updated: Option<DateTime<Utc>>,
    pub priority: i32,
}

/// Where a package list came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "freshness", content = "reason", rename_all = "snake_case")]
pub enum Freshness {
    /// Downloaded by this call.
    Fresh,
    /// Served from a cache entry within its TTL.
    Cached,
    /// Refresh failed; this is the last known index.
    Stale(String),
    /// The repository is API-backed and has no bulk list. Query packages
    /// individually instead.
    NotApplicable,
}

/// Result of `get_packages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageList {
    pub repository: String,
    pub packages: Vec<Package>,
    pub freshness: Freshness,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl PackageList {
    pub fn not_applicable(repository: &str) -> Self {
        Self {
            repository: repository.to_string(),
            packages: Vec::new(),
            freshness: Freshness::NotApplicable,
            fetched_at: None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.freshness, Freshness::Stale(_))
    }

    pub fn is_api(&self) -> bool {
        self.freshness == Freshness::NotApplicable
    }

    /// Exact name lookup, falling back to a case-insensitive match.
    pub fn find(&self, name: &str) -> Option<&Package> {
        self.packages
            .iter()
            .find(|p| p.name == name)
            .or_else(|| self.packages.iter().find(|p| p.name.eq_ignore_ascii_case(name)))
    }
}
