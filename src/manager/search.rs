use serde::Serialize;

use crate::types::Package;

/// How well a package matched a search query. Lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRank {
    Exact,
    Prefix,
    Substring,
    Description,
}

impl MatchRank {
    /// Case-insensitive. `query` must already be lowercase.
    pub fn of(package: &Package, query: &str) -> Option<Self> {
        let name = package.name.to_lowercase();
        if name == query {
            Some(MatchRank::Exact)
        } else if name.starts_with(query) {
            Some(MatchRank::Prefix)
        } else if name.contains(query) {
            Some(MatchRank::Substring)
        } else if package
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(query))
        {
            Some(MatchRank::Description)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub package: Package,
    pub rank: MatchRank,
    pub priority: i32,
}

/// Ranked matches across repositories plus the repositories that could not
/// be searched.
#[derive(Debug, Default, Serialize)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    /// `(repository, reason)`.
    pub errors: Vec<(String, String)>,
}

impl SearchResults {
    /// Best match first; then repository priority, then name.
    pub(crate) fn sort(&mut self) {
        self.hits.sort_by(|a, b| {
            a.rank
                .cmp(&b.rank)
                .then(b.priority.cmp(&a.priority))
                .then_with(|| a.package.name.cmp(&b.package.name))
                .then_with(|| a.package.repository.cmp(&b.package.repository))
        });
        self.errors.sort();
    }
}

/// Matches of `query` among `packages`, tagged with their rank.
pub(crate) fn rank_packages<'a>(
    packages: impl IntoIterator<Item = &'a Package>,
    query: &str,
    priority: i32,
) -> Vec<SearchHit> {
    packages
        .into_iter()
        .filter_map(|package| {
            MatchRank::of(package, query).map(|rank| SearchHit {
                package: package.clone(),
                rank,
                priority,
            })
        })
        .collect()
}
