//! Provider / OS / version resolution.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::RepositoryDescriptor;

/// Matches descriptors without a `distribution` list.
const ANY_OS: &str = "*";

/// What a caller is asking about: a package manager, optionally narrowed to
/// an operating system and release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryContext {
    pub provider: String,
    pub os: Option<String>,
    pub os_version: Option<String>,
}

impl QueryContext {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Default::default()
        }
    }

    pub fn with_os(mut self, os: impl Into<String>, version: Option<String>) -> Self {
        self.os = Some(os.into());
        self.os_version = version;
        self
    }
}

/// Positions into the manager's descriptor list, built once at startup.
#[derive(Debug, Default)]
pub(crate) struct LookupIndex {
    /// `(provider, os or "*", version)`.
    by_version: HashMap<(String, String, String), Vec<usize>>,
    /// Descriptors without a version mapping, per provider.
    agnostic: HashMap<String, Vec<usize>>,
    by_provider: HashMap<String, Vec<usize>>,
    by_name: HashMap<String, usize>,
}

impl LookupIndex {
    pub fn build(descriptors: &[Arc<RepositoryDescriptor>]) -> Self {
        let mut index = Self::default();

        for (pos, d) in descriptors.iter().enumerate() {
            let provider = d.provider.to_lowercase();
            index.by_name.insert(d.name.clone(), pos);
            index.by_provider.entry(provider.clone()).or_default().push(pos);

            if d.is_version_agnostic() {
                index.agnostic.entry(provider).or_default().push(pos);
                continue;
            }

            let systems: Vec<String> = if d.distribution.is_empty() {
                vec![ANY_OS.to_string()]
            } else {
                d.distribution.iter().map(|os| os.to_lowercase()).collect()
            };
            for os in systems {
                for version in d.version_mapping.keys() {
                    index
                        .by_version
                        .entry((provider.clone(), os.clone(), version.clone()))
                        .or_default()
                        .push(pos);
                }
            }
        }
        index
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Candidates for `ctx`, highest priority first. Equal priorities keep
    /// declaration order.
    ///
    /// Version-specific matches come first in the candidate pool but
    /// priority alone decides the final order. When nothing matches, a
    /// descriptor named exactly like the provider (`pypi`, `npm`) is used.
    pub fn candidates(&self, descriptors: &[Arc<RepositoryDescriptor>], ctx: &QueryContext) -> Vec<usize> {
        let provider = ctx.provider.to_lowercase();
        let os = ctx.os.as_deref().map(str::to_lowercase);

        let mut hits: Vec<usize> = match (&os, &ctx.os_version) {
            (Some(os), Some(version)) => {
                let mut hits = self.versioned(&provider, os, version);
                hits.extend(self.versioned(&provider, ANY_OS, version));
                hits
            }
            (None, Some(version)) => self
                .providers(&provider)
                .iter()
                .copied()
                .filter(|&pos| descriptors[pos].codename_for(version).is_some())
                .collect(),
            (Some(os), None) => self
                .providers(&provider)
                .iter()
                .copied()
                .filter(|&pos| descriptors[pos].serves_os(os))
                .collect(),
            (None, None) => self.providers(&provider).to_vec(),
        };

        if ctx.os_version.is_some() {
            hits.extend(
                self.agnostic
                    .get(&provider)
                    .into_iter()
                    .flatten()
                    .copied()
                    .filter(|&pos| os.as_deref().is_none_or(|os| descriptors[pos].serves_os(os))),
            );
        }

        hits.sort_unstable();
        hits.dedup();
        hits.sort_by_key(|&pos| (Reverse(descriptors[pos].priority), pos));

        if hits.is_empty()
            && let Some(pos) = self.position(&ctx.provider)
        {
            hits.push(pos);
        }
        hits
    }

    /// Best version-specific repository for `(provider, os, version)`.
    pub fn versioned_best(
        &self,
        descriptors: &[Arc<RepositoryDescriptor>],
        provider: &str,
        os: &str,
        version: &str,
    ) -> Option<usize> {
        let provider = provider.to_lowercase();
        let os = os.to_lowercase();
        let mut hits = self.versioned(&provider, &os, version);
        hits.extend(self.versioned(&provider, ANY_OS, version));
        hits.into_iter()
            .min_by_key(|&pos| (Reverse(descriptors[pos].priority), pos))
    }

    fn versioned(&self, provider: &str, os: &str, version: &str) -> Vec<usize> {
        self.by_version
            .get(&(provider.to_string(), os.to_string(), version.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn providers(&self, provider: &str) -> &[usize] {
        self.by_provider.get(provider).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorSet;

    fn descriptors(yaml: &str) -> Vec<Arc<RepositoryDescriptor>> {
        let mut set = DescriptorSet::default();
        set.add_source("test.yaml", yaml);
        assert!(set.errors.is_empty(), "{:?}", set.errors);
        set.descriptors
    }

    const REPOS: &str = r#"
repositories:
  - name: apt-ubuntu-jammy
    type: apt
    platform: linux
    distribution: [ubuntu]
    version_mapping: { "22.04": jammy }
    endpoints: { packages: "http://archive.ubuntu.com/jammy/Packages.gz" }
    parsing: {}
  - name: apt-vendor
    type: apt
    platform: linux
    distribution: [ubuntu]
    priority: 80
    endpoints: { packages: "http://vendor.example.com/Packages.gz" }
    parsing: {}
  - name: apt-hashicorp-jammy
    type: apt
    platform: linux
    distribution: [ubuntu]
    priority: 90
    version_mapping: { "22.04": jammy }
    endpoints: { packages: "http://apt.releases.hashicorp.com/Packages" }
    parsing: {}
  - name: apt-debian-bookworm
    type: apt
    platform: linux
    distribution: [debian]
    version_mapping: { "12": bookworm }
    endpoints: { packages: "http://deb.debian.org/Packages.xz" }
    parsing: {}
  - name: pypi
    type: pypi
    platform: universal
    query_type: api
    endpoints: { info: "https://pypi.org/pypi/{package}/json" }
    parsing: { format: json }
"#;

    fn names(descriptors: &[Arc<RepositoryDescriptor>], positions: &[usize]) -> Vec<String> {
        positions.iter().map(|&p| descriptors[p].name.clone()).collect()
    }

    #[test]
    fn test_priority_order_with_agnostic() {
        let descs = descriptors(REPOS);
        let index = LookupIndex::build(&descs);

        let ctx = QueryContext::new("apt").with_os("Ubuntu", Some("22.04".into()));
        assert_eq!(
            names(&descs, &index.candidates(&descs, &ctx)),
            ["apt-hashicorp-jammy", "apt-vendor", "apt-ubuntu-jammy"]
        );
    }

    #[test]
    fn test_os_filters_candidates() {
        let descs = descriptors(REPOS);
        let index = LookupIndex::build(&descs);

        let ctx = QueryContext::new("apt").with_os("debian", Some("12".into()));
        assert_eq!(names(&descs, &index.candidates(&descs, &ctx)), ["apt-debian-bookworm"]);

        let ctx = QueryContext::new("apt").with_os("debian", None);
        assert_eq!(names(&descs, &index.candidates(&descs, &ctx)), ["apt-debian-bookworm"]);
    }

    #[test]
    fn test_provider_named_fallback() {
        let descs = descriptors(REPOS);
        let index = LookupIndex::build(&descs);

        let ctx = QueryContext::new("pypi").with_os("ubuntu", Some("22.04".into()));
        assert_eq!(names(&descs, &index.candidates(&descs, &ctx)), ["pypi"]);
        assert!(index.candidates(&descs, &QueryContext::new("brew")).is_empty());
    }

    #[test]
    fn test_versioned_best() {
        let descs = descriptors(REPOS);
        let index = LookupIndex::build(&descs);

        let best = index.versioned_best(&descs, "apt", "ubuntu", "22.04").unwrap();
        assert_eq!(descs[best].name, "apt-hashicorp-jammy");
        assert!(index.versioned_best(&descs, "apt", "ubuntu", "99.04").is_none());
    }
}
