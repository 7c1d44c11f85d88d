//! Descriptor loading and validation.
//!
//! Descriptor files are YAML documents with a `repositories` list:
//!
//! ```yaml
//! version: 1
//! repositories:
//!   - name: apt-ubuntu-jammy
//!     type: apt
//!     platform: linux
//!     endpoints:
//!       packages: "http://archive.ubuntu.com/ubuntu/dists/jammy/main/binary-{arch}/Packages.gz"
//!     parsing: { format: debian_packages }
//!     version_mapping: { "22.04": jammy }
//! ```
//!
//! Every entry is checked on its own. An invalid entry becomes a
//! [`ConfigError`] and is left out; the rest of the file still loads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{ENDPOINT_INFO, ENDPOINT_PACKAGES, ENDPOINT_SEARCH, QueryType, RepositoryDescriptor};

const BUILTIN: &[(&str, &str)] = &[
    ("builtin:apt.yaml", include_str!("builtin/apt.yaml")),
    ("builtin:rpm.yaml", include_str!("builtin/rpm.yaml")),
    ("builtin:apk.yaml", include_str!("builtin/apk.yaml")),
    ("builtin:languages.yaml", include_str!("builtin/languages.yaml")),
];

const REQUIRED_KEYS: &[&str] = &["name", "type", "platform", "endpoints", "parsing"];

/// A rejected descriptor file or entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{file}: cannot read descriptor file: {reason}")]
    Read { file: String, reason: String },

    #[error("{file}: invalid YAML: {reason}")]
    Yaml { file: String, reason: String },

    #[error("{file}: {repository}: missing required field `{field}`")]
    MissingField {
        file: String,
        repository: String,
        field: String,
    },

    #[error("{file}: {repository}: invalid `{field}`: {reason}")]
    InvalidField {
        file: String,
        repository: String,
        field: String,
        reason: String,
    },

    #[error("{file}: {repository}: {query_type} repositories need {required}")]
    MissingEndpoint {
        file: String,
        repository: String,
        query_type: QueryType,
        required: String,
    },

    #[error("{file}: {repository}: endpoint `{endpoint}` is not a valid URL ({url}): {reason}")]
    InvalidUrl {
        file: String,
        repository: String,
        endpoint: String,
        url: String,
        reason: String,
    },

    #[error("{file}: {repository}: duplicate repository name")]
    Duplicate { file: String, repository: String },

    #[error("invalid descriptor path pattern {pattern}: {reason}")]
    Pattern { pattern: String, reason: String },
}

/// Validated descriptors in declaration order, plus everything rejected.
#[derive(Debug, Default)]
pub struct DescriptorSet {
    pub descriptors: Vec<Arc<RepositoryDescriptor>>,
    pub errors: Vec<ConfigError>,
    /// Entries left out because `enabled: false`.
    pub disabled: usize,
}

impl DescriptorSet {
    /// Validate one file's contents and append its entries.
    pub fn add_source(&mut self, file: &str, contents: &str) {
        let root: Value = match serde_yaml::from_str(contents) {
            Ok(root) => root,
            Err(e) => {
                self.reject(ConfigError::Yaml {
                    file: file.to_string(),
                    reason: e.to_string(),
                });
                return;
            }
        };

        let entries = match root {
            Value::Mapping(mut map) => match map.remove("repositories") {
                Some(Value::Sequence(entries)) => entries,
                Some(Value::Null) | None => Vec::new(),
                Some(_) => {
                    self.reject(ConfigError::Yaml {
                        file: file.to_string(),
                        reason: "`repositories` must be a list".to_string(),
                    });
                    return;
                }
            },
            Value::Sequence(entries) => entries,
            Value::Null => Vec::new(),
            _ => {
                self.reject(ConfigError::Yaml {
                    file: file.to_string(),
                    reason: "expected a mapping with a `repositories` list".to_string(),
                });
                return;
            }
        };

        for (index, entry) in entries.into_iter().enumerate() {
            match validate_entry(file, index, entry) {
                Ok(Some(descriptor)) => {
                    if self.descriptors.iter().any(|d| d.name == descriptor.name) {
                        self.reject(ConfigError::Duplicate {
                            file: file.to_string(),
                            repository: descriptor.name,
                        });
                    } else {
                        self.descriptors.push(Arc::new(descriptor));
                    }
                }
                Ok(None) => self.disabled += 1,
                Err(e) => self.reject(e),
            }
        }
    }

    fn reject(&mut self, error: ConfigError) {
        warn!("excluding repository: {}", error);
        self.errors.push(error);
    }
}

/// Load the embedded descriptors (when asked) and every `*.yaml` / `*.yml`
/// file in `dirs`. Files are read in directory order, then name order.
pub async fn load(include_builtin: bool, dirs: &[PathBuf]) -> DescriptorSet {
    let mut set = DescriptorSet::default();

    if include_builtin {
        for (file, contents) in BUILTIN {
            set.add_source(file, contents);
        }
    }

    for dir in dirs {
        for path in discover(dir, &mut set.errors) {
            let file = path.display().to_string();
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => set.add_source(&file, &contents),
                Err(e) => set.reject(ConfigError::Read {
                    file,
                    reason: e.to_string(),
                }),
            }
        }
    }

    info!(
        repositories = set.descriptors.len(),
        rejected = set.errors.len(),
        disabled = set.disabled,
        "loaded repository descriptors"
    );
    set
}

/// Load only the embedded descriptors.
pub fn builtin() -> DescriptorSet {
    let mut set = DescriptorSet::default();
    for (file, contents) in BUILTIN {
        set.add_source(file, contents);
    }
    set
}

fn discover(dir: &Path, errors: &mut Vec<ConfigError>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for ext in ["yaml", "yml"] {
        let pattern = dir.join(format!("*.{}", ext)).display().to_string();
        match glob::glob(&pattern) {
            Ok(matches) => paths.extend(matches.flatten().filter(|p| p.is_file())),
            Err(e) => errors.push(ConfigError::Pattern {
                pattern,
                reason: e.to_string(),
            }),
        }
    }
    paths.sort();
    debug!(dir = %dir.display(), files = paths.len(), "discovered descriptor files");
    paths
}

/// `Ok(None)` for a disabled entry.
fn validate_entry(file: &str, index: usize, entry: Value) -> Result<Option<RepositoryDescriptor>, ConfigError> {
    let Value::Mapping(mut map) = entry else {
        return Err(ConfigError::InvalidField {
            file: file.to_string(),
            repository: format!("#{}", index),
            field: "entry".to_string(),
            reason: "expected a mapping".to_string(),
        });
    };

    let repository = match map.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
        _ => format!("#{}", index),
    };
    let invalid = |field: &str, reason: String| ConfigError::InvalidField {
        file: file.to_string(),
        repository: repository.clone(),
        field: field.to_string(),
        reason,
    };

    for key in REQUIRED_KEYS {
        match map.get(*key) {
            None | Some(Value::Null) => {
                return Err(ConfigError::MissingField {
                    file: file.to_string(),
                    repository: repository.clone(),
                    field: key.to_string(),
                });
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                return Err(ConfigError::MissingField {
                    file: file.to_string(),
                    repository: repository.clone(),
                    field: key.to_string(),
                });
            }
            _ => {}
        }
    }

    if let Some(eol) = map.get("eol")
        && !matches!(eol, Value::Bool(_) | Value::Null)
    {
        return Err(invalid("eol", format!("expected true or false, found {}", describe(eol))));
    }

    if let Some(mapping) = map.get_mut("version_mapping") {
        let normalized = match mapping {
            Value::Null => Mapping::new(),
            Value::Mapping(m) => normalize_version_mapping(m)
                .map_err(|reason| invalid("version_mapping", reason))?,
            other => {
                return Err(invalid(
                    "version_mapping",
                    format!("expected a mapping, found {}", describe(other)),
                ));
            }
        };
        *mapping = Value::Mapping(normalized);
    }

    let descriptor: RepositoryDescriptor =
        serde_yaml::from_value(Value::Mapping(map)).map_err(|e| invalid("descriptor", e.to_string()))?;

    if !descriptor.enabled {
        debug!(repository = %descriptor.name, "skipping disabled repository");
        return Ok(None);
    }

    check_duration(descriptor.limits.retry_delay, 1.0).map_err(|r| invalid("limits.retry_delay", r))?;
    check_duration(descriptor.cache.ttl_hours, 3600.0).map_err(|r| invalid("cache.ttl_hours", r))?;
    check_endpoints(file, &descriptor)?;
    Ok(Some(descriptor))
}

/// `value * scale` must be a representable, non-negative number of seconds.
fn check_duration(value: f64, scale: f64) -> Result<(), String> {
    std::time::Duration::try_from_secs_f64(value * scale)
        .map(drop)
        .map_err(|_| format!("expected a finite, non-negative number, found {value}"))
}

/// Version keys and codenames as strings (`12: bookworm` -> `"12"`).
fn normalize_version_mapping(mapping: &Mapping) -> Result<Mapping, String> {
    let mut out = Mapping::new();
    for (key, value) in mapping {
        let key = scalar_string(key).ok_or_else(|| format!("version key {} is not a scalar", describe(key)))?;
        let value =
            scalar_string(value).ok_or_else(|| format!("codename for {} is not a scalar", key))?;
        out.insert(Value::String(key), Value::String(value));
    }
    Ok(out)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Query-mode endpoint requirements and URL syntax.
fn check_endpoints(file: &str, descriptor: &RepositoryDescriptor) -> Result<(), ConfigError> {
    let required = match descriptor.query_type {
        QueryType::BulkDownload if descriptor.endpoint(ENDPOINT_PACKAGES).is_none() => {
            Some(format!("a `{}` endpoint", ENDPOINT_PACKAGES))
        }
        QueryType::Api
            if descriptor.endpoint(ENDPOINT_INFO).is_none() && descriptor.endpoint(ENDPOINT_SEARCH).is_none() =>
        {
            Some(format!("an `{}` or `{}` endpoint", ENDPOINT_INFO, ENDPOINT_SEARCH))
        }
        _ => None,
    };
    if let Some(required) = required {
        return Err(ConfigError::MissingEndpoint {
            file: file.to_string(),
            repository: descriptor.name.clone(),
            query_type: descriptor.query_type,
            required,
        });
    }

    for (endpoint, template) in &descriptor.endpoints {
        let url = descriptor.expand(template, &[("package", "pkg"), ("name", "pkg"), ("query", "q")]);
        let reason = match url::Url::parse(&url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => continue,
            Ok(parsed) => format!("unsupported scheme `{}`", parsed.scheme()),
            Err(e) => e.to_string(),
        };
        return Err(ConfigError::InvalidUrl {
            file: file.to_string(),
            repository: descriptor.name.clone(),
            endpoint: endpoint.clone(),
            url: template.clone(),
            reason,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn load_str(contents: &str) -> DescriptorSet {
        let mut set = DescriptorSet::default();
        set.add_source("test.yaml", contents);
        set
    }

    #[test]
    fn test_builtin_descriptors_are_valid() {
        let set = builtin();
        assert!(set.errors.is_empty(), "{:?}", set.errors);
        assert!(set.descriptors.len() >= 10);

        let jammy = set.descriptors.iter().find(|d| d.name == "apt-ubuntu-jammy").unwrap();
        assert_eq!(jammy.codename_for("22.04"), Some("jammy"));

        let bookworm = set.descriptors.iter().find(|d| d.name == "apt-debian-bookworm").unwrap();
        assert_eq!(bookworm.codename_for("12"), Some("bookworm"));

        let focal = set.descriptors.iter().find(|d| d.name == "apt-ubuntu-focal").unwrap();
        assert!(focal.eol);

        assert!(set.descriptors.iter().filter(|d| d.is_api()).count() >= 4);
    }

    #[test]
    fn test_invalid_entries_are_excluded_individually() {
        let set = load_str(
            r#"
version: 1
repositories:
  - name: good
    type: apt
    platform: linux
    endpoints: { packages: "https://example.com/Packages.gz" }
    parsing: {}
  - name: no-platform
    type: apt
    endpoints: { packages: "https://example.com/Packages.gz" }
    parsing: {}
  - name: bad-eol
    type: apt
    platform: linux
    endpoints: { packages: "https://example.com/Packages.gz" }
    parsing: {}
    eol: "yes"
  - name: bad-mapping
    type: apt
    platform: linux
    endpoints: { packages: "https://example.com/Packages.gz" }
    parsing: {}
    version_mapping: [jammy]
  - name: bulk-without-packages
    type: apt
    platform: linux
    endpoints: { search: "https://example.com/search" }
    parsing: {}
  - name: api-without-query
    type: pypi
    platform: universal
    query_type: api
    endpoints: { packages: "https://example.com/simple" }
    parsing: {}
  - name: bad-url
    type: apt
    platform: linux
    endpoints: { packages: "not a url" }
    parsing: {}
  - name: ftp-url
    type: apt
    platform: linux
    endpoints: { packages: "ftp://example.com/Packages" }
    parsing: {}
  - name: good
    type: apt
    platform: linux
    endpoints: { packages: "https://example.com/other/Packages.gz" }
    parsing: {}
  - name: off
    type: apt
    platform: linux
    endpoints: { packages: "https://example.com/Packages.gz" }
    parsing: {}
    enabled: false
"#,
        );

        let names: Vec<_> = set.descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["good"]);
        assert_eq!(set.disabled, 1);
        assert_eq!(set.errors.len(), 8, "{:#?}", set.errors);

        assert!(matches!(&set.errors[0], ConfigError::MissingField { field, .. } if field == "platform"));
        assert!(matches!(&set.errors[1], ConfigError::InvalidField { field, .. } if field == "eol"));
        assert!(matches!(&set.errors[2], ConfigError::InvalidField { field, .. } if field == "version_mapping"));
        assert!(matches!(
            &set.errors[3],
            ConfigError::MissingEndpoint { query_type: QueryType::BulkDownload, .. }
        ));
        assert!(matches!(&set.errors[4], ConfigError::MissingEndpoint { query_type: QueryType::Api, .. }));
        assert!(matches!(&set.errors[5], ConfigError::InvalidUrl { .. }));
        assert!(matches!(&set.errors[6], ConfigError::InvalidUrl { reason, .. } if reason.contains("ftp")));
        assert!(matches!(&set.errors[7], ConfigError::Duplicate { repository, .. } if repository == "good"));
    }

    #[test]
    fn test_numeric_version_keys_normalized() {
        let set = load_str(
            r#"
repositories:
  - name: apt-debian-bookworm
    type: apt
    platform: linux
    endpoints: { packages: "http://deb.debian.org/debian/dists/bookworm/main/binary-{arch}/Packages.xz" }
    parsing: {}
    version_mapping:
      12: bookworm
      "22.04": jammy
"#,
        );
        assert!(set.errors.is_empty(), "{:?}", set.errors);
        let d = &set.descriptors[0];
        assert_eq!(d.codename_for("12"), Some("bookworm"));
        assert_eq!(d.codename_for("22.04"), Some("jammy"));
    }

    #[test]
    fn test_out_of_range_durations_rejected() {
        let set = load_str(
            r#"
repositories:
  - name: huge-delay
    type: pypi
    platform: universal
    query_type: api
    endpoints: { info: "https://pypi.org/pypi/{package}/json" }
    parsing: { format: json }
    limits: { retry_delay: 1.0e300 }
  - name: endless-ttl
    type: pypi
    platform: universal
    query_type: api
    endpoints: { info: "https://pypi.org/pypi/{package}/json" }
    parsing: { format: json }
    cache: { ttl_hours: .inf }
  - name: nan-delay
    type: pypi
    platform: universal
    query_type: api
    endpoints: { info: "https://pypi.org/pypi/{package}/json" }
    parsing: { format: json }
    limits: { retry_delay: .nan }
  - name: negative-ttl
    type: pypi
    platform: universal
    query_type: api
    endpoints: { info: "https://pypi.org/pypi/{package}/json" }
    parsing: { format: json }
    cache: { ttl_hours: -1 }
  - name: pypi
    type: pypi
    platform: universal
    query_type: api
    endpoints: { info: "https://pypi.org/pypi/{package}/json" }
    parsing: { format: json }
    limits: { retry_delay: 0.5 }
    cache: { ttl_hours: 168 }
"#,
        );
        let names: Vec<_> = set.descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["pypi"]);

        let fields: Vec<_> = set
            .errors
            .iter()
            .map(|e| match e {
                ConfigError::InvalidField { repository, field, .. } => (repository.as_str(), field.as_str()),
                other => panic!("unexpected error: {other}"),
            })
            .collect();
        assert_eq!(
            fields,
            [
                ("huge-delay", "limits.retry_delay"),
                ("endless-ttl", "cache.ttl_hours"),
                ("nan-delay", "limits.retry_delay"),
                ("negative-ttl", "cache.ttl_hours"),
            ]
        );
    }

    #[test]
    fn test_unparsable_file() {
        let set = load_str("repositories: [unclosed");
        assert!(set.descriptors.is_empty());
        assert!(matches!(set.errors[0], ConfigError::Yaml { .. }));
    }

    #[test]
    fn test_bare_list_accepted() {
        let set = load_str(
            r#"
- name: npm
  type: npm
  platform: universal
  query_type: api
  endpoints: { info: "https://registry.npmjs.org/{package}" }
  parsing: { format: json }
"#,
        );
        assert_eq!(set.descriptors.len(), 1);
    }

    #[tokio::test]
    async fn test_load_from_directory() {
        let dir = tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("b-vendor.yml"),
            r#"
repositories:
  - name: apt-vendor
    type: apt
    platform: linux
    endpoints: { packages: "https://vendor.example.com/Packages" }
    parsing: {}
    priority: 100
"#,
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("a-broken.yaml"), "repositories: {").await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "ignored").await.unwrap();

        let set = load(false, &[dir.path().to_path_buf()]).await;
        assert_eq!(set.descriptors.len(), 1);
        assert_eq!(set.descriptors[0].name, "apt-vendor");
        assert_eq!(set.errors.len(), 1);

        let with_builtin = load(true, &[dir.path().to_path_buf()]).await;
        // Built-ins come first in declaration order.
        assert_eq!(with_builtin.descriptors.last().unwrap().name, "apt-vendor");
        assert_eq!(with_builtin.descriptors[0].name, builtin().descriptors[0].name);
    }
}
