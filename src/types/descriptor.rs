use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::decompress::Scheme;

/// How a repository is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Download the full index once and answer queries from it.
    #[default]
    BulkDownload,
    /// Issue one request per package (or search) on demand.
    Api,
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryType::BulkDownload => write!(f, "bulk_download"),
            QueryType::Api => write!(f, "api"),
        }
    }
}

/// Index/response formats understood by the parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserFormat {
    /// Debian/Ubuntu `Packages` stanzas.
    DebianPackages,
    /// RPM `repomd.xml` + `primary.xml` (DNF, YUM, Zypper).
    RpmMetadata,
    /// Alpine `APKINDEX.tar.gz`.
    #[serde(alias = "apk_index")]
    Apkindex,
    /// Generic JSON API response.
    Json,
    /// Generic XML API response.
    Xml,
}

impl ParserFormat {
    /// Format implied by a provider type when `parsing.format` is omitted.
    pub fn default_for_provider(provider: &str) -> Self {
        match provider {
            "apt" => ParserFormat::DebianPackages,
            "dnf" | "yum" | "zypper" => ParserFormat::RpmMetadata,
            "apk" => ParserFormat::Apkindex,
            _ => ParserFormat::Json,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParserFormat::DebianPackages => "debian_packages",
            ParserFormat::RpmMetadata => "rpm_metadata",
            ParserFormat::Apkindex => "apkindex",
            ParserFormat::Json => "json",
            ParserFormat::Xml => "xml",
        }
    }
}

impl std::fmt::Display for ParserFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How to turn a fetched artifact into package records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsingRules {
    #[serde(default)]
    pub format: Option<ParserFormat>,
    /// Declared compression; `None` (or `auto`) means detect from the URL or
    /// magic bytes.
    #[serde(default, deserialize_with = "deserialize_compression")]
    pub compression: Option<Scheme>,
    /// Canonical attribute (`name`, `version`, ...) -> source field selector.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Selector for the list of records inside an API response.
    #[serde(default)]
    pub items_path: Option<String>,
}

fn deserialize_compression<'de, D>(deserializer: D) -> Result<Option<Scheme>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") | Some("auto") => Ok(None),
        Some(name) => name.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Request budget and retry behaviour for one repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimits {
    /// Request starts allowed per rolling minute (0 = unlimited).
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base retry delay in seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
    #[serde(default = "default_true")]
    pub exponential_backoff: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_concurrent_requests() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            concurrent_requests: default_concurrent_requests(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            exponential_backoff: true,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl RateLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }

    pub fn retry_delay(&self) -> Duration {
        seconds(self.retry_delay)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: f64,
}

fn default_ttl_hours() -> f64 {
    24.0
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        seconds(self.ttl_hours * 3600.0)
    }
}

/// Negative and NaN clamp to zero, values too large saturate.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

/// Credentials are never stored in descriptors, only the environment
/// variable that holds them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    Basic {
        username: String,
        password_env: String,
    },
    Bearer {
        token_env: String,
    },
    ApiKey {
        header: String,
        key_env: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub maintainer: Option<String>,
    #[serde(default)]
    pub official: bool,
    #[serde(default)]
    pub homepage: Option<String>,
}

/// Declarative definition of one repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    pub name: String,
    /// Provider type (`apt`, `dnf`, `pypi`, ...).
    #[serde(rename = "type")]
    pub provider: String,
    pub platform: String,
    /// OS names served by this repository; empty matches any.
    #[serde(default)]
    pub distribution: Vec<String>,
    #[serde(default)]
    pub architecture: Vec<String>,
    #[serde(default)]
    pub query_type: QueryType,
    pub endpoints: BTreeMap<String, String>,
    pub parsing: ParsingRules,
    /// OS version -> codename, e.g. `"22.04" -> "jammy"`.
    #[serde(default)]
    pub version_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub eol: bool,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub limits: RateLimits,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub metadata: RepositoryMetadata,
}

fn default_priority() -> i32 {
    50
}

pub const ENDPOINT_PACKAGES: &str = "packages";
pub const ENDPOINT_SEARCH: &str = "search";
pub const ENDPOINT_INFO: &str = "info";

impl RepositoryDescriptor {
    pub fn endpoint(&self, name: &str) -> Option<&str> {
        self.endpoints.get(name).map(String::as_str)
    }

    pub fn is_api(&self) -> bool {
        self.query_type == QueryType::Api
    }

    pub fn parser_format(&self) -> ParserFormat {
        self.parsing
            .format
            .unwrap_or_else(|| ParserFormat::default_for_provider(&self.provider))
    }

    /// Whether this repository serves the given OS (case-insensitive).
    pub fn serves_os(&self, os: &str) -> bool {
        self.distribution.is_empty() || self.distribution.iter().any(|d| d.eq_ignore_ascii_case(os))
    }

    /// Version-agnostic repositories (vendor feeds, language registries)
    /// declare no version mapping.
    pub fn is_version_agnostic(&self) -> bool {
        self.version_mapping.is_empty()
    }

    pub fn codename_for(&self, version: &str) -> Option<&str> {
        self.version_mapping.get(version).map(String::as_str)
    }

    pub fn default_architecture(&self) -> &str {
        self.architecture.first().map(String::as_str).unwrap_or("amd64")
    }

    /// Expand `{placeholder}` tokens in an endpoint template.
    ///
    /// Descriptor-level placeholders are always available; `extra` adds
    /// request-level ones such as `{package}` or `{query}`.
    pub fn expand(&self, template: &str, extra: &[(&str, &str)]) -> String {
        let distribution = self.distribution.first().map(String::as_str).unwrap_or("");
        let mut url = template
            .replace("{arch}", self.default_architecture())
            .replace("{architecture}", self.default_architecture())
            .replace("{distribution}", distribution)
            .replace("{os}", distribution)
            .replace("{platform}", &self.platform);
        for (key, value) in extra {
            url = url.replace(&format!("{{{}}}", key), value);
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(yaml: &str) -> RepositoryDescriptor {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_defaults() {
        let d = descriptor(
            r#"
name: apt-ubuntu-jammy
type: apt
platform: linux
endpoints:
  packages: "http://archive.ubuntu.com/ubuntu/dists/jammy/main/binary-{arch}/Packages.gz"
parsing: {}
"#,
        );
        assert_eq!(d.query_type, QueryType::BulkDownload);
        assert_eq!(d.priority, 50);
        assert!(d.enabled);
        assert!(!d.eol);
        assert_eq!(d.parser_format(), ParserFormat::DebianPackages);
        assert_eq!(d.limits.max_retries, 3);
        assert_eq!(d.cache.ttl(), Duration::from_secs(24 * 3600));
        assert_eq!(d.auth, AuthConfig::None);
    }

    #[test]
    fn test_compression_parsing() {
        let d = descriptor(
            r#"
name: r
type: apt
platform: linux
endpoints: { packages: "http://x/Packages.zst" }
parsing: { compression: zstd }
"#,
        );
        assert_eq!(d.parsing.compression, Some(Scheme::Zstd));

        let auto = descriptor(
            r#"
name: r
type: apt
platform: linux
endpoints: { packages: "http://x/Packages" }
parsing: { compression: auto }
"#,
        );
        assert_eq!(auto.parsing.compression, None);

        let bad: Result<RepositoryDescriptor, _> = serde_yaml::from_str(
            r#"
name: r
type: apt
platform: linux
endpoints: { packages: "http://x/Packages" }
parsing: { compression: lz4 }
"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_expand_placeholders() {
        let d = descriptor(
            r#"
name: pypi
type: pypi
platform: universal
architecture: [x86_64]
distribution: [ubuntu]
query_type: api
endpoints: { info: "https://pypi.org/pypi/{package}/json" }
parsing: { format: json }
"#,
        );
        assert_eq!(
            d.expand("https://pypi.org/pypi/{package}/json", &[("package", "requests")]),
            "https://pypi.org/pypi/requests/json"
        );
        assert_eq!(d.expand("http://x/binary-{arch}/{os}", &[]), "http://x/binary-x86_64/ubuntu");
    }

    #[test]
    fn test_auth_config() {
        let auth: AuthConfig = serde_yaml::from_str("type: bearer\ntoken_env: GITHUB_TOKEN").unwrap();
        assert_eq!(
            auth,
            AuthConfig::Bearer {
                token_env: "GITHUB_TOKEN".to_string()
            }
        );

        let key: AuthConfig =
            serde_yaml::from_str("type: api_key\nheader: X-Api-Key\nkey_env: REPO_KEY").unwrap();
        assert!(matches!(key, AuthConfig::ApiKey { .. }));
    }

    #[test]
    fn test_out_of_range_durations_saturate() {
        let limits = RateLimits {
            retry_delay: 1.0e300,
            ..Default::default()
        };
        assert_eq!(limits.retry_delay(), Duration::MAX);

        let nan = RateLimits {
            retry_delay: f64::NAN,
            ..Default::default()
        };
        assert_eq!(nan.retry_delay(), Duration::ZERO);

        let forever = CacheSettings { ttl_hours: f64::INFINITY };
        assert_eq!(forever.ttl(), Duration::MAX);
        assert_eq!(CacheSettings { ttl_hours: -1.0 }.ttl(), Duration::ZERO);
        assert_eq!(CacheSettings::default().ttl(), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_serves_os() {
        let mut d = descriptor(
            r#"
name: r
type: apt
platform: linux
distribution: [ubuntu, debian]
endpoints: { packages: "http://x" }
parsing: {}
"#,
        );
        assert!(d.serves_os("Ubuntu"));
        assert!(!d.serves_os("fedora"));
        d.distribution.clear();
        assert!(d.serves_os("fedora"));
    }
}
