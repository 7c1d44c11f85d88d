use serde::{Deserialize, Serialize};

/// A package record normalized from any repository format.
///
/// `name` and `version` are always non-empty; parsers drop entries that
/// cannot satisfy this before a `Package` is ever built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Name of the repository this record came from.
    pub repository: String,
}

/// Canonical package attributes that parsing rules can map source fields to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    Version,
    Description,
    Homepage,
    License,
    Maintainer,
    Size,
    Category,
    Architecture,
    Checksum,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::Name,
        Field::Version,
        Field::Description,
        Field::Homepage,
        Field::License,
        Field::Maintainer,
        Field::Size,
        Field::Category,
        Field::Architecture,
        Field::Checksum,
    ];

    /// Key used for this attribute in descriptor `parsing.fields` maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Version => "version",
            Field::Description => "description",
            Field::Homepage => "homepage",
            Field::License => "license",
            Field::Maintainer => "maintainer",
            Field::Size => "size",
            Field::Category => "category",
            Field::Architecture => "architecture",
            Field::Checksum => "checksum",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown package field: {}", s))
    }
}

/// Partially parsed package, filled in field by field by the format parsers.
#[derive(Debug, Default, Clone)]
pub struct PackageRecord {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub license: Option<String>,
    pub maintainer: Option<String>,
    pub size_bytes: Option<u64>,
    pub category: Option<String>,
    pub architecture: Option<String>,
    pub checksum: Option<String>,
}

impl PackageRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a raw string value to a canonical field.
    ///
    /// Blank values are ignored; unparsable sizes are dropped rather than
    /// failing the whole record.
    pub fn set(&mut self, field: Field, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        let owned = Some(value.to_string());
        match field {
            Field::Name => self.name = owned,
            Field::Version => self.version = owned,
            Field::Description => self.description = owned,
            Field::Homepage => self.homepage = owned,
            Field::License => self.license = owned,
            Field::Maintainer => self.maintainer = owned,
            Field::Size => self.size_bytes = value.parse().ok(),
            Field::Category => self.category = owned,
            Field::Architecture => self.architecture = owned,
            Field::Checksum => self.checksum = owned,
        }
    }

    /// Finish the record, or `None` if name or version is missing.
    pub fn build(self, repository: &str) -> Option<Package> {
        let name = self.name.filter(|n| !n.trim().is_empty())?;
        let version = self.version.filter(|v| !v.trim().is_empty())?;

        Some(Package {
            name,
            version,
            description: self.description,
            homepage: self.homepage,
            license: self.license,
            maintainer: self.maintainer,
            size_bytes: self.size_bytes,
            category: self.category,
            architecture: self.architecture,
            checksum: self.checksum,
            repository: repository.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_requires_name_and_version() {
        let mut record = PackageRecord::new();
        record.set(Field::Name, "curl");
        assert!(record.clone().build("apt-ubuntu-jammy").is_none());

        record.set(Field::Version, "7.81.0-1ubuntu1.16");
        let pkg = record.build("apt-ubuntu-jammy").unwrap();
        assert_eq!(pkg.name, "curl");
        assert_eq!(pkg.version, "7.81.0-1ubuntu1.16");
        assert_eq!(pkg.repository, "apt-ubuntu-jammy");
    }

    #[test]
    fn test_record_ignores_blank_values() {
        let mut record = PackageRecord::new();
        record.set(Field::Name, "   ");
        record.set(Field::Version, "1.0");
        assert!(record.build("r").is_none());
    }

    #[test]
    fn test_record_size_parsing() {
        let mut record = PackageRecord::new();
        record.set(Field::Size, "4096");
        assert_eq!(record.size_bytes, Some(4096));

        record.set(Field::Size, "not-a-number");
        assert_eq!(record.size_bytes, None);
    }

    #[test]
    fn test_field_from_str() {
        assert_eq!("license".parse::<Field>().unwrap(), Field::License);
        assert!("licence".parse::<Field>().is_err());
        for field in Field::ALL {
            assert_eq!(field.as_str().parse::<Field>().unwrap(), field);
        }
    }
}
