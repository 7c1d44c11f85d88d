//! Format parsers turning raw index/response bytes into [`Package`] records.
//!
//! Every parser follows the same contract: a single malformed entry is
//! skipped and counted in [`ParseOutcome::skipped`]; [`ParseError`] is only
//! returned when the document as a whole cannot be parsed.
//!
//! # Example
//!
//! ```ignore
//! use pkgmeta::parsers::{ParseContext, Parsers};
//!
//! let parser = Parsers::for_format(descriptor.parser_format());
//! let outcome = parser.parse_bytes(&bytes, &ParseContext::new(&descriptor, base_url))?;
//! ```

mod api;
mod apk;
mod apt;
mod error;
pub mod rpm;

pub use api::{JsonParser, XmlParser};
pub use apk::ApkParser;
pub use apt::AptParser;
pub use error::ParseError;
pub use rpm::RpmParser;

use std::io::BufRead;

use tracing::debug;

use crate::types::{Field, Package, ParserFormat, ParsingRules, RepositoryDescriptor};

/// Inputs every parser receives besides the document itself.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub descriptor: &'a RepositoryDescriptor,
    /// URL the document was fetched from (after mirror/base resolution).
    pub base_url: &'a str,
}

impl<'a> ParseContext<'a> {
    pub fn new(descriptor: &'a RepositoryDescriptor, base_url: &'a str) -> Self {
        Self {
            descriptor,
            base_url,
        }
    }

    pub fn repository(&self) -> &'a str {
        &self.descriptor.name
    }
}

/// Parsed packages plus the number of entries dropped as malformed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub packages: Vec<Package>,
    pub skipped: usize,
}

impl ParseOutcome {
    pub(crate) fn push(&mut self, package: Option<Package>) {
        match package {
            Some(p) => self.packages.push(p),
            None => self.skipped += 1,
        }
    }
}

/// Trait implemented by each index/response format.
pub trait FormatParser: Send + Sync {
    fn parse<R: BufRead>(&self, input: R, ctx: &ParseContext<'_>) -> Result<ParseOutcome, ParseError>;
}

/// Closed set of parsers, dispatched by descriptor format.
#[derive(Debug, Clone, Copy)]
pub enum Parsers {
    Apt(AptParser),
    Rpm(RpmParser),
    Apk(ApkParser),
    Json(JsonParser),
    Xml(XmlParser),
}

impl Parsers {
    pub fn for_format(format: ParserFormat) -> Self {
        match format {
            ParserFormat::DebianPackages => Self::Apt(AptParser),
            ParserFormat::RpmMetadata => Self::Rpm(RpmParser),
            ParserFormat::Apkindex => Self::Apk(ApkParser),
            ParserFormat::Json => Self::Json(JsonParser),
            ParserFormat::Xml => Self::Xml(XmlParser),
        }
    }

    pub fn for_descriptor(descriptor: &RepositoryDescriptor) -> Self {
        Self::for_format(descriptor.parser_format())
    }

    pub fn parse<R: BufRead>(&self, input: R, ctx: &ParseContext<'_>) -> Result<ParseOutcome, ParseError> {
        let outcome = match self {
            Self::Apt(p) => p.parse(input, ctx),
            Self::Rpm(p) => p.parse(input, ctx),
            Self::Apk(p) => p.parse(input, ctx),
            Self::Json(p) => p.parse(input, ctx),
            Self::Xml(p) => p.parse(input, ctx),
        }?;

        debug!(
            repository = ctx.repository(),
            packages = outcome.packages.len(),
            skipped = outcome.skipped,
            "parsed document"
        );
        Ok(outcome)
    }

    pub fn parse_bytes(&self, data: &[u8], ctx: &ParseContext<'_>) -> Result<ParseOutcome, ParseError> {
        self.parse(data, ctx)
    }
}

/// Resolve the source selector for every canonical field: descriptor
/// overrides first, then the format's defaults.
pub(crate) fn field_selectors(rules: &ParsingRules, defaults: &[(Field, &str)]) -> Vec<(Field, String)> {
    let mut selectors: Vec<(Field, String)> = defaults
        .iter()
        .map(|(field, key)| (*field, key.to_string()))
        .collect();

    for (key, selector) in &rules.fields {
        match key.parse::<Field>() {
            Ok(field) => {
                selectors.retain(|(f, _)| *f != field);
                selectors.push((field, selector.clone()));
            }
            Err(e) => debug!(field = %key, "ignoring field mapping: {}", e),
        }
    }

    selectors
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_field_selectors_override_defaults() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), "Pkg".to_string());
        fields.insert("bogus".to_string(), "X".to_string());
        let rules = ParsingRules {
            fields,
            ..Default::default()
        };

        let selectors = field_selectors(&rules, &[(Field::Name, "Package"), (Field::Version, "Version")]);
        assert!(selectors.contains(&(Field::Name, "Pkg".to_string())));
        assert!(selectors.contains(&(Field::Version, "Version".to_string())));
        assert_eq!(selectors.len(), 2);
    }

    #[test]
    fn test_dispatch_by_format() {
        assert!(matches!(Parsers::for_format(ParserFormat::DebianPackages), Parsers::Apt(_)));
        assert!(matches!(Parsers::for_format(ParserFormat::RpmMetadata), Parsers::Rpm(_)));
        assert!(matches!(Parsers::for_format(ParserFormat::Apkindex), Parsers::Apk(_)));
        assert!(matches!(Parsers::for_format(ParserFormat::Json), Parsers::Json(_)));
        assert!(matches!(Parsers::for_format(ParserFormat::Xml), Parsers::Xml(_)));
    }
}
