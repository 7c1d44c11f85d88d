//! Debian/Ubuntu `Packages` index parser.
//!
//! The index is a sequence of RFC 822-like stanzas separated by blank lines:
//!
//! ```text
//! Package: curl
//! Version: 7.81.0-1ubuntu1.16
//! Description: command line tool for transferring data with URL syntax
//!  curl is a command line tool for transferring data ...
//! ```

use std::io::BufRead;

use tracing::trace;

use super::{FormatParser, ParseContext, ParseError, ParseOutcome, field_selectors};
use crate::types::{Field, Package, PackageRecord};

const DEFAULT_FIELDS: &[(Field, &str)] = &[
    (Field::Name, "Package"),
    (Field::Version, "Version"),
    (Field::Description, "Description"),
    (Field::Homepage, "Homepage"),
    (Field::License, "License"),
    (Field::Maintainer, "Maintainer"),
    (Field::Size, "Size"),
    (Field::Category, "Section"),
    (Field::Architecture, "Architecture"),
    (Field::Checksum, "SHA256"),
];

/// APT `Packages` parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct AptParser;

/// One stanza being accumulated.
#[derive(Default)]
struct Stanza {
    fields: Vec<(String, String)>,
    malformed: bool,
}

impl Stanza {
    fn is_empty(&self) -> bool {
        self.fields.is_empty() && !self.malformed
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

impl FormatParser for AptParser {
    fn parse<R: BufRead>(&self, mut input: R, ctx: &ParseContext<'_>) -> Result<ParseOutcome, ParseError> {
        let selectors = field_selectors(&ctx.descriptor.parsing, DEFAULT_FIELDS);
        let mut outcome = ParseOutcome::default();
        let mut stanza = Stanza::default();
        let mut fields_seen = 0usize;
        let mut content_seen = false;
        let mut line = Vec::new();

        loop {
            line.clear();
            let read = input.read_until(b'\n', &mut line)?;
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\r', '\n']);

            if read == 0 || text.trim().is_empty() {
                if !stanza.is_empty() {
                    outcome.push(finish_stanza(std::mem::take(&mut stanza), &selectors, ctx));
                }
                if read == 0 {
                    break;
                }
                continue;
            }

            content_seen = true;

            // Continuation of the previous field (multi-line Description etc.)
            if text.starts_with([' ', '\t']) {
                match stanza.fields.last_mut() {
                    Some((_, value)) => {
                        value.push('\n');
                        value.push_str(text.trim());
                    }
                    None => stanza.malformed = true,
                }
                continue;
            }

            match text.split_once(':') {
                Some((key, value)) if !key.trim().is_empty() && !key.contains(' ') => {
                    fields_seen += 1;
                    stanza.fields.push((key.trim().to_string(), value.trim().to_string()));
                }
                _ => {
                    trace!(repository = ctx.repository(), line = %text, "malformed Packages line");
                    stanza.malformed = true;
                }
            }
        }

        if content_seen && fields_seen == 0 {
            return Err(ParseError::InvalidDocument(
                "no `Key: Value` stanzas found in Packages index".to_string(),
            ));
        }

        Ok(outcome)
    }
}

fn finish_stanza(
    stanza: Stanza,
    selectors: &[(Field, String)],
    ctx: &ParseContext<'_>,
) -> Option<Package> {
    if stanza.malformed {
        return None;
    }

    let mut record = PackageRecord::new();
    for (field, key) in selectors {
        if let Some(value) = stanza.get(key) {
            match field {
                // Only the synopsis line; the extended description follows
                // on continuation lines.
                Field::Description => record.set(*field, value.lines().next().unwrap_or_default()),
                _ => record.set(*field, value),
            }
        }
    }
    record.build(ctx.repository())
}
