//! Alpine `APKINDEX` parser.
//!
//! `APKINDEX.tar.gz` decompresses to one or two concatenated tar streams
//! (signature, then index). The `APKINDEX` member is a list of records made
//! of single-letter `K:value` lines, separated by blank lines. Plain
//! (already extracted) text is accepted too.

use std::io::{BufRead, Read};

use tracing::trace;

use super::{FormatParser, ParseContext, ParseError, ParseOutcome, field_selectors};
use crate::types::{Field, Package, PackageRecord};

const DEFAULT_FIELDS: &[(Field, &str)] = &[
    (Field::Name, "P"),
    (Field::Version, "V"),
    (Field::Description, "T"),
    (Field::Homepage, "U"),
    (Field::License, "L"),
    (Field::Maintainer, "m"),
    (Field::Size, "S"),
    (Field::Category, "o"),
    (Field::Architecture, "A"),
    (Field::Checksum, "C"),
];

const INDEX_MEMBER: &str = "APKINDEX";

#[derive(Debug, Clone, Copy, Default)]
pub struct ApkParser;

impl FormatParser for ApkParser {
    fn parse<R: BufRead>(&self, mut input: R, ctx: &ParseContext<'_>) -> Result<ParseOutcome, ParseError> {
        let mut data = Vec::new();
        input.read_to_end(&mut data)?;

        let text = if is_tar(&data) {
            extract_index(&data)?
        } else {
            String::from_utf8_lossy(&data).into_owned()
        };

        parse_records(&text, ctx)
    }
}

/// POSIX tar headers carry `ustar` at offset 257.
fn is_tar(data: &[u8]) -> bool {
    data.get(257..262) == Some(b"ustar".as_slice())
}

fn extract_index(data: &[u8]) -> Result<String, ParseError> {
    let mut archive = tar::Archive::new(data);
    archive.set_ignore_zeros(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let is_index = entry
            .path()
            .map(|p| p.file_name().and_then(|f| f.to_str()) == Some(INDEX_MEMBER))
            .unwrap_or(false);
        if is_index {
            let mut text = String::new();
            entry.read_to_string(&mut text)?;
            return Ok(text);
        }
    }

    Err(ParseError::InvalidDocument(
        "archive has no APKINDEX member".to_string(),
    ))
}

fn parse_records(text: &str, ctx: &ParseContext<'_>) -> Result<ParseOutcome, ParseError> {
    let selectors = field_selectors(&ctx.descriptor.parsing, DEFAULT_FIELDS);
    let mut outcome = ParseOutcome::default();
    let mut record: Vec<(&str, &str)> = Vec::new();
    let mut malformed = false;
    let mut fields_seen = 0usize;
    let mut content_seen = false;

    for line in text.lines().chain(std::iter::once("")) {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            if !record.is_empty() || malformed {
                outcome.push(finish_record(&record, malformed, &selectors, ctx));
            }
            record.clear();
            malformed = false;
            continue;
        }

        content_seen = true;
        match line.split_once(':') {
            Some((key, value)) if !key.is_empty() && key.len() <= 2 => {
                fields_seen += 1;
                record.push((key, value));
            }
            _ => {
                trace!(repository = ctx.repository(), line, "malformed APKINDEX line");
                malformed = true;
            }
        }
    }

    if content_seen && fields_seen == 0 {
        return Err(ParseError::InvalidDocument(
            "no `K:value` records found in APKINDEX".to_string(),
        ));
    }
    Ok(outcome)
}

fn finish_record(
    record: &[(&str, &str)],
    malformed: bool,
    selectors: &[(Field, String)],
    ctx: &ParseContext<'_>,
) -> Option<Package> {
    if malformed {
        return None;
    }
    let mut pkg = PackageRecord::new();
    for (field, key) in selectors {
        if let Some((_, value)) = record.iter().find(|(k, _)| *k == key.as_str()) {
            pkg.set(*field, value);
        }
    }
    pkg.build(ctx.repository())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompress::{self, Scheme, test_support::compress};
    use crate::parsers::test_support::descriptor;

    const APKINDEX: &str = "\
C:Q1abcdefghijklmnopqrstuvwxyz0123=
P:musl
V:1.2.5-r0
A:x86_64
S:407957
I:647168
T:the musl c library (libc) implementation
U:https://musl.libc.org/
L:MIT
o:musl
m:Natanael Copa <ncopa@alpinelinux.org>
t:1712000000

P:busybox
A:x86_64
T:missing its version

C:Q1zyxwvutsrqponmlkjihgfedcba9876=
P:curl
V:8.9.0-r0
A:x86_64
S:250000
T:URL retrival utility and library
U:https://curl.se/
L:curl
o:curl
";

    fn tar_with_index(index: &str) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let description = b"Alpine v3.20 main";
        let mut header = tar::Header::new_gnu();
        header.set_size(description.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "DESCRIPTION", &description[..]).unwrap();

        let mut header = tar::Header::new_gnu();
        header.set_size(index.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "APKINDEX", index.as_bytes()).unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_parse_plain_index() {
        let desc = descriptor("apk-alpine-v3.20", "apkindex", "");
        let ctx = ParseContext::new(&desc, "");
        let outcome = ApkParser.parse(APKINDEX.as_bytes(), &ctx).unwrap();

        assert_eq!(outcome.packages.len(), 2);
        assert_eq!(outcome.skipped, 1);

        let musl = &outcome.packages[0];
        assert_eq!(musl.name, "musl");
        assert_eq!(musl.version, "1.2.5-r0");
        assert_eq!(musl.license.as_deref(), Some("MIT"));
        assert_eq!(musl.maintainer.as_deref(), Some("Natanael Copa <ncopa@alpinelinux.org>"));
        assert_eq!(musl.size_bytes, Some(407957));
        assert_eq!(musl.homepage.as_deref(), Some("https://musl.libc.org/"));
        assert_eq!(musl.checksum.as_deref(), Some("Q1abcdefghijklmnopqrstuvwxyz0123="));
    }

    #[test]
    fn test_parse_gzipped_tarball() {
        let archive = compress(&tar_with_index(APKINDEX), Scheme::Gzip);
        let reader = std::io::BufReader::new(decompress::decoder(&archive[..], Scheme::Gzip).unwrap());

        let desc = descriptor("apk-alpine-v3.20", "apkindex", "");
        let ctx = ParseContext::new(&desc, "");
        let outcome = ApkParser.parse(reader, &ctx).unwrap();
        let names: Vec<_> = outcome.packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["musl", "curl"]);
    }

    #[test]
    fn test_tarball_without_index() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(3);
        header.set_cksum();
        builder.append_data(&mut header, "README", &b"hi\n"[..]).unwrap();
        let archive = builder.into_inner().unwrap();

        let desc = descriptor("r", "apkindex", "");
        let ctx = ParseContext::new(&desc, "");
        assert!(matches!(
            ApkParser.parse(&archive[..], &ctx),
            Err(ParseError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        let desc = descriptor("r", "apkindex", "");
        let ctx = ParseContext::new(&desc, "");
        assert!(ApkParser.parse(&b"<html>oops</html>\n"[..], &ctx).is_err());
    }
}
