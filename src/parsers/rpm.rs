//! RPM repository metadata (DNF/YUM/Zypper).
//!
//! Resolution is two-stage: `repodata/repomd.xml` points at the compressed
//! `primary.xml` that actually lists packages. Some distributions hand out a
//! metalink document instead of repomd.xml; it lists mirrors serving the
//! repomd.xml. The network side of this lives in the bulk fetcher; this
//! module only parses the three document kinds.

use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;

use super::{FormatParser, ParseContext, ParseError, ParseOutcome};
use crate::types::{Field, PackageRecord};

pub const COMMON_NS: &[u8] = b"http://linux.duke.edu/metadata/common";
pub const RPM_NS: &[u8] = b"http://linux.duke.edu/metadata/rpm";
pub const METALINK_V3_NS: &[u8] = b"http://www.metalinker.org/";
pub const METALINK_V4_NS: &[u8] = b"urn:ietf:params:xml:ns:metalink";

const REPOMD_SUFFIX: &str = "/repodata/repomd.xml";

/// A mirror listed in a metalink document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    pub url: String,
    /// Higher is better (v4 `priority` is inverted into this scale).
    pub preference: i64,
}

impl Mirror {
    pub fn is_https(&self) -> bool {
        self.url.starts_with("https://")
    }
}

/// What a repository index URL turned out to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryIndex {
    /// A repomd.xml; `primary` is the relative location of the primary data.
    Repomd { primary: String },
    /// A metalink listing mirrors of repomd.xml.
    Metalink { mirrors: Vec<Mirror> },
}

/// Parse either a repomd.xml or a metalink document, by root element.
pub fn parse_repository_index(data: &[u8]) -> Result<RepositoryIndex, ParseError> {
    let mut reader = NsReader::from_reader(data);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                return match e.local_name().as_ref() {
                    b"repomd" => parse_repomd_body(&mut reader),
                    b"metalink" => parse_metalink_body(&mut reader),
                    other => Err(ParseError::InvalidDocument(format!(
                        "expected <repomd> or <metalink>, found <{}>",
                        String::from_utf8_lossy(other)
                    ))),
                };
            }
            Event::Eof => {
                return Err(ParseError::InvalidDocument("empty repository index".to_string()));
            }
            _ => {}
        }
        buf.clear();
    }
}

fn parse_repomd_body(reader: &mut NsReader<&[u8]>) -> Result<RepositoryIndex, ParseError> {
    let mut buf = Vec::new();
    let mut in_primary = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"data" => {
                in_primary = attribute(&e, b"type").as_deref() == Some("primary");
            }
            Event::Start(e) | Event::Empty(e) if in_primary && e.local_name().as_ref() == b"location" => {
                if let Some(href) = attribute(&e, b"href") {
                    return Ok(RepositoryIndex::Repomd { primary: href });
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"data" => in_primary = false,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Err(ParseError::InvalidDocument(
        "repomd.xml has no primary data location".to_string(),
    ))
}

fn parse_metalink_body(reader: &mut NsReader<&[u8]>) -> Result<RepositoryIndex, ParseError> {
    let mut buf = Vec::new();
    let mut mirrors = Vec::new();
    let mut current: Option<i64> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"url" => {
                current = Some(mirror_preference(&e));
                text.clear();
            }
            Event::Text(t) if current.is_some() => text.push_str(&t.unescape()?),
            Event::End(e) if e.local_name().as_ref() == b"url" => {
                if let Some(preference) = current.take() {
                    let url = text.trim();
                    if url.starts_with("http://") || url.starts_with("https://") {
                        mirrors.push(Mirror {
                            url: url.to_string(),
                            preference,
                        });
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if mirrors.is_empty() {
        return Err(ParseError::InvalidDocument(
            "metalink lists no http(s) mirrors".to_string(),
        ));
    }
    Ok(RepositoryIndex::Metalink { mirrors })
}

/// v3 uses `preference` (higher wins), v4 uses `priority` (lower wins).
fn mirror_preference(e: &BytesStart<'_>) -> i64 {
    if let Some(pref) = attribute(e, b"preference").and_then(|p| p.parse::<i64>().ok()) {
        return pref;
    }
    attribute(e, b"priority")
        .and_then(|p| p.parse::<i64>().ok())
        .map(|p| -p)
        .unwrap_or(0)
}

/// Choose the mirror to fetch repomd.xml from: HTTPS first, then by
/// preference, then document order.
pub fn select_mirror(mirrors: &[Mirror]) -> Option<&Mirror> {
    let mut best: Option<&Mirror> = None;
    for mirror in mirrors {
        best = match best {
            None => Some(mirror),
            Some(current) => {
                let better = (mirror.is_https(), mirror.preference) > (current.is_https(), current.preference);
                if better { Some(mirror) } else { Some(current) }
            }
        };
    }
    best
}

/// Repository base for a repomd.xml URL (`.../os/repodata/repomd.xml` ->
/// `.../os`).
pub fn repository_base(repomd_url: &str) -> &str {
    let url = repomd_url.split(['?', '#']).next().unwrap_or(repomd_url);
    url.strip_suffix(REPOMD_SUFFIX)
        .unwrap_or(url)
        .trim_end_matches('/')
}

/// Resolve the primary location against a repository base.
pub fn primary_url(base: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), location.trim_start_matches('/'))
}

/// Namespace of an element in primary.xml.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ns {
    Common,
    Rpm,
    Other,
}

impl Ns {
    fn of(resolved: &ResolveResult<'_>) -> Self {
        match resolved {
            ResolveResult::Bound(Namespace(ns)) if *ns == COMMON_NS => Ns::Common,
            ResolveResult::Bound(Namespace(ns)) if *ns == RPM_NS => Ns::Rpm,
            // Hand-written fixtures sometimes omit the default namespace.
            ResolveResult::Unbound => Ns::Common,
            _ => Ns::Other,
        }
    }
}

/// Version parts from `<version epoch="" ver="" rel=""/>`.
#[derive(Debug, Default)]
struct Evr {
    epoch: Option<String>,
    ver: Option<String>,
    rel: Option<String>,
}

impl Evr {
    fn from_element(e: &BytesStart<'_>) -> Self {
        Self {
            epoch: attribute(e, b"epoch"),
            ver: attribute(e, b"ver"),
            rel: attribute(e, b"rel"),
        }
    }

    /// `epoch:ver-rel`, with a zero epoch omitted.
    fn to_version(&self) -> Option<String> {
        let ver = self.ver.as_deref().filter(|v| !v.is_empty())?;
        let mut version = match self.epoch.as_deref() {
            Some(epoch) if !epoch.is_empty() && epoch != "0" => format!("{}:{}", epoch, ver),
            _ => ver.to_string(),
        };
        if let Some(rel) = self.rel.as_deref().filter(|r| !r.is_empty()) {
            version.push('-');
            version.push_str(rel);
        }
        Some(version)
    }
}

/// Package being assembled from a `<package>` element.
#[derive(Default)]
struct RpmPackage {
    record: PackageRecord,
    evr: Evr,
    description: Option<String>,
    vendor: Option<String>,
}

impl RpmPackage {
    fn finish(mut self, repository: &str) -> Option<crate::types::Package> {
        if let Some(version) = self.evr.to_version() {
            self.record.set(Field::Version, &version);
        }
        if self.record.description.is_none()
            && let Some(desc) = self.description.as_deref()
        {
            self.record.set(Field::Description, desc.lines().next().unwrap_or_default());
        }
        if self.record.maintainer.is_none()
            && let Some(vendor) = self.vendor.as_deref()
        {
            self.record.set(Field::Maintainer, vendor);
        }
        self.record.build(repository)
    }
}

/// Which text-bearing element we're inside.
#[derive(Debug, Clone, Copy)]
enum TextTarget {
    Field(Field),
    Description,
    Vendor,
}

/// Parser for (decompressed) `primary.xml`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpmParser;

impl FormatParser for RpmParser {
    fn parse<R: BufRead>(&self, input: R, ctx: &ParseContext<'_>) -> Result<ParseOutcome, ParseError> {
        let mut reader = NsReader::from_reader(input);
        reader.config_mut().trim_text(true);

        let mut outcome = ParseOutcome::default();
        let mut buf = Vec::new();
        let mut root_seen = false;
        let mut current: Option<RpmPackage> = None;
        let mut target: Option<TextTarget> = None;
        let mut text = String::new();

        loop {
            buf.clear();
            let (resolved, event) = reader.read_resolved_event_into(&mut buf)?;
            let ns = Ns::of(&resolved);

            match event {
                Event::Start(e) if !root_seen => {
                    root_seen = true;
                    if e.local_name().as_ref() != b"metadata" {
                        return Err(ParseError::InvalidDocument(format!(
                            "expected <metadata> root in primary.xml, found <{}>",
                            String::from_utf8_lossy(e.local_name().as_ref())
                        )));
                    }
                }
                Event::Start(e) => {
                    let local = e.local_name();
                    match (ns, local.as_ref()) {
                        (Ns::Common, b"package") => current = Some(RpmPackage::default()),
                        _ => {
                            if let Some(pkg) = current.as_mut() {
                                handle_attributes(pkg, ns, &e);
                                target = text_target(ns, local.as_ref());
                                text.clear();
                            }
                        }
                    }
                }
                Event::Empty(e) => {
                    if let Some(pkg) = current.as_mut() {
                        handle_attributes(pkg, ns, &e);
                    }
                }
                Event::Text(t) if target.is_some() => text.push_str(&t.unescape()?),
                Event::CData(c) if target.is_some() => text.push_str(&String::from_utf8_lossy(&c)),
                Event::End(e) => {
                    if ns == Ns::Common && e.local_name().as_ref() == b"package" {
                        if let Some(pkg) = current.take() {
                            outcome.push(pkg.finish(ctx.repository()));
                        }
                    } else if let (Some(t), Some(pkg)) = (target.take(), current.as_mut()) {
                        match t {
                            TextTarget::Field(field) => pkg.record.set(field, &text),
                            TextTarget::Description => pkg.description = Some(text.clone()),
                            TextTarget::Vendor => pkg.vendor = Some(text.clone()),
                        }
                        text.clear();
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !root_seen {
            return Err(ParseError::InvalidDocument("empty primary.xml".to_string()));
        }
        Ok(outcome)
    }
}

fn text_target(ns: Ns, local: &[u8]) -> Option<TextTarget> {
    match (ns, local) {
        (Ns::Common, b"name") => Some(TextTarget::Field(Field::Name)),
        (Ns::Common, b"arch") => Some(TextTarget::Field(Field::Architecture)),
        (Ns::Common, b"summary") => Some(TextTarget::Field(Field::Description)),
        (Ns::Common, b"description") => Some(TextTarget::Description),
        (Ns::Common, b"packager") => Some(TextTarget::Field(Field::Maintainer)),
        (Ns::Common, b"url") => Some(TextTarget::Field(Field::Homepage)),
        (Ns::Common, b"checksum") => Some(TextTarget::Field(Field::Checksum)),
        (Ns::Rpm, b"license") => Some(TextTarget::Field(Field::License)),
        (Ns::Rpm, b"group") => Some(TextTarget::Field(Field::Category)),
        (Ns::Rpm, b"vendor") => Some(TextTarget::Vendor),
        _ => None,
    }
}

/// Attribute-carrying elements: `<version>` and `<size>`.
fn handle_attributes(pkg: &mut RpmPackage, ns: Ns, e: &BytesStart<'_>) {
    if ns != Ns::Common {
        return;
    }
    match e.local_name().as_ref() {
        b"version" => pkg.evr = Evr::from_element(e),
        b"size" => {
            if let Some(size) = attribute(e, b"package") {
                pkg.record.set(Field::Size, &size);
            }
        }
        _ => {}
    }
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}
