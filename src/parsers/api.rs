//! Generic mappers for JSON and XML API responses.
//!
//! Nothing here knows about a particular registry: a descriptor names where
//! each canonical field lives through `parsing.fields`, and where the list of
//! records lives through `parsing.items_path`.
//!
//! ```yaml
//! parsing:
//!   format: json
//!   items_path: objects
//!   fields:
//!     name: package.name
//!     version: package.version
//!     maintainer: package.maintainers[0].username
//! ```

use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde_json::Value;

use super::{FormatParser, ParseContext, ParseError, ParseOutcome, field_selectors};
use crate::types::{Field, PackageRecord};

/// Canonical field names double as the default selectors.
fn canonical_defaults() -> Vec<(Field, &'static str)> {
    Field::ALL.iter().map(|f| (*f, f.as_str())).collect()
}

// ============================================================================
// JSON
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl FormatParser for JsonParser {
    fn parse<R: BufRead>(&self, input: R, ctx: &ParseContext<'_>) -> Result<ParseOutcome, ParseError> {
        let root: Value = serde_json::from_reader(input)?;
        let selectors = field_selectors(&ctx.descriptor.parsing, &canonical_defaults());

        let items: Vec<&Value> = match ctx.descriptor.parsing.items_path.as_deref() {
            Some(path) => match select_json(&root, path) {
                Some(Value::Array(items)) => items.iter().collect(),
                Some(other) => vec![other],
                None => Vec::new(),
            },
            None => match &root {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            },
        };

        let mut outcome = ParseOutcome::default();
        for item in items {
            if !item.is_object() {
                outcome.push(None);
                continue;
            }
            let mut record = PackageRecord::new();
            for (field, selector) in &selectors {
                if let Some(value) = select_json(item, selector).and_then(json_scalar) {
                    record.set(*field, &value);
                }
            }
            outcome.push(record.build(ctx.repository()));
        }
        Ok(outcome)
    }
}

/// One step of a JSON selector.
#[derive(Debug, PartialEq)]
enum Step<'a> {
    Key(&'a str),
    Index(usize),
}

/// Split `a.b[0].c` (optionally prefixed with `$.`) into steps. Returns
/// `None` for selectors with unbalanced or non-numeric indices.
fn json_steps(selector: &str) -> Option<Vec<Step<'_>>> {
    let selector = selector.trim();
    let selector = selector
        .strip_prefix("$.")
        .or_else(|| selector.strip_prefix('$'))
        .unwrap_or(selector);

    let mut steps = Vec::new();
    for segment in selector.split('.').filter(|s| !s.is_empty()) {
        let (key, mut rest) = match segment.find('[') {
            Some(i) => (&segment[..i], &segment[i..]),
            None => (segment, ""),
        };
        if !key.is_empty() {
            steps.push(Step::Key(key));
        }
        while !rest.is_empty() {
            let close = rest.find(']')?;
            let index = rest.get(1..close)?.trim().parse().ok()?;
            steps.push(Step::Index(index));
            rest = &rest[close + 1..];
        }
    }
    Some(steps)
}

fn select_json<'v>(value: &'v Value, selector: &str) -> Option<&'v Value> {
    let mut current = value;
    for step in json_steps(selector)? {
        current = match (step, current) {
            (Step::Key(key), Value::Object(map)) => map.get(key)?,
            // A key applied to a list reads from its first element.
            (Step::Key(key), Value::Array(items)) => items.first()?.get(key)?,
            (Step::Index(i), Value::Array(items)) => items.get(i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Reduce a JSON value to the string stored on a package field.
fn json_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => items.iter().find_map(json_scalar),
        Value::Object(map) => map.get("name").or_else(|| map.get("type")).and_then(json_scalar),
        Value::Null => None,
    }
}

// ============================================================================
// XML
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct XmlParser;

/// Minimal element tree; names are local (namespace prefixes dropped).
#[derive(Debug, Default)]
struct Node {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn from_start(e: &BytesStart<'_>) -> Result<Self, ParseError> {
        let mut attributes = Vec::new();
        for attr in e.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            attributes.push((key, attr.unescape_value()?.into_owned()));
        }
        Ok(Self {
            name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
            attributes,
            ..Default::default()
        })
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// All descendants reached by a `/`-separated path of child names.
    fn descend<'n>(&'n self, path: &str) -> Vec<&'n Node> {
        let mut level = vec![self];
        for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
            level = level
                .into_iter()
                .flat_map(|n| n.children.iter().filter(move |c| c.name == segment))
                .collect();
        }
        level
    }

    /// Resolve `a/b`, `@attr` or `a/b/@attr` against this node.
    fn select(&self, selector: &str) -> Option<String> {
        let selector = selector.trim().trim_start_matches('/');
        let (path, attr) = match selector.rsplit_once('/') {
            Some((path, last)) if last.starts_with('@') => (path, Some(&last[1..])),
            _ => match selector.strip_prefix('@') {
                Some(attr) => ("", Some(attr)),
                None => (selector, None),
            },
        };

        let node = *self.descend(path).first()?;
        match attr {
            Some(attr) => node.attribute(attr).map(str::to_string),
            None => Some(node.text.trim().to_string()),
        }
    }
}

fn read_tree<R: BufRead>(input: R) -> Result<Node, ParseError> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Node> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => stack.push(Node::from_start(&e)?),
            Event::Empty(e) => {
                let node = Node::from_start(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Event::Text(t) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::End(_) => {
                let Some(node) = stack.pop() else {
                    return Err(ParseError::InvalidDocument("unbalanced end tag".to_string()));
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Event::Eof => {
                return Err(ParseError::InvalidDocument(
                    "document ended before its root element closed".to_string(),
                ));
            }
            _ => {}
        }
        buf.clear();
    }
}

impl FormatParser for XmlParser {
    fn parse<R: BufRead>(&self, input: R, ctx: &ParseContext<'_>) -> Result<ParseOutcome, ParseError> {
        let root = read_tree(input)?;
        let selectors = field_selectors(&ctx.descriptor.parsing, &canonical_defaults());

        let items = match ctx.descriptor.parsing.items_path.as_deref() {
            Some(path) => root.descend(path),
            None => vec![&root],
        };

        let mut outcome = ParseOutcome::default();
        for item in items {
            let mut record = PackageRecord::new();
            for (field, selector) in &selectors {
                if let Some(value) = item.select(selector) {
                    record.set(*field, &value);
                }
            }
            outcome.push(record.build(ctx.repository()));
        }
        Ok(outcome)
    }
}
