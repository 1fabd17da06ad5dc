//! A small, namespace-aware element tree built on `quick-xml`.
//!
//! Sitemaps in the wild are frequently sloppy: undeclared prefixes,
//! mismatched closing tags, stray entities. [`parse`] has two modes:
//!
//! - [`Mode::Strict`] fails on the first well-formedness error, which lets the
//!   index parser detect broken documents and switch to an HTML-tolerant
//!   parser.
//! - [`Mode::Lenient`] tolerates mismatched end tags and keeps whatever was
//!   built before an unrecoverable error, the way a recovering parser would.
//!
//! Each element records its prefix, local name and the namespace URI its
//! prefix resolves to in scope, so lookups can match by either.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use thiserror::Error;

pub const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";
pub const NEWS_NS: &str = "http://www.google.com/schemas/sitemap-news/0.9";
pub const IMAGE_NS: &str = "http://www.google.com/schemas/sitemap-image/1.1";

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML parse error at byte {position}: {message}")]
    Malformed { position: u64, message: String },
    #[error("Unclosed element <{0}> at end of document")]
    Unclosed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Strict,
    Lenient,
}

/// One element of the parsed document.
#[derive(Debug, Clone, Default)]
pub struct Element {
    pub prefix: Option<String>,
    pub local: String,
    pub namespace: Option<String>,
    pub text: String,
    pub children: Vec<Element>,
}

/// Which element a lookup is after.
///
/// `Name::plain("loc")` only matches un-prefixed `<loc>`. A prefixed name
/// matches either the literal prefix or any prefix bound to `namespace`.
#[derive(Debug, Clone, Copy)]
pub struct Name<'a> {
    pub prefix: Option<&'a str>,
    pub local: &'a str,
    pub namespace: Option<&'a str>,
}

impl<'a> Name<'a> {
    pub const fn plain(local: &'a str) -> Self {
        Self {
            prefix: None,
            local,
            namespace: None,
        }
    }

    pub const fn prefixed(prefix: &'a str, local: &'a str, namespace: &'a str) -> Self {
        Self {
            prefix: Some(prefix),
            local,
            namespace: Some(namespace),
        }
    }
}

impl Element {
    pub fn is(&self, name: Name<'_>) -> bool {
        if self.local != name.local {
            return false;
        }
        match name.prefix {
            None => self.prefix.is_none(),
            Some(prefix) => {
                self.prefix.as_deref() == Some(prefix)
                    || (name.namespace.is_some() && self.namespace.as_deref() == name.namespace)
            }
        }
    }

    /// First direct child matching `name`.
    pub fn child(&self, name: Name<'_>) -> Option<&Element> {
        self.children.iter().find(|c| c.is(name))
    }

    /// First descendant (depth-first, document order) matching `name`.
    pub fn find(&self, name: Name<'_>) -> Option<&Element> {
        for child in &self.children {
            if child.is(name) {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    /// Every descendant matching `name`, in document order.
    pub fn find_all<'s>(&'s self, name: Name<'_>) -> Vec<&'s Element> {
        let mut out = Vec::new();
        self.collect(&mut out, &|e: &Element| e.is(name));
        out
    }

    /// Every descendant whose local name is `local`, whatever its namespace.
    pub fn find_all_local<'s>(&'s self, local: &str) -> Vec<&'s Element> {
        let mut out = Vec::new();
        self.collect(&mut out, &|e: &Element| e.local == local);
        out
    }

    /// Trimmed text content, `None` when blank.
    pub fn trimmed_text(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }

    fn collect<'s>(&'s self, out: &mut Vec<&'s Element>, pred: &dyn Fn(&Element) -> bool) {
        for child in &self.children {
            if pred(child) {
                out.push(child);
            }
            child.collect(out, pred);
        }
    }
}

struct Frame {
    element: Element,
    scope: HashMap<String, String>,
}

/// Parse `xml` into a synthetic root element whose children are the
/// document's top-level elements.
pub fn parse(xml: &str, mode: Mode) -> Result<Element, XmlError> {
    let mut reader = Reader::from_str(xml);
    {
        let config = reader.config_mut();
        config.trim_text(false);
        config.check_end_names = mode == Mode::Strict;
    }

    let mut stack: Vec<Frame> = vec![Frame {
        element: Element::default(),
        scope: HashMap::new(),
    }];

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                if mode == Mode::Strict {
                    return Err(XmlError::Malformed {
                        position: reader.error_position(),
                        message: e.to_string(),
                    });
                }
                break;
            }
        };

        match event {
            Event::Start(start) => {
                let frame = open(&start, stack_scope(&stack));
                stack.push(frame);
            }
            Event::Empty(start) => {
                let frame = open(&start, stack_scope(&stack));
                attach(&mut stack, frame.element);
            }
            Event::End(end) => {
                let local = String::from_utf8_lossy(end.local_name().as_ref()).into_owned();
                close(&mut stack, &local);
            }
            Event::Text(text) => {
                let value = match text.unescape() {
                    Ok(value) => value.into_owned(),
                    Err(_) => String::from_utf8_lossy(&text).into_owned(),
                };
                push_text(&mut stack, &value);
            }
            Event::CData(data) => {
                let value = String::from_utf8_lossy(&data.into_inner()).into_owned();
                push_text(&mut stack, &value);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if mode == Mode::Strict && stack.len() > 1 {
        let name = stack.last().map(|f| f.element.local.clone()).unwrap_or_default();
        return Err(XmlError::Unclosed(name));
    }

    while stack.len() > 1 {
        if let Some(frame) = stack.pop() {
            attach(&mut stack, frame.element);
        }
    }

    Ok(stack.pop().map(|f| f.element).unwrap_or_default())
}

fn stack_scope(stack: &[Frame]) -> &HashMap<String, String> {
    &stack[stack.len() - 1].scope
}

fn open(start: &BytesStart<'_>, parent_scope: &HashMap<String, String>) -> Frame {
    let mut scope = parent_scope.clone();
    for attr in start.attributes().with_checks(false).flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = String::from_utf8_lossy(&attr.value).into_owned();
        if key == "xmlns" {
            scope.insert(String::new(), value);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.insert(prefix.to_string(), value);
        }
    }

    let qname = start.name();
    let prefix = qname
        .prefix()
        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned());
    let local = String::from_utf8_lossy(qname.local_name().as_ref()).into_owned();
    let namespace = scope.get(prefix.as_deref().unwrap_or("")).cloned();

    Frame {
        element: Element {
            prefix,
            local,
            namespace,
            text: String::new(),
            children: Vec::new(),
        },
        scope,
    }
}

fn attach(stack: &mut [Frame], element: Element) {
    if let Some(parent) = stack.last_mut() {
        parent.element.children.push(element);
    }
}

fn push_text(stack: &mut [Frame], value: &str) {
    if let Some(frame) = stack.last_mut() {
        frame.element.text.push_str(value);
    }
}

/// Pop up to and including the innermost open element named `local`. A
/// closing tag that matches nothing open is ignored.
fn close(stack: &mut Vec<Frame>, local: &str) {
    let Some(depth) = stack.iter().rposition(|f| f.element.local == local) else {
        return;
    };
    if depth == 0 {
        return;
    }
    while stack.len() > depth {
        if let Some(frame) = stack.pop() {
            attach(stack, frame.element);
        }
    }
}
