//! A small, forgiving element tree over quick-xml events.
//!
//! Feeds in the wild have mismatched end tags and undeclared entities, so the
//! reader runs without end-name checks and nothing is unescaped while building
//! the tree; callers decode text themselves. Each element remembers its byte
//! span in the source so the original markup can be scanned with patterns.

use std::ops::Range;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
}

#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
    span: Range<usize>,
}

impl Element {
    fn open(start: &BytesStart, at: usize) -> Self {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let attributes = start
            .attributes()
            .with_checks(false)
            .filter_map(|attr| attr.ok())
            .map(|attr| {
                (
                    String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                    String::from_utf8_lossy(&attr.value).into_owned(),
                )
            })
            .collect();
        Self {
            name,
            attributes,
            children: Vec::new(),
            span: at..at,
        }
    }

    /// Raw attribute value, entities untouched.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Value of the first child node when it is text or CDATA.
    pub fn first_text(&self) -> Option<&str> {
        match self.children.first() {
            Some(Node::Text(t)) | Some(Node::CData(t)) => Some(t),
            _ => None,
        }
    }

    /// Every descendant element with the given qualified name, in document order.
    pub fn descendants<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        self.collect_descendants(name, &mut found);
        found
    }

    pub fn first_descendant<'a>(&'a self, name: &str) -> Option<&'a Element> {
        self.children.iter().find_map(|child| match child {
            Node::Element(e) if e.name == name => Some(e),
            Node::Element(e) => e.first_descendant(name),
            _ => None,
        })
    }

    fn collect_descendants<'a>(&'a self, name: &str, found: &mut Vec<&'a Element>) {
        for child in &self.children {
            if let Node::Element(e) = child {
                if e.name == name {
                    found.push(e);
                }
                e.collect_descendants(name, found);
            }
        }
    }

    /// The element's markup as it appeared in the source.
    pub fn source<'a>(&self, doc: &'a Document) -> &'a str {
        doc.source.get(self.span.clone()).unwrap_or("")
    }
}

#[derive(Debug)]
pub struct Document {
    source: String,
    pub root: Element,
}

impl Document {
    pub fn parse(source: String) -> Result<Self> {
        let mut root = Element {
            name: String::new(),
            attributes: Vec::new(),
            children: Vec::new(),
            span: 0..source.len(),
        };
        let mut stack: Vec<Element> = Vec::new();

        {
            let mut reader = Reader::from_str(&source);
            reader.config_mut().check_end_names = false;
            reader.config_mut().trim_text(false);

            loop {
                let before = reader.buffer_position() as usize;
                let event = match reader.read_event() {
                    Ok(event) => event,
                    Err(e) => {
                        if stack.is_empty() && root.children.is_empty() {
                            return Err(AppError::Parse(format!("XML parse error: {}", e)));
                        }
                        tracing::debug!("Stopping at malformed XML: {}", e);
                        break;
                    }
                };
                let after = reader.buffer_position() as usize;

                match event {
                    Event::Start(start) => stack.push(Element::open(&start, before)),
                    Event::Empty(start) => {
                        let mut element = Element::open(&start, before);
                        element.span.end = after;
                        attach(&mut stack, &mut root, Node::Element(element));
                    }
                    Event::End(end) => {
                        let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                        // unmatched end tags are ignored, skipped opens are closed implicitly
                        if let Some(depth) = stack.iter().rposition(|e| e.name == name) {
                            while stack.len() > depth {
                                let Some(mut element) = stack.pop() else { break };
                                element.span.end = after;
                                attach(&mut stack, &mut root, Node::Element(element));
                            }
                        }
                    }
                    Event::Text(text) => {
                        let text = String::from_utf8_lossy(&text).into_owned();
                        attach(&mut stack, &mut root, Node::Text(text));
                    }
                    Event::CData(data) => {
                        let data = String::from_utf8_lossy(&data).into_owned();
                        attach(&mut stack, &mut root, Node::CData(data));
                    }
                    Event::Eof => break,
                    _ => {}
                }
            }
        }

        let end = source.len();
        while let Some(mut element) = stack.pop() {
            element.span.end = end;
            attach(&mut stack, &mut root, Node::Element(element));
        }

        Ok(Self { source, root })
    }
}

fn attach(stack: &mut [Element], root: &mut Element, node: Node) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => root.children.push(node),
    }
}
