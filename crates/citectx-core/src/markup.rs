//! Article markup: inline-formatting removal and a light element tree.
//!
//! The tree keeps text and elements as distinct node kinds so sibling walks can
//! tell running text from nested structure without re-inspecting content.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::encoding::Decoder;
use quick_xml::errors::{Error as XmlError, IllFormedError};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use regex::Regex;
use thiserror::Error;

/// Inline formatting elements removed before parsing. Their text stays in
/// place so a sentence broken up by `<italic>` reads as one text node.
pub const INLINE_FORMATTING_TAGS: &[&str] = &[
    "italic", "bold", "underline", "sc", "em", "emphasis", "sub", "sup",
];

static INLINE_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)</?(?:{})(?:\s[^<>]*)?/?>",
        INLINE_FORMATTING_TAGS.join("|")
    ))
    .unwrap()
});

/// Remove the opening, closing and empty forms of the inline formatting tags.
pub fn strip_inline_formatting(document: &str) -> Cow<'_, str> {
    INLINE_TAG_RE.replace_all(document, "")
}

#[derive(Error, Debug)]
#[error("malformed markup at byte {position}: {message}")]
pub struct MarkupError {
    pub position: u64,
    pub message: String,
}

/// Index of a node inside a [`MarkupTree`].
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<NodeId>,
}

impl Element {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Element(Element),
}

/// Parsed document. Node 0 is a synthetic root holding the top-level nodes.
#[derive(Debug, Clone)]
pub struct MarkupTree {
    nodes: Vec<Node>,
    parents: Vec<Option<NodeId>>,
}

fn element_from(e: &BytesStart<'_>, decoder: Decoder) -> Element {
    let attributes = e
        .attributes()
        .flatten()
        .map(|a| {
            let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
            let value = a
                .decode_and_unescape_value(decoder)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).into_owned());
            (key, value)
        })
        .collect();
    Element {
        name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        attributes,
        children: Vec::new(),
    }
}

impl MarkupTree {
    const ROOT: NodeId = 0;

    fn empty() -> Self {
        Self {
            nodes: vec![Node::Element(Element {
                name: String::new(),
                attributes: Vec::new(),
                children: Vec::new(),
            })],
            parents: vec![None],
        }
    }

    /// Parse a document. Mismatched end tags close the nearest matching open
    /// element and are otherwise ignored; lexical errors fail the parse.
    pub fn parse(document: &str) -> Result<Self, MarkupError> {
        let mut tree = Self::empty();
        let mut xml = Reader::from_str(document);
        xml.config_mut().trim_text(false);
        xml.config_mut().check_end_names = false;

        let mut open: Vec<NodeId> = vec![Self::ROOT];

        loop {
            let event = match xml.read_event() {
                Ok(event) => event,
                // The reader's own tag stack runs dry after a stray end tag and
                // reports later closing tags as unmatched. Reading can resume,
                // and `open` decides what the tag actually closes.
                Err(XmlError::IllFormed(IllFormedError::UnmatchedEndTag(name))) => {
                    Event::End(BytesEnd::new(name))
                }
                Err(XmlError::IllFormed(err)) => {
                    tracing::trace!(position = xml.buffer_position(), %err, "ill-formed markup");
                    continue;
                }
                Err(e) => {
                    return Err(MarkupError {
                        position: xml.buffer_position(),
                        message: e.to_string(),
                    });
                }
            };
            let parent = *open.last().unwrap_or(&Self::ROOT);
            match event {
                Event::Start(ref e) => {
                    let id = tree.push(parent, Node::Element(element_from(e, xml.decoder())));
                    open.push(id);
                }
                Event::Empty(ref e) => {
                    tree.push(parent, Node::Element(element_from(e, xml.decoder())));
                }
                Event::End(ref e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if let Some(pos) = open.iter().rposition(|&id| tree.has_name(id, &name))
                        && pos > 0
                    {
                        open.truncate(pos);
                    }
                }
                Event::Text(ref e) => {
                    let text = e
                        .unescape()
                        .map(|t| t.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(e).into_owned());
                    tree.push_text(parent, text);
                }
                Event::CData(ref e) => {
                    tree.push_text(parent, String::from_utf8_lossy(e.as_ref()).into_owned());
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(tree)
    }

    fn push(&mut self, parent: NodeId, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        self.parents.push(Some(parent));
        if let Node::Element(el) = &mut self.nodes[parent] {
            el.children.push(id);
        }
        id
    }

    /// Append text, merging with a directly preceding text sibling.
    fn push_text(&mut self, parent: NodeId, text: String) {
        let last = match &self.nodes[parent] {
            Node::Element(el) => el.children.last().copied(),
            Node::Text(_) => None,
        };
        if let Some(last) = last
            && let Node::Text(existing) = &mut self.nodes[last]
        {
            existing.push_str(&text);
            return;
        }
        self.push(parent, Node::Text(text));
    }

    fn has_name(&self, id: NodeId, name: &str) -> bool {
        matches!(&self.nodes[id], Node::Element(el) if el.name == name)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Ids of elements matching `predicate`, in document order.
    pub fn find_elements(&self, predicate: impl Fn(&Element) -> bool) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack = vec![Self::ROOT];
        while let Some(id) = stack.pop() {
            if let Node::Element(el) = &self.nodes[id] {
                if id != Self::ROOT && predicate(el) {
                    found.push(id);
                }
                stack.extend(el.children.iter().rev());
            }
        }
        found
    }

    fn siblings(&self, id: NodeId) -> &[NodeId] {
        match self.parents[id].map(|p| &self.nodes[p]) {
            Some(Node::Element(parent)) => &parent.children,
            _ => &[],
        }
    }

    /// Siblings before `id`, nearest first.
    pub fn preceding_siblings(&self, id: NodeId) -> impl Iterator<Item = &Node> + '_ {
        let siblings = self.siblings(id);
        let pos = siblings.iter().position(|&s| s == id).unwrap_or(0);
        siblings[..pos].iter().rev().map(|&s| &self.nodes[s])
    }

    /// Siblings after `id`, nearest first.
    pub fn following_siblings(&self, id: NodeId) -> impl Iterator<Item = &Node> + '_ {
        let siblings = self.siblings(id);
        let start = siblings
            .iter()
            .position(|&s| s == id)
            .map_or(siblings.len(), |p| p + 1);
        siblings[start..].iter().map(|&s| &self.nodes[s])
    }
}
