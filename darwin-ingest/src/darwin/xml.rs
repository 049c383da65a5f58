//! A small, namespace-agnostic XML element tree.
//!
//! Push Port documents use several namespaces whose prefixes vary between
//! schema versions. Elements and attributes are therefore addressed by local
//! name only, and namespace declarations are dropped while reading.

use std::str::FromStr;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::error::DecodeError;

/// A node in the element tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Element(Element),
    Text(String),
}

/// An XML element with its attributes and content, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Element {
    pub name: String,
    attributes: Vec<(String, String)>,
    nodes: Vec<Node>,
}

impl Element {
    /// Read a whole document and return its root element.
    pub fn parse(bytes: &[u8]) -> Result<Element, DecodeError> {
        let mut reader = Reader::from_reader(bytes);
        let mut buf = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| {
                DecodeError::Syntax(format!("at byte {}: {e}", reader.buffer_position()))
            })?;

            match event {
                Event::Start(start) => stack.push(open(&start)?),
                Event::Empty(start) => {
                    let element = open(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| DecodeError::Syntax("unexpected closing tag".into()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = text
                            .unescape()
                            .map_err(|e| DecodeError::Syntax(e.to_string()))?;
                        parent.nodes.push(Node::Text(text.into_owned()));
                    }
                }
                Event::CData(data) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                        parent.nodes.push(Node::Text(text));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if let Some(open) = stack.last() {
            return Err(DecodeError::Syntax(format!("unclosed element <{}>", open.name)));
        }
        root.ok_or_else(|| DecodeError::Syntax("document has no root element".into()))
    }

    /// Returns an attribute's value, if present.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns a mandatory attribute's value.
    pub fn required_attr(&self, name: &'static str) -> Result<&str, DecodeError> {
        self.attr(name).ok_or_else(|| DecodeError::MissingAttribute {
            element: self.name.clone(),
            attribute: name,
        })
    }

    /// Parse an optional attribute with `parse`.
    pub fn parse_attr<T, E: ToString>(
        &self,
        name: &'static str,
        parse: impl FnOnce(&str) -> Result<T, E>,
    ) -> Result<Option<T>, DecodeError> {
        self.attr(name)
            .map(|value| {
                parse(value).map_err(|e| self.invalid(name, value, e))
            })
            .transpose()
    }

    /// Parse a mandatory attribute with `parse`.
    pub fn parse_required<T, E: ToString>(
        &self,
        name: &'static str,
        parse: impl FnOnce(&str) -> Result<T, E>,
    ) -> Result<T, DecodeError> {
        let value = self.required_attr(name)?;
        parse(value).map_err(|e| self.invalid(name, value, e))
    }

    /// Parse an optional attribute via `FromStr`.
    pub fn number_attr<T>(&self, name: &'static str) -> Result<Option<T>, DecodeError>
    where
        T: FromStr,
        T::Err: ToString,
    {
        self.parse_attr(name, str::parse::<T>)
    }

    /// Read an xs:boolean attribute, falling back to `default` when absent.
    pub fn bool_attr(&self, name: &'static str, default: bool) -> Result<bool, DecodeError> {
        Ok(self.parse_attr(name, parse_bool)?.unwrap_or(default))
    }

    /// Returns an optional string attribute as an owned value.
    pub fn string_attr(&self, name: &str) -> Option<String> {
        self.attr(name).map(str::to_owned)
    }

    /// Iterate over child elements.
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.nodes.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// Iterate over child elements with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children().filter(move |child| child.name == name)
    }

    /// Returns the first child element with the given name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children().find(|child| child.name == name)
    }

    /// Returns a mandatory child element.
    pub fn required_child(&self, name: &'static str) -> Result<&Element, DecodeError> {
        self.child(name).ok_or_else(|| DecodeError::MissingElement {
            element: self.name.clone(),
            child: name,
        })
    }

    /// True iff a child with this name exists, whatever its content.
    pub fn has_child(&self, name: &str) -> bool {
        self.child(name).is_some()
    }

    /// Select the single child whose name is one of `names`.
    ///
    /// Fails if none or more than one of them is present.
    pub fn exactly_one_of(
        &self,
        names: &[&str],
        expected: &'static str,
    ) -> Result<&Element, DecodeError> {
        let found: Vec<&Element> = self
            .children()
            .filter(|child| names.contains(&child.name.as_str()))
            .collect();
        match found.as_slice() {
            [only] => Ok(only),
            _ => Err(DecodeError::Choice {
                element: self.name.clone(),
                expected,
                found: found.len(),
            }),
        }
    }

    /// The element's own text, trimmed.
    pub fn text(&self) -> String {
        let mut text = String::new();
        for node in &self.nodes {
            if let Node::Text(t) = node {
                text.push_str(t);
            }
        }
        text.trim().to_string()
    }

    /// All text in this element and its descendants, in document order,
    /// with runs of whitespace collapsed.
    pub fn flattened_text(&self) -> String {
        let mut raw = String::new();
        self.collect_text(&mut raw);
        raw.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.nodes {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => {
                    out.push(' ');
                    e.collect_text(out);
                    out.push(' ');
                }
            }
        }
    }

    /// Parse the element's text with `parse`.
    pub fn parse_text<T, E: ToString>(
        &self,
        field: &'static str,
        parse: impl FnOnce(&str) -> Result<T, E>,
    ) -> Result<T, DecodeError> {
        let text = self.text();
        parse(&text).map_err(|e| self.invalid(field, &text, e))
    }

    /// Build an invalid-value error for this element.
    pub fn invalid(&self, field: &'static str, value: &str, reason: impl ToString) -> DecodeError {
        DecodeError::InvalidValue {
            element: self.name.clone(),
            field,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Parse an xs:boolean.
pub(crate) fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(format!("{other:?} is not a boolean")),
    }
}

fn open(start: &BytesStart<'_>) -> Result<Element, DecodeError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();

    for attr in start.attributes() {
        let attr = attr.map_err(|e| DecodeError::Syntax(format!("in <{name}>: {e}")))?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| DecodeError::Syntax(format!("in <{name}>: {e}")))?
            .into_owned();
        attributes.push((key, value));
    }

    Ok(Element {
        name,
        attributes,
        nodes: Vec::new(),
    })
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), DecodeError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.nodes.push(Node::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(DecodeError::Syntax("more than one root element".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_by_local_name() {
        let xml = br#"<?xml version="1.0"?>
            <Pport xmlns="urn:a" xmlns:ns2="urn:b" ts="now">
                <ns2:child id="1"/>
                <ns2:child id="2">text</ns2:child>
            </Pport>"#;

        let root = Element::parse(xml).unwrap();
        assert_eq!(root.name, "Pport");
        assert_eq!(root.attr("ts"), Some("now"));
        assert_eq!(root.attr("xmlns"), None);

        let ids: Vec<_> = root.children_named("child").map(|c| c.attr("id")).collect();
        assert_eq!(ids, vec![Some("1"), Some("2")]);
        assert_eq!(root.children().nth(1).unwrap().text(), "text");
    }

    #[test]
    fn unescapes_entities() {
        let root = Element::parse(br#"<a title="x &amp; y">1 &lt; 2</a>"#).unwrap();
        assert_eq!(root.attr("title"), Some("x & y"));
        assert_eq!(root.text(), "1 < 2");
    }

    #[test]
    fn flattened_text_keeps_word_breaks() {
        let root =
            Element::parse(b"<Msg>Delays <a href=\"x\">here</a> until <p>further notice</p></Msg>")
                .unwrap();
        assert_eq!(root.flattened_text(), "Delays here until further notice");
    }

    #[test]
    fn rejects_malformed_xml() {
        assert!(matches!(
            Element::parse(b"<a><b></a>"),
            Err(DecodeError::Syntax(_))
        ));
        assert!(matches!(Element::parse(b"<a>"), Err(DecodeError::Syntax(_))));
        assert!(matches!(Element::parse(b""), Err(DecodeError::Syntax(_))));
    }

    #[test]
    fn exactly_one_of_counts_members() {
        let root = Element::parse(b"<alarm><set/><clear/></alarm>").unwrap();
        let err = root.exactly_one_of(&["set", "clear"], "set, clear").unwrap_err();
        assert!(matches!(err, DecodeError::Choice { found: 2, .. }));

        let root = Element::parse(b"<alarm><other/></alarm>").unwrap();
        let err = root.exactly_one_of(&["set", "clear"], "set, clear").unwrap_err();
        assert!(matches!(err, DecodeError::Choice { found: 0, .. }));

        let root = Element::parse(b"<alarm><other/><clear>4</clear></alarm>").unwrap();
        let only = root.exactly_one_of(&["set", "clear"], "set, clear").unwrap();
        assert_eq!(only.name, "clear");
    }

    #[test]
    fn bool_attributes() {
        let root = Element::parse(br#"<s a="true" b="0" c="yes"/>"#).unwrap();
        assert!(root.bool_attr("a", false).unwrap());
        assert!(!root.bool_attr("b", true).unwrap());
        assert!(root.bool_attr("missing", true).unwrap());
        assert!(root.bool_attr("c", false).is_err());
    }
}
