use std::collections::HashMap;
use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

/// Errors returned by XML tree parse/serialize helpers.
#[derive(Debug, Error)]
pub enum XmlError {
    /// Input is not well-formed XML.
    #[error("xml parse error: {0}")]
    Parse(String),
    /// Event-level write failure.
    #[error("xml write error: {0}")]
    Write(String),
    /// Document contained no root element.
    #[error("document has no root element")]
    NoRoot,
}

/// A single attribute as written on the wire (`qname="value"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub qname: String,
    pub value: String,
}

/// Child node of an element.
#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// Namespace-aware XML element tree.
///
/// `namespace` holds the resolved namespace URI of the element (empty when
/// unbound); `qname` keeps the prefixed name exactly as serialized so parsed
/// documents round-trip with their original prefixes.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    pub qname: String,
    pub namespace: String,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(qname: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            qname: qname.into(),
            namespace: namespace.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Local part of the element name (qname without prefix).
    pub fn local_name(&self) -> &str {
        match self.qname.split_once(':') {
            Some((_, local)) => local,
            None => &self.qname,
        }
    }

    pub fn with_attr(mut self, qname: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(qname, value);
        self
    }

    pub fn set_attr(&mut self, qname: impl Into<String>, value: impl Into<String>) {
        let qname = qname.into();
        let value = value.into();
        if let Some(existing) = self.attributes.iter_mut().find(|a| a.qname == qname) {
            existing.value = value;
            return;
        }
        self.attributes.push(XmlAttribute { qname, value });
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    pub fn push_child(&mut self, child: XmlElement) {
        self.children.push(XmlNode::Element(child));
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    /// Attribute value by exact qname.
    pub fn attr(&self, qname: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.qname == qname)
            .map(|a| a.value.as_str())
    }

    /// Attribute value matched by local name only, ignoring any prefix.
    pub fn attr_by_local(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| {
                let attr_local = match a.qname.split_once(':') {
                    Some((_, l)) => l,
                    None => a.qname.as_str(),
                };
                attr_local == local
            })
            .map(|a| a.value.as_str())
    }

    /// Iterates over direct element children.
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|n| match n {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// First direct child matching `(namespace, local_name)`.
    pub fn first_child(&self, namespace: &str, local: &str) -> Option<&XmlElement> {
        self.child_elements()
            .find(|e| e.namespace == namespace && e.local_name() == local)
    }

    /// First direct child matching `local_name` in any namespace.
    pub fn first_child_local(&self, local: &str) -> Option<&XmlElement> {
        self.child_elements().find(|e| e.local_name() == local)
    }

    /// All direct children matching `(namespace, local_name)`.
    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        local: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> {
        self.child_elements()
            .filter(move |e| e.namespace == namespace && e.local_name() == local)
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            if let XmlNode::Text(t) = node {
                out.push_str(t);
            }
        }
        out
    }

    /// Depth-first visit over this element and all descendants.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a XmlElement)) {
        f(self);
        for child in self.child_elements() {
            child.visit(f);
        }
    }

    /// Serializes the subtree to an XML string (no declaration).
    pub fn to_xml_string(&self) -> Result<String, XmlError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        write_element(&mut writer, self, false)?;
        let bytes = writer.into_inner().into_inner();
        String::from_utf8(bytes).map_err(|e| XmlError::Write(e.to_string()))
    }

    /// Deterministic byte serialization used as the digest/signature input.
    ///
    /// Attributes are emitted sorted by qname; element order and text content
    /// are preserved verbatim. Both signing and verification run through this
    /// same path, which is what makes digests reproducible.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, XmlError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        write_element(&mut writer, self, true)?;
        Ok(writer.into_inner().into_inner())
    }
}

fn write_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    element: &XmlElement,
    canonical: bool,
) -> Result<(), XmlError> {
    let mut start = BytesStart::new(element.qname.as_str());
    if canonical {
        let mut sorted: Vec<&XmlAttribute> = element.attributes.iter().collect();
        sorted.sort_by(|a, b| a.qname.cmp(&b.qname));
        for attr in sorted {
            start.push_attribute((attr.qname.as_str(), attr.value.as_str()));
        }
    } else {
        for attr in &element.attributes {
            start.push_attribute((attr.qname.as_str(), attr.value.as_str()));
        }
    }

    if element.children.is_empty() {
        writer
            .write_event(Event::Empty(start))
            .map_err(|e| XmlError::Write(e.to_string()))?;
        return Ok(());
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| XmlError::Write(e.to_string()))?;
    for child in &element.children {
        match child {
            XmlNode::Element(e) => write_element(writer, e, canonical)?,
            XmlNode::Text(t) => writer
                .write_event(Event::Text(BytesText::new(t)))
                .map_err(|e| XmlError::Write(e.to_string()))?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.qname.as_str())))
        .map_err(|e| XmlError::Write(e.to_string()))?;
    Ok(())
}

/// Parses a document into its root element with resolved namespaces.
pub fn parse_element(xml: &str) -> Result<XmlElement, XmlError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut scopes: Vec<HashMap<String, String>> = vec![HashMap::new()];
    let mut root: Option<XmlElement> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| XmlError::Parse(e.to_string()))?;
        match event {
            Event::Start(start) => {
                let element = open_element(&start, &mut scopes)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = open_element(&start, &mut scopes)?;
                scopes.pop();
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| {
                    XmlError::Parse("unbalanced end tag".to_string())
                })?;
                scopes.pop();
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let value = text
                    .unescape()
                    .map_err(|e| XmlError::Parse(e.to_string()))?
                    .into_owned();
                if value.trim().is_empty() {
                    continue;
                }
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(XmlNode::Text(value));
                }
            }
            Event::CData(data) => {
                let value = String::from_utf8(data.into_inner().into_owned())
                    .map_err(|e| XmlError::Parse(e.to_string()))?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(XmlNode::Text(value));
                }
            }
            Event::Eof => break,
            Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => {}
        }
    }

    if !stack.is_empty() {
        return Err(XmlError::Parse("unclosed element".to_string()));
    }
    root.ok_or(XmlError::NoRoot)
}

fn open_element(
    start: &BytesStart<'_>,
    scopes: &mut Vec<HashMap<String, String>>,
) -> Result<XmlElement, XmlError> {
    let qname = String::from_utf8(start.name().as_ref().to_vec())
        .map_err(|e| XmlError::Parse(e.to_string()))?;

    let mut attributes = Vec::new();
    let mut bindings = HashMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmlError::Parse(e.to_string()))?;
        let key = String::from_utf8(attr.key.as_ref().to_vec())
            .map_err(|e| XmlError::Parse(e.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|e| XmlError::Parse(e.to_string()))?
            .into_owned();
        if key == "xmlns" {
            bindings.insert(String::new(), value.clone());
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            bindings.insert(prefix.to_string(), value.clone());
        }
        attributes.push(XmlAttribute { qname: key, value });
    }

    let mut scope = scopes
        .last()
        .cloned()
        .unwrap_or_default();
    scope.extend(bindings);
    let prefix = match qname.split_once(':') {
        Some((p, _)) => p.to_string(),
        None => String::new(),
    };
    let namespace = scope.get(&prefix).cloned().unwrap_or_default();
    scopes.push(scope);

    Ok(XmlElement {
        qname,
        namespace,
        attributes,
        children: Vec::new(),
    })
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None => {
            if root.is_some() {
                return Err(XmlError::Parse("multiple root elements".to_string()));
            }
            *root = Some(element);
        }
    }
    Ok(())
}
