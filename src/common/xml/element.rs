use super::{XML_DECLARATION, XmlError};
use quick_xml::Reader;
use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesStart, Event};
use std::borrow::Cow;
use std::rc::Rc;

/// A node in the content of an element.
///
/// Text-like nodes hold their raw, still-escaped content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
}

/// An XML element with its attributes and child nodes.
///
/// Names are kept as qualified names (`p:sld`, `r:id`). Namespace
/// declarations are ordinary `xmlns`/`xmlns:*` attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    name: String,
    /// (qualified name, raw escaped value) in document order
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

impl XmlElement {
    /// Create an empty element with the given qualified name.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Qualified name, e.g. `p:sld`.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local part of the qualified name, e.g. `sld` for `p:sld`.
    pub fn local_name(&self) -> &str {
        split_qname(&self.name).1
    }

    /// Namespace prefix of the qualified name, if any.
    pub fn prefix(&self) -> Option<&str> {
        split_qname(&self.name).0
    }

    /// Unescaped value of the attribute with the given qualified name.
    ///
    /// A value carrying an unknown entity is returned raw.
    pub fn attribute(&self, qname: &str) -> Option<Cow<'_, str>> {
        self.attributes
            .iter()
            .find(|(name, _)| name == qname)
            .map(|(_, raw)| unescape(raw).unwrap_or(Cow::Borrowed(raw.as_str())))
    }

    /// Set (or replace) an attribute. The value is escaped on the way in.
    pub fn set_attribute<K: Into<String>>(&mut self, qname: K, value: &str) {
        let qname = qname.into();
        let raw = escape(value).into_owned();
        match self.attributes.iter_mut().find(|(name, _)| *name == qname) {
            Some(slot) => slot.1 = raw,
            None => self.attributes.push((qname, raw)),
        }
    }

    /// Remove an attribute, returning its unescaped value.
    pub fn remove_attribute(&mut self, qname: &str) -> Option<String> {
        let pos = self.attributes.iter().position(|(name, _)| name == qname)?;
        let (_, raw) = self.attributes.remove(pos);
        Some(unescape(&raw).map(Cow::into_owned).unwrap_or(raw))
    }

    /// Attributes as (qualified name, raw escaped value) pairs.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[inline]
    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    #[inline]
    pub fn children_mut(&mut self) -> &mut Vec<XmlNode> {
        &mut self.children
    }

    /// Child elements, skipping text and other node kinds.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    /// First child element with the given local name.
    pub fn find(&self, local_name: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.local_name() == local_name)
    }

    /// Mutable first child element with the given local name.
    pub fn find_mut(&mut self, local_name: &str) -> Option<&mut XmlElement> {
        self.children.iter_mut().find_map(|node| match node {
            XmlNode::Element(e) if e.local_name() == local_name => Some(e),
            _ => None,
        })
    }

    /// Append a child element and return a mutable reference to it.
    pub fn push_element(&mut self, child: XmlElement) -> &mut XmlElement {
        self.children.push(XmlNode::Element(child));
        match self.children.last_mut() {
            Some(XmlNode::Element(e)) => e,
            _ => unreachable!("element pushed above"),
        }
    }

    /// Append text content. The text is escaped on the way in.
    pub fn push_text(&mut self, text: &str) {
        self.push_raw_text(&escape(text));
    }

    /// Remove every child element with the given local name, returning how many went.
    pub fn remove_elements(&mut self, local_name: &str) -> usize {
        let before = self.children.len();
        self.children
            .retain(|node| !matches!(node, XmlNode::Element(e) if e.local_name() == local_name));
        before - self.children.len()
    }

    /// Concatenated, unescaped text of this element's direct text children.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            match node {
                XmlNode::Text(raw) => {
                    out.push_str(&unescape(raw).unwrap_or(Cow::Borrowed(raw.as_str())))
                },
                XmlNode::CData(data) => out.push_str(data),
                _ => {},
            }
        }
        out
    }

    /// Collect the unescaped values of every attribute, anywhere in this
    /// subtree, whose name resolves to `local_name` in namespace `namespace_uri`.
    ///
    /// Prefixes are resolved against the `xmlns:*` declarations in scope at
    /// each element. Declarations on ancestors outside this subtree are not seen.
    pub fn attribute_values_ns(&self, namespace_uri: &str, local_name: &str) -> Vec<String> {
        let mut values = Vec::new();
        let mut stack: Vec<(&XmlElement, Rc<Vec<(String, String)>>)> =
            vec![(self, Rc::new(Vec::new()))];

        while let Some((element, parent_scope)) = stack.pop() {
            let scope = element.extend_scope(parent_scope);

            for (qname, raw) in &element.attributes {
                let (prefix, local) = split_qname(qname);
                let Some(prefix) = prefix else { continue };
                if local != local_name || prefix == "xmlns" {
                    continue;
                }
                let bound = scope
                    .iter()
                    .rev()
                    .find(|(p, _)| p == prefix)
                    .map(|(_, uri)| uri.as_str());
                if bound == Some(namespace_uri) {
                    values.push(unescape(raw).map(Cow::into_owned).unwrap_or_else(|_| raw.clone()));
                }
            }

            for child in element.elements().collect::<Vec<_>>().into_iter().rev() {
                stack.push((child, Rc::clone(&scope)));
            }
        }

        values
    }

    /// Scope of prefix bindings visible inside this element.
    fn extend_scope(&self, parent: Rc<Vec<(String, String)>>) -> Rc<Vec<(String, String)>> {
        let declared: Vec<(String, String)> = self
            .attributes
            .iter()
            .filter_map(|(qname, raw)| {
                qname
                    .strip_prefix("xmlns:")
                    .map(|prefix| (prefix.to_string(), raw.clone()))
            })
            .collect();
        if declared.is_empty() {
            return parent;
        }
        let mut scope = (*parent).clone();
        scope.extend(declared);
        Rc::new(scope)
    }

    /// Serialize this element (without an XML declaration).
    pub fn to_xml_string(&self) -> String {
        let mut out = String::with_capacity(256);
        self.write_into(&mut out);
        out
    }

    fn write_into(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (qname, raw) in &self.attributes {
            out.push(' ');
            out.push_str(qname);
            out.push_str("=\"");
            out.push_str(raw);
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.children {
            match node {
                XmlNode::Element(child) => child.write_into(out),
                XmlNode::Text(raw) => out.push_str(raw),
                XmlNode::CData(data) => {
                    out.push_str("<![CDATA[");
                    out.push_str(data);
                    out.push_str("]]>");
                },
                XmlNode::Comment(text) => {
                    out.push_str("<!--");
                    out.push_str(text);
                    out.push_str("-->");
                },
                XmlNode::ProcessingInstruction(content) => {
                    out.push_str("<?");
                    out.push_str(content);
                    out.push_str("?>");
                },
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }

    fn push_raw_text(&mut self, raw: &str) {
        if let Some(XmlNode::Text(last)) = self.children.last_mut() {
            last.push_str(raw);
        } else {
            self.children.push(XmlNode::Text(raw.to_string()));
        }
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self, XmlError> {
        let mut element = Self::new(std::str::from_utf8(start.name().as_ref())?);
        for attr in start.attributes() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref())?;
            let raw = std::str::from_utf8(&attr.value)?;
            // values may have been single-quoted; output always uses double quotes
            let raw = if raw.contains('"') { raw.replace('"', "&quot;") } else { raw.to_string() };
            element.attributes.push((key.to_string(), raw));
        }
        Ok(element)
    }
}

impl std::fmt::Display for XmlElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_xml_string())
    }
}

/// Split `p:name` into (`Some("p")`, `"name"`).
fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match memchr::memchr(b':', qname.as_bytes()) {
        Some(pos) => (Some(&qname[..pos]), &qname[pos + 1..]),
        None => (None, qname),
    }
}

/// Parse an XML document into its root element.
///
/// The XML declaration, doctype and anything outside the root element are
/// discarded.
pub fn parse_xml(xml: &[u8]) -> Result<XmlElement, XmlError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => stack.push(XmlElement::from_start(e)?),
            Event::Empty(ref e) => {
                let element = XmlElement::from_start(e)?;
                close_element(&mut stack, &mut root, element);
            },
            Event::End(ref e) => {
                let element = stack.pop().ok_or_else(|| {
                    XmlError::UnbalancedEnd(String::from_utf8_lossy(e.name().as_ref()).into_owned())
                })?;
                close_element(&mut stack, &mut root, element);
            },
            Event::Text(ref e) => {
                if let Some(parent) = stack.last_mut() {
                    parent.push_raw_text(std::str::from_utf8(e)?);
                }
            },
            Event::GeneralRef(ref e) => {
                if let Some(parent) = stack.last_mut() {
                    let name = std::str::from_utf8(e)?;
                    parent.push_raw_text(&format!("&{};", name));
                }
            },
            Event::CData(ref e) => {
                if let Some(parent) = stack.last_mut() {
                    let data = std::str::from_utf8(e)?.to_string();
                    parent.children.push(XmlNode::CData(data));
                }
            },
            Event::Comment(ref e) => {
                if let Some(parent) = stack.last_mut() {
                    let text = std::str::from_utf8(e)?.to_string();
                    parent.children.push(XmlNode::Comment(text));
                }
            },
            Event::PI(ref e) => {
                if let Some(parent) = stack.last_mut() {
                    let content = std::str::from_utf8(e)?.to_string();
                    parent.children.push(XmlNode::ProcessingInstruction(content));
                }
            },
            Event::Eof => break,
            _ => {},
        }
        buf.clear();
    }

    root.ok_or(XmlError::NoRootElement)
}

fn close_element(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        // Only the first top-level element is the document root.
        None if root.is_none() => *root = Some(element),
        None => {},
    }
}

/// Serialize a part's root element, prefixed with a UTF-8 standalone declaration.
pub fn serialize_part_xml(root: &XmlElement) -> Vec<u8> {
    let mut out = String::with_capacity(1024);
    out.push_str(XML_DECLARATION);
    out.push('\n');
    root.write_into(&mut out);
    out.into_bytes()
}
