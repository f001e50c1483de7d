//! Minimal owned XML tree used by XML-bearing package parts.
//!
//! Parsing is done with `quick-xml` in a single streaming pass. Text and
//! attribute values are kept in their escaped (on-the-wire) form so that a
//! parse/serialize cycle does not disturb content the engine never touched.

mod element;

pub use element::{XmlElement, XmlNode, parse_xml, serialize_part_xml};

use thiserror::Error;

/// XML declaration emitted at the top of every serialized part.
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(#[from] quick_xml::Error),

    #[error("Attribute error: {0}")]
    Attr(String),

    #[error("Escape error: {0}")]
    Escape(#[from] quick_xml::escape::EscapeError),

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Document has no root element")]
    NoRootElement,

    #[error("Unbalanced end tag: {0}")]
    UnbalancedEnd(String),
}

impl From<quick_xml::events::attributes::AttrError> for XmlError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        XmlError::Attr(err.to_string())
    }
}
