//! Open Packaging Convention (OPC) objects related to package parts.
//!
//! This module provides the Part trait with its two stock implementations,
//! `BlobPart` for opaque payloads and `XmlPart` for parsed XML, plus the
//! `PartFactory` registry that picks an implementation from a content type.
use crate::common::xml::{XmlElement, parse_xml, serialize_part_xml};
use crate::opc::constants::{content_type as ct, namespace};
use crate::opc::error::{OpcError, Result};
use crate::opc::package::{Package, PartId};
use crate::opc::packuri::PackURI;
use crate::opc::rel::{LazyRelationships, RelTarget, Relationship, Relationships};
use once_cell::sync::Lazy;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

/// Trait representing a part in an OPC package.
///
/// Parts are the nodes of the package graph. Each part has a partname, a
/// content type, a payload and a relationship collection created on first
/// access. Only XML-bearing parts expose an element tree.
///
/// Parts are `Send`, so a whole `Package` can move to another thread.
pub trait Part: std::fmt::Debug + Send {
    /// Get the partname of this part.
    fn partname(&self) -> &PackURI;

    /// Rename this part. An existing relationship collection is rebased onto
    /// the new partname's directory.
    fn set_partname(&mut self, partname: PackURI);

    /// Get the content type of this part.
    fn content_type(&self) -> &str;

    /// Get the binary content of this part.
    fn blob(&self) -> Cow<'_, [u8]>;

    /// Replace the binary content of this part.
    fn set_blob(&mut self, blob: Vec<u8>) -> Result<()>;

    /// Get the relationships for this part.
    fn rels(&self) -> &Relationships;

    /// Get mutable access to the relationships for this part.
    fn rels_mut(&mut self) -> &mut Relationships;

    /// The XML view of this part, for XML-bearing parts.
    fn as_xml_part(&self) -> Option<&XmlPart> {
        None
    }

    /// Mutable XML view of this part, for XML-bearing parts.
    fn as_xml_part_mut(&mut self) -> Option<&mut XmlPart> {
        None
    }

    /// Count references to a relationship ID in the part content.
    ///
    /// `None` for parts without an XML tree.
    fn rel_ref_count(&self, r_id: &str) -> Option<usize> {
        self.as_xml_part().map(|xml| xml.count_rel_refs(r_id))
    }

    /// Install a relationship with a known rId, replacing any with the same id.
    fn load_rel(&mut self, reltype: &str, target: RelTarget, r_id: &str) -> &Relationship {
        self.rels_mut().add_relationship(reltype, target, r_id)
    }

    /// Add or get a relationship to another part.
    ///
    /// If a relationship of the given type to the target already exists,
    /// returns its rId. Otherwise, creates a new relationship and returns
    /// the new rId.
    fn relate_to(&mut self, target: PartId, reltype: &str) -> String {
        self.rels_mut().get_or_add(reltype, target)
    }

    /// Add or get an external relationship.
    fn relate_to_ext(&mut self, target_ref: &str, reltype: &str) -> String {
        self.rels_mut().get_or_add_ext_rel(reltype, target_ref)
    }

    /// Get the single part this part relates to with `reltype`.
    fn part_related_by(&self, reltype: &str) -> Result<PartId> {
        self.rels().part_with_reltype(reltype)
    }

    /// Get the part targeted by the relationship `r_id`.
    fn related_part(&self, r_id: &str) -> Result<PartId> {
        self.rels().related_part(r_id)
    }

    /// Get the target reference of relationship `r_id` as written in this
    /// part's `.rels`: a partname relative to this part, or an external URL.
    fn target_ref<'a>(&'a self, r_id: &str, package: &Package) -> Result<Cow<'a, str>> {
        self.rels().related(r_id)?.target_ref(package)
    }

    /// Remove relationship `r_id` if the part's XML references it fewer than
    /// two times. Returns whether it was removed.
    ///
    /// Only XML parts can drop relationships.
    fn drop_rel(&mut self, r_id: &str) -> Result<bool> {
        let count = self.rel_ref_count(r_id).ok_or_else(|| {
            OpcError::InvalidArgument(format!(
                "part '{}' has no XML payload and cannot drop relationships",
                self.partname()
            ))
        })?;
        if count >= 2 {
            return Ok(false);
        }
        self.rels_mut().pop(r_id)?;
        Ok(true)
    }
}

/// A part that stores its content as opaque bytes.
///
/// This is the default part type for content types without a registered
/// constructor: images, media, embedded packages.
#[derive(Debug)]
pub struct BlobPart {
    partname: PackURI,
    content_type: String,
    blob: Vec<u8>,
    rels: LazyRelationships,
}

impl BlobPart {
    pub fn new(partname: PackURI, content_type: String, blob: Vec<u8>) -> Self {
        Self {
            partname,
            content_type,
            blob,
            rels: LazyRelationships::new(),
        }
    }

    /// Load a part from raw data. The bytes are stored as-is.
    pub fn load(partname: PackURI, content_type: String, blob: Vec<u8>) -> Self {
        Self::new(partname, content_type, blob)
    }

    /// Create a part whose payload is read from any reader.
    pub fn from_reader<R: Read>(
        partname: PackURI,
        content_type: String,
        mut reader: R,
    ) -> Result<Self> {
        let mut blob = Vec::new();
        reader.read_to_end(&mut blob)?;
        Ok(Self::new(partname, content_type, blob))
    }

    /// Create a part whose payload is the content of the file at `path`.
    pub fn from_file<P: AsRef<Path>>(
        partname: PackURI,
        content_type: String,
        path: P,
    ) -> Result<Self> {
        let blob = std::fs::read(path)?;
        Ok(Self::new(partname, content_type, blob))
    }
}

impl Part for BlobPart {
    fn partname(&self) -> &PackURI {
        &self.partname
    }

    fn set_partname(&mut self, partname: PackURI) {
        if let Some(rels) = self.rels.initialized_mut() {
            rels.rebase(partname.base_uri());
        }
        self.partname = partname;
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn blob(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(&self.blob)
    }

    fn set_blob(&mut self, blob: Vec<u8>) -> Result<()> {
        self.blob = blob;
        Ok(())
    }

    fn rels(&self) -> &Relationships {
        self.rels.get(self.partname.base_uri())
    }

    fn rels_mut(&mut self) -> &mut Relationships {
        self.rels.get_mut(self.partname.base_uri())
    }
}

/// A part whose payload is an XML document held as a parsed tree.
///
/// The blob is always produced by serializing the current tree, so edits made
/// through `element_mut` show up in the next `blob()` call. The bytes the part
/// was loaded from are not retained.
#[derive(Debug)]
pub struct XmlPart {
    partname: PackURI,
    content_type: String,
    element: XmlElement,
    rels: LazyRelationships,
}

impl XmlPart {
    pub fn new(partname: PackURI, content_type: String, element: XmlElement) -> Self {
        Self {
            partname,
            content_type,
            element,
            rels: LazyRelationships::new(),
        }
    }

    /// Load an XML part from raw data, parsing it eagerly.
    pub fn load(partname: PackURI, content_type: String, blob: Vec<u8>) -> Result<Self> {
        let element = parse_xml(&blob)?;
        Ok(Self::new(partname, content_type, element))
    }

    /// Root element of the part's XML.
    #[inline]
    pub fn element(&self) -> &XmlElement {
        &self.element
    }

    #[inline]
    pub fn element_mut(&mut self) -> &mut XmlElement {
        &mut self.element
    }

    /// Number of `r:id` attributes in the tree whose value is `r_id`.
    ///
    /// Counts attributes named `id` in the officeDocument relationships
    /// namespace, whatever prefix they are bound to.
    pub fn count_rel_refs(&self, r_id: &str) -> usize {
        self.element
            .attribute_values_ns(namespace::OFC_RELATIONSHIPS, "id")
            .iter()
            .filter(|value| value.as_str() == r_id)
            .count()
    }
}

impl Part for XmlPart {
    fn partname(&self) -> &PackURI {
        &self.partname
    }

    fn set_partname(&mut self, partname: PackURI) {
        if let Some(rels) = self.rels.initialized_mut() {
            rels.rebase(partname.base_uri());
        }
        self.partname = partname;
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn blob(&self) -> Cow<'_, [u8]> {
        Cow::Owned(serialize_part_xml(&self.element))
    }

    fn set_blob(&mut self, blob: Vec<u8>) -> Result<()> {
        self.element = parse_xml(&blob)?;
        Ok(())
    }

    fn rels(&self) -> &Relationships {
        self.rels.get(self.partname.base_uri())
    }

    fn rels_mut(&mut self) -> &mut Relationships {
        self.rels.get_mut(self.partname.base_uri())
    }

    fn as_xml_part(&self) -> Option<&XmlPart> {
        Some(self)
    }

    fn as_xml_part_mut(&mut self) -> Option<&mut XmlPart> {
        Some(self)
    }
}

/// Builds a boxed part from `(partname, content_type, blob)`.
pub type PartConstructor = fn(PackURI, String, Vec<u8>) -> Result<Box<dyn Part>>;

/// Constructor for `BlobPart`, the fallback for unregistered content types.
pub fn load_blob_part(
    partname: PackURI,
    content_type: String,
    blob: Vec<u8>,
) -> Result<Box<dyn Part>> {
    Ok(Box::new(BlobPart::load(partname, content_type, blob)))
}

/// Constructor for `XmlPart`.
pub fn load_xml_part(
    partname: PackURI,
    content_type: String,
    blob: Vec<u8>,
) -> Result<Box<dyn Part>> {
    Ok(Box::new(XmlPart::load(partname, content_type, blob)?))
}

/// Content types loaded as `XmlPart` by `PartFactory::standard()`.
///
/// Generic `application/xml` items (custom XML data) stay opaque blobs; they
/// may use any encoding the XML declaration allows.
const STANDARD_XML_CONTENT_TYPES: &[&str] = &[
    ct::PML_PRESENTATION_MAIN,
    ct::PML_SLIDE,
    ct::PML_SLIDE_LAYOUT,
    ct::PML_SLIDE_MASTER,
    ct::PML_NOTES_SLIDE,
    ct::PML_NOTES_MASTER,
    ct::PML_HANDOUT_MASTER,
    ct::PML_COMMENTS,
    ct::PML_COMMENT_AUTHORS,
    ct::PML_PRES_PROPS,
    ct::PML_VIEW_PROPS,
    ct::PML_TABLE_STYLES,
    ct::DML_CHART,
    ct::DML_CHARTSHAPES,
    ct::DML_DIAGRAM_DATA,
    ct::OFC_THEME,
    ct::OFC_CUSTOM_PROPERTIES,
    ct::OFC_EXTENDED_PROPERTIES,
    ct::OPC_CORE_PROPERTIES,
    ct::SML_SHEET_MAIN,
    ct::WML_DOCUMENT_MAIN,
];

static STANDARD_FACTORY: Lazy<PartFactory> = Lazy::new(|| {
    STANDARD_XML_CONTENT_TYPES
        .iter()
        .fold(PartFactory::builder(), |builder, content_type| {
            builder.register(*content_type, load_xml_part)
        })
        .build()
});

/// Factory for creating Part instances based on content type.
///
/// A fixed table from content type to constructor, with a default constructor
/// for everything unregistered. Tables are assembled with
/// [`PartFactoryBuilder`] and are immutable once built.
#[derive(Debug, Clone)]
pub struct PartFactory {
    part_type_for: HashMap<String, PartConstructor>,
    default_part_type: PartConstructor,
}

impl PartFactory {
    /// Start an empty table whose default constructor is `BlobPart`.
    pub fn builder() -> PartFactoryBuilder {
        PartFactoryBuilder {
            part_type_for: HashMap::new(),
            default_part_type: load_blob_part,
        }
    }

    /// The process-wide table mapping the well-known XML content types to
    /// `XmlPart`. Built on first use.
    pub fn standard() -> &'static PartFactory {
        &STANDARD_FACTORY
    }

    /// Start a builder pre-populated with this table's entries.
    pub fn to_builder(&self) -> PartFactoryBuilder {
        PartFactoryBuilder {
            part_type_for: self.part_type_for.clone(),
            default_part_type: self.default_part_type,
        }
    }

    /// Construct the part for `content_type` through its registered constructor.
    pub fn load(
        &self,
        partname: PackURI,
        content_type: String,
        blob: Vec<u8>,
    ) -> Result<Box<dyn Part>> {
        let constructor = self.constructor_for(&content_type);
        constructor(partname, content_type, blob)
    }

    /// The constructor used for `content_type`.
    pub fn constructor_for(&self, content_type: &str) -> PartConstructor {
        self.part_type_for
            .get(content_type)
            .copied()
            .unwrap_or(self.default_part_type)
    }

    #[inline]
    pub fn is_registered(&self, content_type: &str) -> bool {
        self.part_type_for.contains_key(content_type)
    }
}

impl Default for PartFactory {
    fn default() -> Self {
        Self::standard().clone()
    }
}

/// Assembles a [`PartFactory`].
#[derive(Debug, Clone)]
pub struct PartFactoryBuilder {
    part_type_for: HashMap<String, PartConstructor>,
    default_part_type: PartConstructor,
}

impl PartFactoryBuilder {
    /// Use `constructor` for parts of `content_type`.
    pub fn register<S: Into<String>>(
        mut self,
        content_type: S,
        constructor: PartConstructor,
    ) -> Self {
        self.part_type_for.insert(content_type.into(), constructor);
        self
    }

    /// Use `constructor` for every unregistered content type.
    pub fn default_part_type(mut self, constructor: PartConstructor) -> Self {
        self.default_part_type = constructor;
        self
    }

    pub fn build(self) -> PartFactory {
        PartFactory {
            part_type_for: self.part_type_for,
            default_part_type: self.default_part_type,
        }
    }
}
