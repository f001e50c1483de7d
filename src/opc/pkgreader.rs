//! Low-level, read-only API to a serialized Open Packaging Convention (OPC) package.
//!
//! This module provides the PackageReader for parsing OPC packages, including
//! content type mapping, `.rels` parsing and the walk of the relationship
//! graph that decides which archive members are parts.

use crate::common::xml::XmlError;
use crate::opc::error::{OpcError, Result};
use crate::opc::packuri::{PACKAGE_URI, PackURI};
use crate::opc::phys_pkg::PhysPkgReader;
use crate::opc::rel::TargetMode;
use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::Event;
use quick_xml::events::attributes::Attribute;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Serialized part with its content and relationships.
///
/// Represents a part as loaded from the physical package, before
/// being converted into a Part object.
#[derive(Debug)]
pub struct SerializedPart {
    /// The partname (URI) of this part
    pub partname: PackURI,

    /// The content type of this part
    pub content_type: String,

    /// The binary content of this part
    pub blob: Vec<u8>,

    /// Serialized relationships from this part
    pub srels: SmallVec<[SerializedRelationship; 8]>,
}

/// Serialized relationship as read from a .rels file.
///
/// Contains all relationship information in string form, before
/// being converted into Relationship objects with resolved part references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedRelationship {
    /// Base URI of the source, for resolving relative references
    pub base_uri: String,

    /// Relationship ID (e.g., "rId1")
    pub r_id: String,

    /// Relationship type URI
    pub reltype: String,

    /// Target reference (relative URI or external URL)
    pub target_ref: String,

    pub target_mode: TargetMode,
}

impl SerializedRelationship {
    #[inline]
    pub fn is_external(&self) -> bool {
        self.target_mode == TargetMode::External
    }

    /// Get the target partname for internal relationships.
    ///
    /// Resolves the relative target reference against the base URI
    /// to produce an absolute PackURI.
    pub fn target_partname(&self) -> Result<PackURI> {
        if self.is_external() {
            return Err(OpcError::InvalidRelationship(format!(
                "cannot get target_partname for external relationship '{}'",
                self.r_id
            )));
        }
        PackURI::from_rel_ref(&self.base_uri, &self.target_ref)
    }
}

/// Content type map for looking up content types by part name or extension.
///
/// Implements the OPC content type discovery algorithm using Default and
/// Override elements from [Content_Types].xml. Keys are compared
/// case-insensitively.
#[derive(Debug, Default)]
pub(crate) struct ContentTypeMap {
    /// Maps lowercased file extensions to default content types
    defaults: HashMap<String, String>,

    /// Maps lowercased partnames to override content types
    overrides: HashMap<String, String>,
}

impl ContentTypeMap {
    /// Parse content types from [Content_Types].xml.
    pub(crate) fn from_xml(xml: &[u8]) -> Result<Self> {
        let mut map = Self::default();
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf).map_err(XmlError::from)? {
                Event::Empty(ref e) | Event::Start(ref e) => match e.local_name().as_ref() {
                    b"Default" => {
                        let mut extension = None;
                        let mut content_type = None;
                        for attr in e.attributes() {
                            let attr = attr.map_err(XmlError::from)?;
                            match attr.key.as_ref() {
                                b"Extension" => extension = Some(attr_value(&attr)?),
                                b"ContentType" => content_type = Some(attr_value(&attr)?),
                                _ => {},
                            }
                        }
                        if let (Some(ext), Some(ct)) = (extension, content_type) {
                            map.add_default(&ext, ct);
                        }
                    },
                    b"Override" => {
                        let mut partname = None;
                        let mut content_type = None;
                        for attr in e.attributes() {
                            let attr = attr.map_err(XmlError::from)?;
                            match attr.key.as_ref() {
                                b"PartName" => partname = Some(attr_value(&attr)?),
                                b"ContentType" => content_type = Some(attr_value(&attr)?),
                                _ => {},
                            }
                        }
                        if let (Some(pn), Some(ct)) = (partname, content_type) {
                            map.add_override(&pn, ct);
                        }
                    },
                    _ => {},
                },
                Event::Eof => break,
                _ => {},
            }
            buf.clear();
        }

        Ok(map)
    }

    pub(crate) fn add_default(&mut self, extension: &str, content_type: String) {
        self.defaults.insert(extension.to_lowercase(), content_type);
    }

    pub(crate) fn add_override(&mut self, partname: &str, content_type: String) {
        self.overrides.insert(partname.to_lowercase(), content_type);
    }

    /// Get the content type for a partname.
    ///
    /// An Override for the partname wins over the Default for its extension.
    pub(crate) fn get(&self, pack_uri: &PackURI) -> Result<&str> {
        if let Some(ct) = self.overrides.get(&pack_uri.as_str().to_lowercase()) {
            return Ok(ct);
        }
        if let Some(ct) = self.defaults.get(&pack_uri.ext().to_lowercase()) {
            return Ok(ct);
        }
        Err(OpcError::ContentTypeNotFound(pack_uri.to_string()))
    }
}

/// Unescaped, owned value of an XML attribute.
fn attr_value(attr: &Attribute<'_>) -> Result<String> {
    let raw = std::str::from_utf8(&attr.value).map_err(XmlError::from)?;
    Ok(unescape(raw).map_err(XmlError::from)?.into_owned())
}

/// Parse relationships XML into SerializedRelationship structs.
///
/// # Arguments
/// * `base_uri` - Base URI of the source the `.rels` belongs to
/// * `rels_xml` - Content of the `.rels` member
///
/// # Errors
/// `InvalidRelationship` for a `Relationship` element missing `Id`, `Type`
/// or `Target`.
pub fn parse_rels_xml(
    base_uri: &str,
    rels_xml: &[u8],
) -> Result<SmallVec<[SerializedRelationship; 8]>> {
    let mut srels = SmallVec::new();
    let mut reader = Reader::from_reader(rels_xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(XmlError::from)? {
            Event::Empty(ref e) | Event::Start(ref e)
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut r_id = None;
                let mut reltype = None;
                let mut target_ref = None;
                let mut target_mode = None;

                for attr in e.attributes() {
                    let attr = attr.map_err(XmlError::from)?;
                    match attr.key.as_ref() {
                        b"Id" => r_id = Some(attr_value(&attr)?),
                        b"Type" => reltype = Some(attr_value(&attr)?),
                        b"Target" => target_ref = Some(attr_value(&attr)?),
                        b"TargetMode" => target_mode = Some(attr_value(&attr)?),
                        _ => {},
                    }
                }

                let (Some(r_id), Some(reltype), Some(target_ref)) = (r_id, reltype, target_ref)
                else {
                    return Err(OpcError::InvalidRelationship(format!(
                        "relationship under '{}' lacks Id, Type or Target",
                        base_uri
                    )));
                };
                srels.push(SerializedRelationship {
                    base_uri: base_uri.to_string(),
                    r_id,
                    reltype,
                    target_ref,
                    target_mode: TargetMode::from_attr(target_mode.as_deref()),
                });
            },
            Event::Eof => break,
            _ => {},
        }
        buf.clear();
    }

    Ok(srels)
}

/// Package reader that provides access to serialized parts and relationships.
///
/// Only archive members reachable through relationships from the package
/// root become serialized parts. Relationship targets without an archive
/// member are skipped.
#[derive(Debug)]
pub struct PackageReader {
    /// Package-level relationships
    pkg_srels: SmallVec<[SerializedRelationship; 8]>,

    /// All serialized parts in the package
    sparts: Vec<SerializedPart>,
}

impl PackageReader {
    /// Read content types, package relationships and every reachable part.
    pub fn from_phys_reader(mut phys_reader: PhysPkgReader) -> Result<Self> {
        let content_types = ContentTypeMap::from_xml(&phys_reader.content_types_xml()?)?;
        let package_uri = PackURI::new(PACKAGE_URI)?;
        let pkg_srels = Self::srels_for(&mut phys_reader, &package_uri)?;
        let sparts = Self::load_sparts(&mut phys_reader, &pkg_srels, &content_types)?;
        debug!(
            members = phys_reader.len(),
            parts = sparts.len(),
            package_rels = pkg_srels.len(),
            "read package"
        );
        Ok(Self { pkg_srels, sparts })
    }

    fn srels_for(
        phys_reader: &mut PhysPkgReader,
        source_uri: &PackURI,
    ) -> Result<SmallVec<[SerializedRelationship; 8]>> {
        match phys_reader.rels_xml_for(source_uri)? {
            Some(xml) => parse_rels_xml(source_uri.base_uri(), &xml),
            None => Ok(SmallVec::new()),
        }
    }

    /// Walk the relationship graph from the package relationships, loading
    /// each internal target once.
    fn load_sparts(
        phys_reader: &mut PhysPkgReader,
        pkg_srels: &[SerializedRelationship],
        content_types: &ContentTypeMap,
    ) -> Result<Vec<SerializedPart>> {
        let mut sparts = Vec::new();
        let mut visited: HashSet<PackURI> = HashSet::new();
        let mut work_queue: Vec<PackURI> = Vec::new();

        Self::enqueue_targets(pkg_srels, &mut visited, &mut work_queue);
        // pop from the back, so reverse to keep document order for siblings
        work_queue.reverse();

        while let Some(partname) = work_queue.pop() {
            let blob = match phys_reader.blob_for(&partname) {
                Ok(blob) => blob,
                Err(OpcError::PartNotFound(_)) => {
                    debug!(partname = %partname, "relationship target has no archive member");
                    continue;
                },
                Err(e) => return Err(e),
            };
            let content_type = content_types.get(&partname)?.to_string();
            let srels = Self::srels_for(phys_reader, &partname)?;

            let mut children = Vec::new();
            Self::enqueue_targets(&srels, &mut visited, &mut children);
            work_queue.extend(children.into_iter().rev());

            sparts.push(SerializedPart {
                partname,
                content_type,
                blob,
                srels,
            });
        }

        Ok(sparts)
    }

    fn enqueue_targets(
        srels: &[SerializedRelationship],
        visited: &mut HashSet<PackURI>,
        queue: &mut Vec<PackURI>,
    ) {
        for srel in srels.iter().filter(|srel| !srel.is_external()) {
            match srel.target_partname() {
                Ok(partname) => {
                    if visited.insert(partname.clone()) {
                        queue.push(partname);
                    }
                },
                Err(e) => {
                    debug!(
                        r_id = %srel.r_id,
                        target = %srel.target_ref,
                        error = %e,
                        "unresolvable relationship target"
                    );
                },
            }
        }
    }

    /// Get an iterator over all serialized parts.
    pub fn iter_sparts(&self) -> impl Iterator<Item = &SerializedPart> {
        self.sparts.iter()
    }

    /// Take ownership of all serialized parts, leaving none behind.
    pub fn take_sparts(&mut self) -> Vec<SerializedPart> {
        std::mem::take(&mut self.sparts)
    }

    /// Part-level relationships, paired with the partname of their source.
    pub fn iter_srels(&self) -> impl Iterator<Item = (&PackURI, &SerializedRelationship)> {
        self.sparts
            .iter()
            .flat_map(|spart| spart.srels.iter().map(move |srel| (&spart.partname, srel)))
    }

    /// Get package-level relationships.
    pub fn pkg_srels(&self) -> &[SerializedRelationship] {
        &self.pkg_srels
    }
}
