//! Relationship-related objects for OPC packages.
//!
//! This module provides the types for the edges of the part graph: a single
//! immutable `Relationship` and the per-owner `Relationships` collection that
//! allocates ids and answers lookups by id or by relationship type.
use crate::opc::constants::{namespace, target_mode};
use crate::opc::error::{OpcError, Result};
use crate::opc::package::{Package, PartId};
use crate::opc::packuri::PackURI;
use fixedbitset::FixedBitSet;
use indexmap::IndexMap;
use once_cell::unsync::OnceCell;
use quick_xml::escape::escape;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::collections::HashMap;

/// Whether a relationship points inside or outside the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetMode {
    Internal,
    External,
}

impl TargetMode {
    /// Parse the `TargetMode` attribute of a `.rels` entry. Absent means internal.
    pub fn from_attr(value: Option<&str>) -> Self {
        match value {
            Some(target_mode::EXTERNAL) => TargetMode::External,
            _ => TargetMode::Internal,
        }
    }

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetMode::Internal => target_mode::INTERNAL,
            TargetMode::External => target_mode::EXTERNAL,
        }
    }
}

/// The far end of a relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RelTarget {
    /// A part of the same package
    Part(PartId),
    /// A reference outside the package, typically a URL
    External(String),
}

impl RelTarget {
    #[inline]
    pub fn mode(&self) -> TargetMode {
        match self {
            RelTarget::Part(_) => TargetMode::Internal,
            RelTarget::External(_) => TargetMode::External,
        }
    }
}

impl From<PartId> for RelTarget {
    fn from(id: PartId) -> Self {
        RelTarget::Part(id)
    }
}

/// A single relationship from a source (part or package) to a target.
///
/// Identified by an rId unique within its owning collection. The target mode
/// follows from the target variant and cannot change once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Relationship ID (e.g., "rId1", "rId2")
    r_id: String,

    /// Relationship type URI
    reltype: String,

    /// Target part or external reference
    target: RelTarget,

    /// Base URI of the owner, for producing relative target references
    base_uri: String,
}

impl Relationship {
    pub fn new(r_id: String, reltype: String, target: RelTarget, base_uri: String) -> Self {
        Self {
            r_id,
            reltype,
            target,
            base_uri,
        }
    }

    #[inline]
    pub fn r_id(&self) -> &str {
        &self.r_id
    }

    #[inline]
    pub fn reltype(&self) -> &str {
        &self.reltype
    }

    #[inline]
    pub fn target(&self) -> &RelTarget {
        &self.target
    }

    #[inline]
    pub fn target_mode(&self) -> TargetMode {
        self.target.mode()
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        self.target_mode() == TargetMode::External
    }

    #[inline]
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// Get the target part of an internal relationship.
    ///
    /// Returns an error if this is an external relationship.
    pub fn target_part(&self) -> Result<PartId> {
        match &self.target {
            RelTarget::Part(id) => Ok(*id),
            RelTarget::External(_) => Err(OpcError::InvalidArgument(format!(
                "target_part is undefined for external relationship '{}'",
                self.r_id
            ))),
        }
    }

    /// Get the partname of the target part of an internal relationship.
    pub fn target_partname<'p>(&self, package: &'p Package) -> Result<&'p PackURI> {
        let id = self.target_part()?;
        Ok(package.part(id)?.partname())
    }

    /// Get the target reference as it appears in a `.rels` file.
    ///
    /// For internal relationships this is the target partname relative to the
    /// owner's base URI; for external relationships it is the raw reference.
    pub fn target_ref<'a>(&'a self, package: &Package) -> Result<Cow<'a, str>> {
        match &self.target {
            RelTarget::External(target_ref) => Ok(Cow::Borrowed(target_ref)),
            RelTarget::Part(id) => Ok(Cow::Owned(
                package.part(*id)?.partname().relative_ref(&self.base_uri),
            )),
        }
    }
}

/// Collection of relationships from a single source.
///
/// Entries keep insertion order. A secondary index groups rIds by
/// relationship type and is kept in step with every insert and removal.
#[derive(Debug, Clone)]
pub struct Relationships {
    /// Base URI for resolving relative references
    base_uri: String,

    /// Map of relationship ID to Relationship
    rels: IndexMap<String, Relationship>,

    /// rIds grouped by relationship type
    by_reltype: HashMap<String, SmallVec<[String; 2]>>,
}

impl Relationships {
    /// Create a new empty relationships collection.
    pub fn new<S: Into<String>>(base_uri: S) -> Self {
        Self {
            base_uri: base_uri.into(),
            rels: IndexMap::new(),
            by_reltype: HashMap::new(),
        }
    }

    #[inline]
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// Insert a relationship under an explicit id, replacing any relationship
    /// already stored under that id.
    ///
    /// Used when loading, where ids are already assigned.
    pub fn add_relationship(
        &mut self,
        reltype: &str,
        target: RelTarget,
        r_id: &str,
    ) -> &Relationship {
        let rel = Relationship::new(
            r_id.to_string(),
            reltype.to_string(),
            target,
            self.base_uri.clone(),
        );
        if let Some(previous) = self.rels.insert(r_id.to_string(), rel) {
            self.unindex(&previous);
        }
        self.by_reltype
            .entry(reltype.to_string())
            .or_default()
            .push(r_id.to_string());
        &self.rels[r_id]
    }

    /// Get a relationship by its ID.
    #[inline]
    pub fn get(&self, r_id: &str) -> Option<&Relationship> {
        self.rels.get(r_id)
    }

    /// Get a relationship by its ID, failing with `RelationshipNotFound`.
    pub fn related(&self, r_id: &str) -> Result<&Relationship> {
        self.rels.get(r_id).ok_or_else(|| {
            OpcError::RelationshipNotFound(format!("no relationship with key '{}'", r_id))
        })
    }

    /// Target part of the relationship identified by `r_id`.
    pub fn related_part(&self, r_id: &str) -> Result<PartId> {
        self.related(r_id)?.target_part()
    }

    #[inline]
    pub fn contains(&self, r_id: &str) -> bool {
        self.rels.contains_key(r_id)
    }

    /// Return the rId of the internal relationship of `reltype` to `target`,
    /// adding one with the next available rId when none exists.
    pub fn get_or_add(&mut self, reltype: &str, target: PartId) -> String {
        let target = RelTarget::Part(target);
        if let Some(r_id) = self.find_matching(reltype, &target) {
            return r_id;
        }
        let r_id = self.next_r_id();
        self.add_relationship(reltype, target, &r_id);
        r_id
    }

    /// Same as `get_or_add` for an external relationship, compared by the raw
    /// target reference.
    pub fn get_or_add_ext_rel(&mut self, reltype: &str, target_ref: &str) -> String {
        let target = RelTarget::External(target_ref.to_string());
        if let Some(r_id) = self.find_matching(reltype, &target) {
            return r_id;
        }
        let r_id = self.next_r_id();
        self.add_relationship(reltype, target, &r_id);
        r_id
    }

    fn find_matching(&self, reltype: &str, target: &RelTarget) -> Option<String> {
        self.by_reltype(reltype)
            .find(|rel| rel.target() == target)
            .map(|rel| rel.r_id().to_string())
    }

    /// Relationships of a given type, in insertion order.
    pub fn by_reltype<'a>(
        &'a self,
        reltype: &str,
    ) -> impl Iterator<Item = &'a Relationship> + use<'a> {
        self.by_reltype
            .get(reltype)
            .into_iter()
            .flatten()
            .filter_map(|r_id| self.rels.get(r_id.as_str()))
    }

    /// Get the target part of the single relationship of `reltype`.
    ///
    /// Returns `RelationshipNotFound` if no relationship of the type exists and
    /// `AmbiguousRelationship` if more than one does.
    pub fn part_with_reltype(&self, reltype: &str) -> Result<PartId> {
        let mut matching = self.by_reltype(reltype);
        let rel = matching.next().ok_or_else(|| {
            OpcError::RelationshipNotFound(format!(
                "no relationship of type '{}' in collection",
                reltype
            ))
        })?;
        if matching.next().is_some() {
            return Err(OpcError::AmbiguousRelationship(format!(
                "multiple relationships of type '{}' in collection",
                reltype
            )));
        }
        match rel.target() {
            RelTarget::Part(id) => Ok(*id),
            RelTarget::External(target_ref) => Err(OpcError::InvalidRelationship(format!(
                "relationship of type '{}' targets external '{}'",
                reltype, target_ref
            ))),
        }
    }

    /// Remove and return the relationship identified by `r_id`.
    ///
    /// The caller is responsible for ensuring it is no longer referenced.
    pub fn pop(&mut self, r_id: &str) -> Result<Relationship> {
        let rel = self.rels.shift_remove(r_id).ok_or_else(|| {
            OpcError::RelationshipNotFound(format!("no relationship with key '{}'", r_id))
        })?;
        self.unindex(&rel);
        Ok(rel)
    }

    /// Remove every relationship.
    pub fn clear(&mut self) {
        self.rels.clear();
        self.by_reltype.clear();
    }

    /// Move the collection (and every relationship in it) to a new base URI.
    pub fn rebase(&mut self, base_uri: &str) {
        self.base_uri = base_uri.to_string();
        for rel in self.rels.values_mut() {
            rel.base_uri = base_uri.to_string();
        }
    }

    fn unindex(&mut self, rel: &Relationship) {
        if let Some(bucket) = self.by_reltype.get_mut(rel.reltype()) {
            bucket.retain(|r_id| r_id != rel.r_id());
            if bucket.is_empty() {
                self.by_reltype.remove(rel.reltype());
            }
        }
    }

    /// Get the next available relationship ID.
    ///
    /// The smallest `n` such that "rId{n}" is unused, filling in gaps left by
    /// removed relationships.
    fn next_r_id(&self) -> String {
        let limit = self.rels.len() + 1;
        let mut used = FixedBitSet::with_capacity(limit + 1);
        for r_id in self.rels.keys() {
            let Some(digits) = r_id.strip_prefix("rId") else { continue };
            if digits.starts_with('0') {
                continue;
            }
            if let Ok(n) = atoi_simd::parse::<u64, false, false>(digits.as_bytes()) {
                if n <= limit as u64 {
                    used.insert(n as usize);
                }
            }
        }

        // `limit` slots for `limit - 1` keys: one of them is always free
        let n = (1..=limit).find(|n| !used.contains(*n)).unwrap_or(limit);
        let mut r_id = String::with_capacity(8);
        r_id.push_str("rId");
        r_id.push_str(itoa::Buffer::new().format(n));
        r_id
    }

    /// Get an iterator over all relationships, in insertion order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.rels.values()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rels.is_empty()
    }

    /// Serialize relationships to `.rels` XML.
    ///
    /// Internal targets are written relative to this collection's base URI,
    /// so target parts must belong to `package`.
    pub fn to_xml(&self, package: &Package) -> Result<String> {
        let mut xml = String::with_capacity(128 + self.rels.len() * 160);

        xml.push_str(crate::common::xml::XML_DECLARATION);
        xml.push('\n');
        xml.push_str(r#"<Relationships xmlns=""#);
        xml.push_str(namespace::OPC_RELATIONSHIPS);
        xml.push_str(r#"">"#);
        xml.push('\n');

        for rel in self.rels.values() {
            let target_ref = rel.target_ref(package)?;
            xml.push_str(r#"  <Relationship Id=""#);
            xml.push_str(&escape(rel.r_id()));
            xml.push_str(r#"" Type=""#);
            xml.push_str(&escape(rel.reltype()));
            xml.push_str(r#"" Target=""#);
            xml.push_str(&escape(target_ref.as_ref()));
            xml.push('"');
            if rel.is_external() {
                xml.push_str(r#" TargetMode=""#);
                xml.push_str(rel.target_mode().as_str());
                xml.push('"');
            }
            xml.push_str("/>\n");
        }

        xml.push_str("</Relationships>");
        Ok(xml)
    }
}

impl<'a> IntoIterator for &'a Relationships {
    type Item = &'a Relationship;
    type IntoIter = indexmap::map::Values<'a, String, Relationship>;

    fn into_iter(self) -> Self::IntoIter {
        self.rels.values()
    }
}

/// A part's relationship collection, created on first access.
///
/// The base URI is supplied by the owner at access time so that a collection
/// first touched after a rename still starts from the current partname.
#[derive(Debug, Default)]
pub struct LazyRelationships {
    cell: OnceCell<Relationships>,
}

impl LazyRelationships {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the collection, creating it with `base_uri` if this is the first access.
    pub fn get(&self, base_uri: &str) -> &Relationships {
        self.cell.get_or_init(|| Relationships::new(base_uri))
    }

    /// Mutable counterpart of [`LazyRelationships::get`].
    pub fn get_mut(&mut self, base_uri: &str) -> &mut Relationships {
        self.cell.get_or_init(|| Relationships::new(base_uri));
        self.cell
            .get_mut()
            .expect("relationship collection is initialized on first access")
    }

    /// The collection if it has been created.
    pub fn initialized_mut(&mut self) -> Option<&mut Relationships> {
        self.cell.get_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opc::part::BlobPart;

    fn package_with_parts(names: &[&str]) -> (Package, Vec<PartId>) {
        let mut pkg = Package::new();
        let ids = names
            .iter()
            .map(|name| {
                let partname = PackURI::new(*name).unwrap();
                pkg.add_part(Box::new(BlobPart::new(partname, "image/png".to_string(), vec![])))
            })
            .collect();
        (pkg, ids)
    }

    #[test]
    fn test_relationship_target_mode() {
        let (pkg, ids) = package_with_parts(&["/ppt/media/image1.png"]);
        let rel = Relationship::new(
            "rId1".to_string(),
            "http://example.com/rel".to_string(),
            RelTarget::Part(ids[0]),
            "/ppt/slides".to_string(),
        );
        assert_eq!(rel.target_mode(), TargetMode::Internal);
        assert_eq!(rel.target_part().unwrap(), ids[0]);
        assert_eq!(rel.target_ref(&pkg).unwrap(), "../media/image1.png");

        let ext = Relationship::new(
            "rId2".to_string(),
            "http://example.com/rel".to_string(),
            RelTarget::External("https://example.com".to_string()),
            "/ppt/slides".to_string(),
        );
        assert!(ext.is_external());
        assert!(matches!(ext.target_part(), Err(OpcError::InvalidArgument(_))));
        assert_eq!(ext.target_ref(&pkg).unwrap(), "https://example.com");
    }

    #[test]
    fn test_next_r_id_fills_gaps() {
        let (_, ids) = package_with_parts(&["/a.png", "/b.png", "/c.png", "/d.png"]);
        let mut rels = Relationships::new("/ppt");
        assert_eq!(rels.next_r_id(), "rId1");

        rels.add_relationship("t", ids[0].into(), "rId1");
        rels.add_relationship("t", ids[1].into(), "rId3");
        assert_eq!(rels.next_r_id(), "rId2");

        rels.add_relationship("t", ids[2].into(), "rId2");
        assert_eq!(rels.next_r_id(), "rId4");

        rels.pop("rId1").unwrap();
        assert_eq!(rels.next_r_id(), "rId1");

        let mut sparse = Relationships::new("/ppt");
        sparse.add_relationship("t", ids[0].into(), "rId2");
        sparse.add_relationship("t", ids[1].into(), "rId9");
        sparse.add_relationship("t", ids[2].into(), "rId01");
        assert_eq!(sparse.next_r_id(), "rId1");
    }

    #[test]
    fn test_get_or_add_is_idempotent() {
        let (_, ids) = package_with_parts(&["/a.png", "/b.png"]);
        let mut rels = Relationships::new("/ppt");

        let r_id1 = rels.get_or_add("type1", ids[0]);
        assert_eq!(r_id1, "rId1");
        assert_eq!(rels.get_or_add("type1", ids[0]), "rId1");
        assert_eq!(rels.len(), 1);

        // different target or different type means a new relationship
        assert_eq!(rels.get_or_add("type1", ids[1]), "rId2");
        assert_eq!(rels.get_or_add("type2", ids[0]), "rId3");
        assert_eq!(rels.len(), 3);
    }

    #[test]
    fn test_get_or_add_ext_rel() {
        let (_, ids) = package_with_parts(&["/a.png"]);
        let mut rels = Relationships::new("/ppt/slides");
        let r_id = rels.get_or_add_ext_rel("hyperlink", "https://example.com");
        assert_eq!(rels.get_or_add_ext_rel("hyperlink", "https://example.com"), r_id);
        assert_ne!(rels.get_or_add_ext_rel("hyperlink", "https://example.org"), r_id);

        // an internal relationship never matches an external lookup and vice versa
        let internal = rels.get_or_add("hyperlink", ids[0]);
        assert_ne!(internal, r_id);
        assert_eq!(rels.len(), 3);
    }

    #[test]
    fn test_part_with_reltype() {
        let (_, ids) = package_with_parts(&["/a.png", "/b.png"]);
        let mut rels = Relationships::new("/");

        assert!(matches!(
            rels.part_with_reltype("layout"),
            Err(OpcError::RelationshipNotFound(_))
        ));

        rels.get_or_add("layout", ids[0]);
        assert_eq!(rels.part_with_reltype("layout").unwrap(), ids[0]);

        rels.get_or_add("layout", ids[1]);
        assert!(matches!(
            rels.part_with_reltype("layout"),
            Err(OpcError::AmbiguousRelationship(_))
        ));

        rels.get_or_add_ext_rel("link", "https://example.com");
        assert!(matches!(
            rels.part_with_reltype("link"),
            Err(OpcError::InvalidRelationship(_))
        ));
    }

    #[test]
    fn test_overwrite_keeps_reltype_index_consistent() {
        let (_, ids) = package_with_parts(&["/a.png", "/b.png"]);
        let mut rels = Relationships::new("/");
        rels.add_relationship("old", ids[0].into(), "rId1");
        rels.add_relationship("new", ids[1].into(), "rId1");

        assert_eq!(rels.len(), 1);
        assert_eq!(rels.by_reltype("old").count(), 0);
        assert_eq!(rels.part_with_reltype("new").unwrap(), ids[1]);
    }

    #[test]
    fn test_pop() {
        let (_, ids) = package_with_parts(&["/a.png"]);
        let mut rels = Relationships::new("/");
        rels.get_or_add("t", ids[0]);

        let rel = rels.pop("rId1").unwrap();
        assert_eq!(rel.r_id(), "rId1");
        assert!(rels.is_empty());
        assert_eq!(rels.by_reltype("t").count(), 0);
        assert!(matches!(rels.pop("rId1"), Err(OpcError::RelationshipNotFound(_))));
    }

    #[test]
    fn test_to_xml() {
        let (pkg, ids) = package_with_parts(&["/ppt/slideLayouts/slideLayout1.xml"]);
        let mut rels = Relationships::new("/ppt/slides");
        rels.get_or_add("http://example.com/layout", ids[0]);
        rels.get_or_add_ext_rel("http://example.com/link", "https://example.com/?a=1&b=2");

        let xml = rels.to_xml(&pkg).unwrap();
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#));
        assert!(xml.contains(
            r#"<Relationship Id="rId1" Type="http://example.com/layout" Target="../slideLayouts/slideLayout1.xml"/>"#
        ));
        assert!(xml.contains(
            r#"<Relationship Id="rId2" Type="http://example.com/link" Target="https://example.com/?a=1&amp;b=2" TargetMode="External"/>"#
        ));
        assert_eq!(xml.matches("TargetMode").count(), 1);
    }

    #[test]
    fn test_rebase() {
        let (pkg, ids) = package_with_parts(&["/ppt/media/image1.png"]);
        let mut rels = Relationships::new("/ppt/slides");
        rels.get_or_add("image", ids[0]);
        rels.rebase("/ppt");
        assert_eq!(rels.get("rId1").unwrap().target_ref(&pkg).unwrap(), "media/image1.png");
    }

    #[test]
    fn test_lazy_relationships() {
        let mut lazy = LazyRelationships::new();
        assert!(lazy.initialized_mut().is_none());
        assert_eq!(lazy.get("/ppt/slides").base_uri(), "/ppt/slides");
        // the base URI is fixed once created
        assert_eq!(lazy.get_mut("/other").base_uri(), "/ppt/slides");
        assert!(lazy.initialized_mut().is_some());
    }
}
