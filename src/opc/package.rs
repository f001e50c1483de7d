//! Objects that implement reading and writing OPC packages.
//!
//! This module provides the main Package type, which represents an Open Packaging
//! Convention package in memory. The package owns every part in an arena and
//! hands out `PartId` handles; relationships refer to parts by handle, so the
//! part graph may contain cycles.
use crate::opc::constants::relationship_type;
use crate::opc::error::{OpcError, Result};
use crate::opc::loader::PackageLoader;
use crate::opc::packuri::{PACKAGE_URI, PackURI};
use crate::opc::part::{Part, PartFactory};
use crate::opc::phys_pkg::PhysPkgReader;
use crate::opc::pkgreader::PackageReader;
use crate::opc::pkgwriter::{PackageWriter, SaveOptions};
use crate::opc::rel::{RelTarget, Relationship, Relationships};
use fixedbitset::FixedBitSet;
use smallvec::SmallVec;
use std::collections::HashSet;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

/// Handle to a part owned by a [`Package`].
///
/// Handles are only meaningful for the package that issued them. Two handles
/// are equal exactly when they designate the same part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartId(usize);

impl PartId {
    /// Position of the part in its package's arena.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Main API class for working with OPC packages.
///
/// Package represents an Open Packaging Convention package in memory,
/// providing access to parts, relationships, and package-level operations.
/// Parts are only considered part of the package while they are reachable
/// from the package relationships; unreachable parts are neither traversed
/// nor saved.
#[derive(Debug)]
pub struct Package {
    /// Package-level relationships
    rels: Relationships,

    /// Arena of every part ever added, indexed by `PartId`
    parts: Vec<Box<dyn Part>>,
}

impl Package {
    /// Create a new empty OPC package.
    pub fn new() -> Self {
        Self {
            rels: Relationships::new(PACKAGE_URI),
            parts: Vec::new(),
        }
    }

    /// Open an OPC package from a file.
    ///
    /// # Arguments
    /// * `path` - Path to the package file (.pptx, .docx, .xlsx, etc.)
    ///
    /// # Example
    /// ```no_run
    /// use litchi_opc::Package;
    ///
    /// let pkg = Package::open("deck.pptx").unwrap();
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_factory(path, PartFactory::standard())
    }

    /// Open an OPC package from a file, constructing parts with `factory`.
    pub fn open_with_factory<P: AsRef<Path>>(path: P, factory: &PartFactory) -> Result<Self> {
        let phys_reader = PhysPkgReader::open(path)?;
        Self::from_phys_reader(phys_reader, factory)
    }

    /// Load an OPC package from a reader.
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        Self::from_reader_with_factory(reader, PartFactory::standard())
    }

    pub fn from_reader_with_factory<R: Read + Seek>(
        reader: R,
        factory: &PartFactory,
    ) -> Result<Self> {
        let phys_reader = PhysPkgReader::from_reader(reader)?;
        Self::from_phys_reader(phys_reader, factory)
    }

    /// Load an OPC package from the bytes of a zip archive.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_bytes_with_factory(data, PartFactory::standard())
    }

    pub fn from_bytes_with_factory(data: Vec<u8>, factory: &PartFactory) -> Result<Self> {
        let phys_reader = PhysPkgReader::from_bytes(data)?;
        Self::from_phys_reader(phys_reader, factory)
    }

    fn from_phys_reader(phys_reader: PhysPkgReader, factory: &PartFactory) -> Result<Self> {
        let pkg_reader = PackageReader::from_phys_reader(phys_reader)?;
        PackageLoader::load(pkg_reader, factory)
    }

    /// Add a part to the package arena and return its handle.
    ///
    /// The part only becomes reachable once a relationship targets it.
    pub fn add_part(&mut self, part: Box<dyn Part>) -> PartId {
        self.parts.push(part);
        PartId(self.parts.len() - 1)
    }

    /// Get a part by handle.
    pub fn part(&self, id: PartId) -> Result<&dyn Part> {
        match self.parts.get(id.0) {
            Some(part) => Ok(part.as_ref()),
            None => Err(OpcError::PartNotFound(format!("no part with id {}", id.0))),
        }
    }

    /// Get a mutable reference to a part by handle.
    pub fn part_mut(&mut self, id: PartId) -> Result<&mut dyn Part> {
        match self.parts.get_mut(id.0) {
            Some(part) => Ok(&mut **part),
            None => Err(OpcError::PartNotFound(format!("no part with id {}", id.0))),
        }
    }

    /// Find a reachable part by partname.
    pub fn part_by_partname(&self, partname: &PackURI) -> Option<PartId> {
        self.iter_parts()
            .find(|id| self.parts[id.0].partname() == partname)
    }

    /// Give a part a new partname.
    ///
    /// # Errors
    /// `InvalidPackUri` if `partname` is not a valid partname, `PartNotFound`
    /// for an unknown handle.
    pub fn rename_part(&mut self, id: PartId, partname: &str) -> Result<()> {
        let partname = PackURI::new(partname)?;
        self.part_mut(id)?.set_partname(partname);
        Ok(())
    }

    /// Number of parts in the arena, reachable or not.
    #[inline]
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Handles of every part reachable from the package relationships.
    ///
    /// Each part is yielded once, in depth-first order, even when the graph
    /// contains cycles.
    pub fn iter_parts(&self) -> IterParts<'_> {
        IterParts {
            rels: self.iter_rels(),
            seen: FixedBitSet::with_capacity(self.parts.len()),
        }
    }

    /// Every relationship reachable from the package, each yielded once.
    ///
    /// A part's relationships are visited the first time the part is reached.
    /// External relationships are yielded but not followed.
    pub fn iter_rels(&self) -> IterRels<'_> {
        let mut stack = SmallVec::new();
        stack.push((&self.rels).into_iter());
        IterRels {
            package: self,
            stack,
            visited: FixedBitSet::with_capacity(self.parts.len()),
        }
    }

    /// Reachable parts, in `iter_parts` order.
    pub fn parts(&self) -> impl Iterator<Item = &dyn Part> {
        self.iter_parts().map(|id| &*self.parts[id.0] as &dyn Part)
    }

    /// Get the next available partname for a template such as
    /// `/ppt/slides/slide%d.xml`.
    ///
    /// The template must contain `%d` exactly once. Candidates are numbered
    /// from one past the count of reachable partnames sharing the template's
    /// prefix, probing downwards, so the first gap at the top of the range is
    /// filled.
    pub fn next_partname(&self, template: &str) -> Result<PackURI> {
        let placeholders: SmallVec<[usize; 2]> =
            memchr::memmem::find_iter(template.as_bytes(), b"%d").collect();
        let &[pos] = placeholders.as_slice() else {
            return Err(OpcError::InvalidArgument(format!(
                "partname template must contain '%d' exactly once, got '{}'",
                template
            )));
        };
        let (prefix, suffix) = (&template[..pos], &template[pos + 2..]);

        let partnames: HashSet<&str> = self.parts().map(|part| part.partname().as_str()).collect();
        let n0 = partnames.iter().filter(|name| name.starts_with(prefix)).count();

        let mut buffer = itoa::Buffer::new();
        let mut candidate = String::with_capacity(template.len() + 8);
        for n in (1..=n0 + 1).rev() {
            candidate.clear();
            candidate.push_str(prefix);
            candidate.push_str(buffer.format(n));
            candidate.push_str(suffix);
            if !partnames.contains(candidate.as_str()) {
                return PackURI::new(candidate);
            }
        }
        // n0 + 1 distinct candidates against n0 names with the same prefix
        unreachable!("partname candidates exhausted for template '{}'", template)
    }

    /// Get the package-level relationships.
    #[inline]
    pub fn rels(&self) -> &Relationships {
        &self.rels
    }

    /// Get mutable access to the package-level relationships.
    #[inline]
    pub fn rels_mut(&mut self) -> &mut Relationships {
        &mut self.rels
    }

    /// Install a package relationship with a known rId.
    pub fn load_rel(&mut self, reltype: &str, target: RelTarget, r_id: &str) -> &Relationship {
        self.rels.add_relationship(reltype, target, r_id)
    }

    /// Relate the package to a part, reusing an existing relationship of the
    /// same type to the same part.
    ///
    /// # Returns
    /// The relationship ID (rId)
    pub fn relate_to(&mut self, target: PartId, reltype: &str) -> String {
        self.rels.get_or_add(reltype, target)
    }

    /// Relate the package to an external reference.
    pub fn relate_to_ext(&mut self, target_ref: &str, reltype: &str) -> String {
        self.rels.get_or_add_ext_rel(reltype, target_ref)
    }

    /// Get the single part the package relates to with `reltype`.
    pub fn part_related_by(&self, reltype: &str) -> Result<PartId> {
        self.rels.part_with_reltype(reltype)
    }

    /// Get the part targeted by package relationship `r_id`.
    pub fn related_part(&self, r_id: &str) -> Result<PartId> {
        self.rels.related_part(r_id)
    }

    /// The main document part: presentation.xml, document.xml or workbook.xml.
    pub fn main_document_part(&self) -> Result<PartId> {
        self.part_related_by(relationship_type::OFFICE_DOCUMENT)
    }

    /// Save the package to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.save_to(std::io::BufWriter::new(file))
    }

    /// Save the package to a writer with default options.
    pub fn save_to<W: Write + Seek>(&self, writer: W) -> Result<()> {
        self.save_with_options(writer, &SaveOptions::default())
    }

    pub fn save_with_options<W: Write + Seek>(
        &self,
        writer: W,
        options: &SaveOptions,
    ) -> Result<()> {
        PackageWriter::write(writer, self, options)
    }

    /// Serialize the package to the bytes of a zip archive.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.save_to(&mut cursor)?;
        Ok(cursor.into_inner())
    }
}

impl Default for Package {
    fn default() -> Self {
        Self::new()
    }
}

/// Depth-first iterator over reachable relationships. See [`Package::iter_rels`].
pub struct IterRels<'a> {
    package: &'a Package,
    stack: SmallVec<[indexmap::map::Values<'a, String, Relationship>; 8]>,
    visited: FixedBitSet,
}

impl<'a> Iterator for IterRels<'a> {
    type Item = &'a Relationship;

    fn next(&mut self) -> Option<&'a Relationship> {
        loop {
            let rel = match self.stack.last_mut()?.next() {
                Some(rel) => rel,
                None => {
                    self.stack.pop();
                    continue;
                },
            };
            if let RelTarget::Part(id) = rel.target()
                && let Some(part) = self.package.parts.get(id.0)
                && !self.visited.put(id.0)
            {
                self.stack.push(part.rels().into_iter());
            }
            return Some(rel);
        }
    }
}

/// Iterator over reachable part handles. See [`Package::iter_parts`].
pub struct IterParts<'a> {
    rels: IterRels<'a>,
    seen: FixedBitSet,
}

impl Iterator for IterParts<'_> {
    type Item = PartId;

    fn next(&mut self) -> Option<PartId> {
        loop {
            let rel = self.rels.next()?;
            if let RelTarget::Part(id) = rel.target()
                && id.0 < self.seen.len()
                && !self.seen.put(id.0)
            {
                return Some(*id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opc::constants::{content_type as ct, relationship_type as rt};
    use crate::opc::part::{BlobPart, XmlPart};
    use crate::opc::testing::PackageFixture;
    use proptest::prelude::*;

    fn blob_part(pkg: &mut Package, partname: &str) -> PartId {
        let partname = PackURI::new(partname).unwrap();
        let content_type = "application/octet-stream".to_string();
        pkg.add_part(Box::new(BlobPart::new(partname, content_type, vec![])))
    }

    fn partnames(pkg: &Package) -> Vec<String> {
        pkg.parts().map(|part| part.partname().to_string()).collect()
    }

    fn rel_entries(part: &dyn Part, pkg: &Package) -> Vec<(String, String, String)> {
        part.rels()
            .iter()
            .map(|rel| {
                let target_ref = rel.target_ref(pkg).unwrap().into_owned();
                (rel.r_id().to_string(), rel.reltype().to_string(), target_ref)
            })
            .collect()
    }

    #[test]
    fn test_package_moves_across_threads() {
        let mut pkg = Package::new();
        let id = blob_part(&mut pkg, "/ppt/media/image1.png");
        pkg.relate_to(id, rt::IMAGE);

        let handle = std::thread::spawn(move || partnames(&pkg));
        assert_eq!(handle.join().unwrap(), vec!["/ppt/media/image1.png"]);
    }

    #[test]
    fn test_iter_parts_tolerates_cycles() {
        let mut pkg = Package::new();
        let a = blob_part(&mut pkg, "/a.bin");
        let b = blob_part(&mut pkg, "/b.bin");
        let c = blob_part(&mut pkg, "/c.bin");
        let orphan = blob_part(&mut pkg, "/orphan.bin");

        pkg.relate_to(a, "t");
        pkg.part_mut(a).unwrap().relate_to(b, "t");
        pkg.part_mut(b).unwrap().relate_to(a, "t");
        pkg.part_mut(b).unwrap().relate_to(c, "t");
        pkg.part_mut(c).unwrap().relate_to(c, "t");

        let ids: Vec<PartId> = pkg.iter_parts().collect();
        assert_eq!(ids, vec![a, b, c]);
        assert!(!ids.contains(&orphan));
        assert_eq!(pkg.iter_rels().count(), 5);
        assert_eq!(pkg.part_count(), 4);
    }

    #[test]
    fn test_iter_rels_depth_first_order() {
        let mut pkg = Package::new();
        let a = blob_part(&mut pkg, "/a.bin");
        let b = blob_part(&mut pkg, "/b.bin");
        let c = blob_part(&mut pkg, "/c.bin");

        pkg.relate_to(a, "t");
        pkg.relate_to(c, "t");
        pkg.part_mut(a).unwrap().relate_to(b, "t");

        assert_eq!(pkg.iter_parts().collect::<Vec<_>>(), vec![a, b, c]);
        let targets: Vec<PartId> = pkg.iter_rels().map(|rel| rel.target_part().unwrap()).collect();
        assert_eq!(targets, vec![a, b, c]);
    }

    #[test]
    fn test_external_rels_not_followed() {
        let mut pkg = Package::new();
        let a = blob_part(&mut pkg, "/a.bin");
        pkg.relate_to(a, "t");
        pkg.part_mut(a).unwrap().relate_to_ext("https://example.com", rt::HYPERLINK);

        let rels: Vec<&Relationship> = pkg.iter_rels().collect();
        assert_eq!(rels.len(), 2);
        assert!(rels[1].is_external());
        assert_eq!(pkg.iter_parts().count(), 1);
    }

    #[test]
    fn test_iter_is_restartable() {
        let mut pkg = Package::new();
        let a = blob_part(&mut pkg, "/a.bin");
        pkg.relate_to(a, "t");
        assert_eq!(pkg.iter_parts().count(), 1);
        assert_eq!(pkg.iter_parts().count(), 1);
    }

    #[test]
    fn test_next_partname() {
        let mut pkg = Package::new();
        let template = "/ppt/slides/slide%d.xml";
        assert_eq!(pkg.next_partname(template).unwrap(), "/ppt/slides/slide1.xml");

        for n in [1, 2, 4] {
            let id = blob_part(&mut pkg, &format!("/ppt/slides/slide{}.xml", n));
            pkg.relate_to(id, rt::SLIDE);
        }
        assert_eq!(pkg.next_partname(template).unwrap(), "/ppt/slides/slide3.xml");

        let id = blob_part(&mut pkg, "/ppt/slides/slide3.xml");
        pkg.relate_to(id, rt::SLIDE);
        assert_eq!(pkg.next_partname(template).unwrap(), "/ppt/slides/slide5.xml");

        // unreachable parts do not occupy a name
        blob_part(&mut pkg, "/ppt/media/image1.png");
        assert_eq!(pkg.next_partname("/ppt/media/image%d.png").unwrap(), "/ppt/media/image1.png");
    }

    #[test]
    fn test_next_partname_rejects_bad_template() {
        let pkg = Package::new();
        for template in ["/ppt/slides/slide.xml", "/ppt/slide%d/slide%d.xml"] {
            assert!(matches!(pkg.next_partname(template), Err(OpcError::InvalidArgument(_))));
        }
    }

    #[test]
    fn test_part_related_by() {
        let mut pkg = Package::new();
        assert!(matches!(
            pkg.main_document_part(),
            Err(OpcError::RelationshipNotFound(_))
        ));

        let doc = blob_part(&mut pkg, "/ppt/presentation.xml");
        let r_id = pkg.relate_to(doc, rt::OFFICE_DOCUMENT);
        assert_eq!(pkg.relate_to(doc, rt::OFFICE_DOCUMENT), r_id);
        assert_eq!(pkg.main_document_part().unwrap(), doc);
        assert_eq!(pkg.related_part(&r_id).unwrap(), doc);

        let other = blob_part(&mut pkg, "/ppt/other.xml");
        pkg.relate_to(other, rt::OFFICE_DOCUMENT);
        assert!(matches!(
            pkg.main_document_part(),
            Err(OpcError::AmbiguousRelationship(_))
        ));
    }

    #[test]
    fn test_load_rel_overwrites() {
        let mut pkg = Package::new();
        let a = blob_part(&mut pkg, "/a.bin");
        let b = blob_part(&mut pkg, "/b.bin");
        pkg.load_rel("t", RelTarget::Part(a), "rId7");
        pkg.load_rel("t", RelTarget::Part(b), "rId7");
        assert_eq!(pkg.rels().len(), 1);
        assert_eq!(pkg.related_part("rId7").unwrap(), b);
    }

    #[test]
    fn test_part_lookup() {
        let mut pkg = Package::new();
        let a = blob_part(&mut pkg, "/a.bin");
        assert!(matches!(pkg.part(PartId(5)), Err(OpcError::PartNotFound(_))));
        assert!(pkg.part_mut(PartId(5)).is_err());

        let partname = PackURI::new("/a.bin").unwrap();
        assert_eq!(pkg.part_by_partname(&partname), None);
        pkg.relate_to(a, "t");
        assert_eq!(pkg.part_by_partname(&partname), Some(a));
    }

    #[test]
    fn test_rename_part() {
        let mut pkg = Package::new();
        let a = blob_part(&mut pkg, "/ppt/a.bin");
        let b = blob_part(&mut pkg, "/ppt/media/b.bin");
        pkg.relate_to(a, "t");
        pkg.part_mut(a).unwrap().relate_to(b, "t");

        assert!(matches!(pkg.rename_part(a, "no-slash"), Err(OpcError::InvalidPackUri(_))));
        pkg.rename_part(a, "/ppt/sub/a.bin").unwrap();

        let rel = pkg.part(a).unwrap().rels().get("rId1").unwrap();
        assert_eq!(rel.target_ref(&pkg).unwrap(), "../media/b.bin");
    }

    #[test]
    fn test_round_trip() {
        let data = PackageFixture::new()
            .with_content_type_default("png", ct::PNG)
            .with_part("/ppt/presentation.xml", ct::PML_PRESENTATION_MAIN, br#"<p:presentation xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><p:sldIdLst><p:sldId id="256" r:id="rId2"/></p:sldIdLst></p:presentation>"#)
            .with_part("/ppt/slides/slide1.xml", ct::PML_SLIDE, br#"<p:sld xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:cSld name="A &amp; B"/></p:sld>"#)
            .with_part("/ppt/media/image1.png", ct::PNG, b"\x89PNG\r\n")
            .with_rel("/", "rId1", rt::OFFICE_DOCUMENT, "ppt/presentation.xml")
            .with_rel("/ppt/presentation.xml", "rId2", rt::SLIDE, "slides/slide1.xml")
            .with_rel("/ppt/slides/slide1.xml", "rId1", rt::IMAGE, "../media/image1.png")
            .with_rel("/ppt/slides/slide1.xml", "rId2", rt::SLIDE, "../presentation.xml")
            .with_ext_rel(
                "/ppt/slides/slide1.xml",
                "rId3",
                rt::HYPERLINK,
                "https://example.com/?q=1&r=2",
            )
            .build();

        let pkg = Package::from_bytes(data).unwrap();
        let reloaded = Package::from_bytes(pkg.to_bytes().unwrap()).unwrap();

        assert_eq!(partnames(&pkg), partnames(&reloaded));
        for (left, right) in pkg.parts().zip(reloaded.parts()) {
            assert_eq!(left.content_type(), right.content_type());
            assert_eq!(left.blob(), right.blob());
            assert_eq!(rel_entries(left, &pkg), rel_entries(right, &reloaded));
        }

        let slide = reloaded
            .part_by_partname(&PackURI::new("/ppt/slides/slide1.xml").unwrap())
            .unwrap();
        let slide = reloaded.part(slide).unwrap();
        assert!(slide.as_xml_part().is_some());
        assert_eq!(
            slide.rels().get("rId3").unwrap().target(),
            &RelTarget::External("https://example.com/?q=1&r=2".to_string())
        );
        let c_sld = slide.as_xml_part().unwrap().element().find("cSld").unwrap();
        assert_eq!(c_sld.attribute("name").as_deref(), Some("A & B"));
    }

    #[test]
    fn test_save_to_path() {
        let mut pkg = Package::new();
        let element =
            crate::common::xml::parse_xml(b"<p:presentation xmlns:p=\"urn:p\"/>").unwrap();
        let doc = pkg.add_part(Box::new(XmlPart::new(
            PackURI::new("/ppt/presentation.xml").unwrap(),
            ct::PML_PRESENTATION_MAIN.to_string(),
            element,
        )));
        pkg.relate_to(doc, rt::OFFICE_DOCUMENT);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.pptx");
        pkg.save(&path).unwrap();

        let loaded = Package::open(&path).unwrap();
        let doc = loaded.main_document_part().unwrap();
        assert_eq!(loaded.part(doc).unwrap().partname(), "/ppt/presentation.xml");
        assert_eq!(loaded.part(doc).unwrap().content_type(), ct::PML_PRESENTATION_MAIN);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Package::open(dir.path().join("missing.pptx"));
        assert!(matches!(result, Err(OpcError::PackageNotFound(_))));
    }

    fn graph_strategy() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
        (1usize..10).prop_flat_map(|n| {
            let edges = prop::collection::vec((0..=n, 0..n), 0..30);
            (Just(n), edges)
        })
    }

    proptest! {
        #[test]
        fn prop_traversal_visits_reachable_parts_once((n, edges) in graph_strategy()) {
            let mut pkg = Package::new();
            let ids: Vec<PartId> = (0..n)
                .map(|i| blob_part(&mut pkg, &format!("/parts/part{}.bin", i)))
                .collect();
            // source `n` stands for the package itself
            for (src, dst) in &edges {
                if *src == n {
                    pkg.relate_to(ids[*dst], "t");
                } else {
                    pkg.part_mut(ids[*src]).unwrap().relate_to(ids[*dst], "t");
                }
            }

            let parts: Vec<PartId> = pkg.iter_parts().collect();
            let unique: HashSet<PartId> = parts.iter().copied().collect();
            prop_assert_eq!(parts.len(), unique.len());

            let mut targets = HashSet::new();
            let mut rel_count = 0;
            for rel in pkg.iter_rels() {
                targets.insert(rel.target_part().unwrap());
                rel_count += 1;
            }
            prop_assert_eq!(&targets, &unique);

            let expected: usize = pkg.rels().len()
                + parts.iter().map(|id| pkg.part(*id).unwrap().rels().len()).sum::<usize>();
            prop_assert_eq!(rel_count, expected);
        }
    }
}
