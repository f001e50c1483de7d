//! Builds small OPC archives for tests.

use crate::opc::constants::content_type as ct;
use crate::opc::packuri::{CONTENT_TYPES_URI, PackURI};
use crate::opc::phys_pkg::PhysPkgWriter;
use crate::opc::pkgwriter::Compression;
use indexmap::IndexMap;
use quick_xml::escape::escape;
use std::io::Cursor;

struct FixtureRel {
    r_id: String,
    reltype: String,
    target: String,
    external: bool,
}

/// Zip archive under construction: content types, members and `.rels` files.
pub(crate) struct PackageFixture {
    defaults: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
    members: Vec<(String, Vec<u8>)>,
    rels: IndexMap<String, Vec<FixtureRel>>,
}

impl PackageFixture {
    pub(crate) fn new() -> Self {
        Self {
            defaults: vec![
                ("rels".to_string(), ct::OPC_RELATIONSHIPS.to_string()),
                ("xml".to_string(), ct::XML.to_string()),
            ],
            overrides: Vec::new(),
            members: Vec::new(),
            rels: IndexMap::new(),
        }
    }

    pub(crate) fn with_content_type_default(mut self, ext: &str, content_type: &str) -> Self {
        self.defaults.push((ext.to_string(), content_type.to_string()));
        self
    }

    /// Add a member with an Override content type.
    pub(crate) fn with_part(mut self, partname: &str, content_type: &str, blob: &[u8]) -> Self {
        self.overrides.push((partname.to_string(), content_type.to_string()));
        self.members.push((partname.to_string(), blob.to_vec()));
        self
    }

    /// Add a member with no Override; its type comes from the defaults, if any.
    pub(crate) fn with_untyped_member(mut self, partname: &str, blob: &[u8]) -> Self {
        self.members.push((partname.to_string(), blob.to_vec()));
        self
    }

    /// Add an internal relationship from `source` (`/` for the package).
    pub(crate) fn with_rel(self, source: &str, r_id: &str, reltype: &str, target: &str) -> Self {
        self.push_rel(source, r_id, reltype, target, false)
    }

    pub(crate) fn with_ext_rel(
        self,
        source: &str,
        r_id: &str,
        reltype: &str,
        target: &str,
    ) -> Self {
        self.push_rel(source, r_id, reltype, target, true)
    }

    fn push_rel(
        mut self,
        source: &str,
        r_id: &str,
        reltype: &str,
        target: &str,
        external: bool,
    ) -> Self {
        self.rels.entry(source.to_string()).or_default().push(FixtureRel {
            r_id: r_id.to_string(),
            reltype: reltype.to_string(),
            target: target.to_string(),
            external,
        });
        self
    }

    fn content_types_xml(&self) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
        );
        for (ext, content_type) in &self.defaults {
            xml.push_str(&format!(
                r#"<Default Extension="{}" ContentType="{}"/>"#,
                escape(ext.as_str()),
                escape(content_type.as_str())
            ));
        }
        for (partname, content_type) in &self.overrides {
            xml.push_str(&format!(
                r#"<Override PartName="{}" ContentType="{}"/>"#,
                escape(partname.as_str()),
                escape(content_type.as_str())
            ));
        }
        xml.push_str("</Types>");
        xml
    }

    fn rels_xml(rels: &[FixtureRel]) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        );
        for rel in rels {
            xml.push_str(&format!(
                r#"<Relationship Id="{}" Type="{}" Target="{}"{}/>"#,
                escape(rel.r_id.as_str()),
                escape(rel.reltype.as_str()),
                escape(rel.target.as_str()),
                if rel.external { r#" TargetMode="External""# } else { "" }
            ));
        }
        xml.push_str("</Relationships>");
        xml
    }

    /// Bytes of the finished zip archive.
    pub(crate) fn build(self) -> Vec<u8> {
        let mut writer = PhysPkgWriter::new(Cursor::new(Vec::new()), Compression::Deflated);

        let content_types_uri = PackURI::new(CONTENT_TYPES_URI).unwrap();
        writer
            .write(&content_types_uri, self.content_types_xml().as_bytes())
            .unwrap();

        for (source, rels) in &self.rels {
            let source = PackURI::new(source.as_str()).unwrap();
            let rels_uri = source.rels_uri().unwrap();
            writer.write(&rels_uri, Self::rels_xml(rels).as_bytes()).unwrap();
        }

        for (partname, blob) in &self.members {
            writer.write(&PackURI::new(partname.as_str()).unwrap(), blob).unwrap();
        }

        writer.finish().unwrap().into_inner()
    }
}
