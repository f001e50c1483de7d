//! Package writer for OPC packages.
//!
//! This module provides functionality to serialize OPC packages,
//! including writing the [Content_Types].xml, relationships, and all parts.

use crate::common::xml::XML_DECLARATION;
use crate::opc::constants::{content_type as ct, namespace};
use crate::opc::error::Result;
use crate::opc::package::Package;
use crate::opc::packuri::{CONTENT_TYPES_URI, PACKAGE_URI, PackURI};
use crate::opc::phys_pkg::PhysPkgWriter;
use quick_xml::escape::escape;
use std::collections::BTreeMap;
use std::io::{Seek, Write};
use tracing::{debug, trace};

/// Compression applied to every archive member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    Deflated,
    Stored,
}

/// Options for saving a package.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub compression: Compression,
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}

/// Package writer that serializes an OPC package to a ZIP archive.
///
/// This is the main entry point for saving packages. It handles writing:
/// - [Content_Types].xml
/// - _rels/.rels (package relationships)
/// - All reachable parts and their relationships
pub struct PackageWriter;

impl PackageWriter {
    /// Write an OPC package to a stream.
    ///
    /// # Arguments
    /// * `writer` - Destination of the ZIP archive
    /// * `package` - The OPC package to write
    /// * `options` - Compression settings
    pub fn write<W: Write + Seek>(
        writer: W,
        package: &Package,
        options: &SaveOptions,
    ) -> Result<()> {
        let mut phys_writer = PhysPkgWriter::new(writer, options.compression);

        Self::write_content_types(&mut phys_writer, package)?;
        Self::write_pkg_rels(&mut phys_writer, package)?;
        let part_count = Self::write_parts(&mut phys_writer, package)?;

        phys_writer.finish()?;
        debug!(parts = part_count, package_rels = package.rels().len(), "wrote package");
        Ok(())
    }

    /// Write the [Content_Types].xml member.
    fn write_content_types<W: Write + Seek>(
        phys_writer: &mut PhysPkgWriter<W>,
        package: &Package,
    ) -> Result<()> {
        let cti = ContentTypesItem::from_package(package);
        phys_writer.write(&PackURI::new(CONTENT_TYPES_URI)?, cti.to_xml().as_bytes())
    }

    /// Write package-level relationships.
    fn write_pkg_rels<W: Write + Seek>(
        phys_writer: &mut PhysPkgWriter<W>,
        package: &Package,
    ) -> Result<()> {
        let rels_uri = PackURI::new(PACKAGE_URI)?.rels_uri()?;
        let rels_xml = package.rels().to_xml(package)?;
        phys_writer.write(&rels_uri, rels_xml.as_bytes())
    }

    /// Write all reachable parts and their relationships.
    fn write_parts<W: Write + Seek>(
        phys_writer: &mut PhysPkgWriter<W>,
        package: &Package,
    ) -> Result<usize> {
        let mut count = 0;
        for part in package.parts() {
            let blob = part.blob();
            trace!(partname = %part.partname(), bytes = blob.len(), "writing part");
            phys_writer.write(part.partname(), &blob)?;

            if !part.rels().is_empty() {
                let rels_uri = part.partname().rels_uri()?;
                let rels_xml = part.rels().to_xml(package)?;
                phys_writer.write(&rels_uri, rels_xml.as_bytes())?;
            }
            count += 1;
        }
        Ok(count)
    }
}

/// Helper for building [Content_Types].xml content.
///
/// Manages Default and Override elements for content type mapping.
#[derive(Debug)]
struct ContentTypesItem {
    /// Default content types by extension
    defaults: BTreeMap<String, String>,

    /// Override content types by partname
    overrides: BTreeMap<String, String>,
}

impl ContentTypesItem {
    fn new() -> Self {
        let mut defaults = BTreeMap::new();
        defaults.insert("rels".to_string(), ct::OPC_RELATIONSHIPS.to_string());
        defaults.insert("xml".to_string(), ct::XML.to_string());

        Self {
            defaults,
            overrides: BTreeMap::new(),
        }
    }

    /// Build ContentTypesItem from the reachable parts of a package.
    fn from_package(package: &Package) -> Self {
        let mut cti = Self::new();
        for part in package.parts() {
            cti.add_content_type(part.partname(), part.content_type());
        }
        cti
    }

    /// Add a content type for a part.
    ///
    /// Uses a default mapping if the extension matches a well-known type,
    /// otherwise uses an override for the specific partname.
    fn add_content_type(&mut self, partname: &PackURI, content_type: &str) {
        let ext = partname.ext().to_lowercase();
        if Self::is_default_content_type(&ext, content_type) {
            self.defaults.insert(ext, content_type.to_string());
        } else {
            self.overrides
                .insert(partname.to_string(), content_type.to_string());
        }
    }

    /// Check if an extension/content-type pair is a standard default.
    fn is_default_content_type(ext: &str, content_type: &str) -> bool {
        matches!(
            (ext, content_type),
            ("rels", ct::OPC_RELATIONSHIPS)
                | ("xml", ct::XML)
                | ("bin", ct::OFC_OLE_OBJECT)
                | ("bmp", ct::BMP)
                | ("emf", ct::X_EMF)
                | ("gif", ct::GIF)
                | ("jpe", ct::JPEG)
                | ("jpeg", ct::JPEG)
                | ("jpg", ct::JPEG)
                | ("png", ct::PNG)
                | ("tif", ct::TIFF)
                | ("tiff", ct::TIFF)
                | ("vml", ct::OFC_VML_DRAWING)
                | ("wmf", ct::X_WMF)
        )
    }

    /// Generate the XML for [Content_Types].xml, entries sorted by key.
    fn to_xml(&self) -> String {
        let entries = self.defaults.len() + self.overrides.len();
        let mut xml = String::with_capacity(256 + entries * 128);

        xml.push_str(XML_DECLARATION);
        xml.push('\n');
        xml.push_str(r#"<Types xmlns=""#);
        xml.push_str(namespace::OPC_CONTENT_TYPES);
        xml.push_str(r#"">"#);
        xml.push('\n');

        for (ext, content_type) in &self.defaults {
            xml.push_str(r#"  <Default Extension=""#);
            xml.push_str(&escape(ext.as_str()));
            xml.push_str(r#"" ContentType=""#);
            xml.push_str(&escape(content_type.as_str()));
            xml.push_str("\"/>\n");
        }

        for (partname, content_type) in &self.overrides {
            xml.push_str(r#"  <Override PartName=""#);
            xml.push_str(&escape(partname.as_str()));
            xml.push_str(r#"" ContentType=""#);
            xml.push_str(&escape(content_type.as_str()));
            xml.push_str("\"/>\n");
        }

        xml.push_str("</Types>");
        xml
    }
}
